use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Input ball (center + radius), user-facing type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub r: f64,
}

impl Ball {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, r: f64) -> Self {
        Self { x, y, z, r }
    }
}

/// Sphere with nalgebra center, used for input balls, bounding spheres and tangent spheres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Point3<f64>,
    pub r: f64,
}

impl Sphere {
    #[must_use]
    pub const fn new(center: Point3<f64>, r: f64) -> Self {
        Self { center, r }
    }

    #[must_use]
    pub const fn from_coords(x: f64, y: f64, z: f64, r: f64) -> Self {
        Self {
            center: Point3::new(x, y, z),
            r,
        }
    }

    #[must_use]
    pub const fn from_ball(ball: &Ball) -> Self {
        Self::from_coords(ball.x, ball.y, ball.z, ball.r)
    }

    #[must_use]
    pub fn to_ball(&self) -> Ball {
        Ball::new(self.center.x, self.center.y, self.center.z, self.r)
    }

    /// Same center, different radius
    #[must_use]
    pub const fn with_radius(&self, r: f64) -> Self {
        Self::new(self.center, r)
    }
}

impl From<Ball> for Sphere {
    fn from(ball: Ball) -> Self {
        Self::from_ball(&ball)
    }
}

/// Convert a slice of balls to spheres
#[must_use]
pub fn spheres_from_balls(balls: &[Ball]) -> Vec<Sphere> {
    balls.iter().map(Sphere::from_ball).collect()
}
