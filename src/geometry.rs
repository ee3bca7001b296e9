use nalgebra::{Point3, Vector3};

use crate::types::Sphere;

/// Tolerance for floating-point comparisons.
/// Every tangency, intersection and containment test goes through it.
pub const EPSILON: f64 = 1e-10;

/// Epsilon-based floating point comparisons.
pub mod float_cmp {
    use super::EPSILON;

    #[inline]
    pub const fn eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= EPSILON
    }

    #[inline]
    pub const fn lt(a: f64, b: f64) -> bool {
        a + EPSILON < b
    }

    #[inline]
    pub const fn gt(a: f64, b: f64) -> bool {
        a - EPSILON > b
    }

    #[inline]
    pub const fn le(a: f64, b: f64) -> bool {
        a < b + EPSILON
    }

    #[inline]
    pub const fn ge(a: f64, b: f64) -> bool {
        a + EPSILON > b
    }
}

use float_cmp::{eq, ge, le, lt};

#[inline]
pub fn distance(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    (b - a).norm()
}

#[inline]
pub fn point_equals(a: &Point3<f64>, b: &Point3<f64>) -> bool {
    eq(a.x, b.x) && eq(a.y, b.y) && eq(a.z, b.z)
}

/// Check if two spheres intersect (overlap by more than the tolerance)
#[inline]
pub fn sphere_intersects_sphere(a: &Sphere, b: &Sphere) -> bool {
    lt(distance(&a.center, &b.center), a.r + b.r)
}

/// Intersection test with both radii summed with an extra margin
#[inline]
pub fn sphere_intersects_sphere_with_expansion(a: &Sphere, b: &Sphere, expansion: f64) -> bool {
    lt(distance(&a.center, &b.center), a.r + b.r + expansion)
}

/// Check if two spheres touch externally within the tolerance
#[inline]
pub fn sphere_touches_sphere(a: &Sphere, b: &Sphere) -> bool {
    eq(distance(&a.center, &b.center), a.r + b.r)
}

/// Check if sphere `a` contains sphere `b`
#[inline]
pub fn sphere_contains_sphere(a: &Sphere, b: &Sphere) -> bool {
    ge(a.r, b.r) && le(distance(&a.center, &b.center), a.r - b.r)
}

/// Check if spheres are equal
#[inline]
pub fn spheres_equal(a: &Sphere, b: &Sphere) -> bool {
    eq(a.r, b.r) && point_equals(&a.center, &b.center)
}

/// Gap between two sphere surfaces (negative when they overlap)
#[inline]
pub fn minimal_distance_from_sphere_to_sphere(a: &Sphere, b: &Sphere) -> f64 {
    distance(&a.center, &b.center) - a.r - b.r
}

/// Distance from a point to the far side of a sphere
#[inline]
pub fn maximal_distance_from_point_to_sphere(p: &Point3<f64>, s: &Sphere) -> f64 {
    distance(p, &s.center) + s.r
}

/// Signed distance from point to plane (normalizes `plane_normal`)
#[inline]
pub fn signed_distance_to_plane(
    plane_point: &Point3<f64>,
    plane_normal: &Vector3<f64>,
    x: &Point3<f64>,
) -> f64 {
    plane_normal.normalize().dot(&(x - plane_point))
}

/// Side of a plane where a point lies: 1, -1 or 0 exactly on the plane
#[inline]
pub fn halfspace_of_point(
    plane_point: &Point3<f64>,
    plane_normal: &Vector3<f64>,
    x: &Point3<f64>,
) -> i32 {
    let sd = signed_distance_to_plane(plane_point, plane_normal, x);
    if sd > 0.0 {
        1
    } else if sd < 0.0 {
        -1
    } else {
        0
    }
}

/// Side of a plane where a whole sphere lies: 1, -1 or 0 if the plane cuts it
#[inline]
pub fn halfspace_of_sphere(
    plane_point: &Point3<f64>,
    plane_normal: &Vector3<f64>,
    s: &Sphere,
) -> i32 {
    let dc = signed_distance_to_plane(plane_point, plane_normal, &s.center);
    if dc > 0.0 && dc - s.r > 0.0 {
        1
    } else if dc < 0.0 && dc + s.r < 0.0 {
        -1
    } else {
        0
    }
}

/// Unit normal of the plane through three points (right-hand rule)
pub fn plane_normal_from_three_points(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Vector3<f64> {
    (b - a).cross(&(c - a)).normalize()
}

/// Distance from point `p` to the infinite line through `start` and `end`
pub fn distance_from_point_to_line(
    p: &Point3<f64>,
    start: &Point3<f64>,
    end: &Point3<f64>,
) -> f64 {
    let line = (end - start).normalize();
    let translated = p - start;
    let along = translated.dot(&line);
    (translated.norm_squared() - along * along).max(0.0).sqrt()
}

#[allow(clippy::many_single_char_names)]
pub fn signed_volume_of_tetrahedron(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> f64 {
    (a - d).dot(&(b - d).cross(&(c - d))) / 6.0
}
