//! Apollonius tangency solvers.
//!
//! All three solvers translate the problem so that the smallest sphere sits at
//! the origin with radius zero; the remaining spheres shrink by that radius and
//! tangency becomes a linear system in the unknown center plus one quadratic
//! equation in the unknown radius.

use nalgebra::{Point3, Vector3};

use crate::geometry::float_cmp::eq;
use crate::geometry::{
    minimal_distance_from_sphere_to_sphere, signed_volume_of_tetrahedron, sphere_touches_sphere,
    spheres_equal,
};
use crate::types::Sphere;

/// Largest tolerated distance error of a circle tangent to three spheres.
const TANGENT_CIRCLE_MAX_ERROR: f64 = 0.001;

/// Real roots of `a*x^2 + b*x + c = 0`, ascending for positive `a`.
///
/// Falls back to the linear root when `a` vanishes; returns nothing when both
/// leading coefficients vanish or the discriminant is negative.
#[allow(clippy::float_cmp)]
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a == 0.0 {
        if b == 0.0 {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let discriminant = b.mul_add(b, -4.0 * a * c);
    if discriminant < 0.0 || discriminant.is_nan() {
        Vec::new()
    } else if discriminant == 0.0 {
        vec![-b / (2.0 * a)]
    } else {
        let sq = discriminant.sqrt();
        vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)]
    }
}

/// Reorder three spheres so the first one has the smallest radius.
#[allow(clippy::float_cmp)]
fn smallest_first3<'a>(
    sm: &'a Sphere,
    s1: &'a Sphere,
    s2: &'a Sphere,
) -> (&'a Sphere, &'a Sphere, &'a Sphere) {
    let min_r = sm.r.min(s1.r).min(s2.r);
    if sm.r != min_r {
        if s1.r == min_r {
            return (s1, sm, s2);
        }
        if s2.r == min_r {
            return (s2, sm, s1);
        }
    }
    (sm, s1, s2)
}

/// Planes touching three spheres from the same side, as (point on sphere `a`, unit normal).
///
/// Up to two planes exist; none when one sphere is swallowed by the cone of the other two.
pub fn tangent_planes_of_three_spheres(
    a: &Sphere,
    b: &Sphere,
    c: &Sphere,
) -> Vec<(Point3<f64>, Vector3<f64>)> {
    tangent_planes_normals(a, b, c)
        .into_iter()
        .map(|n| (a.center + n * a.r, n))
        .collect()
}

#[allow(clippy::many_single_char_names, clippy::similar_names)]
fn tangent_planes_normals(sm: &Sphere, s1: &Sphere, s2: &Sphere) -> Vec<Vector3<f64>> {
    let (sm, s1, s2) = smallest_first3(sm, s1, s2);

    let d1 = s1.center - sm.center;
    let d2 = s2.center - sm.center;

    // Pivot on a non-zero coordinate of the first offset
    let permutation: [usize; 3] = if !eq(d1[0], 0.0) {
        [0, 1, 2]
    } else if !eq(d1[1], 0.0) {
        [1, 0, 2]
    } else if !eq(d1[2], 0.0) {
        [2, 0, 1]
    } else {
        [0, 1, 2]
    };
    let mut reverse = [0usize; 3];
    for (i, &p) in permutation.iter().enumerate() {
        reverse[p] = i;
    }

    let (x1, y1, z1) = (d1[permutation[0]], d1[permutation[1]], d1[permutation[2]]);
    let r1 = s1.r - sm.r;
    let (x2, y2, z2) = (d2[permutation[0]], d2[permutation[1]], d2[permutation[2]]);
    let r2 = s2.r - sm.r;

    let ad = -x1;
    let a0 = r1 / ad;
    let ay = y1 / ad;
    let az = z1 / ad;

    let bd = -ay.mul_add(x2, y2);
    let b0 = a0.mul_add(x2, r2) / bd;
    let bz = az.mul_add(x2, z2) / bd;

    let c0 = ay.mul_add(b0, a0);
    let cz = ay.mul_add(bz, az);

    let a = 1.0 + cz * cz + bz * bz;
    let b = 2.0 * c0.mul_add(cz, b0 * bz);
    let c = c0.mul_add(c0, b0 * b0) - 1.0;

    solve_quadratic(a, b, c)
        .into_iter()
        .filter_map(|z| {
            let permuted = [z.mul_add(cz, c0), z.mul_add(bz, b0), z];
            let n = Vector3::new(
                permuted[reverse[0]],
                permuted[reverse[1]],
                permuted[reverse[2]],
            );
            check_tangent_plane(sm, s1, s2, &n).then_some(n)
        })
        .collect()
}

fn check_tangent_plane(s1: &Sphere, s2: &Sphere, s3: &Sphere, n: &Vector3<f64>) -> bool {
    let p1 = s1.center + n * s1.r;
    let p2 = s2.center + n * s2.r;
    let p3 = s3.center + n * s3.r;
    eq((p2 - p1).dot(n), 0.0) && eq((p3 - p1).dot(n), 0.0)
}

/// Spheres centered in the plane of three sphere centers and touching all three.
///
/// With zero-radius inputs this is the circumscribed circle of three points.
#[allow(clippy::many_single_char_names, clippy::similar_names)]
pub fn tangent_spheres_of_three_spheres(sm: &Sphere, s1: &Sphere, s2: &Sphere) -> Vec<Sphere> {
    let (sm, s1, s2) = smallest_first3(sm, s1, s2);

    let e1 = (s1.center - sm.center).normalize();
    let e2 = (s2.center - sm.center).normalize();
    let o2 = s2.center - sm.center;

    let x1 = (s1.center - sm.center).norm();
    let y1 = 0.0;
    let r1 = s1.r - sm.r;

    let x2 = e1.dot(&o2);
    let y2 = x2.mul_add(-x2, o2.norm_squared()).max(0.0).sqrt();
    let r2 = s2.r - sm.r;

    let a1 = 2.0 * x1;
    let b1 = 2.0 * y1;
    let d1 = 2.0 * r1;
    let o1 = r1 * r1 - x1 * x1 - y1 * y1;

    let a2 = 2.0 * x2;
    let b2 = 2.0 * y2;
    let d2 = 2.0 * r2;
    let oo2 = r2 * r2 - x2 * x2 - y2 * y2;

    let w = a2 * b1 - a1 * b2;

    let u1 = (b2 * d1 - b1 * d2) / w;
    let v1 = (b2 * o1 - b1 * oo2) / w;
    let u2 = -(a2 * d1 - a1 * d2) / w;
    let v2 = -(a2 * o1 - a1 * oo2) / w;

    let a = u1.mul_add(u1, u2 * u2) - 1.0;
    let b = 2.0 * u1.mul_add(v1, u2 * v2);
    let c = v1.mul_add(v1, v2 * v2);

    let mut results: Vec<Sphere> = Vec::new();
    if !(a.is_finite() && b.is_finite() && c.is_finite()) {
        return results;
    }

    for r in solve_quadratic(a, b, c) {
        if r <= 0.0 {
            continue;
        }
        let virtual_x = u1.mul_add(r, v1);
        let virtual_y = u2.mul_add(r, v2);
        let real_l1_offset = virtual_y * x2 / y2;
        let real_l1 = virtual_x - real_l1_offset;
        let real_l2 = real_l1_offset.hypot(virtual_y);
        for sign in [1.0, -1.0] {
            let mut candidate = Sphere::new(
                sm.center + e1 * real_l1 + e2 * (real_l2 * sign),
                r - sm.r,
            );
            if results
                .last()
                .is_some_and(|last| spheres_equal(last, &candidate))
            {
                continue;
            }
            let volume =
                signed_volume_of_tetrahedron(&sm.center, &s1.center, &s2.center, &candidate.center);
            if volume.abs() >= TANGENT_CIRCLE_MAX_ERROR {
                continue;
            }
            let mut error = radius_error_estimate(sm, s1, s2, &candidate);
            if error.0 < 0.0 {
                candidate.r += error.0;
                error = radius_error_estimate(sm, s1, s2, &candidate);
            }
            if error.0.abs().max(error.1.abs()) < TANGENT_CIRCLE_MAX_ERROR {
                results.push(candidate);
            }
        }
    }

    results
}

fn radius_error_estimate(s1: &Sphere, s2: &Sphere, s3: &Sphere, tangent: &Sphere) -> (f64, f64) {
    let d1 = minimal_distance_from_sphere_to_sphere(tangent, s1);
    let d2 = minimal_distance_from_sphere_to_sphere(tangent, s2);
    let d3 = minimal_distance_from_sphere_to_sphere(tangent, s3);
    (d1.min(d2).min(d3), d1.max(d2).max(d3))
}

/// Spheres externally tangent to four spheres (0, 1 or 2 solutions).
///
/// Every returned sphere is verified to touch all four inputs within the tolerance.
#[allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::float_cmp,
    clippy::suspicious_operation_groupings
)]
pub fn tangent_spheres_of_four_spheres(
    sm: &Sphere,
    s1: &Sphere,
    s2: &Sphere,
    s3: &Sphere,
) -> Vec<Sphere> {
    let min_r = sm.r.min(s1.r).min(s2.r).min(s3.r);
    if sm.r != min_r {
        if s1.r == min_r {
            return tangent_spheres_of_four_spheres(s1, sm, s2, s3);
        }
        if s2.r == min_r {
            return tangent_spheres_of_four_spheres(s2, sm, s1, s3);
        }
        if s3.r == min_r {
            return tangent_spheres_of_four_spheres(s3, sm, s1, s2);
        }
    }

    let p1 = s1.center - sm.center;
    let p2 = s2.center - sm.center;
    let p3 = s3.center - sm.center;
    let r1 = s1.r - sm.r;
    let r2 = s2.r - sm.r;
    let r3 = s3.r - sm.r;

    let (a1, b1, c1, d1) = (2.0 * p1.x, 2.0 * p1.y, 2.0 * p1.z, 2.0 * r1);
    let o1 = r1 * r1 - p1.norm_squared();
    let (a2, b2, c2, d2) = (2.0 * p2.x, 2.0 * p2.y, 2.0 * p2.z, 2.0 * r2);
    let o2 = r2 * r2 - p2.norm_squared();
    let (a3, b3, c3, d3) = (2.0 * p3.x, 2.0 * p3.y, 2.0 * p3.z, 2.0 * r3);
    let o3 = r3 * r3 - p3.norm_squared();

    let w = a1 * (b3 * c2 - b2 * c3) + b1 * (a2 * c3 - a3 * c2) + c1 * (a3 * b2 - a2 * b3);
    if w == 0.0 || !w.is_finite() {
        return Vec::new();
    }

    let u1 = -(b1 * (c3 * d2 - c2 * d3) + c1 * (b2 * d3 - b3 * d2) + d1 * (b3 * c2 - b2 * c3)) / w;
    let v1 = -(b1 * (c3 * o2 - c2 * o3) + c1 * (b2 * o3 - b3 * o2) + o1 * (b3 * c2 - b2 * c3)) / w;

    let u2 = (a1 * (c3 * d2 - c2 * d3) + c1 * (a2 * d3 - a3 * d2) + d1 * (a3 * c2 - a2 * c3)) / w;
    let v2 = (a1 * (c3 * o2 - c2 * o3) + c1 * (a2 * o3 - a3 * o2) + o1 * (a3 * c2 - a2 * c3)) / w;

    let u3 = -(a1 * (b3 * d2 - b2 * d3) + b1 * (a2 * d3 - a3 * d2) + d1 * (a3 * b2 - a2 * b3)) / w;
    let v3 = -(a1 * (b3 * o2 - b2 * o3) + b1 * (a2 * o3 - a3 * o2) + o1 * (a3 * b2 - a2 * b3)) / w;

    let a = u1 * u1 + u2 * u2 + u3 * u3 - 1.0;
    let b = 2.0 * (u1 * v1 + u2 * v2 + u3 * v3);
    let c = v1 * v1 + v2 * v2 + v3 * v3;

    solve_quadratic(a, b, c)
        .into_iter()
        .filter(|&r| r > 0.0)
        .map(|r| {
            Sphere::from_coords(
                u1.mul_add(r, v1) + sm.center.x,
                u2.mul_add(r, v2) + sm.center.y,
                u3.mul_add(r, v3) + sm.center.z,
                r - sm.r,
            )
        })
        .filter(|t| {
            sphere_touches_sphere(t, sm)
                && sphere_touches_sphere(t, s1)
                && sphere_touches_sphere(t, s2)
                && sphere_touches_sphere(t, s3)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_roots() {
        assert_eq!(solve_quadratic(1.0, -3.0, 2.0), vec![1.0, 2.0]);
        assert_eq!(solve_quadratic(1.0, 2.0, 1.0), vec![-1.0]);
        assert!(solve_quadratic(1.0, 0.0, 1.0).is_empty());
        assert_eq!(solve_quadratic(0.0, 2.0, -4.0), vec![2.0]);
        assert!(solve_quadratic(0.0, 0.0, 1.0).is_empty());
    }

    #[test]
    fn tangent_planes_of_equal_spheres_on_floor() {
        let a = Sphere::from_coords(0.0, 0.0, 1.0, 1.0);
        let b = Sphere::from_coords(4.0, 0.0, 1.0, 1.0);
        let c = Sphere::from_coords(0.0, 4.0, 1.0, 1.0);
        let planes = tangent_planes_of_three_spheres(&a, &b, &c);
        assert_eq!(planes.len(), 2);
        for (point, normal) in &planes {
            assert_relative_eq!(normal.norm(), 1.0, epsilon = 1e-9);
            assert_relative_eq!(normal.z.abs(), 1.0, epsilon = 1e-9);
            // z=0 and z=2 planes
            assert!(point.z.abs() < 1e-9 || (point.z - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn no_tangent_plane_when_one_sphere_is_engulfed() {
        let a = Sphere::from_coords(0.0, 0.0, 0.0, 5.0);
        let b = Sphere::from_coords(1.0, 0.0, 0.0, 0.5);
        let c = Sphere::from_coords(0.0, 1.0, 0.0, 0.5);
        assert!(tangent_planes_of_three_spheres(&a, &b, &c).is_empty());
    }

    #[test]
    fn circumcircle_of_three_points() {
        let a = Sphere::from_coords(1.0, 0.0, 0.0, 0.0);
        let b = Sphere::from_coords(-1.0, 0.0, 0.0, 0.0);
        let c = Sphere::from_coords(0.0, 1.0, 0.0, 0.0);
        let circles = tangent_spheres_of_three_spheres(&a, &b, &c);
        assert_eq!(circles.len(), 1);
        assert_relative_eq!(circles[0].r, 1.0, epsilon = 1e-6);
        assert_relative_eq!(circles[0].center.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(circles[0].center.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn tangent_sphere_of_regular_tetrahedron() {
        let s = [
            Sphere::from_coords(1.0, 1.0, 1.0, 0.5),
            Sphere::from_coords(1.0, -1.0, -1.0, 0.5),
            Sphere::from_coords(-1.0, 1.0, -1.0, 0.5),
            Sphere::from_coords(-1.0, -1.0, 1.0, 0.5),
        ];
        let tangents = tangent_spheres_of_four_spheres(&s[0], &s[1], &s[2], &s[3]);
        assert_eq!(tangents.len(), 1);
        let t = tangents[0];
        assert_relative_eq!(t.center.coords.norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.r, 3.0_f64.sqrt() - 0.5, epsilon = 1e-9);
        for sphere in &s {
            assert!(sphere_touches_sphere(&t, sphere));
        }
    }

    #[test]
    fn coplanar_centers_have_no_unique_solution() {
        let s = [
            Sphere::from_coords(0.0, 0.0, 0.0, 1.0),
            Sphere::from_coords(3.0, 0.0, 0.0, 1.0),
            Sphere::from_coords(0.0, 3.0, 0.0, 1.0),
            Sphere::from_coords(3.0, 3.0, 0.0, 1.0),
        ];
        assert!(tangent_spheres_of_four_spheres(&s[0], &s[1], &s[2], &s[3]).is_empty());
    }
}
