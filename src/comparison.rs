//! Directional comparison of two quadruple sets over the same balls.

use std::collections::BTreeSet;

use log::debug;

use crate::bounding_spheres_hierarchy::{BoundingSpheresHierarchy, check_initial_radius};
use crate::collisions::{find_all_touching, find_any_collision};
use crate::error::Result;
use crate::input::validate_balls;
use crate::tangent::tangent_spheres_of_four_spheres;
use crate::triangulation::QuadruplesMap;
use crate::tuple::Quadruple;
use crate::types::{Ball, spheres_from_balls};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonResult {
    /// Quadruples of the first set missing from the second
    pub all_differences: BTreeSet<Quadruple>,
    /// Differences with a recomputed empty, non-degenerate tangent sphere
    pub confirmed_differences: BTreeSet<Quadruple>,
}

/// Keys of a quadruples map as a set.
#[must_use]
pub fn quadruples_from_map(map: &QuadruplesMap) -> BTreeSet<Quadruple> {
    map.keys().copied().collect()
}

/// Find quadruples of `first` that `second` lacks, and confirm which of them are real.
///
/// A difference is confirmed when one of its recomputed tangent spheres is
/// empty and touches no ball besides its four generators, meaning `second`
/// missed a genuine vertex. A sphere touching more balls is a tie that another
/// run may have resolved with a different 4-subset, so it stays unconfirmed,
/// as do quadruples that were never valid.
///
/// # Errors
/// Fails on an invalid `init_radius` or invalid balls.
pub fn calculate_directional_difference_between_two_sets_of_quadruples(
    balls: &[Ball],
    init_radius: f64,
    first: &BTreeSet<Quadruple>,
    second: &BTreeSet<Quadruple>,
) -> Result<ComparisonResult> {
    check_initial_radius(init_radius)?;
    validate_balls(balls)?;

    let all_differences: BTreeSet<Quadruple> = first.difference(second).copied().collect();
    if all_differences.is_empty() {
        return Ok(ComparisonResult::default());
    }

    let bsh = BoundingSpheresHierarchy::new(spheres_from_balls(balls), init_radius, 1)?;
    let spheres = bsh.leaves_spheres();
    let confirmed_differences = all_differences
        .iter()
        .filter(|q| {
            if q.has_repetitions() || q.iter().any(|id| id >= spheres.len()) {
                return false;
            }
            let [a, b, c, d] = q.as_array().map(|id| &spheres[id]);
            tangent_spheres_of_four_spheres(a, b, c, d).iter().any(|t| {
                find_any_collision(&bsh, t).is_none() && find_all_touching(&bsh, t).len() == 4
            })
        })
        .copied()
        .collect();

    let result = ComparisonResult {
        all_differences,
        confirmed_differences,
    };
    debug!(
        "Compared quadruple sets: {} differences, {} confirmed",
        result.all_differences.len(),
        result.confirmed_differences.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::construct_result;

    fn balls() -> Vec<Ball> {
        vec![
            Ball::new(0.0, 0.0, 0.0, 1.0),
            Ball::new(3.0, 0.0, 0.0, 1.0),
            Ball::new(0.0, 3.0, 0.0, 1.0),
            Ball::new(0.0, 0.0, 3.0, 1.0),
            Ball::new(1.0, 1.0, 1.0, 1.0),
        ]
    }

    #[test]
    fn identical_sets_have_no_differences() {
        let balls = balls();
        let result = construct_result(&balls, 3.5, false, false).unwrap();
        let set = quadruples_from_map(&result.quadruples_map);
        let cmp =
            calculate_directional_difference_between_two_sets_of_quadruples(&balls, 3.5, &set, &set)
                .unwrap();
        assert!(cmp.all_differences.is_empty());
        assert!(cmp.confirmed_differences.is_empty());
    }

    #[test]
    fn missing_valid_quadruple_is_confirmed() {
        let balls = balls();
        let result = construct_result(&balls, 3.5, false, false).unwrap();
        let full = quadruples_from_map(&result.quadruples_map);
        let mut partial = full.clone();
        let removed = *partial.iter().next().unwrap();
        partial.remove(&removed);

        let cmp = calculate_directional_difference_between_two_sets_of_quadruples(
            &balls, 3.5, &full, &partial,
        )
        .unwrap();
        assert_eq!(cmp.all_differences, BTreeSet::from([removed]));
        assert_eq!(cmp.confirmed_differences, BTreeSet::from([removed]));

        let reverse = calculate_directional_difference_between_two_sets_of_quadruples(
            &balls, 3.5, &partial, &full,
        )
        .unwrap();
        assert!(reverse.all_differences.is_empty());
    }

    #[test]
    fn cospherical_tie_is_not_confirmed() {
        // Corners of a cube share one empty tangent sphere
        let mut balls = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    balls.push(Ball::new(
                        f64::from(i) * 3.0,
                        f64::from(j) * 3.0,
                        f64::from(k) * 3.0,
                        1.0,
                    ));
                }
            }
        }
        // Corners 0, 3, 5, 6 form a regular tetrahedron around the cube centre
        let tie = BTreeSet::from([Quadruple::new(0, 3, 5, 6)]);
        let cmp = calculate_directional_difference_between_two_sets_of_quadruples(
            &balls,
            3.5,
            &tie,
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(cmp.all_differences, tie);
        assert!(cmp.confirmed_differences.is_empty());
    }

    #[test]
    fn invalid_quadruple_is_not_confirmed() {
        let balls = vec![
            Ball::new(0.0, 0.0, 0.0, 1.0),
            Ball::new(4.0, 0.0, 0.0, 1.0),
            Ball::new(0.0, 4.0, 0.0, 1.0),
            Ball::new(0.0, 0.0, 4.0, 1.0),
            // Inside the tangent sphere of the first four
            Ball::new(1.3, 1.3, 1.3, 0.5),
            Ball::new(40.0, 40.0, 40.0, 1.0),
        ];
        let bogus = BTreeSet::from([Quadruple::new(0, 1, 2, 3), Quadruple::new(0, 1, 2, 99)]);
        let cmp = calculate_directional_difference_between_two_sets_of_quadruples(
            &balls,
            3.5,
            &bogus,
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(cmp.all_differences.len(), 2);
        assert!(cmp.confirmed_differences.is_empty());
    }
}
