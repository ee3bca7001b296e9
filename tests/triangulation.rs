//! End-to-end checks of the triangulation, its parallel variants and the collision search.

use std::collections::BTreeSet;

use apollota::collisions::find_all_collisions;
use apollota::comparison::quadruples_from_map;
use apollota::geometry::sphere_intersects_sphere;
use apollota::parallel::available_methods;
use apollota::{
    Ball, BoundingSpheresHierarchy, ParallelConfig, ParallelMethod, Quadruple, Sphere,
    calculate_directional_difference_between_two_sets_of_quadruples,
    calculate_vertices_in_parallel, check_quadruples_map, construct_result, spheres_from_balls,
};
use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn five_balls() -> Vec<Ball> {
    vec![
        Ball::new(0.0, 0.0, 0.0, 1.0),
        Ball::new(3.0, 0.0, 0.0, 1.0),
        Ball::new(0.0, 3.0, 0.0, 1.0),
        Ball::new(0.0, 0.0, 3.0, 1.0),
        Ball::new(1.0, 1.0, 1.0, 1.0),
    ]
}

fn random_balls(seed: u64, count: usize, extent: f64) -> Vec<Ball> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Ball::new(
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
                rng.random_range(0.8..1.6),
            )
        })
        .collect()
}

/// Equal balls on a cubic grid: every empty tangent sphere touches eight balls.
fn lattice(n: u32) -> Vec<Ball> {
    let mut balls = Vec::new();
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                balls.push(Ball::new(
                    f64::from(i) * 3.0,
                    f64::from(j) * 3.0,
                    f64::from(k) * 3.0,
                    1.0,
                ));
            }
        }
    }
    balls
}

fn simulated(parts: usize, include_surplus_quadruples: bool) -> ParallelConfig {
    ParallelConfig {
        method: ParallelMethod::Simulated,
        parts,
        include_surplus_quadruples,
        ..ParallelConfig::default()
    }
}

#[test]
fn five_balls_end_to_end() {
    let balls = five_balls();
    let result = construct_result(&balls, 3.5, false, false).unwrap();

    assert!(!result.quadruples_map.is_empty());
    assert!(check_quadruples_map(
        &spheres_from_balls(&balls),
        &result.quadruples_map
    ));
    assert!(result.ignored_balls.is_empty());
    assert!(result.excluded_hidden_balls.is_empty());
    for quadruple in result.quadruples_map.keys() {
        assert!(!quadruple.has_repetitions());
        assert!(quadruple.iter().all(|id| id < balls.len()));
    }
}

#[test]
fn four_balls_give_one_quadruple() {
    let balls = &five_balls()[..4];
    let result = construct_result(balls, 3.5, false, false).unwrap();
    assert_eq!(
        quadruples_from_map(&result.quadruples_map),
        BTreeSet::from([Quadruple::new(0, 1, 2, 3)])
    );
    assert!(check_quadruples_map(
        &spheres_from_balls(balls),
        &result.quadruples_map
    ));
}

#[test]
fn repeated_runs_are_identical() {
    let balls = random_balls(7, 80, 14.0);
    let first = construct_result(&balls, 3.5, false, false).unwrap();
    let second = construct_result(&balls, 3.5, false, false).unwrap();
    assert_eq!(first.quadruples_map, second.quadruples_map);
    assert_eq!(first.search_log, second.search_log);
}

#[test]
fn random_set_is_valid() {
    let balls = random_balls(11, 120, 16.0);
    let result = construct_result(&balls, 3.5, false, false).unwrap();
    assert!(result.quadruples_map.len() > balls.len());
    assert!(check_quadruples_map(
        &spheres_from_balls(&balls),
        &result.quadruples_map
    ));
}

#[test]
fn hidden_balls_do_not_change_the_result() {
    let mut balls = five_balls();
    // Buried inside ball 0
    balls.push(Ball::new(0.1, 0.0, 0.0, 0.5));

    let reference = construct_result(&five_balls(), 3.5, false, false).unwrap();
    let excluded = construct_result(&balls, 3.5, true, false).unwrap();

    assert_eq!(excluded.excluded_hidden_balls, BTreeSet::from([5]));
    assert!(!excluded.ignored_balls.contains(&5));
    assert_eq!(
        quadruples_from_map(&excluded.quadruples_map),
        quadruples_from_map(&reference.quadruples_map)
    );
    assert!(
        excluded
            .quadruples_map
            .keys()
            .all(|quadruple| !quadruple.contains(5))
    );

    let kept = construct_result(&balls, 3.5, false, false).unwrap();
    assert!(kept.excluded_hidden_balls.is_empty());
    assert!(check_quadruples_map(
        &spheres_from_balls(&balls),
        &kept.quadruples_map
    ));
}

#[test]
fn partitioned_runs_agree_with_whole_run() {
    let balls = random_balls(23, 150, 18.0);
    let whole = construct_result(&balls, 3.5, false, false).unwrap();
    let whole_set = quadruples_from_map(&whole.quadruples_map);

    for method in available_methods() {
        for parts in [1, 2, 4] {
            let config = ParallelConfig {
                method,
                parts,
                ranks: 3,
                ..ParallelConfig::default()
            };
            let result = calculate_vertices_in_parallel(&balls, &config).unwrap();
            let parallel_set = quadruples_from_map(&result.merged_quadruples_map);

            assert!(
                check_quadruples_map(&spheres_from_balls(&balls), &result.merged_quadruples_map),
                "invalid quadruples with {method} and {parts} parts"
            );
            for (first, second) in [(&whole_set, &parallel_set), (&parallel_set, &whole_set)] {
                let cmp = calculate_directional_difference_between_two_sets_of_quadruples(
                    &balls, 3.5, first, second,
                )
                .unwrap();
                assert!(
                    cmp.confirmed_differences.is_empty(),
                    "{method} with {parts} parts: {:?}",
                    cmp.confirmed_differences
                );
            }
        }
    }
}

#[test]
fn five_balls_match_exactly_in_parts() {
    let balls = five_balls();
    let whole = construct_result(&balls, 3.5, false, false).unwrap();
    let config = ParallelConfig {
        method: ParallelMethod::Simulated,
        parts: 2,
        ..ParallelConfig::default()
    };
    let result = calculate_vertices_in_parallel(&balls, &config).unwrap();
    assert_eq!(
        quadruples_from_map(&result.merged_quadruples_map),
        quadruples_from_map(&whole.quadruples_map)
    );
    for (quadruple, tangent_spheres) in &whole.quadruples_map {
        let merged = &result.merged_quadruples_map[quadruple];
        assert_eq!(merged.len(), tangent_spheres.len());
        for (a, b) in tangent_spheres.iter().zip(merged) {
            assert_relative_eq!(a.center, b.center, epsilon = 1e-9);
            assert_relative_eq!(a.r, b.r, epsilon = 1e-9);
        }
    }
    assert!(result.produced_quadruples >= result.merged_quadruples_map.len());
}

#[test]
fn collision_search_matches_brute_force() {
    let balls = random_balls(3, 300, 25.0);
    let spheres = spheres_from_balls(&balls);
    let bsh = BoundingSpheresHierarchy::new(spheres.clone(), 3.5, 1).unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..200 {
        let query = Sphere::from_coords(
            rng.random_range(-2.0..27.0),
            rng.random_range(-2.0..27.0),
            rng.random_range(-2.0..27.0),
            rng.random_range(0.1..4.0),
        );
        let expected: Vec<usize> = spheres
            .iter()
            .enumerate()
            .filter(|(_, s)| sphere_intersects_sphere(&query, s))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(find_all_collisions(&bsh, &query), expected);
    }
}

#[test]
fn self_queries_on_separated_balls() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut balls = Vec::new();
    for i in 0..6 {
        for j in 0..6 {
            for k in 0..6 {
                balls.push(Ball::new(
                    f64::from(i) * 4.0 + rng.random_range(-0.5..0.5),
                    f64::from(j) * 4.0 + rng.random_range(-0.5..0.5),
                    f64::from(k) * 4.0 + rng.random_range(-0.5..0.5),
                    rng.random_range(0.5..1.4),
                ));
            }
        }
    }
    let spheres = spheres_from_balls(&balls);
    let bsh = BoundingSpheresHierarchy::new(spheres.clone(), 3.5, 1).unwrap();
    for (i, sphere) in spheres.iter().enumerate() {
        assert_eq!(find_all_collisions(&bsh, sphere), vec![i]);
    }
}

#[test]
fn lattice_degeneracies_are_counted() {
    let balls = lattice(3);
    let result = construct_result(&balls, 3.5, false, false).unwrap();
    assert!(!result.quadruples_map.is_empty());
    assert!(result.surplus_log.degenerate_tangent_spheres > 0);
    assert_eq!(result.surplus_log.surplus_quadruples, 0);
    assert!(check_quadruples_map(
        &spheres_from_balls(&balls),
        &result.quadruples_map
    ));
}

#[test]
fn lattice_with_surplus_is_partition_invariant() {
    let balls = lattice(3);
    let spheres = spheres_from_balls(&balls);
    let whole = construct_result(&balls, 3.5, false, true).unwrap();
    assert!(whole.surplus_log.surplus_quadruples > 0);
    assert!(check_quadruples_map(&spheres, &whole.quadruples_map));

    for parts in [2, 4] {
        let result = calculate_vertices_in_parallel(&balls, &simulated(parts, true)).unwrap();
        assert!(check_quadruples_map(&spheres, &result.merged_quadruples_map));
        assert_eq!(
            quadruples_from_map(&result.merged_quadruples_map),
            quadruples_from_map(&whole.quadruples_map),
            "{parts} parts"
        );
    }
}

#[test]
fn lattice_tie_breaks_are_not_confirmed_differences() {
    let balls = lattice(4);
    let whole = construct_result(&balls, 3.5, false, false).unwrap();
    let whole_set = quadruples_from_map(&whole.quadruples_map);

    for parts in [2, 4, 8] {
        let result = calculate_vertices_in_parallel(&balls, &simulated(parts, false)).unwrap();
        let parallel_set = quadruples_from_map(&result.merged_quadruples_map);
        for (first, second) in [(&whole_set, &parallel_set), (&parallel_set, &whole_set)] {
            let cmp = calculate_directional_difference_between_two_sets_of_quadruples(
                &balls, 3.5, first, second,
            )
            .unwrap();
            assert!(
                cmp.confirmed_differences.is_empty(),
                "{parts} parts: {} of {} differences confirmed",
                cmp.confirmed_differences.len(),
                cmp.all_differences.len()
            );
        }
    }
}
