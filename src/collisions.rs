// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Overlap queries against a [`BoundingSpheresHierarchy`].

use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::bounding_spheres_hierarchy::{BoundingSpheresHierarchy, HierarchyVisitor, LeafVerdict};
use crate::geometry::{
    EPSILON, sphere_contains_sphere, sphere_intersects_sphere, sphere_touches_sphere, spheres_equal,
};
use crate::types::Sphere;

struct CollisionVisitor<'a> {
    target: &'a Sphere,
    one_hit_is_enough: bool,
}

impl HierarchyVisitor for CollisionVisitor<'_> {
    fn visit_node(&mut self, bounding_sphere: &Sphere) -> bool {
        sphere_intersects_sphere(bounding_sphere, self.target)
    }

    fn visit_leaf(&mut self, _id: usize, sphere: &Sphere) -> LeafVerdict {
        if !sphere_intersects_sphere(sphere, self.target) {
            LeafVerdict::SKIP
        } else if self.one_hit_is_enough {
            LeafVerdict::ACCEPT_AND_STOP
        } else {
            LeafVerdict::ACCEPT
        }
    }
}

/// Indices of all input spheres overlapping `target`, ascending.
#[must_use]
pub fn find_all_collisions(bsh: &BoundingSpheresHierarchy, target: &Sphere) -> Vec<usize> {
    let mut ids = bsh.search(&mut CollisionVisitor {
        target,
        one_hit_is_enough: false,
    });
    ids.sort_unstable();
    ids
}

/// First overlapping input sphere in traversal order, if any.
#[must_use]
pub fn find_any_collision(bsh: &BoundingSpheresHierarchy, target: &Sphere) -> Option<usize> {
    bsh.search(&mut CollisionVisitor {
        target,
        one_hit_is_enough: true,
    })
    .first()
    .copied()
}

/// Indices of all input spheres touching `target` within the tolerance, ascending.
///
/// More than four hits mark a degenerate tangent sphere.
#[must_use]
pub fn find_all_touching(bsh: &BoundingSpheresHierarchy, target: &Sphere) -> Vec<usize> {
    let spheres = bsh.leaves_spheres();
    let expanded = target.with_radius(target.r + 3.0 * EPSILON);
    find_all_collisions(bsh, &expanded)
        .into_iter()
        .filter(|&id| sphere_touches_sphere(target, &spheres[id]))
        .collect()
}

/// Check whether input ball `id` is buried inside another input ball.
///
/// Of two coinciding balls only the one with the larger index counts as hidden.
#[must_use]
pub fn is_hidden(bsh: &BoundingSpheresHierarchy, id: usize) -> bool {
    let spheres = bsh.leaves_spheres();
    let Some(candidate) = spheres.get(id) else {
        return false;
    };
    find_all_collisions(bsh, candidate).into_iter().any(|other| {
        other != id
            && sphere_contains_sphere(&spheres[other], candidate)
            && (other < id || !spheres_equal(&spheres[other], candidate))
    })
}

/// All hidden input balls.
#[must_use]
pub fn find_all_hidden_spheres(bsh: &BoundingSpheresHierarchy) -> BTreeSet<usize> {
    (0..bsh.leaves_spheres().len())
        .into_par_iter()
        .filter(|&id| is_hidden(bsh, id))
        .collect()
}
