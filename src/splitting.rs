// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Spatial partitioning of spheres by recursive median bisection.

use crate::error::{Error, Result};
use crate::types::Sphere;

/// Split sphere indices into `parts` spatially coherent groups.
///
/// Every round cuts each group along the widest axis of its centers' bounding
/// box at the median. Groups of one sphere are not cut further, so fewer than
/// `parts` groups come back for tiny inputs; empty groups are never returned.
///
/// # Errors
/// Returns [`Error::PartsNotPowerOfTwo`] unless `parts` is a power of two.
pub fn split_for_number_of_parts(spheres: &[Sphere], parts: usize) -> Result<Vec<Vec<usize>>> {
    if !parts.is_power_of_two() {
        return Err(Error::PartsNotPowerOfTwo(parts));
    }
    Ok(bisect(spheres, parts.trailing_zeros()))
}

/// Split into the smallest power-of-two number of groups that keeps groups near `size`.
#[must_use]
pub fn split_for_size_of_part(spheres: &[Sphere], size: usize) -> Vec<Vec<usize>> {
    let parts = spheres.len().div_ceil(size.max(1)).max(1).next_power_of_two();
    bisect(spheres, parts.trailing_zeros())
}

fn bisect(spheres: &[Sphere], depth: u32) -> Vec<Vec<usize>> {
    if spheres.is_empty() {
        return Vec::new();
    }
    let mut groups = vec![(0..spheres.len()).collect::<Vec<_>>()];
    for _ in 0..depth {
        groups = groups
            .into_iter()
            .flat_map(|group| {
                if group.len() < 2 {
                    return vec![group];
                }
                let (low, high) = split_at_median(spheres, group);
                vec![low, high]
            })
            .collect();
    }
    groups
}

fn widest_axis(spheres: &[Sphere], ids: &[usize]) -> usize {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &id in ids {
        let c = &spheres[id].center;
        for axis in 0..3 {
            lo[axis] = lo[axis].min(c[axis]);
            hi[axis] = hi[axis].max(c[axis]);
        }
    }
    let mut best = 0;
    for axis in 1..3 {
        if hi[axis] - lo[axis] > hi[best] - lo[best] {
            best = axis;
        }
    }
    best
}

fn split_at_median(spheres: &[Sphere], mut ids: Vec<usize>) -> (Vec<usize>, Vec<usize>) {
    let axis = widest_axis(spheres, &ids);
    ids.sort_by(|&a, &b| {
        spheres[a].center[axis]
            .total_cmp(&spheres[b].center[axis])
            .then(a.cmp(&b))
    });
    let high = ids.split_off(ids.len() / 2);
    (ids, high)
}
