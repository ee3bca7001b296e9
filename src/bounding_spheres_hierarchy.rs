// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Multi-level tree of bounding spheres for pruning spatial queries.
//!
//! Level 0 clusters the input spheres ("leaves"); every higher level clusters
//! the bounding spheres of the level below. Nodes live in flat per-level
//! arenas and address their children through index ranges, so a built
//! hierarchy is plain data that can be shared read-only across threads.

use log::debug;

use crate::error::{Error, Result};
use crate::geometry::{
    maximal_distance_from_point_to_sphere, sphere_intersects_sphere_with_expansion,
};
use crate::splitting::split_for_size_of_part;
use crate::types::Sphere;

/// Above this size, clustering is done independently inside spatial parts.
const MAX_CLUSTERING_PART_SIZE: usize = 10_000;

/// Outcome of visiting a leaf during [`BoundingSpheresHierarchy::search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafVerdict {
    /// Record the leaf index in the search result.
    pub accept: bool,
    /// Terminate the whole search right after this leaf.
    pub stop: bool,
}

impl LeafVerdict {
    pub const SKIP: Self = Self {
        accept: false,
        stop: false,
    };
    pub const ACCEPT: Self = Self {
        accept: true,
        stop: false,
    };
    pub const ACCEPT_AND_STOP: Self = Self {
        accept: true,
        stop: true,
    };
}

/// Callbacks steering a hierarchy search.
///
/// `visit_node` decides whether a bounding sphere can contain relevant leaves;
/// `visit_leaf` inspects one input sphere. Both see the same mutable state,
/// which lets a search refine its own pruning criterion as it goes.
pub trait HierarchyVisitor {
    fn visit_node(&mut self, bounding_sphere: &Sphere) -> bool;
    fn visit_leaf(&mut self, id: usize, sphere: &Sphere) -> LeafVerdict;
}

#[derive(Debug, Clone)]
struct Node {
    sphere: Sphere,
    first_child: usize,
    child_count: usize,
}

#[derive(Debug, Clone, Default)]
struct Level {
    nodes: Vec<Node>,
    /// Child indices of all nodes, addressed by `Node::first_child..+child_count`
    children: Vec<usize>,
}

impl Level {
    fn children_of(&self, node: &Node) -> &[usize] {
        &self.children[node.first_child..node.first_child + node.child_count]
    }
}

/// Cluster under construction
#[derive(Debug, Clone)]
struct Cluster {
    sphere: Sphere,
    children: Vec<usize>,
    leaves_ids: Vec<usize>,
}

/// Read-only bounding spheres hierarchy over a fixed list of spheres.
#[derive(Debug, Clone)]
pub struct BoundingSpheresHierarchy {
    leaves: Vec<Sphere>,
    radii_range: (f64, f64),
    levels: Vec<Level>,
}

impl BoundingSpheresHierarchy {
    /// Build the hierarchy.
    ///
    /// `initial_radius` is the expansion used when bucketing leaves into the
    /// first level; `min_number_of_clusters` stops growing levels once the top
    /// level would not have more clusters than that.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInitialRadius`] if `initial_radius` is not a finite value above 1.
    pub fn new(
        spheres: Vec<Sphere>,
        initial_radius: f64,
        min_number_of_clusters: usize,
    ) -> Result<Self> {
        check_initial_radius(initial_radius)?;

        let radii_range = spheres
            .iter()
            .fold(None, |acc: Option<(f64, f64)>, s| {
                Some(acc.map_or((s.r, s.r), |(lo, hi)| (lo.min(s.r), hi.max(s.r))))
            })
            .unwrap_or((0.0, 0.0));

        let levels = cluster_spheres_in_layers(&spheres, initial_radius, min_number_of_clusters)
            .into_iter()
            .map(flatten_layer)
            .collect::<Vec<_>>();

        debug!(
            "Built bounding spheres hierarchy: {} leaves, {} levels, {} top clusters",
            spheres.len(),
            levels.len(),
            levels.last().map_or(0, |l| l.nodes.len())
        );

        Ok(Self {
            leaves: spheres,
            radii_range,
            levels,
        })
    }

    #[must_use]
    pub fn leaves_spheres(&self) -> &[Sphere] {
        &self.leaves
    }

    #[must_use]
    pub const fn min_input_radius(&self) -> f64 {
        self.radii_range.0
    }

    #[must_use]
    pub const fn max_input_radius(&self) -> f64 {
        self.radii_range.1
    }

    #[must_use]
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Bounding spheres of one level (empty if the level does not exist)
    #[must_use]
    pub fn collect_bounding_spheres(&self, level: usize) -> Vec<Sphere> {
        self.levels
            .get(level)
            .map(|l| l.nodes.iter().map(|n| n.sphere).collect())
            .unwrap_or_default()
    }

    /// Depth-first search, descending only into nodes accepted by the visitor.
    ///
    /// Returns accepted leaf indices in visiting order.
    pub fn search<V: HierarchyVisitor + ?Sized>(&self, visitor: &mut V) -> Vec<usize> {
        let mut results = Vec::new();
        let Some(top) = self.levels.last() else {
            return results;
        };
        let top_level = self.levels.len() - 1;

        // (level, node, next child position)
        let mut stack: Vec<(usize, usize, usize)> =
            Vec::with_capacity(top.nodes.len() + self.levels.len() + 1);
        stack.extend((0..top.nodes.len()).map(|id| (top_level, id, 0)));

        while let Some(&(level_id, node_id, child_pos)) = stack.last() {
            let level = &self.levels[level_id];
            let node = &level.nodes[node_id];
            let children = level.children_of(node);

            let descend =
                child_pos < children.len() && (child_pos > 0 || visitor.visit_node(&node.sphere));
            if !descend {
                stack.pop();
                continue;
            }

            if level_id == 0 {
                for &leaf in children {
                    let verdict = visitor.visit_leaf(leaf, &self.leaves[leaf]);
                    if verdict.accept {
                        results.push(leaf);
                        if verdict.stop {
                            return results;
                        }
                    }
                }
                stack.pop();
            } else if let Some(top) = stack.last_mut() {
                top.2 += 1;
                stack.push((level_id - 1, children[child_pos], 0));
            }
        }

        results
    }
}

/// Validate the bucketing radius before any construction work.
///
/// # Errors
/// Returns [`Error::InvalidInitialRadius`] for values not above 1.
pub fn check_initial_radius(initial_radius: f64) -> Result<()> {
    if initial_radius.is_finite() && initial_radius > 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInitialRadius(initial_radius))
    }
}

/// Indices of `list` ordered by `distance(list[start], list[i])`, starting with `start` itself.
pub fn sort_objects_by_distance_to_one_of_them<T, F>(
    list: &[T],
    starting_id: usize,
    distance: F,
) -> Vec<usize>
where
    F: Fn(&T, &T) -> f64,
{
    let Some(start) = list.get(starting_id) else {
        return Vec::new();
    };
    let mut distances: Vec<(f64, usize)> = list
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != starting_id)
        .map(|(i, item)| (distance(start, item), i))
        .collect();
    distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    std::iter::once(starting_id)
        .chain(distances.into_iter().map(|(_, i)| i))
        .collect()
}

fn flatten_layer(clusters: Vec<Cluster>) -> Level {
    let mut level = Level {
        nodes: Vec::with_capacity(clusters.len()),
        children: Vec::with_capacity(clusters.iter().map(|c| c.children.len()).sum()),
    };
    for cluster in clusters {
        level.nodes.push(Node {
            sphere: cluster.sphere,
            first_child: level.children.len(),
            child_count: cluster.children.len(),
        });
        level.children.extend(cluster.children);
    }
    level
}

/// Greedy center selection: each still-free sphere (in distance order from the
/// first one) becomes a center and claims every free sphere within `expansion`.
fn select_centers_for_clusters(spheres: &[Sphere], expansion: f64) -> Vec<Sphere> {
    let mut centers = Vec::new();
    let mut allowed = vec![true; spheres.len()];
    let traversal = sort_objects_by_distance_to_one_of_them(spheres, 0, |a, b| {
        maximal_distance_from_point_to_sphere(&a.center, b)
    });
    for i in traversal {
        if !allowed[i] {
            continue;
        }
        centers.push(spheres[i]);
        allowed[i] = false;
        for (j, other) in spheres.iter().enumerate() {
            if allowed[j] && sphere_intersects_sphere_with_expansion(&spheres[i], other, expansion)
            {
                allowed[j] = false;
            }
        }
    }
    centers
}

fn cluster_spheres_using_centers(
    spheres: &[Sphere],
    selection: &[usize],
    centers: &[Sphere],
) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = centers
        .iter()
        .map(|c| Cluster {
            sphere: *c,
            children: Vec::new(),
            leaves_ids: Vec::new(),
        })
        .collect();
    if clusters.is_empty() {
        return clusters;
    }

    for &id in selection {
        let sphere = &spheres[id];
        let mut best = 0;
        let mut best_dist = maximal_distance_from_point_to_sphere(&clusters[0].sphere.center, sphere);
        for (j, cluster) in clusters.iter().enumerate().skip(1) {
            let d = maximal_distance_from_point_to_sphere(&cluster.sphere.center, sphere);
            if d < best_dist {
                best = j;
                best_dist = d;
            }
        }
        let cluster = &mut clusters[best];
        cluster.sphere.r = cluster.sphere.r.max(best_dist);
        cluster.children.push(id);
    }

    clusters.retain(|c| !c.children.is_empty());
    clusters
}

fn cluster_spheres_using_radius_expansion(spheres: &[Sphere], expansion: f64) -> Vec<Cluster> {
    if spheres.len() <= MAX_CLUSTERING_PART_SIZE {
        let selection: Vec<usize> = (0..spheres.len()).collect();
        let centers = select_centers_for_clusters(spheres, expansion);
        return cluster_spheres_using_centers(spheres, &selection, &centers);
    }

    split_for_size_of_part(spheres, MAX_CLUSTERING_PART_SIZE)
        .into_iter()
        .flat_map(|selection| {
            let contents: Vec<Sphere> = selection.iter().map(|&i| spheres[i]).collect();
            let centers = select_centers_for_clusters(&contents, expansion);
            cluster_spheres_using_centers(spheres, &selection, &centers)
        })
        .collect()
}

fn cluster_spheres_in_layers(
    spheres: &[Sphere],
    initial_radius: f64,
    min_number_of_clusters: usize,
) -> Vec<Vec<Cluster>> {
    if spheres.is_empty() {
        return Vec::new();
    }

    let mut first = cluster_spheres_using_radius_expansion(spheres, initial_radius);
    for cluster in &mut first {
        cluster.leaves_ids.clone_from(&cluster.children);
    }
    let mut layers = vec![first];

    loop {
        let Some(previous) = layers.last() else {
            break;
        };
        if previous.len() <= min_number_of_clusters {
            break;
        }
        let previous_spheres: Vec<Sphere> = previous.iter().map(|c| c.sphere).collect();
        let mut clusters = cluster_spheres_using_radius_expansion(&previous_spheres, 0.0);
        if clusters.len() >= previous.len() || clusters.len() <= min_number_of_clusters {
            break;
        }
        for cluster in &mut clusters {
            cluster.leaves_ids = cluster
                .children
                .iter()
                .flat_map(|&child| previous[child].leaves_ids.iter().copied())
                .collect();
            cluster.sphere.r = cluster
                .leaves_ids
                .iter()
                .map(|&leaf| maximal_distance_from_point_to_sphere(&cluster.sphere.center, &spheres[leaf]))
                .fold(0.0, f64::max);
        }
        layers.push(clusters);
    }

    layers
}
