// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Apollonius triangulation: the quadruples of balls that have an empty
//! tangent sphere, i.e. the vertices of the additively weighted Voronoi diagram.
//!
//! The search walks facets. A facet is a triple of balls; the two planes
//! tangent to it bound two half-spaces, each of which can hold one "d" ball
//! whose tangent sphere is empty. Balls sitting between the planes ("e" balls)
//! can form further empty tangent spheres. Every found quadruple spawns three
//! new facets until nothing is left to visit.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{self, Write};

use log::{debug, info, trace, warn};
use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::bounding_spheres_hierarchy::{
    BoundingSpheresHierarchy, HierarchyVisitor, LeafVerdict, check_initial_radius,
    sort_objects_by_distance_to_one_of_them,
};
use crate::collisions::{find_all_hidden_spheres, find_all_touching, find_any_collision};
use crate::error::Result;
use crate::geometry::float_cmp::gt;
use crate::geometry::{
    EPSILON, distance, distance_from_point_to_line, halfspace_of_point, halfspace_of_sphere,
    minimal_distance_from_sphere_to_sphere, plane_normal_from_three_points,
    sphere_intersects_sphere, sphere_touches_sphere, spheres_equal,
};
use crate::input::validate_balls;
use crate::tangent::{
    tangent_planes_of_three_spheres, tangent_spheres_of_four_spheres,
    tangent_spheres_of_three_spheres,
};
use crate::tuple::{Quadruple, Triple};
use crate::types::{Ball, Sphere, spheres_from_balls};

/// Tangent spheres (one or two) of every quadruple, in canonical quadruple order.
pub type QuadruplesMap = BTreeMap<Quadruple, Vec<Sphere>>;

/// Balls adjacent to each ball through shared quadruples.
pub type NeighborsMap = BTreeMap<usize, BTreeSet<usize>>;

/// Fourth balls completing each facet into a quadruple.
pub type TriplesNeighborsMap = BTreeMap<Triple, BTreeSet<usize>>;

/// Restarted walks only consider this many nearest balls when bootstrapping.
const RESTART_TRAVERSAL_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuadruplesSearchLog {
    pub added_quadruples: usize,
    pub added_tangent_spheres: usize,
    pub processed_faces: usize,
    /// Faces without two tangent planes
    pub difficult_faces: usize,
    pub produced_faces: usize,
    pub updated_faces: usize,
    pub triples_repetitions: usize,
    pub first_faces_iterations: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SurplusQuadruplesSearchLog {
    pub surplus_quadruples: usize,
    pub surplus_tangent_spheres: usize,
    /// Tangent spheres touching more than four balls
    pub degenerate_tangent_spheres: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TriangulationResult {
    pub quadruples_map: QuadruplesMap,
    pub search_log: QuadruplesSearchLog,
    pub surplus_log: SurplusQuadruplesSearchLog,
    pub excluded_hidden_balls: BTreeSet<usize>,
    /// Admitted balls that ended up in no quadruple
    pub ignored_balls: BTreeSet<usize>,
}

impl TriangulationResult {
    /// Write the `key value` diagnostics summary.
    ///
    /// # Errors
    /// Propagates write failures.
    pub fn print_status<W: Write>(&self, output: &mut W) -> io::Result<()> {
        writeln!(output, "quadruples {}", self.quadruples_map.len())?;
        writeln!(
            output,
            "tangent_spheres {}",
            count_tangent_spheres(&self.quadruples_map)
        )?;
        writeln!(output, "processed_faces {}", self.search_log.processed_faces)?;
        writeln!(output, "difficult_faces {}", self.search_log.difficult_faces)?;
        writeln!(
            output,
            "first_iterations {}",
            self.search_log.first_faces_iterations
        )?;
        writeln!(
            output,
            "surplus_tangent_spheres {}",
            self.surplus_log.surplus_tangent_spheres
        )?;
        writeln!(
            output,
            "excluded_hidden_balls {}",
            self.excluded_hidden_balls.len()
        )?;
        writeln!(output, "ignored_balls {}", self.ignored_balls.len())?;
        writeln!(output, "epsilon {EPSILON:e}")
    }
}

/// Triangulate a whole set of balls.
///
/// With `exclude_hidden_balls`, balls buried inside other balls are removed
/// before the walk; quadruple indices always refer to the input order.
/// With `include_surplus_quadruples`, degenerate tangent spheres that touch
/// more than four balls are registered under every 4-subset of those balls.
///
/// # Errors
/// Fails on an invalid `init_radius`, fewer than four balls or non-finite values.
pub fn construct_result(
    balls: &[Ball],
    init_radius: f64,
    exclude_hidden_balls: bool,
    include_surplus_quadruples: bool,
) -> Result<TriangulationResult> {
    check_initial_radius(init_radius)?;
    validate_balls(balls)?;

    let spheres = spheres_from_balls(balls);
    let mut result = TriangulationResult::default();
    let mut bsh = BoundingSpheresHierarchy::new(spheres.clone(), init_radius, 1)?;

    let mut backward_mapping = Vec::new();
    if exclude_hidden_balls {
        result.excluded_hidden_balls = find_all_hidden_spheres(&bsh);
        if !result.excluded_hidden_balls.is_empty() {
            debug!(
                "Excluding {} hidden balls",
                result.excluded_hidden_balls.len()
            );
            let (refined, mapping): (Vec<Sphere>, Vec<usize>) = spheres
                .iter()
                .enumerate()
                .filter(|(i, _)| !result.excluded_hidden_balls.contains(i))
                .map(|(i, s)| (*s, i))
                .unzip();
            backward_mapping = mapping;
            bsh = BoundingSpheresHierarchy::new(refined, init_radius, 1)?;
        }
    }

    let admittance = vec![true; bsh.leaves_spheres().len()];
    result.search_log = find_valid_quadruples(&bsh, &admittance, &mut result.quadruples_map);
    result.surplus_log =
        handle_surplus_quadruples(&bsh, &mut result.quadruples_map, include_surplus_quadruples);

    if !backward_mapping.is_empty() {
        result.quadruples_map = renumber_quadruples_map(&result.quadruples_map, &backward_mapping);
    }
    let admitted: Vec<bool> = (0..balls.len())
        .map(|i| !result.excluded_hidden_balls.contains(&i))
        .collect();
    result.ignored_balls = collect_ignored_balls(&admitted, &result.quadruples_map);

    info!(
        "Triangulated {} balls: {} quadruples, {} tangent spheres",
        balls.len(),
        result.quadruples_map.len(),
        count_tangent_spheres(&result.quadruples_map)
    );

    Ok(result)
}

/// Triangulate only around the admitted balls, against a prebuilt hierarchy.
///
/// Only quadruples containing at least one admitted ball are reported.
/// Out-of-range ids are ignored and an empty admittance gives an empty result.
pub fn construct_result_for_admittance_set<I>(
    bsh: &BoundingSpheresHierarchy,
    admitted_ids: I,
    include_surplus_quadruples: bool,
) -> TriangulationResult
where
    I: IntoIterator<Item = usize>,
{
    let mut result = TriangulationResult::default();
    let mut admittance = vec![false; bsh.leaves_spheres().len()];
    let mut any_admitted = false;
    for id in admitted_ids {
        if let Some(slot) = admittance.get_mut(id) {
            *slot = true;
            any_admitted = true;
        }
    }
    if !any_admitted {
        return result;
    }

    result.search_log = find_valid_quadruples(bsh, &admittance, &mut result.quadruples_map);
    result.surplus_log =
        handle_surplus_quadruples(bsh, &mut result.quadruples_map, include_surplus_quadruples);
    result.ignored_balls = collect_ignored_balls(&admittance, &result.quadruples_map);
    result
}

/// Add all tangent spheres of `source` into `destination`.
pub fn merge_quadruples_maps(source: &QuadruplesMap, destination: &mut QuadruplesMap) {
    for (quadruple, tangent_spheres) in source {
        for tangent_sphere in tangent_spheres {
            augment_quadruples_map(*quadruple, *tangent_sphere, destination);
        }
    }
}

/// Brute-force verification of a quadruples map against all balls.
#[must_use]
pub fn check_quadruples_map(spheres: &[Sphere], map: &QuadruplesMap) -> bool {
    map.iter().all(|(quadruple, tangent_spheres)| {
        if quadruple.has_repetitions()
            || tangent_spheres.is_empty()
            || tangent_spheres.len() > 2
            || (tangent_spheres.len() == 2 && spheres_equal(&tangent_spheres[0], &tangent_spheres[1]))
        {
            return false;
        }
        tangent_spheres.iter().all(|t| {
            quadruple
                .iter()
                .all(|id| spheres.get(id).is_some_and(|s| sphere_touches_sphere(t, s)))
                && !spheres.iter().any(|s| sphere_intersects_sphere(t, s))
        })
    })
}

#[must_use]
pub fn count_tangent_spheres(map: &QuadruplesMap) -> usize {
    map.values().map(Vec::len).sum()
}

#[must_use]
pub fn collect_neighbors_map(map: &QuadruplesMap) -> NeighborsMap {
    let mut neighbors = NeighborsMap::new();
    for quadruple in map.keys() {
        for a in quadruple.iter() {
            for b in quadruple.iter().filter(|&b| b != a) {
                neighbors.entry(a).or_default().insert(b);
            }
        }
    }
    neighbors
}

#[must_use]
pub fn collect_triples_neighbors_map(map: &QuadruplesMap) -> TriplesNeighborsMap {
    let mut neighbors = TriplesNeighborsMap::new();
    for quadruple in map.keys() {
        for i in 0..4 {
            neighbors
                .entry(quadruple.exclude(i))
                .or_default()
                .insert(quadruple.get(i));
        }
    }
    neighbors
}

/// Translate quadruple indices through `mapping`, dropping quadruples with unmapped indices.
#[must_use]
pub fn renumber_quadruples_map(map: &QuadruplesMap, mapping: &[usize]) -> QuadruplesMap {
    map.iter()
        .filter_map(|(q, ts)| q.renumbered(mapping).map(|mq| (mq, ts.clone())))
        .collect()
}

/// Returns (quadruple added, tangent sphere added).
fn augment_quadruples_map(
    quadruple: Quadruple,
    tangent_sphere: Sphere,
    map: &mut QuadruplesMap,
) -> (bool, bool) {
    match map.get_mut(&quadruple) {
        None => {
            map.insert(quadruple, vec![tangent_sphere]);
            (true, true)
        }
        Some(list) => {
            if list.len() == 1 && !spheres_equal(&list[0], &tangent_sphere) {
                list.push(tangent_sphere);
                (false, true)
            } else {
                (false, false)
            }
        }
    }
}

fn collect_ignored_balls(admittance: &[bool], map: &QuadruplesMap) -> BTreeSet<usize> {
    let mut included = vec![false; admittance.len()];
    for id in map.keys().flat_map(Quadruple::iter) {
        if let Some(slot) = included.get_mut(id) {
            *slot = true;
        }
    }
    admittance
        .iter()
        .zip(&included)
        .enumerate()
        .filter(|(_, (admitted, included))| **admitted && !**included)
        .map(|(i, _)| i)
        .collect()
}

type Plane = (Point3<f64>, Vector3<f64>);

/// Geometry of a facet that has two tangent planes.
#[derive(Debug, Clone)]
struct FaceSides {
    tangent_planes: [Plane; 2],
    central_planes: [Plane; 2],
    d: [Option<(usize, Sphere)>; 2],
    can_have_negative_tangent_spheres: bool,
}

#[derive(Debug, Clone)]
struct Face<'a> {
    spheres: &'a [Sphere],
    abc_ids: Triple,
    abc: [Sphere; 3],
    sides: Option<FaceSides>,
    can_have_e: bool,
    middle_region: Option<Sphere>,
    e: Vec<(usize, Sphere)>,
}

impl<'a> Face<'a> {
    fn new(spheres: &'a [Sphere], abc_ids: Triple, min_input_radius: f64) -> Self {
        let abc = [
            spheres[abc_ids.get(0)],
            spheres[abc_ids.get(1)],
            spheres[abc_ids.get(2)],
        ];
        let [a, b, c] = &abc;

        let sides = match tangent_planes_of_three_spheres(a, b, c)[..] {
            [plane0, plane1] => {
                let normal = plane_normal_from_three_points(&a.center, &b.center, &c.center);
                let consistent =
                    halfspace_of_point(&a.center, &normal, &(plane0.0 + plane0.1)) == 1;
                let (n0, n1) = if consistent {
                    (normal, -normal)
                } else {
                    (-normal, normal)
                };
                Some(FaceSides {
                    tangent_planes: [plane0, plane1],
                    central_planes: [(a.center, n0), (a.center, n1)],
                    d: [None, None],
                    can_have_negative_tangent_spheres: sphere_intersects_sphere(a, b)
                        && sphere_intersects_sphere(a, c)
                        && sphere_intersects_sphere(b, c),
                })
            }
            _ => None,
        };

        let can_have_e = sides.is_none() || abc.iter().any(|s| gt(s.r, min_input_radius));

        let middle_region = match &sides {
            Some(sides) if can_have_e => middle_region_between(
                &abc,
                [sides.tangent_planes[0].1; 3],
                [sides.tangent_planes[1].1; 3],
            ),
            _ => None,
        };

        Self {
            spheres,
            abc_ids,
            abc,
            sides,
            can_have_e,
            middle_region,
            e: Vec::new(),
        }
    }

    const fn can_have_d(&self) -> bool {
        self.sides.is_some()
    }

    fn d(&self, d_number: usize) -> Option<(usize, Sphere)> {
        self.sides.as_ref().and_then(|s| s.d[d_number])
    }

    fn has_d(&self, d_number: usize) -> bool {
        self.d(d_number).is_some()
    }

    fn d_id(&self, d_number: usize) -> Option<usize> {
        self.d(d_number).map(|(id, _)| id)
    }

    fn set_d(&mut self, d_id: usize, d_number: usize, tangent_sphere: Sphere) {
        if let Some(sides) = &mut self.sides
            && sides.d[d_number].is_none_or(|(id, _)| id != d_id)
        {
            sides.d[d_number] = Some((d_id, tangent_sphere));
        }
    }

    /// Seed a d ball known from a neighboring facet, on whichever side it lies.
    fn set_d_with_side_selection(&mut self, d_id: usize, tangent_sphere: Sphere) {
        let Some(sides) = &self.sides else {
            return;
        };
        let d_sphere = &self.spheres[d_id];
        let [(p0, n0), (p1, n1)] = &sides.tangent_planes;
        let h0 = halfspace_of_sphere(p0, n0, d_sphere);
        let h1 = halfspace_of_sphere(p1, n1, d_sphere);
        if h0 >= 0 && h1 == -1 {
            self.set_d(d_id, 0, tangent_sphere);
        } else if h0 == -1 && h1 >= 0 {
            self.set_d(d_id, 1, tangent_sphere);
        }
    }

    fn unset_d(&mut self, d_number: usize) {
        if let Some(sides) = &mut self.sides {
            sides.d[d_number] = None;
        }
    }

    fn has_e(&self) -> bool {
        !self.e.is_empty()
    }

    fn add_e(&mut self, e_id: usize, tangent_sphere: Sphere) {
        if self.can_have_e {
            self.e.push((e_id, tangent_sphere));
        }
    }

    fn intersects_recorded_ball(&self, sphere: &Sphere) -> bool {
        let d_ids = self
            .sides
            .iter()
            .flat_map(|s| s.d.iter().flatten().map(|(id, _)| *id));
        let e_ids = self.e.iter().map(|(id, _)| *id);
        d_ids
            .chain(e_ids)
            .any(|id| sphere_intersects_sphere(sphere, &self.spheres[id]))
    }

    fn sphere_may_contain_candidate_for_d(&self, sphere: &Sphere, d_number: usize) -> bool {
        self.sides.as_ref().is_some_and(|sides| {
            let (p, n) = &sides.tangent_planes[d_number];
            halfspace_of_sphere(p, n, sphere) >= 0
        })
    }

    fn check_candidate_for_d(&self, d_id: usize, d_number: usize) -> Option<Sphere> {
        let sides = self.sides.as_ref()?;
        if self.d_id(d_number) == Some(d_id) || self.abc_ids.contains(d_id) {
            return None;
        }
        let d_sphere = self.spheres.get(d_id)?;
        let (p, n) = &sides.tangent_planes[d_number];
        if halfspace_of_sphere(p, n, d_sphere) < 0 {
            return None;
        }

        let [a, b, c] = &self.abc;
        let tangent_sphere = match tangent_spheres_of_four_spheres(a, b, c, d_sphere)[..] {
            [t] => t,
            [t0, t1] => {
                // Take the solution on this side of the plane through the facet centers
                let (cp, cn) = &sides.central_planes[d_number];
                match (
                    halfspace_of_point(cp, cn, &t0.center),
                    halfspace_of_point(cp, cn, &t1.center),
                ) {
                    (-1, 1) => t1,
                    (-1, -1) => {
                        if t0.r < t1.r {
                            t0
                        } else {
                            t1
                        }
                    }
                    (1, 1) => {
                        if t0.r > t1.r {
                            t0
                        } else {
                            t1
                        }
                    }
                    _ => t0,
                }
            }
            _ => return None,
        };

        (!self.intersects_recorded_ball(&tangent_sphere)).then_some(tangent_sphere)
    }

    fn update_middle_region_approximation(&mut self) {
        if !self.can_have_e {
            return;
        }
        let Some((Some((_, t0)), Some((_, t1)))) = self.sides.as_ref().map(|s| (s.d[0], s.d[1]))
        else {
            return;
        };
        let towards = |t: &Sphere| self.abc.map(|s| (t.center - s.center).normalize());
        if let Some(region) = middle_region_between(&self.abc, towards(&t0), towards(&t1)) {
            self.middle_region = Some(region);
        }
    }

    fn sphere_may_contain_candidate_for_e(&self, sphere: &Sphere) -> bool {
        if !self.can_have_e {
            return false;
        }
        let Some(sides) = &self.sides else {
            return true;
        };
        if let Some(region) = &self.middle_region
            && !sphere_intersects_sphere(region, sphere)
        {
            return false;
        }
        let near_d_axis = match sides.d {
            [Some((_, t0)), Some((_, t1))] => {
                distance_from_point_to_line(&sphere.center, &t0.center, &t1.center)
                    < sphere.r + t0.r.max(t1.r)
                    || (sides.can_have_negative_tangent_spheres
                        && self.abc.iter().all(|s| sphere_intersects_sphere(sphere, s)))
            }
            _ => true,
        };
        let [(p0, n0), (p1, n1)] = &sides.tangent_planes;
        near_d_axis
            && halfspace_of_sphere(p0, n0, sphere) <= 0
            && halfspace_of_sphere(p1, n1, sphere) <= 0
    }

    fn check_candidate_for_e(&self, e_id: usize) -> Vec<Sphere> {
        let Some(e_sphere) = self.spheres.get(e_id) else {
            return Vec::new();
        };
        if !self.can_have_e || self.abc_ids.contains(e_id) {
            return Vec::new();
        }
        if let Some(sides) = &self.sides {
            if self.d_id(0) == Some(e_id) || self.d_id(1) == Some(e_id) {
                return Vec::new();
            }
            if self
                .middle_region
                .is_some_and(|region| !sphere_intersects_sphere(&region, e_sphere))
            {
                return Vec::new();
            }
            let [(p0, n0), (p1, n1)] = &sides.tangent_planes;
            if halfspace_of_sphere(p0, n0, e_sphere) != -1
                || halfspace_of_sphere(p1, n1, e_sphere) != -1
            {
                return Vec::new();
            }
        }
        let [a, b, c] = &self.abc;
        tangent_spheres_of_four_spheres(a, b, c, e_sphere)
            .into_iter()
            .filter(|t| !self.intersects_recorded_ball(t))
            .collect()
    }

    fn recorded(&self, with_d0: bool, with_d1: bool, with_e: bool) -> Vec<(usize, Sphere)> {
        let mut recorded = Vec::with_capacity(2 + self.e.len());
        if with_d0 && let Some(d) = self.d(0) {
            recorded.push(d);
        }
        if with_d1 && let Some(d) = self.d(1) {
            recorded.push(d);
        }
        if with_e && self.can_have_e {
            recorded.extend_from_slice(&self.e);
        }
        recorded
    }

    fn produce_quadruples(
        &self,
        with_d0: bool,
        with_d1: bool,
        with_e: bool,
    ) -> Vec<(Quadruple, Sphere)> {
        self.recorded(with_d0, with_d1, with_e)
            .into_iter()
            .map(|(id, t)| (Quadruple::from_triple(&self.abc_ids, id), t))
            .collect()
    }

    /// Facets of the new quadruples, each with the ball it already knows across from it.
    fn produce_prefaces(
        &self,
        with_d0: bool,
        with_d1: bool,
        with_e: bool,
    ) -> Vec<(Triple, usize, Sphere)> {
        let recorded = self.recorded(with_d0, with_d1, with_e);
        let mut prefaces = Vec::with_capacity(3 * recorded.len());
        for j in 0..3 {
            let pair = self.abc_ids.exclude(j);
            for &(id, t) in &recorded {
                prefaces.push((
                    Triple::new(pair.get(0), pair.get(1), id),
                    self.abc_ids.get(j),
                    t,
                ));
            }
        }
        prefaces
    }
}

/// Sphere covering the two circles where the facet's balls touch two given directions.
fn middle_region_between(
    abc: &[Sphere; 3],
    directions0: [Vector3<f64>; 3],
    directions1: [Vector3<f64>; 3],
) -> Option<Sphere> {
    let disk = |directions: [Vector3<f64>; 3]| {
        let points: Vec<Sphere> = abc
            .iter()
            .zip(directions)
            .map(|(s, n)| Sphere::new(s.center + n * s.r, 0.0))
            .collect();
        match tangent_spheres_of_three_spheres(&points[0], &points[1], &points[2])[..] {
            [disk] => Some(disk),
            _ => None,
        }
    };
    let disk0 = disk(directions0)?;
    let disk1 = disk(directions1)?;
    let center = Point3::from((disk0.center.coords + disk1.center.coords) * 0.5);
    let r = (distance(&center, &disk0.center) + disk0.r)
        .max(distance(&center, &disk1.center) + disk1.r);
    Some(Sphere::new(center, r))
}

struct AnyDSearch<'f, 'a> {
    face: &'f mut Face<'a>,
    d_number: usize,
    constraint: Option<Sphere>,
}

impl HierarchyVisitor for AnyDSearch<'_, '_> {
    fn visit_node(&mut self, bounding_sphere: &Sphere) -> bool {
        self.constraint
            .is_none_or(|c| sphere_intersects_sphere(&c, bounding_sphere))
            && self
                .face
                .sphere_may_contain_candidate_for_d(bounding_sphere, self.d_number)
    }

    fn visit_leaf(&mut self, id: usize, _sphere: &Sphere) -> LeafVerdict {
        match self.face.check_candidate_for_d(id, self.d_number) {
            Some(tangent_sphere) => {
                self.face.set_d(id, self.d_number, tangent_sphere);
                LeafVerdict::ACCEPT_AND_STOP
            }
            None => LeafVerdict::SKIP,
        }
    }
}

/// Find some d ball, first near the tangent sphere of the opposite side.
fn find_any_d(bsh: &BoundingSpheresHierarchy, face: &mut Face<'_>, d_number: usize) -> bool {
    if face.has_d(d_number) {
        return false;
    }
    let constraint = face.d(1 - d_number).map(|(_, t)| t);
    let mut search = AnyDSearch {
        face,
        d_number,
        constraint,
    };
    bsh.search(&mut search);
    if search.constraint.is_some() && !search.face.has_d(d_number) {
        search.constraint = None;
        bsh.search(&mut search);
    }
    search.face.has_d(d_number)
}

struct ValidDSearch<'f, 'a> {
    face: &'f mut Face<'a>,
    d_number: usize,
    tried: HashSet<usize>,
}

impl HierarchyVisitor for ValidDSearch<'_, '_> {
    fn visit_node(&mut self, bounding_sphere: &Sphere) -> bool {
        self.face
            .d(self.d_number)
            .is_some_and(|(_, t)| sphere_intersects_sphere(bounding_sphere, &t))
    }

    fn visit_leaf(&mut self, id: usize, sphere: &Sphere) -> LeafVerdict {
        let Some((_, current)) = self.face.d(self.d_number) else {
            return LeafVerdict::SKIP;
        };
        if !sphere_intersects_sphere(sphere, &current) {
            return LeafVerdict::SKIP;
        }
        if let Some(tangent_sphere) = self.face.check_candidate_for_d(id, self.d_number)
            && self.tried.insert(id)
        {
            self.face.set_d(id, self.d_number, tangent_sphere);
            LeafVerdict::ACCEPT_AND_STOP
        } else {
            LeafVerdict::ACCEPT
        }
    }
}

/// Replace the d ball by any ball inside its tangent sphere until the sphere is empty.
fn find_valid_d(bsh: &BoundingSpheresHierarchy, face: &mut Face<'_>, d_number: usize) -> bool {
    if !face.has_d(d_number) {
        return false;
    }
    let mut search = ValidDSearch {
        face,
        d_number,
        tried: HashSet::new(),
    };
    while search.face.has_d(d_number) {
        let results = bsh.search(&mut search);
        let Some(&last) = results.last() else {
            return true;
        };
        if search.face.d_id(d_number) != Some(last) {
            search.face.unset_d(d_number);
        }
    }
    false
}

struct ValidESearch<'f, 'a, 'b> {
    face: &'f mut Face<'a>,
    bsh: &'b BoundingSpheresHierarchy,
}

impl HierarchyVisitor for ValidESearch<'_, '_, '_> {
    fn visit_node(&mut self, bounding_sphere: &Sphere) -> bool {
        self.face.sphere_may_contain_candidate_for_e(bounding_sphere)
    }

    fn visit_leaf(&mut self, id: usize, _sphere: &Sphere) -> LeafVerdict {
        let mut added = false;
        for tangent_sphere in self.face.check_candidate_for_e(id) {
            if find_any_collision(self.bsh, &tangent_sphere).is_none() {
                self.face.add_e(id, tangent_sphere);
                added = true;
            }
        }
        if added {
            LeafVerdict::ACCEPT
        } else {
            LeafVerdict::SKIP
        }
    }
}

fn find_valid_e(bsh: &BoundingSpheresHierarchy, face: &mut Face<'_>) -> bool {
    face.update_middle_region_approximation();
    !bsh.search(&mut ValidESearch { face, bsh }).is_empty()
}

/// Admitted ball closest to the centroid of admitted balls.
fn select_starting_sphere(spheres: &[Sphere], admittance: &[bool]) -> usize {
    let admitted: Vec<usize> = (0..spheres.len()).filter(|&i| admittance[i]).collect();
    if admitted.is_empty() {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let centroid = Point3::from(
        admitted
            .iter()
            .fold(Vector3::zeros(), |acc, &i| acc + spheres[i].center.coords)
            / admitted.len() as f64,
    );
    let mut best = admitted[0];
    let mut best_distance = f64::MAX;
    for &i in &admitted {
        let d = distance(&centroid, &spheres[i].center);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// Scan quadruples among the balls nearest to `starting_id` for one with an empty tangent sphere.
fn find_first_valid_face<'a>(
    bsh: &'a BoundingSpheresHierarchy,
    admittance: &[bool],
    starting_id: usize,
    iterations: &mut usize,
    fix_starting_id: bool,
    max_traversal: usize,
) -> Option<Face<'a>> {
    let spheres = bsh.leaves_spheres();
    if spheres.len() < 4 || starting_id >= spheres.len() {
        return None;
    }
    let traversal = sort_objects_by_distance_to_one_of_them(
        spheres,
        starting_id,
        minimal_distance_from_sphere_to_sphere,
    );
    let is_empty = |t: &Sphere| find_any_collision(bsh, t).is_none();

    for d in 3..traversal.len().min(max_traversal) {
        let a_end = if fix_starting_id { 1 } else { d };
        for a in 0..a_end {
            for b in a + 1..d {
                for c in b + 1..d {
                    *iterations += 1;
                    if !(admittance[traversal[a]] || admittance[traversal[b]] || admittance[traversal[c]]) {
                        continue;
                    }
                    let triple = Triple::new(traversal[a], traversal[b], traversal[c]);
                    let q = Quadruple::from_triple(&triple, traversal[d]);
                    let tangents = tangent_spheres_of_four_spheres(
                        &spheres[q.get(0)],
                        &spheres[q.get(1)],
                        &spheres[q.get(2)],
                        &spheres[q.get(3)],
                    );
                    if tangents.iter().any(is_empty) {
                        return Some(Face::new(spheres, triple, bsh.min_input_radius()));
                    }
                }
            }
        }
    }
    None
}

fn find_valid_quadruples(
    bsh: &BoundingSpheresHierarchy,
    admittance: &[bool],
    map: &mut QuadruplesMap,
) -> QuadruplesSearchLog {
    let spheres = bsh.leaves_spheres();
    let min_radius = bsh.min_input_radius();
    let mut log = QuadruplesSearchLog::default();

    let mut stack: Vec<Face<'_>> = find_first_valid_face(
        bsh,
        admittance,
        select_starting_sphere(spheres, admittance),
        &mut log.first_faces_iterations,
        false,
        usize::MAX,
    )
    .into_iter()
    .collect();
    let mut processed: HashSet<Triple> = HashSet::new();
    let mut used = vec![false; spheres.len()];
    let mut ignorable: HashSet<usize> = HashSet::new();

    while !stack.is_empty() {
        let mut stack_index: HashMap<Triple, usize> = stack
            .iter()
            .enumerate()
            .map(|(i, f)| (f.abc_ids, i))
            .collect();

        while let Some(mut face) = stack.pop() {
            stack_index.remove(&face.abc_ids);
            processed.insert(face.abc_ids);
            log.processed_faces += 1;
            if !face.can_have_d() {
                log.difficult_faces += 1;
            }

            let found_d0 = face.can_have_d()
                && !face.has_d(0)
                && find_any_d(bsh, &mut face, 0)
                && find_valid_d(bsh, &mut face, 0);
            let found_d1 = face.can_have_d()
                && !face.has_d(1)
                && find_any_d(bsh, &mut face, 1)
                && find_valid_d(bsh, &mut face, 1);
            let found_e = face.can_have_e && find_valid_e(bsh, &mut face);

            if found_d0 || found_d1 || found_e {
                for (quadruple, tangent_sphere) in face.produce_quadruples(found_d0, found_d1, found_e)
                {
                    let (quadruple_added, sphere_added) =
                        augment_quadruples_map(quadruple, tangent_sphere, map);
                    log.added_quadruples += usize::from(quadruple_added);
                    log.added_tangent_spheres += usize::from(sphere_added);
                }

                for (triple, d_id, tangent_sphere) in face.produce_prefaces(found_d0, found_d1, found_e)
                {
                    if !triple.iter().any(|id| admittance[id]) {
                        continue;
                    }
                    if processed.contains(&triple) {
                        log.triples_repetitions += 1;
                    } else if let Some(&i) = stack_index.get(&triple) {
                        stack[i].set_d_with_side_selection(d_id, tangent_sphere);
                        log.updated_faces += 1;
                    } else {
                        stack_index.insert(triple, stack.len());
                        let mut preface = Face::new(spheres, triple, min_radius);
                        preface.set_d_with_side_selection(d_id, tangent_sphere);
                        stack.push(preface);
                        log.produced_faces += 1;
                    }
                }
            }

            if face.has_d(0) || face.has_d(1) || face.has_e() {
                for id in face.abc_ids.iter() {
                    used[id] = true;
                }
            }
        }

        // Restart from admitted balls the walk has not reached yet
        for i in 0..spheres.len() {
            if used[i] || !admittance[i] || !ignorable.insert(i) {
                continue;
            }
            if let Some(face) = find_first_valid_face(
                bsh,
                admittance,
                i,
                &mut log.first_faces_iterations,
                true,
                RESTART_TRAVERSAL_LIMIT,
            ) {
                trace!("Restarting facet walk from ball {i}");
                stack.push(face);
                break;
            }
        }
    }

    debug!(
        "Facet walk: {} quadruples, {} faces processed, {} difficult",
        log.added_quadruples, log.processed_faces, log.difficult_faces
    );
    log
}

/// Find tangent spheres touching more than four balls.
///
/// When `include` is set, every 4-subset of the touching balls is added to the
/// map with that tangent sphere. Otherwise the map is left as found by the walk
/// and only the degeneracies are reported.
fn handle_surplus_quadruples(
    bsh: &BoundingSpheresHierarchy,
    map: &mut QuadruplesMap,
    include: bool,
) -> SurplusQuadruplesSearchLog {
    let mut log = SurplusQuadruplesSearchLog::default();
    let mut candidates = Vec::new();

    for (quadruple, tangent_spheres) in map.iter() {
        for tangent_sphere in tangent_spheres {
            let touching = find_all_touching(bsh, tangent_sphere);
            if touching.len() <= 4 {
                continue;
            }
            log.degenerate_tangent_spheres += 1;
            debug!(
                "Tangent sphere of quadruple ({quadruple}) touches {} balls: {touching:?}",
                touching.len()
            );
            if include {
                let n = touching.len();
                for a in 0..n {
                    for b in a + 1..n {
                        for c in b + 1..n {
                            for d in c + 1..n {
                                candidates.push((
                                    Quadruple::new(touching[a], touching[b], touching[c], touching[d]),
                                    *tangent_sphere,
                                ));
                            }
                        }
                    }
                }
            }
        }
    }

    for (quadruple, tangent_sphere) in candidates {
        let (quadruple_added, sphere_added) = augment_quadruples_map(quadruple, tangent_sphere, map);
        log.surplus_quadruples += usize::from(quadruple_added);
        log.surplus_tangent_spheres += usize::from(sphere_added);
    }

    if log.degenerate_tangent_spheres > 0 && !include {
        warn!(
            "{} tangent spheres touch more than four balls; kept the first quadruple found for each",
            log.degenerate_tangent_spheres
        );
    }
    log
}
