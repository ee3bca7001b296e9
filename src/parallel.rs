// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Partitioned triangulation with interchangeable execution backends.
//!
//! The balls are split into spatially coherent admittance sets, each set is
//! triangulated against one shared hierarchy, and the partial quadruple maps
//! are merged on a single thread once every partition has finished.

use std::fmt;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;

use log::{debug, info, warn};
use serde::Serialize;

use crate::bounding_spheres_hierarchy::{BoundingSpheresHierarchy, check_initial_radius};
use crate::error::{Error, Result};
use crate::input::validate_balls;
use crate::splitting::split_for_number_of_parts;
use crate::triangulation::{
    QuadruplesMap, construct_result_for_admittance_set, count_tangent_spheres,
    merge_quadruples_maps,
};
use crate::types::{Ball, spheres_from_balls};

/// Scheduling model for partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ParallelMethod {
    /// Sequential loop over partitions
    Simulated,
    /// Shared-memory thread pool
    Openmp,
    /// Worker ranks exchanging flat numeric buffers
    Mpi,
}

impl ParallelMethod {
    const ALL: [Self; 3] = [Self::Simulated, Self::Openmp, Self::Mpi];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Openmp => "openmp",
            Self::Mpi => "mpi",
        }
    }

    /// Whether the backend was compiled in.
    #[must_use]
    pub const fn is_available(self) -> bool {
        match self {
            Self::Simulated => true,
            Self::Openmp => cfg!(feature = "thread-pool"),
            Self::Mpi => cfg!(feature = "message-passing"),
        }
    }
}

impl fmt::Display for ParallelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParallelMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.name() == s && m.is_available())
            .ok_or_else(|| unavailable(s))
    }
}

fn unavailable(method: &str) -> Error {
    Error::UnavailableMethod {
        method: method.to_string(),
        available: available_methods()
            .iter()
            .map(|m| m.name())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Methods usable in this build.
#[must_use]
pub fn available_methods() -> Vec<ParallelMethod> {
    ParallelMethod::ALL
        .into_iter()
        .filter(|m| m.is_available())
        .collect()
}

/// Runs `construct_result_for_admittance_set` for every partition.
///
/// Returns the partial maps in partition order, or
/// [`Error::PartitionsFailed`] naming every partition that failed.
pub trait PartitionExecutor {
    /// # Errors
    /// Fails when any partition fails; partial results are discarded.
    fn execute(
        &self,
        bsh: &BoundingSpheresHierarchy,
        partitions: &[Vec<usize>],
        include_surplus_quadruples: bool,
    ) -> Result<Vec<QuadruplesMap>>;
}

type PartitionOutcome = std::result::Result<QuadruplesMap, ()>;

fn run_partition(
    bsh: &BoundingSpheresHierarchy,
    index: usize,
    ids: &[usize],
    include_surplus_quadruples: bool,
) -> PartitionOutcome {
    catch_unwind(AssertUnwindSafe(|| {
        construct_result_for_admittance_set(bsh, ids.iter().copied(), include_surplus_quadruples)
            .quadruples_map
    }))
    .map(|map| {
        debug!("Partition {index}: {} balls, {} quadruples", ids.len(), map.len());
        map
    })
    .map_err(|_| warn!("Partition {index} failed"))
}

fn gather(outcomes: Vec<PartitionOutcome>) -> Result<Vec<QuadruplesMap>> {
    let failed: Vec<usize> = outcomes
        .iter()
        .enumerate()
        .filter(|(_, o)| o.is_err())
        .map(|(i, _)| i)
        .collect();
    if !failed.is_empty() {
        return Err(Error::PartitionsFailed { parts: failed });
    }
    Ok(outcomes.into_iter().flatten().collect())
}

/// Sequential loop, the reference behavior of all backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExecutor;

impl PartitionExecutor for SimulatedExecutor {
    fn execute(
        &self,
        bsh: &BoundingSpheresHierarchy,
        partitions: &[Vec<usize>],
        include_surplus_quadruples: bool,
    ) -> Result<Vec<QuadruplesMap>> {
        gather(
            partitions
                .iter()
                .enumerate()
                .map(|(i, ids)| run_partition(bsh, i, ids, include_surplus_quadruples))
                .collect(),
        )
    }
}

/// One rayon task per partition, optionally on a dedicated pool.
#[cfg(feature = "thread-pool")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolExecutor {
    pub num_threads: Option<usize>,
}

#[cfg(feature = "thread-pool")]
impl PartitionExecutor for ThreadPoolExecutor {
    fn execute(
        &self,
        bsh: &BoundingSpheresHierarchy,
        partitions: &[Vec<usize>],
        include_surplus_quadruples: bool,
    ) -> Result<Vec<QuadruplesMap>> {
        use rayon::prelude::*;

        let run = || -> Vec<PartitionOutcome> {
            partitions
                .par_iter()
                .enumerate()
                .map(|(i, ids)| run_partition(bsh, i, ids, include_surplus_quadruples))
                .collect()
        };

        let outcomes = match self.num_threads {
            Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => {
                    info!("Using {n} threads");
                    pool.install(run)
                }
                Err(e) => {
                    warn!("Failed to build a pool of {n} threads ({e}), using the global pool");
                    run()
                }
            },
            None => run(),
        };
        gather(outcomes)
    }
}

/// Worker ranks that rebuild the hierarchy from a flat sphere buffer and send
/// back flat quadruple buffers to the coordinating rank.
///
/// Partition `i` is handled by rank `i % (ranks - 1) + 1`. With two ranks or
/// fewer there are no workers to spare and the sequential loop is used.
#[cfg(feature = "message-passing")]
#[derive(Debug, Clone, Copy)]
pub struct MessagePassingExecutor {
    pub ranks: usize,
    pub init_radius: f64,
}

#[cfg(feature = "message-passing")]
mod message_passing {
    use std::thread;

    use crossbeam_channel::{self as channel, Receiver, Sender};
    use log::{debug, trace};

    use super::{MessagePassingExecutor, PartitionExecutor, PartitionOutcome, gather, run_partition};
    use crate::bounding_spheres_hierarchy::BoundingSpheresHierarchy;
    use crate::error::Result;
    use crate::triangulation::QuadruplesMap;
    use crate::tuple::Quadruple;
    use crate::types::Sphere;

    const SPHERE_STRIDE: usize = 4;
    const QUADRUPLE_STRIDE: usize = 8;

    enum WorkOrder {
        Spheres(Vec<f64>),
        Partition { index: usize, ids: Vec<usize> },
    }

    struct Report {
        partition: usize,
        buffer: Option<Vec<f64>>,
    }

    pub(super) fn spheres_to_buffer(spheres: &[Sphere]) -> Vec<f64> {
        spheres
            .iter()
            .flat_map(|s| [s.center.x, s.center.y, s.center.z, s.r])
            .collect()
    }

    pub(super) fn spheres_from_buffer(buffer: &[f64]) -> Vec<Sphere> {
        buffer
            .chunks_exact(SPHERE_STRIDE)
            .map(|v| Sphere::from_coords(v[0], v[1], v[2], v[3]))
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    pub(super) fn quadruples_map_to_buffer(map: &QuadruplesMap) -> Vec<f64> {
        let mut buffer = Vec::with_capacity(map.len() * QUADRUPLE_STRIDE);
        for (q, tangent_spheres) in map {
            for t in tangent_spheres {
                buffer.extend(q.iter().map(|id| id as f64));
                buffer.extend([t.center.x, t.center.y, t.center.z, t.r]);
            }
        }
        buffer
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(super) fn quadruples_map_from_buffer(buffer: &[f64]) -> QuadruplesMap {
        let mut map = QuadruplesMap::new();
        for v in buffer.chunks_exact(QUADRUPLE_STRIDE) {
            let q = Quadruple::new(v[0] as usize, v[1] as usize, v[2] as usize, v[3] as usize);
            map.entry(q)
                .or_default()
                .push(Sphere::from_coords(v[4], v[5], v[6], v[7]));
        }
        map
    }

    fn worker(
        rank: usize,
        init_radius: f64,
        include_surplus_quadruples: bool,
        orders: &Receiver<WorkOrder>,
        reports: &Sender<Report>,
    ) {
        let mut bsh: Option<BoundingSpheresHierarchy> = None;
        for order in orders {
            match order {
                WorkOrder::Spheres(buffer) => {
                    bsh = BoundingSpheresHierarchy::new(
                        spheres_from_buffer(&buffer),
                        init_radius,
                        1,
                    )
                    .ok();
                    trace!("Rank {rank} received {} spheres", buffer.len() / SPHERE_STRIDE);
                }
                WorkOrder::Partition { index, ids } => {
                    let buffer = bsh.as_ref().and_then(|bsh| {
                        run_partition(bsh, index, &ids, include_surplus_quadruples)
                            .ok()
                            .map(|map| quadruples_map_to_buffer(&map))
                    });
                    if reports
                        .send(Report {
                            partition: index,
                            buffer,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    impl PartitionExecutor for MessagePassingExecutor {
        fn execute(
            &self,
            bsh: &BoundingSpheresHierarchy,
            partitions: &[Vec<usize>],
            include_surplus_quadruples: bool,
        ) -> Result<Vec<QuadruplesMap>> {
            if self.ranks <= 2 {
                debug!("{} ranks, falling back to the sequential loop", self.ranks);
                return super::SimulatedExecutor.execute(bsh, partitions, include_surplus_quadruples);
            }

            let workers = self.ranks - 1;
            let spheres_buffer = spheres_to_buffer(bsh.leaves_spheres());
            let (report_sender, report_receiver) = channel::unbounded::<Report>();

            let mut outcomes: Vec<Option<PartitionOutcome>> = vec![None; partitions.len()];

            thread::scope(|scope| -> Result<()> {
                let mut order_senders = Vec::with_capacity(workers);
                for rank in 1..=workers {
                    let (order_sender, order_receiver) = channel::unbounded::<WorkOrder>();
                    let reports = report_sender.clone();
                    let init_radius = self.init_radius;
                    thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || {
                            worker(
                                rank,
                                init_radius,
                                include_surplus_quadruples,
                                &order_receiver,
                                &reports,
                            );
                        })?;
                    order_senders.push(order_sender);
                }
                drop(report_sender);

                for sender in &order_senders {
                    // A closed channel means the worker is gone; its partitions stay unreported
                    let _ = sender.send(WorkOrder::Spheres(spheres_buffer.clone()));
                }
                for (index, ids) in partitions.iter().enumerate() {
                    let rank = index % workers + 1;
                    let _ = order_senders[rank - 1].send(WorkOrder::Partition {
                        index,
                        ids: ids.clone(),
                    });
                }
                drop(order_senders);

                for report in &report_receiver {
                    if let Some(slot) = outcomes.get_mut(report.partition) {
                        *slot = Some(
                            report
                                .buffer
                                .map(|b| quadruples_map_from_buffer(&b))
                                .ok_or(()),
                        );
                    }
                }
                Ok(())
            })?;

            gather(
                outcomes
                    .into_iter()
                    .map(|o| o.unwrap_or(Err(())))
                    .collect(),
            )
        }
    }
}

/// Settings of a partitioned run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParallelConfig {
    pub method: ParallelMethod,
    /// Number of admittance sets, a power of two
    pub parts: usize,
    pub init_radius: f64,
    pub include_surplus_quadruples: bool,
    /// Thread count for the thread pool backend (global pool if unset)
    pub threads: Option<usize>,
    /// Total ranks for the message-passing backend, coordinator included
    pub ranks: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            method: ParallelMethod::Simulated,
            parts: 1,
            init_radius: 3.5,
            include_surplus_quadruples: false,
            threads: None,
            ranks: 4,
        }
    }
}

impl ParallelConfig {
    /// Check everything that does not need the input balls.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        check_initial_radius(self.init_radius)?;
        if !self.parts.is_power_of_two() {
            return Err(Error::PartsNotPowerOfTwo(self.parts));
        }
        if !self.method.is_available() {
            return Err(unavailable(self.method.name()));
        }
        Ok(())
    }

    /// Backend for the configured method.
    ///
    /// # Errors
    /// Returns [`Error::UnavailableMethod`] if the method was not compiled in.
    pub fn executor(&self) -> Result<Box<dyn PartitionExecutor>> {
        match self.method {
            ParallelMethod::Simulated => Ok(Box::new(SimulatedExecutor)),
            #[cfg(feature = "thread-pool")]
            ParallelMethod::Openmp => Ok(Box::new(ThreadPoolExecutor {
                num_threads: self.threads,
            })),
            #[cfg(feature = "message-passing")]
            ParallelMethod::Mpi => Ok(Box::new(MessagePassingExecutor {
                ranks: self.ranks,
                init_radius: self.init_radius,
            })),
            #[allow(unreachable_patterns)]
            other => Err(unavailable(other.name())),
        }
    }
}

/// Merged output of a partitioned run.
#[derive(Debug, Clone, Default)]
pub struct ParallelResult {
    pub balls: usize,
    /// Number of non-empty partitions actually used
    pub parts: usize,
    /// Sum of partial map sizes before merging
    pub produced_quadruples: usize,
    pub merged_quadruples_map: QuadruplesMap,
}

impl ParallelResult {
    /// Write the `key value` diagnostics summary.
    ///
    /// # Errors
    /// Propagates write failures.
    pub fn print_log<W: Write>(&self, output: &mut W) -> io::Result<()> {
        writeln!(output, "balls {}", self.balls)?;
        writeln!(output, "parts {}", self.parts)?;
        writeln!(output, "produced_quadruples {}", self.produced_quadruples)?;
        writeln!(
            output,
            "merged_quadruples {}",
            self.merged_quadruples_map.len()
        )?;
        writeln!(
            output,
            "tangent_spheres {}",
            count_tangent_spheres(&self.merged_quadruples_map)
        )
    }
}

/// Split, triangulate every partition with the configured backend, and merge.
///
/// # Errors
/// Configuration errors come first, then input errors, then partition failures.
pub fn calculate_vertices_in_parallel(
    balls: &[Ball],
    config: &ParallelConfig,
) -> Result<ParallelResult> {
    config.validate()?;
    validate_balls(balls)?;
    let executor = config.executor()?;

    let spheres = spheres_from_balls(balls);
    let partitions = split_for_number_of_parts(&spheres, config.parts)?;
    let bsh = BoundingSpheresHierarchy::new(spheres, config.init_radius, 1)?;

    info!(
        "Processing {} balls in {} parts with method {}",
        balls.len(),
        partitions.len(),
        config.method
    );

    let partial_maps = executor.execute(&bsh, &partitions, config.include_surplus_quadruples)?;

    let mut result = ParallelResult {
        balls: balls.len(),
        parts: partitions.len(),
        ..ParallelResult::default()
    };
    for map in &partial_maps {
        result.produced_quadruples += map.len();
        merge_quadruples_maps(map, &mut result.merged_quadruples_map);
    }
    info!(
        "Merged {} produced quadruples into {}",
        result.produced_quadruples,
        result.merged_quadruples_map.len()
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balls() -> Vec<Ball> {
        let mut balls = Vec::new();
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    let jitter = f64::from((i * 9 + j * 3 + k) * 7919 % 97) * 0.003;
                    balls.push(Ball::new(
                        f64::from(i) * 2.2 + jitter,
                        f64::from(j) * 2.3,
                        f64::from(k) * 2.1 - jitter,
                        1.0 + jitter,
                    ));
                }
            }
        }
        balls
    }

    #[test]
    fn method_names() {
        assert_eq!("simulated".parse::<ParallelMethod>().unwrap(), ParallelMethod::Simulated);
        assert_eq!(ParallelMethod::Openmp.to_string(), "openmp");
        assert!(matches!(
            "cuda".parse::<ParallelMethod>(),
            Err(Error::UnavailableMethod { .. })
        ));
        assert!(available_methods().contains(&ParallelMethod::Simulated));
    }

    #[test]
    fn configuration_is_checked_before_input() {
        let config = ParallelConfig {
            parts: 3,
            ..ParallelConfig::default()
        };
        // Too few balls as well, but the configuration error wins
        assert!(matches!(
            calculate_vertices_in_parallel(&[], &config),
            Err(Error::PartsNotPowerOfTwo(3))
        ));
        let config = ParallelConfig {
            init_radius: 1.0,
            ..ParallelConfig::default()
        };
        assert!(matches!(
            calculate_vertices_in_parallel(&[], &config),
            Err(Error::InvalidInitialRadius(_))
        ));
        assert!(matches!(
            calculate_vertices_in_parallel(&[], &ParallelConfig::default()),
            Err(Error::TooFewBalls(0))
        ));
    }

    #[test]
    fn failures_name_all_parts() {
        let outcomes = vec![Ok(QuadruplesMap::new()), Err(()), Ok(QuadruplesMap::new()), Err(())];
        match gather(outcomes) {
            Err(Error::PartitionsFailed { parts }) => assert_eq!(parts, vec![1, 3]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn simulated_run_reports_counts() {
        let balls = balls();
        let config = ParallelConfig {
            parts: 4,
            ..ParallelConfig::default()
        };
        let result = calculate_vertices_in_parallel(&balls, &config).unwrap();
        assert_eq!(result.balls, 27);
        assert_eq!(result.parts, 4);
        assert!(!result.merged_quadruples_map.is_empty());
        assert!(result.produced_quadruples >= result.merged_quadruples_map.len());

        let mut out = Vec::new();
        result.print_log(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("balls 27\nparts 4\n"));
    }

    #[cfg(feature = "thread-pool")]
    #[test]
    fn thread_pool_matches_simulated() {
        let balls = balls();
        let simulated = calculate_vertices_in_parallel(
            &balls,
            &ParallelConfig {
                parts: 8,
                ..ParallelConfig::default()
            },
        )
        .unwrap();
        let pooled = calculate_vertices_in_parallel(
            &balls,
            &ParallelConfig {
                method: ParallelMethod::Openmp,
                parts: 8,
                threads: Some(2),
                ..ParallelConfig::default()
            },
        )
        .unwrap();
        assert_eq!(simulated.merged_quadruples_map, pooled.merged_quadruples_map);
    }

    #[cfg(feature = "message-passing")]
    #[test]
    fn message_passing_matches_simulated() {
        let balls = balls();
        let simulated = calculate_vertices_in_parallel(
            &balls,
            &ParallelConfig {
                parts: 4,
                ..ParallelConfig::default()
            },
        )
        .unwrap();
        for ranks in [2, 3, 5] {
            let distributed = calculate_vertices_in_parallel(
                &balls,
                &ParallelConfig {
                    method: ParallelMethod::Mpi,
                    parts: 4,
                    ranks,
                    ..ParallelConfig::default()
                },
            )
            .unwrap();
            assert_eq!(
                simulated.merged_quadruples_map, distributed.merged_quadruples_map,
                "ranks {ranks}"
            );
        }
    }

    #[cfg(feature = "message-passing")]
    #[test]
    fn flat_buffers() {
        use super::message_passing::*;
        use crate::types::Sphere;

        let spheres = vec![
            Sphere::from_coords(1.0, 2.0, 3.0, 0.5),
            Sphere::from_coords(-1.0, 0.0, 4.0, 1.5),
        ];
        let buffer = spheres_to_buffer(&spheres);
        assert_eq!(buffer.len(), 8);
        assert_eq!(spheres_from_buffer(&buffer), spheres);

        let mut map = QuadruplesMap::new();
        map.insert(
            crate::tuple::Quadruple::new(0, 1, 2, 3),
            vec![spheres[0], spheres[1]],
        );
        let buffer = quadruples_map_to_buffer(&map);
        assert_eq!(buffer.len(), 16);
        assert_eq!(quadruples_map_from_buffer(&buffer), map);
    }
}
