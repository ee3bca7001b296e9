//! Additively weighted Voronoi vertices of 3D balls.
//!
//! A vertex is a quadruple of balls together with a sphere that touches all
//! four of them and overlaps no ball of the input. The set of such quadruples
//! is the Apollonius triangulation, the dual of the additively weighted
//! Voronoi diagram. Large inputs can be split spatially and processed in
//! parallel; the merged result is the same as for the whole input.
//!
//! # Example
//!
//! ```
//! use apollota::{Ball, construct_result};
//!
//! let balls = vec![
//!     Ball::new(0.0, 0.0, 0.0, 1.0),
//!     Ball::new(3.0, 0.0, 0.0, 1.0),
//!     Ball::new(0.0, 3.0, 0.0, 1.0),
//!     Ball::new(0.0, 0.0, 3.0, 1.0),
//!     Ball::new(1.0, 1.0, 1.0, 1.0),
//! ];
//!
//! let result = construct_result(&balls, 3.5, false, false).unwrap();
//!
//! for (quadruple, tangent_spheres) in &result.quadruples_map {
//!     for t in tangent_spheres {
//!         println!("{quadruple}: r={:.3}", t.r);
//!     }
//! }
//! ```

pub mod bounding_spheres_hierarchy;
pub mod collisions;
pub mod comparison;
mod error;
pub mod geometry;
pub mod input;
pub mod output;
pub mod parallel;
pub mod splitting;
pub mod tangent;
pub mod triangulation;
mod tuple;
mod types;

pub use bounding_spheres_hierarchy::BoundingSpheresHierarchy;
pub use comparison::{
    ComparisonResult, calculate_directional_difference_between_two_sets_of_quadruples,
};
pub use error::{Error, Result};
pub use parallel::{ParallelConfig, ParallelMethod, ParallelResult, calculate_vertices_in_parallel};
pub use triangulation::{
    QuadruplesMap, TriangulationResult, check_quadruples_map, construct_result,
    merge_quadruples_maps,
};
pub use tuple::{Pair, Quadruple, Triple};
pub use types::{Ball, Sphere, spheres_from_balls};
