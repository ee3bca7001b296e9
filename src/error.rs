// Copyright (c) 2026 Kliment Olechnovic and Mikael Lund
// Part of the apollota project, licensed under the MIT License.
// SPDX-License-Identifier: MIT

//! Error type shared by the library and the CLI.

use thiserror::Error;

/// Errors raised by configuration checks, input validation and parallel execution.
///
/// Numerical degeneracies (hull facets without a tangent sphere, tied candidates)
/// are not errors and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// Initial radius of the bounding spheres hierarchy must be greater than 1.
    #[error("bounding spheres hierarchy initial radius should be greater than 1, got {0}")]
    InvalidInitialRadius(f64),

    /// Number of parts for splitting is not a power of two.
    #[error("number of parts must be a power of 2, got {0}")]
    PartsNotPowerOfTwo(usize),

    /// Requested parallelization method was not compiled in.
    #[error("processing method '{method}' is not available, acceptable values are: {available}")]
    UnavailableMethod {
        /// Name that was requested.
        method: String,
        /// Space-separated list of compiled-in method names.
        available: String,
    },

    /// Fewer than four balls were provided.
    #[error("less than 4 balls provided ({0})")]
    TooFewBalls(usize),

    /// A ball has non-finite coordinates or an invalid radius.
    #[error("invalid ball at index {index}: {reason}")]
    InvalidBall {
        /// Index of the invalid ball.
        index: usize,
        /// Why the ball was rejected.
        reason: &'static str,
    },

    /// An input line could not be parsed.
    #[error("malformed input at line {line}: '{content}'")]
    MalformedLine {
        /// One-based line number.
        line: usize,
        /// Offending line as read.
        content: String,
    },

    /// One or more partitions failed during parallel execution.
    #[error("parallel processing failed because of errors in parts: {parts:?}")]
    PartitionsFailed {
        /// Indices of every failed partition.
        parts: Vec<usize>,
    },

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
