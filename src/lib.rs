//! Implicit-shift QR iteration on real bidiagonal matrices, built on `ndarray`.
//!
//! The entry point is [`SvdImplicitQr`], which consumes the two diagonals of an
//! upper-bidiagonal matrix and iterates them down to singular values, optionally
//! folding every plane rotation into caller-owned orthogonal accumulators.

use thiserror::Error;

mod accumulate;
mod givens;
mod index;
pub mod svd;

pub use accumulate::{AccumulatorPair, NoAccumulator, RotationAccumulator};
pub use givens::GivensRotation;
pub use svd::{BidiagonalSvd, IterationStats, SvdImplicitQr};

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("Matrix is empty")]
    EmptyMatrix,
    #[error("Matrix with {rows} rows and {cols} cols is not square")]
    NotSquare { rows: usize, cols: usize },
    #[error("Entry ({row}, {col}) lies outside the bidiagonal band")]
    NotBidiagonal { row: usize, col: usize },
    #[error("Off-diagonal of length {off} does not pair with diagonal of length {diag}")]
    BadDiagonals { diag: usize, off: usize },
    #[error("Accumulator with {rows} rows and {cols} cols does not fit a problem of size {dim}")]
    BadAccumulatorShape {
        rows: usize,
        cols: usize,
        dim: usize,
    },
    #[error("Expected {expected} target values, got {actual}")]
    BadTargetCount { expected: usize, actual: usize },
    #[error("Implicit QR iteration failed to converge after {steps} steps")]
    NonConvergence { steps: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
