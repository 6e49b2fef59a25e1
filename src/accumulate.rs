//! Rotation sinks for the bulge-chasing sweep.
//!
//! The sweep does not know whether singular vectors are wanted. It hands every
//! rotation to a [`RotationAccumulator`], which either drops it on the floor
//! (values-only mode) or folds it into the caller-owned transposed factors.

use ndarray::{ArrayViewMut2, NdFloat};

use crate::givens::GivensRotation;
use crate::{Error, Result};

/// Receiver for the plane rotations produced while a bidiagonal matrix is
/// driven to diagonal form.
///
/// `apply_left` corresponds to a rotation acting on rows `(i, j)` of the
/// matrix (it touches rows of the transposed left factor `Ut`), `apply_right`
/// to one acting on columns `(i, j)` (rows of the transposed right factor
/// `Vt`). `flip_right` negates one row of `Vt`; the engine uses it to make
/// converged values non-negative without disturbing the reconstruction.
pub trait RotationAccumulator<A> {
    /// Checks that the receiver fits an `dim`-sized problem.
    fn ensure_dim(&self, dim: usize) -> Result<()>;

    fn apply_left(&mut self, rot: &GivensRotation<A>, i: usize, j: usize);

    fn apply_right(&mut self, rot: &GivensRotation<A>, i: usize, j: usize);

    fn flip_right(&mut self, i: usize);
}

/// Discards every rotation. Values-only processing is strictly cheaper with
/// this sink because the sweep never touches accumulator memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccumulator;

impl<A> RotationAccumulator<A> for NoAccumulator {
    fn ensure_dim(&self, _dim: usize) -> Result<()> {
        Ok(())
    }

    fn apply_left(&mut self, _rot: &GivensRotation<A>, _i: usize, _j: usize) {}

    fn apply_right(&mut self, _rot: &GivensRotation<A>, _i: usize, _j: usize) {}

    fn flip_right(&mut self, _i: usize) {}
}

/// Caller-owned transposed factors `Ut` and `Vt`, mutated in place.
///
/// The buffers are borrowed for the duration of a `process` call; the engine
/// never allocates or resizes them. Initialize both to the identity before a
/// full decomposition so that `Ut^T * diag(values) * Vt` reconstructs the
/// input.
#[derive(Debug)]
pub struct AccumulatorPair<'a, A> {
    ut: ArrayViewMut2<'a, A>,
    vt: ArrayViewMut2<'a, A>,
}

impl<'a, A: NdFloat> AccumulatorPair<'a, A> {
    pub fn new(ut: ArrayViewMut2<'a, A>, vt: ArrayViewMut2<'a, A>) -> Self {
        Self { ut, vt }
    }
}

impl<'a, A: NdFloat> RotationAccumulator<A> for AccumulatorPair<'a, A> {
    fn ensure_dim(&self, dim: usize) -> Result<()> {
        for m in [&self.ut, &self.vt].iter() {
            let (rows, cols) = m.dim();
            if rows != dim || cols != dim {
                return Err(Error::BadAccumulatorShape { rows, cols, dim });
            }
        }
        Ok(())
    }

    fn apply_left(&mut self, rot: &GivensRotation<A>, i: usize, j: usize) {
        rot.rotate_row_pair(&mut self.ut, i, j);
    }

    fn apply_right(&mut self, rot: &GivensRotation<A>, i: usize, j: usize) {
        rot.rotate_row_pair(&mut self.vt, i, j);
    }

    fn flip_right(&mut self, i: usize) {
        for x in self.vt.row_mut(i) {
            *x = -*x;
        }
    }
}
