//! Implicit-shift QR iteration for bidiagonal singular value problems.
//!
//! [`SvdImplicitQr`] owns the diagonal and superdiagonal of a square
//! upper-bidiagonal matrix and repeatedly applies shifted implicit QR sweeps
//! until every off-diagonal entry has been deflated away. The surviving
//! diagonal holds the singular values (unsorted); plane rotations are folded
//! into a [`RotationAccumulator`] when singular vectors are wanted.

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix2, NdFloat};

use crate::accumulate::{AccumulatorPair, NoAccumulator, RotationAccumulator};
use crate::givens::GivensRotation;
use crate::index::*;
use crate::{Error, Result};

/// Sweeps allowed on one split, per element of the split, before the
/// iteration is declared non-convergent.
const MAX_SWEEPS_PER_SPLIT: usize = 30;

/// Fruitless sweeps on one split before an exceptional zero-shift sweep is
/// forced in place of the regular shift.
const EXCEPTIONAL_STALL: usize = 12;

/// Iteration counters reported by a `process` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationStats {
    /// Implicit QR sweeps performed across all splits.
    pub steps: usize,
    /// Times the active range shrank or split.
    pub deflations: usize,
}

/// Implicit-QR engine over the two diagonals of an upper-bidiagonal matrix.
///
/// A fresh engine is configured with [`set_matrix`](Self::set_matrix) (or
/// [`set_diagonals`](Self::set_diagonals)) and driven by one of the `process`
/// variants. The same instance can be reconfigured for a second pass, which
/// is how the cheap values-only pass and the accumulating replay pass of a
/// full decomposition share one engine.
///
/// Processing is synchronous and mutates the working arrays in place; a
/// failed `process` call leaves them unspecified and the accessors must not
/// be consulted afterwards.
#[derive(Debug, Clone)]
pub struct SvdImplicitQr<A> {
    diag: Array1<A>,
    off_diag: Array1<A>,
    eps: A,
    steps: usize,
    stall: usize,
    deflations: usize,
}

impl<A: NdFloat> Default for SvdImplicitQr<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: NdFloat> SvdImplicitQr<A> {
    pub fn new() -> Self {
        Self {
            diag: Array1::zeros(0),
            off_diag: Array1::zeros(0),
            eps: A::epsilon(),
            steps: 0,
            stall: 0,
            deflations: 0,
        }
    }

    /// Loads the diagonals of `b`, which must be square, non-empty, and
    /// structurally bidiagonal: any nonzero entry outside the diagonal and
    /// the single superdiagonal is rejected, not ignored.
    pub fn set_matrix<S: Data<Elem = A>>(&mut self, b: &ArrayBase<S, Ix2>) -> Result<()> {
        let (rows, cols) = b.dim();
        if rows == 0 || cols == 0 {
            return Err(Error::EmptyMatrix);
        }
        if rows != cols {
            return Err(Error::NotSquare { rows, cols });
        }
        for ((i, j), &x) in b.indexed_iter() {
            if j != i && j != i + 1 && !x.is_zero() {
                return Err(Error::NotBidiagonal { row: i, col: j });
            }
        }

        self.diag = b.diag().to_owned();
        self.off_diag = Array1::from_shape_fn(rows - 1, |i| b[(i, i + 1)]);
        self.reset();
        Ok(())
    }

    /// Loads the canonical form directly: `diag` of length n, `off_diag` of
    /// length n-1 (superdiagonal convention).
    pub fn set_diagonals(&mut self, diag: Array1<A>, off_diag: Array1<A>) -> Result<()> {
        if diag.is_empty() {
            return Err(Error::EmptyMatrix);
        }
        if off_diag.len() + 1 != diag.len() {
            return Err(Error::BadDiagonals {
                diag: diag.len(),
                off: off_diag.len(),
            });
        }
        self.diag = diag;
        self.off_diag = off_diag;
        self.reset();
        Ok(())
    }

    /// Computes singular values only. No rotation-accumulation work is done,
    /// which makes this the cheapest mode.
    pub fn process(&mut self) -> Result<IterationStats> {
        self.run(&mut NoAccumulator, None)
    }

    /// Computes singular values while folding every rotation into `acc`.
    pub fn process_with<R: RotationAccumulator<A>>(&mut self, acc: &mut R) -> Result<IterationStats> {
        self.run(acc, None)
    }

    /// Replays the iteration toward previously computed singular value
    /// magnitudes, folding rotations into `acc`. Used as the second pass of
    /// a full decomposition after a values-only first pass, so the vectors
    /// pair up with the known values.
    pub fn process_replay<R: RotationAccumulator<A>>(
        &mut self,
        targets: &[A],
        acc: &mut R,
    ) -> Result<IterationStats> {
        if targets.len() != self.diag.len() {
            return Err(Error::BadTargetCount {
                expected: self.diag.len(),
                actual: targets.len(),
            });
        }
        self.run(acc, Some(targets))
    }

    pub fn num_singular_values(&self) -> usize {
        self.diag.len()
    }

    /// The `i`-th singular value. Meaningful only after a successful
    /// `process` call; the order is not sorted.
    pub fn singular_value(&self, i: usize) -> A {
        self.diag[i]
    }

    pub fn singular_values(&self) -> ArrayView1<'_, A> {
        self.diag.view()
    }

    pub fn into_values(self) -> Array1<A> {
        self.diag
    }

    fn reset(&mut self) {
        self.steps = 0;
        self.stall = 0;
        self.deflations = 0;
    }

    fn run<R: RotationAccumulator<A>>(
        &mut self,
        acc: &mut R,
        targets: Option<&[A]>,
    ) -> Result<IterationStats> {
        let n = self.diag.len();
        if n == 0 {
            return Err(Error::EmptyMatrix);
        }
        acc.ensure_dim(n)?;
        self.reset();

        // Iterate on entries scaled into [-1, 1]; the shift works on squared
        // terms, which must stay well inside range.
        let amax = self
            .diag
            .iter()
            .chain(self.off_diag.iter())
            .fold(A::zero(), |a, x| a.max(x.abs()));
        let scale = if amax.is_zero() { A::one() } else { amax };
        self.diag /= scale;
        self.off_diag /= scale;
        let targets: Option<Vec<A>> =
            targets.map(|t| t.iter().map(|&v| v / scale).collect());

        let mut hi = n;
        let mut prev = (0, n);
        loop {
            let (lo, new_hi) = self.deflate(acc, hi);
            hi = new_hi;
            if hi == 0 {
                break;
            }
            if (lo, hi) != prev {
                self.stall = 0;
                self.deflations += 1;
                prev = (lo, hi);
            }
            if hi - lo < 2 {
                // a chase just isolated the neighbor of an interior zero;
                // the next delimitation pass absorbs it
                continue;
            }
            if self.stall > MAX_SWEEPS_PER_SPLIT * (hi - lo) {
                return Err(Error::NonConvergence { steps: self.steps });
            }

            let shift = self.select_shift(lo, hi, &targets);
            self.qr_step(acc, lo, hi, shift);
            self.steps += 1;
            self.stall += 1;
        }

        self.diag *= scale;
        for i in 0..n {
            if self.diag[i] < A::zero() {
                self.diag[i] = -self.diag[i];
                acc.flip_right(i);
            }
        }

        Ok(IterationStats {
            steps: self.steps,
            deflations: self.deflations,
        })
    }

    /// Re-delimits the active range after a sweep.
    ///
    /// Scans upward from `hi`, peeling off converged values (negligible
    /// off-diagonal) and isolating negligible trailing diagonals, then scans
    /// for the top of the surviving block, splitting it at a negligible
    /// off-diagonal or an interior (numerically) zero diagonal entry.
    fn deflate<R: RotationAccumulator<A>>(&mut self, acc: &mut R, mut hi: usize) -> (usize, usize) {
        let eps = self.eps;
        while hi > 0 {
            if hi == 1 {
                // lone diagonal entry, nothing left to couple it to
                hi = 0;
                break;
            }
            let m = hi - 2;
            let (dm, dn, fm) = unsafe {
                (
                    *self.diag.at(m),
                    *self.diag.at(hi - 1),
                    *self.off_diag.at(m),
                )
            };
            if fm.abs() <= eps * (dm.abs() + dn.abs()) {
                unsafe {
                    *self.off_diag.at_mut(m) = A::zero();
                }
                hi -= 1;
            } else if dn.abs() <= eps {
                unsafe {
                    *self.diag.at_mut(hi - 1) = A::zero();
                }
                self.chase_column_up(acc, hi - 1);
                hi -= 1;
            } else {
                break;
            }
        }
        if hi == 0 {
            return (0, 0);
        }

        let mut lo = hi - 1;
        while lo > 0 {
            let m = lo - 1;
            let (dm, dl, fm) = unsafe {
                (
                    *self.diag.at(m),
                    *self.diag.at(lo),
                    *self.off_diag.at(m),
                )
            };
            if fm.abs() <= eps * (dm.abs() + dl.abs()) {
                unsafe {
                    *self.off_diag.at_mut(m) = A::zero();
                }
                break;
            }
            if dm.abs() <= eps {
                // interior zero: annihilate both neighboring off-diagonals so
                // the zero singular value is isolated exactly at position m
                unsafe {
                    *self.diag.at_mut(m) = A::zero();
                }
                self.chase_row_right(acc, m, hi);
                if m > 0 {
                    self.chase_column_up(acc, m);
                }
                break;
            }
            lo -= 1;
        }
        (lo, hi)
    }

    /// Zero-diagonal chase along row `p` (whose diagonal entry is zero):
    /// rotates row `p` against every row below it, pushing the off-diagonal
    /// entry to the right until it falls off the block.
    fn chase_row_right<R: RotationAccumulator<A>>(&mut self, acc: &mut R, p: usize, hi: usize) {
        let mut x = unsafe { *self.off_diag.at(p) };
        unsafe {
            *self.off_diag.at_mut(p) = A::zero();
        }
        for k in p + 1..hi {
            let dk = unsafe { *self.diag.at(k) };
            let (rot, r) = match GivensRotation::cancel_x(x, dk) {
                Some(v) => v,
                None => break,
            };
            unsafe {
                *self.diag.at_mut(k) = r;
            }
            acc.apply_left(&rot, p, k);
            if k + 1 < hi {
                let fk = unsafe { *self.off_diag.at(k) };
                x = rot.s() * fk;
                unsafe {
                    *self.off_diag.at_mut(k) = rot.c() * fk;
                }
            }
        }
    }

    /// Zero-diagonal chase up column `p` (whose diagonal entry is zero):
    /// rotates column `p` against every column above it, pushing the
    /// off-diagonal entry upward. Stops at the first exact-zero off-diagonal,
    /// which marks a block boundary.
    fn chase_column_up<R: RotationAccumulator<A>>(&mut self, acc: &mut R, p: usize) {
        let mut x = unsafe { *self.off_diag.at(p - 1) };
        unsafe {
            *self.off_diag.at_mut(p - 1) = A::zero();
        }
        for k in (0..p).rev() {
            let dk = unsafe { *self.diag.at(k) };
            let (rot, r) = match GivensRotation::cancel_y(dk, x) {
                Some(v) => v,
                None => break,
            };
            unsafe {
                *self.diag.at_mut(k) = r;
            }
            acc.apply_right(&rot, k, p);
            if k > 0 {
                let fk1 = unsafe { *self.off_diag.at(k - 1) };
                x = -rot.s() * fk1;
                unsafe {
                    *self.off_diag.at_mut(k - 1) = rot.c() * fk1;
                }
            }
        }
    }

    /// Shift for the next sweep over `[lo, hi)`.
    ///
    /// Default is the Wilkinson shift of the trailing 2x2 of `B^T * B`. In
    /// replay mode the target magnitude nearest to the trailing diagonal is
    /// squared and used instead, as long as it stays inside the reach of the
    /// trailing block. A stalled split falls back to a zero shift, the plain
    /// sweep that is guaranteed to make (slow) progress.
    fn select_shift(&self, lo: usize, hi: usize, targets: &Option<Vec<A>>) -> A {
        if self.stall >= EXCEPTIONAL_STALL && self.stall % EXCEPTIONAL_STALL == 0 {
            return A::zero();
        }

        let m = hi - 2;
        let dm = self.diag[m];
        let dn = self.diag[hi - 1];
        let fm = self.off_diag[m];
        let fm1 = if m > lo { self.off_diag[m - 1] } else { A::zero() };

        let tmm = dm * dm + fm1 * fm1;
        let tnn = dn * dn + fm * fm;
        let tmn = dm * fm;

        if tmm.is_zero() || tnn.is_zero() {
            return A::zero();
        }

        if let Some(targets) = targets {
            let probe = dn.abs();
            let mut best = targets[0];
            for &t in &targets[1..] {
                if (t - probe).abs() < (best - probe).abs() {
                    best = t;
                }
            }
            let mu = best * best;
            if mu <= tmm.max(tnn) + tmn.abs() {
                return mu;
            }
        }

        wilkinson_shift(tmm, tnn, tmn)
    }

    /// One implicit QR sweep over the active block `[lo, hi)`.
    ///
    /// The first right rotation is chosen from the shifted first column of
    /// `B^T * B - shift * I`; each subsequent pair of rotations chases the
    /// resulting bulge one position down the band, with right rotations
    /// folded into `Vt` and left rotations into `Ut`.
    fn qr_step<R: RotationAccumulator<A>>(&mut self, acc: &mut R, lo: usize, hi: usize, shift: A) {
        let d0 = unsafe { *self.diag.at(lo) };
        let f0 = unsafe { *self.off_diag.at(lo) };
        let mut y = d0 * d0 - shift;
        let mut z = d0 * f0;

        for k in lo..hi - 1 {
            let (rot1, r1) = match GivensRotation::cancel_y(y, z) {
                Some(v) => v,
                None => break, // bulge vanished; the band is already restored
            };
            if k > lo {
                unsafe {
                    *self.off_diag.at_mut(k - 1) = r1;
                }
            }

            let dk = unsafe { *self.diag.at(k) };
            let fk = unsafe { *self.off_diag.at(k) };
            let dk1 = unsafe { *self.diag.at(k + 1) };

            // columns (k, k+1): rotates the bulge into the band and spills a
            // new one below the diagonal
            let (nd, nf) = rot1.transform(dk, fk);
            let (bulge, nd1) = rot1.transform(A::zero(), dk1);
            acc.apply_right(&rot1, k, k + 1);

            match GivensRotation::cancel_y(nd, bulge) {
                Some((rot2, r2)) => {
                    // rows (k, k+1): restores the band, spilling above it
                    unsafe {
                        *self.diag.at_mut(k) = r2;
                    }
                    let (nf2, nd2) = rot2.transform(nf, nd1);
                    unsafe {
                        *self.off_diag.at_mut(k) = nf2;
                        *self.diag.at_mut(k + 1) = nd2;
                    }
                    if k + 2 < hi {
                        let fk1 = unsafe { *self.off_diag.at(k + 1) };
                        let (spill, nfk1) = rot2.transform(A::zero(), fk1);
                        unsafe {
                            *self.off_diag.at_mut(k + 1) = nfk1;
                        }
                        y = nf2;
                        z = spill;
                    }
                    acc.apply_left(&rot2, k, k + 1);
                }
                None => {
                    unsafe {
                        *self.diag.at_mut(k) = nd;
                        *self.off_diag.at_mut(k) = nf;
                        *self.diag.at_mut(k + 1) = nd1;
                    }
                    if k + 2 < hi {
                        y = nf;
                        z = A::zero();
                    }
                }
            }
        }
    }
}

/// Eigenvalue of the symmetric 2x2 matrix `[[tmm, tmn], [tmn, tnn]]` closest
/// to `tnn`, via the quadratic-formula variant that avoids cancellation.
fn wilkinson_shift<A: NdFloat>(tmm: A, tnn: A, tmn: A) -> A {
    let sq = tmn * tmn;
    if !sq.is_zero() {
        let d = (tmm - tnn) * A::from(0.5).unwrap();
        tnn - sq / (d + d.signum() * (d * d + sq).sqrt())
    } else {
        tnn
    }
}

/// Full decomposition of an already-bidiagonal square matrix.
pub trait BidiagonalSvd {
    type Elem;

    /// Decomposes into `(Ut, values, Vt)` with `Ut^T * diag(values) * Vt`
    /// reconstructing the matrix. The accumulators are skipped entirely when
    /// `vectors` is false.
    #[allow(clippy::type_complexity)]
    fn bidiagonal_svd(
        &self,
        vectors: bool,
    ) -> Result<(
        Option<Array2<Self::Elem>>,
        Array1<Self::Elem>,
        Option<Array2<Self::Elem>>,
    )>;
}

impl<A: NdFloat, S: Data<Elem = A>> BidiagonalSvd for ArrayBase<S, Ix2> {
    type Elem = A;

    fn bidiagonal_svd(
        &self,
        vectors: bool,
    ) -> Result<(Option<Array2<A>>, Array1<A>, Option<Array2<A>>)> {
        let mut engine = SvdImplicitQr::new();
        engine.set_matrix(self)?;
        if vectors {
            let n = self.nrows();
            let mut ut = Array2::eye(n);
            let mut vt = Array2::eye(n);
            let mut acc = AccumulatorPair::new(ut.view_mut(), vt.view_mut());
            engine.process_with(&mut acc)?;
            Ok((Some(ut), engine.into_values(), Some(vt)))
        } else {
            engine.process()?;
            Ok((None, engine.into_values(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;
    use crate::Error;

    #[test]
    fn wilkinson() {
        // [[2, 1], [1, 2]] has eigenvalues 1 and 3
        let shift = wilkinson_shift(2.0f64, 2.0, 1.0);
        assert_abs_diff_eq!(shift, 1.0, epsilon = 1e-12);
        // decoupled case returns the trailing entry
        assert_abs_diff_eq!(wilkinson_shift(4.0f64, 9.0, 0.0), 9.0);
        // [[5, 2], [2, 1]]: eigenvalues 3 +- sqrt(8), closest to 1 is the
        // smaller one
        let shift = wilkinson_shift(5.0f64, 1.0, 2.0);
        assert_abs_diff_eq!(shift, 3.0 - 8.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn set_matrix_shape_errors() {
        let mut engine = SvdImplicitQr::new();

        let empty = Array2::<f64>::zeros((0, 0));
        assert_eq!(engine.set_matrix(&empty), Err(Error::EmptyMatrix));

        let rect = Array2::<f64>::zeros((3, 4));
        assert_eq!(
            engine.set_matrix(&rect),
            Err(Error::NotSquare { rows: 3, cols: 4 })
        );

        let full = array![[1., 2., 0.], [0., 4., 5.], [0., 0.5, 6.]];
        assert_eq!(
            engine.set_matrix(&full),
            Err(Error::NotBidiagonal { row: 2, col: 1 })
        );

        // zeros outside the band are structurally absent, not an error
        let bidiag = array![[1., 2., 0.], [0., 4., 5.], [0., 0., 6.]];
        assert!(engine.set_matrix(&bidiag).is_ok());
    }

    #[test]
    fn set_diagonals_validation() {
        let mut engine = SvdImplicitQr::new();
        assert_eq!(
            engine.set_diagonals(Array1::zeros(0), Array1::zeros(0)),
            Err(Error::EmptyMatrix)
        );
        assert_eq!(
            engine.set_diagonals(array![1.0, 2.0], array![1.0, 1.0]),
            Err(Error::BadDiagonals { diag: 2, off: 2 })
        );
        assert!(engine.set_diagonals(array![1.0, 2.0], array![1.0]).is_ok());
    }

    #[test]
    fn process_without_matrix() {
        let mut engine = SvdImplicitQr::<f64>::new();
        assert_eq!(engine.process(), Err(Error::EmptyMatrix));
    }

    #[test]
    fn one_by_one() {
        let mut engine = SvdImplicitQr::new();
        engine.set_matrix(&array![[-3.0]]).unwrap();
        let stats = engine.process().unwrap();
        assert_eq!(stats.steps, 0);
        assert_abs_diff_eq!(engine.singular_value(0), 3.0);
    }

    #[test]
    fn golden_two_by_two() {
        // B^T * B of [[1, 1], [0, 1]] has the golden ratio as its spectral
        // radius; one exact-shift sweep must deflate the block
        let mut engine = SvdImplicitQr::new();
        engine.set_matrix(&array![[1.0f64, 1.0], [0.0, 1.0]]).unwrap();
        let stats = engine.process().unwrap();
        assert!(stats.steps <= 2);

        let phi = (1.0 + 5.0f64.sqrt()) / 2.0;
        let mut vals: Vec<f64> = engine.singular_values().to_vec();
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_abs_diff_eq!(vals[0], 1.0 / phi, epsilon = 1e-12);
        assert_abs_diff_eq!(vals[1], phi, epsilon = 1e-12);
    }

    #[test]
    fn negative_diagonal_normalized() {
        let mut engine = SvdImplicitQr::new();
        let mut ut = Array2::eye(2);
        let mut vt = Array2::eye(2);
        engine.set_matrix(&array![[-2.0f64, 0.0], [0.0, 1.0]]).unwrap();
        let mut acc = AccumulatorPair::new(ut.view_mut(), vt.view_mut());
        engine.process_with(&mut acc).unwrap();

        assert_abs_diff_eq!(engine.singular_value(0), 2.0);
        assert_abs_diff_eq!(engine.singular_value(1), 1.0);
        // the sign moved into the right factor
        assert_abs_diff_eq!(vt, array![[-1.0, 0.0], [0.0, 1.0]]);
        assert_abs_diff_eq!(ut, Array2::eye(2));
    }

    #[test]
    fn replay_target_count() {
        let mut engine = SvdImplicitQr::new();
        engine.set_matrix(&array![[1.0f64, 1.0], [0.0, 1.0]]).unwrap();
        let mut acc = NoAccumulator;
        assert_eq!(
            engine.process_replay(&[1.0], &mut acc),
            Err(Error::BadTargetCount {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn accumulator_shape_checked() {
        let mut engine = SvdImplicitQr::new();
        engine.set_matrix(&array![[1.0f64, 1.0], [0.0, 1.0]]).unwrap();
        let mut ut = Array2::eye(3);
        let mut vt = Array2::eye(2);
        let mut acc = AccumulatorPair::new(ut.view_mut(), vt.view_mut());
        assert_eq!(
            engine.process_with(&mut acc),
            Err(Error::BadAccumulatorShape {
                rows: 3,
                cols: 3,
                dim: 2
            })
        );
    }
}
