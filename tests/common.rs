#![allow(unused)]

use std::ops::RangeInclusive;

use ndarray::prelude::*;
use proptest::prelude::*;

const FLOAT_RANGE: RangeInclusive<f64> = -10.0..=10.0;
const DIM_RANGE: RangeInclusive<usize> = 1..=12;

/// Dense n x n upper-bidiagonal matrix from its two diagonals.
pub fn bidiag_matrix(diag: &Array1<f64>, off: &Array1<f64>) -> Array2<f64> {
    let n = diag.len();
    let mut b = Array2::from_diag(diag);
    for i in 0..n - 1 {
        b[(i, i + 1)] = off[i];
    }
    b
}

/// Occurrences of `val` among the magnitudes in `values`, within `tol`.
pub fn count_near(values: ArrayView1<f64>, val: f64, tol: f64) -> usize {
    values.iter().filter(|v| (v.abs() - val).abs() <= tol).count()
}

/// `Ut^T * diag(values) * Vt`
pub fn reconstruct(ut: &Array2<f64>, values: &Array1<f64>, vt: &Array2<f64>) -> Array2<f64> {
    ut.t().dot(&Array2::from_diag(values)).dot(vt)
}

pub fn assert_orthogonal(m: &Array2<f64>) {
    let n = m.nrows();
    approx::assert_abs_diff_eq!(m.dot(&m.t()), Array2::eye(n), epsilon = 1e-7);
}

/// Householder reduction of a square dense matrix to upper-bidiagonal form.
///
/// Stands in for the upstream reduction that normally feeds the engine; only
/// the two diagonals are returned, since the reflectors never need to be
/// assembled for value-only checks.
pub fn bidiagonalize(mut a: Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = a.nrows();
    assert_eq!(n, a.ncols());

    for k in 0..n {
        reflect_col(&mut a, k);
        if k + 2 < n {
            reflect_row(&mut a, k);
        }
    }

    let diag = a.diag().to_owned();
    let off = Array1::from_shape_fn(n - 1, |i| a[(i, i + 1)]);
    (diag, off)
}

fn reflect_col(a: &mut Array2<f64>, k: usize) {
    let n = a.nrows();
    let norm = (k..n).map(|i| a[(i, k)] * a[(i, k)]).sum::<f64>().sqrt();
    if norm == 0.0 {
        return;
    }
    let alpha = -a[(k, k)].signum() * norm;
    let mut v: Vec<f64> = (k..n).map(|i| a[(i, k)]).collect();
    v[0] -= alpha;
    let vnorm2: f64 = v.iter().map(|x| x * x).sum();
    if vnorm2 == 0.0 {
        return;
    }
    for j in k..n {
        let dot = (k..n).map(|i| v[i - k] * a[(i, j)]).sum::<f64>();
        let t = 2.0 * dot / vnorm2;
        for i in k..n {
            a[(i, j)] -= t * v[i - k];
        }
    }
}

fn reflect_row(a: &mut Array2<f64>, k: usize) {
    let n = a.nrows();
    let norm = (k + 1..n).map(|j| a[(k, j)] * a[(k, j)]).sum::<f64>().sqrt();
    if norm == 0.0 {
        return;
    }
    let alpha = -a[(k, k + 1)].signum() * norm;
    let mut v: Vec<f64> = (k + 1..n).map(|j| a[(k, j)]).collect();
    v[0] -= alpha;
    let vnorm2: f64 = v.iter().map(|x| x * x).sum();
    if vnorm2 == 0.0 {
        return;
    }
    for i in k..n {
        let dot = (k + 1..n).map(|j| v[j - k - 1] * a[(i, j)]).sum::<f64>();
        let t = 2.0 * dot / vnorm2;
        for j in k + 1..n {
            a[(i, j)] -= t * v[j - k - 1];
        }
    }
}

prop_compose! {
    pub fn bidiag_arrs()(dim in DIM_RANGE)
        (diag in prop::collection::vec(FLOAT_RANGE, dim),
         off in prop::collection::vec(FLOAT_RANGE, dim - 1)) -> (Array1<f64>, Array1<f64>) {
        (Array1::from_vec(diag), Array1::from_vec(off))
    }
}
