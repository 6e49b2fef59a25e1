use ndarray::{ArrayBase, DataMut, Ix2};
use num_traits::Float;

use crate::index::*;

/// A plane (Givens) rotation, stored as the 2x2 matrix `[[c, s], [-s, c]]`.
///
/// Applied to a pair `(x, y)` it produces `(c*x + s*y, -s*x + c*y)`. The same
/// primitive serves column pairs of the bidiagonal matrix (multiplication by
/// the transpose from the right) and row pairs (multiplication from the left),
/// so the sweep and both accumulators share one code path.
#[derive(Debug, Clone)]
pub struct GivensRotation<A> {
    c: A,
    s: A,
}

impl<A: Float> GivensRotation<A> {
    /// Rotation sending `(x, y)` to `(r, 0)` with `r = sqrt(x^2 + y^2)`.
    ///
    /// Returns `None` if `y` is already zero, otherwise the rotation and `r`.
    pub fn cancel_y(x: A, y: A) -> Option<(Self, A)> {
        if y.is_zero() {
            return None;
        }
        let r = (x * x + y * y).sqrt();
        Some((Self { c: x / r, s: y / r }, r))
    }

    /// Rotation sending `(x, y)` to `(0, r)` with `r = sqrt(x^2 + y^2)`.
    ///
    /// Returns `None` if `x` is already zero, otherwise the rotation and `r`.
    pub fn cancel_x(x: A, y: A) -> Option<(Self, A)> {
        if x.is_zero() {
            return None;
        }
        let r = (x * x + y * y).sqrt();
        Some((
            Self {
                c: y / r,
                s: -x / r,
            },
            r,
        ))
    }

    /// Normalizes `(c, s)` into a rotation, rejecting vectors of norm `<= eps`.
    pub fn try_new(c: A, s: A, eps: A) -> Option<(Self, A)> {
        let norm = (c * c + s * s).sqrt();
        if norm > eps {
            Some((
                Self {
                    c: c / norm,
                    s: s / norm,
                },
                norm,
            ))
        } else {
            None
        }
    }

    pub fn c(&self) -> A {
        self.c
    }

    pub fn s(&self) -> A {
        self.s
    }

    /// Applies the rotation to a scalar pair.
    pub fn transform(&self, x: A, y: A) -> (A, A) {
        (self.c * x + self.s * y, -self.s * x + self.c * y)
    }

    /// Rotates rows `i` and `j` of `m` in place. The rows need not be adjacent;
    /// the zero-diagonal chases pair a fixed row with every row below it.
    pub fn rotate_row_pair<S: DataMut<Elem = A>>(&self, m: &mut ArrayBase<S, Ix2>, i: usize, j: usize) {
        let (c, s) = (self.c, self.s);
        for k in 0..m.ncols() {
            unsafe {
                let a = *m.at((i, k));
                let b = *m.at((j, k));
                *m.at_mut((i, k)) = c * a + s * b;
                *m.at_mut((j, k)) = -s * a + c * b;
            }
        }
    }
}
