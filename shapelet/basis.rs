//! Recurrence-based evaluation of the 2D Gauss-Hermite shapelet basis.
//!
//! The 1D building block is the orthonormal Hermite function
//! `phi_n(t) = (2^n n! sqrt(pi))^(-1/2) H_n(t) exp(-t^2/2)`, evaluated for
//! all degrees 0..=order by the normalized two-term recurrence
//!
//! ```text
//! phi_0(t) = pi^(-1/4) exp(-t^2/2)
//! phi_1(t) = sqrt(2) t phi_0(t)
//! phi_n(t) = sqrt(2/n) t phi_{n-1}(t) - sqrt((n-1)/n) phi_{n-2}(t)
//! ```
//!
//! The 2D basis function of degree pair `(a, b)` is `phi_a(x) phi_b(y)`;
//! the evaluator computes the two 1D families into its workspaces and then
//! "weaves" them into the packed layout of [`crate::packed::PackedIndex`].
//!
//! Values produced here are simple and unscaled: no flux normalization and
//! no ellipse transform is applied. Those conventions belong to the layers
//! that attach an expansion to geometry ([`crate::expansion`] and
//! [`crate::model`]).
//!
//! The ascending recurrence from the degree-0 closed form is stable for the
//! orders used in practice (roughly <= 20). There is no overflow guard for
//! extreme orders or coordinates; non-finite intermediates propagate as
//! ordinary floating-point results.

use crate::Pixel;
use crate::packed::PackedIndex;
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use thiserror::Error;

/// pi^(-1/4), the normalization of the degree-0 Hermite function.
pub(crate) const BASE_FACTOR: Pixel = 0.7511255444649425;

/// Errors for evaluator operations on caller-supplied buffers.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error(
        "Target vector has length {found}, but order {order} requires {expected} packed entries."
    )]
    TargetLength {
        order: usize,
        expected: usize,
        found: usize,
    },

    #[error(
        "Coefficient vector has length {found}, but order {order} requires {expected} packed entries."
    )]
    CoefficientLength {
        order: usize,
        expected: usize,
        found: usize,
    },
}

/// Evaluates Gauss-Hermite shapelet quantities one point at a time.
///
/// The evaluator owns two workspaces of length `order + 1`, one per axis,
/// holding the 1D function values (or integrals) for every degree at the
/// most recent call's coordinate. They are overwritten on every call, which
/// is why the fill and sum operations take `&mut self`; use one instance
/// per thread. [`compute_inner_product_matrix`] touches no workspace and
/// may be called from anywhere.
///
/// [`compute_inner_product_matrix`]: HermiteEvaluator::compute_inner_product_matrix
#[derive(Debug, Clone)]
pub struct HermiteEvaluator {
    x_workspace: Vec<Pixel>,
    y_workspace: Vec<Pixel>,
}

impl HermiteEvaluator {
    /// Creates an evaluator for all packed basis functions up to `order`.
    pub fn new(order: usize) -> Self {
        HermiteEvaluator {
            x_workspace: vec![0.0; order + 1],
            y_workspace: vec![0.0; order + 1],
        }
    }

    /// The maximum total order this evaluator is configured for.
    pub fn order(&self) -> usize {
        self.x_workspace.len() - 1
    }

    /// Fills `target` with the value of every packed basis function at the
    /// point `(x, y)`. The dot product of `target` with a coefficient
    /// vector evaluates a simple unscaled shapelet expansion there.
    pub fn fill_evaluation(
        &mut self,
        mut target: ArrayViewMut1<'_, Pixel>,
        x: Pixel,
        y: Pixel,
    ) -> Result<(), BasisError> {
        self.check_target(target.len())?;
        internal::fill_evaluation_1d(&mut self.x_workspace, x);
        internal::fill_evaluation_1d(&mut self.y_workspace, y);
        self.weave_fill(&mut target);
        Ok(())
    }

    /// Fills `target` with, for every packed basis function of degrees
    /// `(a, b)`, the definite integral over the whole plane of the function
    /// times `x^x_moment * y^y_moment`. Entries where `a - x_moment` or
    /// `b - y_moment` is odd or negative are exactly zero, reflecting
    /// Hermite-function parity.
    pub fn fill_integration(
        &mut self,
        mut target: ArrayViewMut1<'_, Pixel>,
        x_moment: usize,
        y_moment: usize,
    ) -> Result<(), BasisError> {
        self.check_target(target.len())?;
        internal::fill_integration_1d(&mut self.x_workspace, x_moment);
        internal::fill_integration_1d(&mut self.y_workspace, y_moment);
        self.weave_fill(&mut target);
        Ok(())
    }

    /// Evaluates a simple unscaled shapelet expansion at `(x, y)` without
    /// materializing the basis vector: the weave's pairwise products are
    /// accumulated directly against `coefficients`.
    pub fn sum_evaluation(
        &mut self,
        coefficients: ArrayView1<'_, Pixel>,
        x: Pixel,
        y: Pixel,
    ) -> Result<Pixel, BasisError> {
        self.check_coefficients(coefficients.len())?;
        internal::fill_evaluation_1d(&mut self.x_workspace, x);
        internal::fill_evaluation_1d(&mut self.y_workspace, y);
        Ok(self.weave_sum(coefficients))
    }

    /// Integrates a simple unscaled shapelet expansion against
    /// `x^x_moment * y^y_moment`, accumulating directly against
    /// `coefficients` as in [`sum_evaluation`](Self::sum_evaluation).
    pub fn sum_integration(
        &mut self,
        coefficients: ArrayView1<'_, Pixel>,
        x_moment: usize,
        y_moment: usize,
    ) -> Result<Pixel, BasisError> {
        self.check_coefficients(coefficients.len())?;
        internal::fill_integration_1d(&mut self.x_workspace, x_moment);
        internal::fill_integration_1d(&mut self.y_workspace, y_moment);
        Ok(self.weave_sum(coefficients))
    }

    /// Computes the matrix of function inner products between two bases at
    /// different scales,
    /// `M[i][j] = integral of psi_i(a x) phi_j(b x) over the plane`,
    /// normalized per axis so that equal scales yield the identity matrix.
    /// This supports re-expanding a shapelet model at a new scale without
    /// numerical integration.
    ///
    /// Stateless: returns a freshly allocated matrix of shape
    /// `[PackedIndex::count(row_order), PackedIndex::count(col_order)]`.
    pub fn compute_inner_product_matrix(
        row_order: usize,
        col_order: usize,
        a: Pixel,
        b: Pixel,
    ) -> Array2<Pixel> {
        let m1 = internal::inner_product_1d(row_order, col_order, a, b);
        let mut out = Array2::zeros((PackedIndex::count(row_order), PackedIndex::count(col_order)));
        for i in PackedIndex::walk(row_order) {
            for j in PackedIndex::walk(col_order) {
                out[[i.index(), j.index()]] = a * b * m1[[i.x(), j.x()]] * m1[[i.y(), j.y()]];
            }
        }
        out
    }

    fn check_target(&self, found: usize) -> Result<(), BasisError> {
        let expected = PackedIndex::count(self.order());
        if found != expected {
            return Err(BasisError::TargetLength {
                order: self.order(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn check_coefficients(&self, found: usize) -> Result<(), BasisError> {
        let expected = PackedIndex::count(self.order());
        if found != expected {
            return Err(BasisError::CoefficientLength {
                order: self.order(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn weave_fill(&self, target: &mut ArrayViewMut1<'_, Pixel>) {
        for i in PackedIndex::walk(self.order()) {
            target[i.index()] = self.x_workspace[i.x()] * self.y_workspace[i.y()];
        }
    }

    fn weave_sum(&self, coefficients: ArrayView1<'_, Pixel>) -> Pixel {
        let mut sum = 0.0;
        for i in PackedIndex::walk(self.order()) {
            sum += coefficients[i.index()] * self.x_workspace[i.x()] * self.y_workspace[i.y()];
        }
        sum
    }
}

/// Internal module for the 1D recurrences behind the public operations.
mod internal {
    use super::{BASE_FACTOR, Pixel};
    use ndarray::Array2;

    /// Fills `workspace[n]` with `phi_n(t)` for every degree `n` up to its
    /// length, by the normalized ascending recurrence.
    pub(super) fn fill_evaluation_1d(workspace: &mut [Pixel], t: Pixel) {
        let order = workspace.len() - 1;
        workspace[0] = BASE_FACTOR * (-0.5 * t * t).exp();
        if order >= 1 {
            workspace[1] = std::f64::consts::SQRT_2 * t * workspace[0];
        }
        for n in 2..=order {
            let n_f = n as Pixel;
            workspace[n] = (2.0 / n_f).sqrt() * t * workspace[n - 1]
                - ((n_f - 1.0) / n_f).sqrt() * workspace[n - 2];
        }
    }

    /// Fills `workspace[n]` with the definite integral of
    /// `t^moment * phi_n(t)` over the real line.
    ///
    /// Derived from the derivative identity
    /// `phi_n' = sqrt(n/2) phi_{n-1} - sqrt((n+1)/2) phi_{n+1}` integrated
    /// by parts against `t^moment`:
    ///
    /// ```text
    /// I[n][m] = sqrt((n-1)/n) I[n-2][m] + m sqrt(2/n) I[n-1][m-1]
    /// I[0][0] = sqrt(2 pi) pi^(-1/4)
    /// ```
    ///
    /// Entries with `n < moment` or `n - moment` odd are zero. For
    /// `moment == 0` the recurrence is the exact integral of the basis.
    pub(super) fn fill_integration_1d(workspace: &mut [Pixel], moment: usize) {
        let order = workspace.len() - 1;
        let base = (2.0 * std::f64::consts::PI).sqrt() * BASE_FACTOR;

        // Rows m' = 0..=moment of I[n][m']; only the previous row is live.
        let mut prev = vec![0.0; order + 1];
        let mut curr = vec![0.0; order + 1];

        curr[0] = base;
        for n in (2..=order).step_by(2) {
            let n_f = n as Pixel;
            curr[n] = ((n_f - 1.0) / n_f).sqrt() * curr[n - 2];
        }
        for m in 1..=moment {
            std::mem::swap(&mut prev, &mut curr);
            curr.fill(0.0);
            let m_f = m as Pixel;
            for n in (m..=order).step_by(2) {
                let n_f = n as Pixel;
                let mut value = m_f * (2.0 / n_f).sqrt() * prev[n - 1];
                if n >= m + 2 {
                    value += ((n_f - 1.0) / n_f).sqrt() * curr[n - 2];
                }
                curr[n] = value;
            }
        }
        workspace.copy_from_slice(&curr);
    }

    /// 1D cross-scale inner products
    /// `m[p][q] = sqrt(a b) normalization of integral phi_p(a t) phi_q(b t) dt`
    /// (the sqrt(a b) factor is applied by the 2D caller as a single `a*b`).
    ///
    /// Obtained by combining integration by parts with the multiplication
    /// identity `t phi_n(t) = sqrt((n+1)/2) phi_{n+1} + sqrt(n/2) phi_{n-1}`:
    ///
    /// ```text
    /// m[0][0] = sqrt(2 / (a^2 + b^2))
    /// m[p][q] = ((a^2-b^2) sqrt(p-1) m[p-2][q] + 2ab sqrt(q) m[p-1][q-1])
    ///           / ((a^2+b^2) sqrt(p))
    /// ```
    ///
    /// Entries with `p + q` odd vanish by parity.
    pub(super) fn inner_product_1d(
        row_order: usize,
        col_order: usize,
        a: Pixel,
        b: Pixel,
    ) -> Array2<Pixel> {
        let mut m = Array2::zeros((row_order + 1, col_order + 1));
        let sum_sq = a * a + b * b;
        let diff_sq = a * a - b * b;

        m[[0, 0]] = (2.0 / sum_sq).sqrt();
        for p in (2..=row_order).step_by(2) {
            let p_f = p as Pixel;
            m[[p, 0]] = diff_sq * (p_f - 1.0).sqrt() * m[[p - 2, 0]] / (sum_sq * p_f.sqrt());
        }
        for q in (2..=col_order).step_by(2) {
            let q_f = q as Pixel;
            m[[0, q]] = -diff_sq * (q_f - 1.0).sqrt() * m[[0, q - 2]] / (sum_sq * q_f.sqrt());
        }
        for p in 1..=row_order {
            let p_f = p as Pixel;
            for q in 1..=col_order {
                if (p + q) % 2 != 0 {
                    continue;
                }
                let q_f = q as Pixel;
                let mut value = 2.0 * a * b * q_f.sqrt() * m[[p - 1, q - 1]];
                if p >= 2 {
                    value += diff_sq * (p_f - 1.0).sqrt() * m[[p - 2, q]];
                }
                m[[p, q]] = value / (sum_sq * p_f.sqrt());
            }
        }
        m
    }
}
