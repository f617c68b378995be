//! Exponential-envelope evaluation policies.
//!
//! Every basis function over a pixel set shares one Gaussian envelope per
//! pixel, so the exponential is the model builder's single transcendental
//! cost. This module makes that cost a policy: the exact libm call, or a
//! range-reduced rational approximation that skips the edge-case handling
//! of a full `exp` in exchange for a small, bounded relative error.

use crate::Pixel;
use serde::{Deserialize, Serialize};

/// Strategy for computing the per-pixel Gaussian envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpStrategy {
    /// `f64::exp`. Bit-accurate.
    Exact,
    /// [`fast_exp`]. Relative error below 1e-12 over the envelope's
    /// operating range (non-positive arguments), at higher throughput.
    Approximate,
}

impl ExpStrategy {
    #[inline]
    pub fn eval(self, x: Pixel) -> Pixel {
        match self {
            ExpStrategy::Exact => x.exp(),
            ExpStrategy::Approximate => fast_exp(x),
        }
    }
}

// Coefficients of the rational approximation of exp(r) on
// [-ln(2)/2, ln(2)/2]: exp(r) = 1 + 2 r P(r^2) / (Q(r^2) - r P(r^2)).
const EXP_P: [Pixel; 3] = [
    1.26177193074810590878e-4,
    3.02994407707441961300e-2,
    9.99999999999999999910e-1,
];
const EXP_Q: [Pixel; 4] = [
    3.00198505138664455042e-6,
    2.52448340349684104192e-3,
    2.27265548208155028766e-1,
    2.00000000000000000005e0,
];

// ln(2) split into a high part exactly representable in double precision
// and the remainder, so r = x - n ln(2) loses no precision.
const LN2_HI: Pixel = 6.93145751953125e-1;
const LN2_LO: Pixel = 1.42860682030941723212e-6;

/// Fast scalar exponential.
///
/// Range reduction writes `x = n ln(2) + r` with `|r| <= ln(2)/2`, the
/// rational polynomial approximates `exp(r)`, and `2^n` is reconstructed
/// directly in the IEEE 754 exponent field. Inputs are clamped to
/// [-708, 709], inside which the reconstruction cannot overflow or
/// denormalize.
pub fn fast_exp(x: Pixel) -> Pixel {
    let x = x.clamp(-708.0, 709.0);
    let n = (x * std::f64::consts::LOG2_E + 0.5).floor();
    let r = x - n * LN2_HI - n * LN2_LO;
    let r2 = r * r;
    let p = r * ((EXP_P[0] * r2 + EXP_P[1]) * r2 + EXP_P[2]);
    let q = ((EXP_Q[0] * r2 + EXP_Q[1]) * r2 + EXP_Q[2]) * r2 + EXP_Q[3];
    let exp_r = 1.0 + 2.0 * p / (q - p);
    let scale = f64::from_bits(((n as i64 + 1023) as u64) << 52);
    exp_r * scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_exp_stays_within_the_documented_error_bound() {
        // The envelope only ever sees non-positive arguments; sweep well
        // past the dynamic range that matters for image modeling.
        let mut worst = 0.0f64;
        let mut x = -60.0;
        while x <= 0.0 {
            let approximate = fast_exp(x);
            let exact = x.exp();
            let relative = ((approximate - exact) / exact).abs();
            worst = worst.max(relative);
            x += 0.001;
        }
        assert!(worst < 1e-12, "worst relative error {worst:e}");
    }

    #[test]
    fn fast_exp_handles_the_reduction_boundaries() {
        for x in [0.0, -std::f64::consts::LN_2 / 2.0, -std::f64::consts::LN_2, -1.0] {
            let relative = ((fast_exp(x) - x.exp()) / x.exp()).abs();
            assert!(relative < 1e-12);
        }
        assert_eq!(fast_exp(0.0), 1.0);
    }

    #[test]
    fn extreme_arguments_clamp_instead_of_overflowing() {
        assert!(fast_exp(-1.0e4) > 0.0);
        assert!(fast_exp(-1.0e4).is_finite());
        assert!(fast_exp(1.0e4).is_finite());
    }

    #[test]
    fn strategies_dispatch_as_named() {
        assert_eq!(ExpStrategy::Exact.eval(-0.7), (-0.7f64).exp());
        assert_eq!(ExpStrategy::Approximate.eval(-0.7), fast_exp(-0.7));
    }
}
