//! A shapelet expansion attached to an ellipse, evaluated point-at-a-time.
//!
//! [`ShapeletExpansion`] bundles an order, a coefficient vector in packed
//! order, and the ellipse that defines the basis frame. It is the
//! point-at-a-time counterpart of [`crate::model::ModelBuilder`]: both use
//! the flux-units coefficient convention (basis functions divided by the
//! product of the ellipse semi-axes), so coefficients fitted through one
//! strategy evaluate identically through the other.

use crate::Pixel;
use crate::basis::HermiteEvaluator;
use crate::geom::Ellipse;
use crate::packed::PackedIndex;
use ndarray::Array1;
use thiserror::Error;

/// Errors raised when constructing an expansion.
#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error(
        "Coefficient vector has length {found}, but order {order} requires {expected} packed entries."
    )]
    CoefficientLength {
        order: usize,
        expected: usize,
        found: usize,
    },
}

/// A Gauss-Hermite shapelet expansion with coefficients in flux units.
///
/// Owns a [`HermiteEvaluator`] whose workspaces are reused across calls;
/// evaluation therefore takes `&mut self`, and instances should not be
/// shared across threads.
pub struct ShapeletExpansion {
    order: usize,
    ellipse: Ellipse,
    coefficients: Array1<Pixel>,
    evaluator: HermiteEvaluator,
}

impl ShapeletExpansion {
    /// Creates an expansion, validating the coefficient vector length
    /// against the packed count for `order`.
    pub fn new(
        order: usize,
        ellipse: Ellipse,
        coefficients: Array1<Pixel>,
    ) -> Result<Self, ExpansionError> {
        let expected = PackedIndex::count(order);
        if coefficients.len() != expected {
            return Err(ExpansionError::CoefficientLength {
                order,
                expected,
                found: coefficients.len(),
            });
        }
        Ok(ShapeletExpansion {
            order,
            ellipse,
            coefficients,
            evaluator: HermiteEvaluator::new(order),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn ellipse(&self) -> &Ellipse {
        &self.ellipse
    }

    /// Re-attaches the expansion to a different ellipse. Coefficients are
    /// unchanged; they keep their flux-units meaning in the new frame.
    pub fn set_ellipse(&mut self, ellipse: Ellipse) {
        self.ellipse = ellipse;
    }

    pub fn coefficients(&self) -> &Array1<Pixel> {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut Array1<Pixel> {
        &mut self.coefficients
    }

    /// Evaluates the expansion at a pixel position: the point is carried
    /// through the ellipse's center subtraction and grid transform, and the
    /// result scaled by the transform determinant (the flux-units
    /// convention).
    pub fn evaluate(&mut self, x: Pixel, y: Pixel) -> Pixel {
        let transform = self.ellipse.core.grid_transform();
        let (cx, cy) = self.ellipse.center;
        let (xt, yt) = transform.apply(x - cx, y - cy);
        let value = self
            .evaluator
            .sum_evaluation(self.coefficients.view(), xt, yt)
            // The coefficient length is validated at construction, so the
            // evaluator call cannot fail.
            .unwrap();
        transform.determinant().abs() * value
    }

    /// Total flux of the expansion: the integral over the whole plane.
    /// Under the flux-units convention this is independent of the ellipse,
    /// so it needs no transform.
    pub fn integrate(&mut self) -> Pixel {
        self.evaluator
            .sum_integration(self.coefficients.view(), 0, 0)
            // Same construction-time validation as in evaluate.
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::EllipseCore;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn wrong_coefficient_length_is_rejected() {
        let ellipse = Ellipse::centered(EllipseCore::unit_circle());
        let coefficients = Array1::zeros(4);
        assert!(matches!(
            ShapeletExpansion::new(2, ellipse, coefficients),
            Err(ExpansionError::CoefficientLength {
                order: 2,
                expected: 6,
                found: 4,
            })
        ));
    }

    #[test]
    fn pure_gaussian_evaluates_to_its_closed_form() {
        let ellipse = Ellipse::centered(EllipseCore::unit_circle());
        let mut expansion =
            ShapeletExpansion::new(0, ellipse, Array1::from_vec(vec![1.0])).unwrap();
        let value = expansion.evaluate(0.0, 0.0);
        assert_relative_eq!(value, 1.0 / std::f64::consts::PI.sqrt(), max_relative = 1e-14);
    }

    #[test]
    fn center_offset_shifts_the_peak() {
        let core = EllipseCore::unit_circle();
        let mut centered =
            ShapeletExpansion::new(0, Ellipse::new(core, (2.0, -1.0)), Array1::ones(1)).unwrap();
        let mut origin =
            ShapeletExpansion::new(0, Ellipse::centered(core), Array1::ones(1)).unwrap();
        assert_relative_eq!(
            centered.evaluate(2.3, -0.6),
            origin.evaluate(0.3, 0.4),
            max_relative = 1e-13
        );
    }

    #[test]
    fn flux_is_independent_of_the_ellipse_scale() {
        let coefficients = Array1::from_vec(vec![2.5]);
        let mut narrow = ShapeletExpansion::new(
            0,
            Ellipse::centered(EllipseCore::new(0.5, 0.5, 0.0).unwrap()),
            coefficients.clone(),
        )
        .unwrap();
        let mut wide = ShapeletExpansion::new(
            0,
            Ellipse::centered(EllipseCore::new(4.0, 2.0, 1.1).unwrap()),
            coefficients,
        )
        .unwrap();
        assert_relative_eq!(narrow.integrate(), wide.integrate(), max_relative = 1e-14);
        // The flux of a pure Gaussian term: coefficient times the basis
        // integral 2 sqrt(pi).
        assert_relative_eq!(
            narrow.integrate(),
            2.5 * 2.0 * std::f64::consts::PI.sqrt(),
            max_relative = 1e-13
        );
    }
}
