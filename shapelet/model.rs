//! Vectorized assembly of shapelet design matrices.
//!
//! Unlike [`crate::basis::HermiteEvaluator`], which makes the iteration
//! over pixels the outer loop, [`ModelBuilder`] holds arrays the size of an
//! entire image and runs each Hermite recurrence step across every pixel at
//! once. This uses more memory for workspaces (one row per polynomial
//! degree, per axis) but turns matrix assembly into pure elementwise
//! products.
//!
//! The per-pixel Gaussian envelope — the only transcendental in the whole
//! pass — is computed once per `update` and stored together with the
//! transform determinant, so every basis-function column is assembled as
//! `envelope * hermite_x[degree] * hermite_y[degree]` with no re-derivation.
//! Folding the determinant into the envelope puts coefficients in flux
//! units (basis divided by the product of the ellipse semi-axes), the same
//! convention as [`crate::expansion::ShapeletExpansion`], so the two
//! evaluation strategies interoperate exactly.

use crate::Pixel;
use crate::basis::BASE_FACTOR;
use crate::fastexp::ExpStrategy;
use crate::geom::{Ellipse, EllipseCore};
use crate::packed::PackedIndex;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use thiserror::Error;

/// Errors for model-builder construction and assembly.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(
        "Requested order {requested} exceeds the workspace order {capacity}; call ensure_order before assembling."
    )]
    OrderExceedsWorkspace { requested: usize, capacity: usize },

    #[error("Pixel coordinate arrays have mismatched lengths: x has {x_len} entries, y has {y_len}.")]
    CoordinateLengthMismatch { x_len: usize, y_len: usize },

    #[error(
        "Output array has shape [{found_rows}, {found_cols}], but order {order} over {pixels} pixels requires [{pixels}, {expected_cols}]."
    )]
    OutputShapeMismatch {
        order: usize,
        pixels: usize,
        expected_cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error(
        "Coefficient vector has length {found}, but order {order} requires {expected} packed entries."
    )]
    CoefficientLength {
        order: usize,
        expected: usize,
        found: usize,
    },

    #[error("Output vector has length {found}, but the builder covers {expected} pixels.")]
    OutputLength { expected: usize, found: usize },
}

/// Builds dense design matrices mapping shapelet coefficients to predicted
/// pixel values, one ellipse at a time.
///
/// The builder owns copies of the flattened pixel coordinate arrays and a
/// set of workspaces sized by its working order. [`update`](Self::update)
/// recomputes the transformed coordinates, Hermite rows, and envelope for a
/// new ellipse; the `add_*` operations then assemble models at any order up
/// to the working order. The working order only grows (see
/// [`ensure_order`](Self::ensure_order)), keeping repeated assembly at
/// varying orders allocation-free.
///
/// Workspaces are mutated in place by `update`; use one builder per thread.
pub struct ModelBuilder {
    working_order: usize,
    exp_strategy: ExpStrategy,
    x: Array1<Pixel>,
    y: Array1<Pixel>,
    xt: Array1<Pixel>,
    yt: Array1<Pixel>,
    x_hermite: Array2<Pixel>,
    y_hermite: Array2<Pixel>,
    envelope: Array1<Pixel>,
}

impl ModelBuilder {
    /// Creates a builder for the given pixel coordinates (already
    /// center-subtracted for the shape-only [`update`](Self::update) entry
    /// point). The coordinate arrays must have equal lengths; zero pixels
    /// is legal and produces zero-row models.
    ///
    /// Construction runs a unit-circle update, so the builder is
    /// immediately usable without a separate `update` call.
    pub fn new(
        order: usize,
        x: ArrayView1<'_, Pixel>,
        y: ArrayView1<'_, Pixel>,
        exp_strategy: ExpStrategy,
    ) -> Result<Self, ModelError> {
        if x.len() != y.len() {
            return Err(ModelError::CoordinateLengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }
        let pixels = x.len();
        let mut builder = ModelBuilder {
            working_order: order,
            exp_strategy,
            x: x.to_owned(),
            y: y.to_owned(),
            xt: Array1::zeros(pixels),
            yt: Array1::zeros(pixels),
            x_hermite: Array2::zeros((order + 1, pixels)),
            y_hermite: Array2::zeros((order + 1, pixels)),
            envelope: Array1::zeros(pixels),
        };
        builder.update(&EllipseCore::unit_circle());
        Ok(builder)
    }

    /// Number of pixels covered by this builder.
    pub fn pixel_count(&self) -> usize {
        self.x.len()
    }

    /// The current working order; `add_*` calls accept any order up to it.
    pub fn order(&self) -> usize {
        self.working_order
    }

    pub fn exp_strategy(&self) -> ExpStrategy {
        self.exp_strategy
    }

    /// Changes the envelope policy. Takes effect at the next `update`.
    pub fn set_exp_strategy(&mut self, exp_strategy: ExpStrategy) {
        self.exp_strategy = exp_strategy;
    }

    /// Recomputes the transformed coordinates, Hermite rows, and envelope
    /// for a new basis ellipse (shape only; coordinates are assumed
    /// center-subtracted).
    pub fn update(&mut self, core: &EllipseCore) {
        self.apply(core, (0.0, 0.0));
    }

    /// As [`update`](Self::update), but subtracts the ellipse's center from
    /// the raw coordinates first. Equivalent to pre-subtracting the center
    /// and calling the shape-only entry point.
    pub fn update_with_center(&mut self, ellipse: &Ellipse) {
        self.apply(&ellipse.core, ellipse.center);
    }

    /// Grows the workspaces to cover `order`, refilling the Hermite rows at
    /// the current transform. Never shrinks; a no-op when the builder
    /// already covers `order`.
    pub fn ensure_order(&mut self, order: usize) {
        if order <= self.working_order {
            return;
        }
        log::debug!(
            "growing model builder workspaces from order {} to {} over {} pixels",
            self.working_order,
            order,
            self.pixel_count()
        );
        self.working_order = order;
        self.x_hermite = Array2::zeros((order + 1, self.pixel_count()));
        self.y_hermite = Array2::zeros((order + 1, self.pixel_count()));
        fill_hermite_rows(&mut self.x_hermite, &self.xt);
        fill_hermite_rows(&mut self.y_hermite, &self.yt);
    }

    /// Accumulates into `output` the design matrix for every packed basis
    /// function up to `order`: one row per pixel, one column per packed
    /// index, each entry the flux-normalized basis value at that pixel.
    pub fn add_model_matrix(
        &self,
        order: usize,
        mut output: ArrayViewMut2<'_, Pixel>,
    ) -> Result<(), ModelError> {
        self.check_order(order)?;
        let expected_cols = PackedIndex::count(order);
        if output.nrows() != self.pixel_count() || output.ncols() != expected_cols {
            return Err(ModelError::OutputShapeMismatch {
                order,
                pixels: self.pixel_count(),
                expected_cols,
                found_rows: output.nrows(),
                found_cols: output.ncols(),
            });
        }
        for i in PackedIndex::walk(order) {
            Zip::from(output.column_mut(i.index()))
                .and(&self.envelope)
                .and(self.x_hermite.row(i.x()))
                .and(self.y_hermite.row(i.y()))
                .for_each(|out, &env, &hx, &hy| *out += env * hx * hy);
        }
        Ok(())
    }

    /// Accumulates into `output` the predicted pixel vector for the given
    /// coefficients — the model matrix times `coefficients` — without
    /// materializing the matrix: each column's weighted contribution is
    /// added directly.
    pub fn add_model_vector(
        &self,
        order: usize,
        coefficients: ArrayView1<'_, Pixel>,
        mut output: ArrayViewMut1<'_, Pixel>,
    ) -> Result<(), ModelError> {
        self.check_order(order)?;
        let expected = PackedIndex::count(order);
        if coefficients.len() != expected {
            return Err(ModelError::CoefficientLength {
                order,
                expected,
                found: coefficients.len(),
            });
        }
        if output.len() != self.pixel_count() {
            return Err(ModelError::OutputLength {
                expected: self.pixel_count(),
                found: output.len(),
            });
        }
        for i in PackedIndex::walk(order) {
            let weight = coefficients[i.index()];
            if weight == 0.0 {
                continue;
            }
            Zip::from(&mut output)
                .and(&self.envelope)
                .and(self.x_hermite.row(i.x()))
                .and(self.y_hermite.row(i.y()))
                .for_each(|out, &env, &hx, &hy| *out += weight * env * hx * hy);
        }
        Ok(())
    }

    fn check_order(&self, order: usize) -> Result<(), ModelError> {
        if order > self.working_order {
            return Err(ModelError::OrderExceedsWorkspace {
                requested: order,
                capacity: self.working_order,
            });
        }
        Ok(())
    }

    fn apply(&mut self, core: &EllipseCore, center: (Pixel, Pixel)) {
        let transform = core.grid_transform();
        let (cx, cy) = center;
        Zip::from(&mut self.xt)
            .and(&mut self.yt)
            .and(&self.x)
            .and(&self.y)
            .for_each(|xt, yt, &x, &y| {
                let (tx, ty) = transform.apply(x - cx, y - cy);
                *xt = tx;
                *yt = ty;
            });
        let det = transform.determinant().abs();
        let strategy = self.exp_strategy;
        Zip::from(&mut self.envelope)
            .and(&self.xt)
            .and(&self.yt)
            .for_each(|env, &xt, &yt| {
                *env = det * strategy.eval(-0.5 * (xt * xt + yt * yt));
            });
        fill_hermite_rows(&mut self.x_hermite, &self.xt);
        fill_hermite_rows(&mut self.y_hermite, &self.yt);
    }
}

/// Whole-array Hermite recurrence: each step of the 1D recurrence updates
/// an entire row of per-pixel values. Rows hold the normalized Hermite
/// polynomial family with the Gaussian envelope factored out (the envelope
/// is shared per pixel and applied at assembly time).
fn fill_hermite_rows(workspace: &mut Array2<Pixel>, coords: &Array1<Pixel>) {
    let order = workspace.nrows() - 1;
    workspace.row_mut(0).fill(BASE_FACTOR);
    if order >= 1 {
        Zip::from(workspace.row_mut(1))
            .and(coords)
            .for_each(|w, &t| *w = std::f64::consts::SQRT_2 * t * BASE_FACTOR);
    }
    for n in 2..=order {
        let n_f = n as Pixel;
        let c1 = (2.0 / n_f).sqrt();
        let c2 = ((n_f - 1.0) / n_f).sqrt();
        let (lower, mut upper) = workspace.view_mut().split_at(Axis(0), n);
        Zip::from(upper.row_mut(0))
            .and(coords)
            .and(lower.row(n - 1))
            .and(lower.row(n - 2))
            .for_each(|w, &t, &p1, &p2| *w = c1 * t * p1 - c2 * p2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn grid_coordinates(half_width: isize) -> (Array1<Pixel>, Array1<Pixel>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for row in -half_width..=half_width {
            for col in -half_width..=half_width {
                xs.push(col as Pixel);
                ys.push(row as Pixel);
            }
        }
        (Array1::from_vec(xs), Array1::from_vec(ys))
    }

    #[test]
    fn mismatched_coordinate_lengths_are_rejected() {
        let x = array![0.0, 1.0];
        let y = array![0.0];
        assert!(matches!(
            ModelBuilder::new(2, x.view(), y.view(), ExpStrategy::Exact),
            Err(ModelError::CoordinateLengthMismatch { x_len: 2, y_len: 1 })
        ));
    }

    #[test]
    fn requesting_more_than_the_working_order_fails() {
        let (x, y) = grid_coordinates(2);
        let builder = ModelBuilder::new(4, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        let mut output = Array2::zeros((builder.pixel_count(), PackedIndex::count(5)));
        match builder.add_model_matrix(5, output.view_mut()) {
            Err(ModelError::OrderExceedsWorkspace {
                requested,
                capacity,
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(capacity, 4);
            }
            other => panic!("expected OrderExceedsWorkspace, got {other:?}"),
        }
    }

    #[test]
    fn zero_pixels_produce_a_zero_row_matrix() {
        let x = Array1::<Pixel>::zeros(0);
        let y = Array1::<Pixel>::zeros(0);
        let builder = ModelBuilder::new(3, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        let mut output = Array2::zeros((0, PackedIndex::count(3)));
        builder.add_model_matrix(3, output.view_mut()).unwrap();
        assert_eq!(output.nrows(), 0);
        assert_eq!(output.ncols(), PackedIndex::count(3));
    }

    #[test]
    fn wrong_output_shape_is_rejected() {
        let (x, y) = grid_coordinates(1);
        let builder = ModelBuilder::new(2, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        let mut output = Array2::zeros((builder.pixel_count(), 3));
        assert!(matches!(
            builder.add_model_matrix(2, output.view_mut()),
            Err(ModelError::OutputShapeMismatch { expected_cols: 6, .. })
        ));
    }

    #[test]
    fn central_pixel_of_the_gaussian_column_has_the_closed_form() {
        let x = array![0.0];
        let y = array![0.0];
        let builder = ModelBuilder::new(0, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        let mut output = Array2::zeros((1, 1));
        builder.add_model_matrix(0, output.view_mut()).unwrap();
        // phi_0(0)^2 = pi^(-1/2); unit circle, so no flux rescaling.
        assert_relative_eq!(
            output[[0, 0]],
            1.0 / std::f64::consts::PI.sqrt(),
            max_relative = 1e-14
        );
    }

    #[test]
    fn model_vector_equals_matrix_times_coefficients() {
        let (x, y) = grid_coordinates(3);
        let order = 4;
        let mut builder = ModelBuilder::new(order, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        builder.update(&EllipseCore::new(1.8, 0.9, 0.4).unwrap());

        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let coefficients: Array1<Pixel> =
            Array1::from_shape_fn(PackedIndex::count(order), |_| rng.sample(StandardNormal));

        let mut matrix = Array2::zeros((builder.pixel_count(), PackedIndex::count(order)));
        builder.add_model_matrix(order, matrix.view_mut()).unwrap();
        let expected = matrix.dot(&coefficients);

        let mut predicted = Array1::zeros(builder.pixel_count());
        builder
            .add_model_vector(order, coefficients.view(), predicted.view_mut())
            .unwrap();
        for (lhs, rhs) in predicted.iter().zip(expected.iter()) {
            assert_relative_eq!(*lhs, *rhs, max_relative = 1e-11, epsilon = 1e-13);
        }
    }

    #[test]
    fn ensure_order_grows_and_matches_a_fresh_builder() {
        let (x, y) = grid_coordinates(2);
        let ellipse = EllipseCore::new(1.4, 1.1, -0.2).unwrap();

        let mut grown = ModelBuilder::new(2, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        grown.update(&ellipse);
        grown.ensure_order(5);
        assert_eq!(grown.order(), 5);
        // Growth below the working order is a no-op.
        grown.ensure_order(3);
        assert_eq!(grown.order(), 5);

        let mut fresh = ModelBuilder::new(5, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        fresh.update(&ellipse);

        let cols = PackedIndex::count(5);
        let mut from_grown = Array2::zeros((grown.pixel_count(), cols));
        let mut from_fresh = Array2::zeros((fresh.pixel_count(), cols));
        grown.add_model_matrix(5, from_grown.view_mut()).unwrap();
        fresh.add_model_matrix(5, from_fresh.view_mut()).unwrap();
        for (lhs, rhs) in from_grown.iter().zip(from_fresh.iter()) {
            assert_relative_eq!(*lhs, *rhs, epsilon = 1e-14);
        }
    }

    #[test]
    fn approximate_envelope_tracks_the_exact_one() {
        let (x, y) = grid_coordinates(4);
        let order = 3;
        let ellipse = EllipseCore::new(2.2, 1.3, 0.9).unwrap();

        let mut exact = ModelBuilder::new(order, x.view(), y.view(), ExpStrategy::Exact).unwrap();
        let mut approximate =
            ModelBuilder::new(order, x.view(), y.view(), ExpStrategy::Approximate).unwrap();
        exact.update(&ellipse);
        approximate.update(&ellipse);

        let cols = PackedIndex::count(order);
        let mut exact_matrix = Array2::zeros((exact.pixel_count(), cols));
        let mut approximate_matrix = Array2::zeros((approximate.pixel_count(), cols));
        exact.add_model_matrix(order, exact_matrix.view_mut()).unwrap();
        approximate
            .add_model_matrix(order, approximate_matrix.view_mut())
            .unwrap();
        for (lhs, rhs) in approximate_matrix.iter().zip(exact_matrix.iter()) {
            assert_relative_eq!(*lhs, *rhs, max_relative = 1e-11, epsilon = 1e-13);
        }
    }
}
