#![deny(dead_code)]
#![deny(unused_imports)]

//! # Shapelet: Gauss-Hermite basis evaluation and image modeling
//!
//! This crate evaluates the 2D Gauss-Hermite ("shapelet") basis — products
//! of two 1D Hermite functions sharing a Gaussian envelope — and assembles
//! dense linear models of pixelated image data from it. It is the numeric
//! core of an image-fitting pipeline: given an object's elliptical
//! parameterization and a set of pixel coordinates, it produces the design
//! matrix mapping basis-function coefficients to predicted pixel values.
//!
//! Two complementary evaluation strategies share one mathematical contract:
//!
//! - [`basis::HermiteEvaluator`] evaluates (or integrates) every packed
//!   basis function at a single point via a two-term recurrence — O(order)
//!   work per point, reused across many points by an outer caller loop.
//! - [`model::ModelBuilder`] evaluates all basis functions over an entire
//!   pixel set at once, running the same recurrence as whole-array
//!   operations. It trades memory (one array per degree, per axis) for
//!   throughput.
//!
//! Both order coefficients by the packed triangular enumeration in
//! [`packed::PackedIndex`], and both use the flux-units convention: basis
//! functions attached to an ellipse are divided by the product of its
//! semi-axes, so an expansion's integral does not change when its ellipse
//! is rescaled.
//!
//! The crate performs no fitting itself — it stops at evaluable quantities
//! and design matrices. Every component is synchronous and free of shared
//! mutable state; instances that mutate workspace in place are meant to be
//! used one per thread.

pub mod basis;
pub mod expansion;
pub mod fastexp;
pub mod geom;
pub mod model;
pub mod packed;

/// Numeric element type used for every buffer, matrix, and output in the
/// crate. One instance of any component uses this type consistently; change
/// the alias to rebuild the crate at a different precision.
pub type Pixel = f64;
