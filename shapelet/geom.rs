//! Ellipse parameterization consumed by the model-building layers.
//!
//! This module is the crate's input contract with its geometry
//! collaborator: just enough surface to derive the 2x2 linear transform
//! from pixel space into the basis's normalized frame, plus an optional
//! center offset. It is deliberately not a general geometry or linear
//! algebra library.

use crate::Pixel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing geometry parameters.
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Ellipse radii must be finite and strictly positive, but got {0}.")]
    InvalidRadius(Pixel),
}

/// Anisotropic scale and orientation of the shapelet basis frame.
///
/// `radius_x` and `radius_y` are the semi-axes in pixel units and
/// `position_angle` is the rotation of the `radius_x` axis from the pixel
/// x axis, in radians. The core carries no center; see [`Ellipse`] for the
/// centered variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseCore {
    radius_x: Pixel,
    radius_y: Pixel,
    position_angle: Pixel,
}

impl EllipseCore {
    /// Creates a core from semi-axes and a position angle, validating that
    /// both radii are finite and strictly positive.
    pub fn new(
        radius_x: Pixel,
        radius_y: Pixel,
        position_angle: Pixel,
    ) -> Result<Self, GeometryError> {
        for radius in [radius_x, radius_y] {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(GeometryError::InvalidRadius(radius));
            }
        }
        Ok(EllipseCore {
            radius_x,
            radius_y,
            position_angle,
        })
    }

    /// The identity parameterization: unit radii, no rotation.
    pub fn unit_circle() -> Self {
        EllipseCore {
            radius_x: 1.0,
            radius_y: 1.0,
            position_angle: 0.0,
        }
    }

    pub fn radius_x(&self) -> Pixel {
        self.radius_x
    }

    pub fn radius_y(&self) -> Pixel {
        self.radius_y
    }

    pub fn position_angle(&self) -> Pixel {
        self.position_angle
    }

    /// Product of the semi-axes. The flux-units coefficient convention
    /// divides basis functions by this quantity.
    pub fn axis_product(&self) -> Pixel {
        self.radius_x * self.radius_y
    }

    /// The linear map taking centered pixel coordinates into the basis's
    /// normalized frame: rotate by `-position_angle`, then divide each
    /// component by its semi-axis.
    pub fn grid_transform(&self) -> LinearTransform {
        let (sin, cos) = self.position_angle.sin_cos();
        LinearTransform {
            xx: cos / self.radius_x,
            xy: sin / self.radius_x,
            yx: -sin / self.radius_y,
            yy: cos / self.radius_y,
        }
    }
}

/// A 2x2 linear transform between the pixel frame and the normalized basis
/// frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTransform {
    pub xx: Pixel,
    pub xy: Pixel,
    pub yx: Pixel,
    pub yy: Pixel,
}

impl LinearTransform {
    /// Applies the transform to a coordinate pair.
    pub fn apply(&self, x: Pixel, y: Pixel) -> (Pixel, Pixel) {
        (self.xx * x + self.xy * y, self.yx * x + self.yy * y)
    }

    pub fn determinant(&self) -> Pixel {
        self.xx * self.yy - self.xy * self.yx
    }
}

/// An [`EllipseCore`] with a center offset in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    pub core: EllipseCore,
    pub center: (Pixel, Pixel),
}

impl Ellipse {
    pub fn new(core: EllipseCore, center: (Pixel, Pixel)) -> Self {
        Ellipse { core, center }
    }

    /// An ellipse centered at the pixel origin.
    pub fn centered(core: EllipseCore) -> Self {
        Ellipse {
            core,
            center: (0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unit_circle_transform_is_the_identity() {
        let transform = EllipseCore::unit_circle().grid_transform();
        let (x, y) = transform.apply(0.8, -2.5);
        assert_relative_eq!(x, 0.8);
        assert_relative_eq!(y, -2.5);
        assert_relative_eq!(transform.determinant(), 1.0);
    }

    #[test]
    fn rotated_ellipse_maps_its_major_axis_to_the_x_axis() {
        // Semi-major axis 2 along the pixel y axis; the pixel point (0, 3)
        // sits 1.5 semi-major units out.
        let core = EllipseCore::new(2.0, 1.0, std::f64::consts::FRAC_PI_2).unwrap();
        let (xt, yt) = core.grid_transform().apply(0.0, 3.0);
        assert_relative_eq!(xt, 1.5, epsilon = 1e-14);
        assert_relative_eq!(yt, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn determinant_is_the_inverse_axis_product() {
        let core = EllipseCore::new(2.0, 0.5, 0.3).unwrap();
        let det = core.grid_transform().determinant();
        assert_relative_eq!(det.abs(), 1.0 / core.axis_product(), epsilon = 1e-14);
    }

    #[test]
    fn non_positive_or_non_finite_radii_are_rejected() {
        assert!(matches!(
            EllipseCore::new(0.0, 1.0, 0.0),
            Err(GeometryError::InvalidRadius(_))
        ));
        assert!(matches!(
            EllipseCore::new(1.0, -2.0, 0.0),
            Err(GeometryError::InvalidRadius(_))
        ));
        assert!(matches!(
            EllipseCore::new(1.0, Pixel::NAN, 0.0),
            Err(GeometryError::InvalidRadius(_))
        ));
    }
}
