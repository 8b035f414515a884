//! Reference path of the free-form deformation engine.
//!
//! Holds the grid and field model, cubic B-spline evaluation, field
//! composition and velocity exponentiation. Every operation runs on the host
//! in `f64` over `f32` payloads.

pub mod error;
pub mod field;
pub mod spatial;
pub mod spline;
pub mod transform;

pub use error::{FieldError, Result};
pub use field::{ControlPointGrid, FieldGeometry, Mask, Parametrization, Representation, VectorField};
pub use spatial::{Direction, Point, Spacing, Vector};
pub use spline::{evaluate_deformation_field, BasisKind};
pub use transform::{compose_fields, exponentiate_velocity};
