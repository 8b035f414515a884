//! Spline evaluation engine: basis functions, stencils and deformation-field evaluation.

pub mod basis;
pub mod deformation;
pub mod stencil;

pub use basis::BasisKind;
pub use deformation::evaluate_deformation_field;
pub use stencil::{AxisWeights, NodeStencil, NodeWeights, SiteStencil, Stencil};
