//! Grid and field model: lattice geometry, vector fields, control-point
//! grids and voxel masks.

pub mod control_point_grid;
pub mod geometry;
pub mod mask;
pub mod vector_field;

pub use control_point_grid::{ControlPointGrid, Parametrization};
pub use geometry::FieldGeometry;
pub use mask::Mask;
pub use vector_field::{Representation, VectorField};
