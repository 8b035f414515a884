//! NIfTI storage of deformation fields and control-point grids.

pub mod nifti_io;

pub use nifti_io::{
    read_control_point_grid, read_vector_field, write_control_point_grid, write_vector_field,
    INTENT_DISPLACEMENT_VECTOR, INTENT_VECTOR, VELOCITY_INTENT_NAME,
};
