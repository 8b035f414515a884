//! Spatial types for points, vectors, spacing and direction matrices.
//!
//! All types are thin wrappers over nalgebra and are shared by the field
//! model, the spline engine and the accelerated path.

pub mod point;
pub mod vector;
pub mod spacing;
pub mod direction;
pub mod matrix;

pub use point::Point;
pub use vector::Vector;
pub use spacing::Spacing;
pub use direction::Direction;

