//! Field composition and velocity exponentiation.

pub mod compose;
pub mod velocity;

pub use compose::{compose_fields, interpolate_displaced, interpolate_displacement};
pub use velocity::{exponentiate_velocity, square};
