//! Kernels of the accelerated path.
//!
//! Each kernel is dispatched through [`ComputeDevice::dispatch`](crate::device::ComputeDevice::dispatch)
//! under its [`KernelId`](crate::config::KernelId); outputs of all waves are
//! committed once the dispatch has synchronised.

pub mod bending_energy;
pub mod common;
pub mod compose;
pub mod convert;
pub mod folding;
pub mod jacobian;
pub mod node;
pub mod spline;
pub mod velocity;

pub use bending_energy::{approx_bending_energy, approx_bending_energy_gradient};
pub use compose::compose_fields;
pub use folding::correct_folding;
pub use jacobian::{jacobian_determinants, jacobian_penalty, jacobian_penalty_gradient};
pub use spline::evaluate_deformation_field;
pub use velocity::{exponentiate_velocity, square};
