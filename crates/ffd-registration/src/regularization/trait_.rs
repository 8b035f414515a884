//! Regularizer trait definition.

use ffd_core::{ControlPointGrid, VectorField};

use crate::error::Result;

/// Trait for control-point grid regularizers.
///
/// Regularizers constrain the spline transform to keep it smooth and
/// physically plausible during registration.
pub trait Regularizer<const D: usize> {
    /// Compute the (unweighted) penalty for a grid.
    fn penalty(&self, grid: &ControlPointGrid<D>) -> Result<f64>;

    /// Add the weighted penalty gradient with respect to every control point
    /// into `gradient`, a displacement field on the grid's lattice.
    fn add_gradient(&self, grid: &ControlPointGrid<D>, gradient: &mut VectorField<D>) -> Result<()>;

    /// Get the weight (scaling factor) for this regularizer.
    fn weight(&self) -> f64;

    /// Set the weight (scaling factor) for this regularizer.
    fn set_weight(&mut self, weight: f64);
}

/// Visits per-site stencils of a regularizer.
///
/// Node-centred sites use three nodes per axis, voxel-centred sites four.
pub(crate) trait SiteVisitor<const D: usize> {
    fn visit<const K: usize>(&mut self, stencil: &ffd_core::spline::Stencil<D, K>);
}

/// Add per-node `f64` accumulators into a gradient payload.
pub(crate) fn add_into<const D: usize>(gradient: &mut VectorField<D>, acc: &[nalgebra::SVector<f64, D>]) {
    for (value, delta) in gradient.data_mut().iter_mut().zip(acc) {
        for c in 0..D {
            value[c] = (f64::from(value[c]) + delta[c]) as f32;
        }
    }
}
