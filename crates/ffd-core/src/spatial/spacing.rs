//! Spacing type for voxel and control-point sizes.

use super::Vector;

/// Physical size of one lattice step along each axis.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    /// Same spacing along every axis.
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }

    /// True when every component is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        (0..D).all(|i| self[i].is_finite() && self[i] > 0.0)
    }

    /// Smallest component.
    pub fn min_spacing(&self) -> f64 {
        self.0.min()
    }
}
