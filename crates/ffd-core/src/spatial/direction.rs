//! Direction cosine matrices.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};

use super::Spacing;

/// Orientation of the lattice axes in physical space.
///
/// Column `i` holds the physical direction of lattice axis `i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    /// Axis-aligned orientation.
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    /// Check that the matrix is orthogonal within `1e-6`.
    pub fn is_orthogonal(&self) -> bool {
        let product = self.0 * self.0.transpose();
        let identity = SMatrix::<f64, D, D>::identity();
        (0..D).all(|i| (0..D).all(|j| (product[(i, j)] - identity[(i, j)]).abs() < 1e-6))
    }

    /// Determinant of the direction matrix.
    pub fn determinant(&self) -> f64 {
        super::matrix::determinant(&self.0)
    }

    /// Linear part of the index-to-world map: `direction · diag(spacing)`.
    pub fn scaled(&self, spacing: &Spacing<D>) -> SMatrix<f64, D, D> {
        let mut matrix = self.0;
        for (column, step) in spacing.0.iter().enumerate() {
            matrix.column_mut(column).scale_mut(*step);
        }
        matrix
    }
}

impl<const D: usize> std::ops::Index<(usize, usize)> for Direction<D> {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> std::ops::IndexMut<(usize, usize)> for Direction<D> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_rotation_is_orthogonal() {
        let mut rot = Direction::<3>::identity();
        rot[(0, 0)] = 0.0;
        rot[(0, 1)] = -1.0;
        rot[(1, 0)] = 1.0;
        rot[(1, 1)] = 0.0;
        assert!(rot.is_orthogonal());
        assert!((rot.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaled_columns() {
        let m = Direction::<2>::identity().scaled(&Spacing::new([2.0, 3.0]));
        assert_eq!(m[(0, 0)], 2.0);
        assert_eq!(m[(1, 1)], 3.0);
        assert_eq!(m[(0, 1)], 0.0);
    }
}
