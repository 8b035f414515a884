//! Lattice geometry shared by vector fields and control-point grids.
//!
//! A geometry maps integer lattice indices to physical positions:
//! `point = origin + direction · (index ∘ spacing)`.

use nalgebra::{SMatrix, SVector};

use crate::error::{FieldError, Result};
use crate::spatial::{Direction, Point, Spacing};

/// Shape and physical placement of a regular lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGeometry<const D: usize> {
    shape: [usize; D],
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
    index_to_world: SMatrix<f64, D, D>,
    world_to_index: SMatrix<f64, D, D>,
}

impl<const D: usize> FieldGeometry<D> {
    /// Create a geometry, validating dimensionality, shape, spacing and orientation.
    pub fn new(
        shape: [usize; D],
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Result<Self> {
        if D != 2 && D != 3 {
            return Err(FieldError::UnsupportedDimension(D));
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(FieldError::geometry(format!("empty lattice shape {:?}", shape)));
        }
        if !spacing.is_valid() {
            return Err(FieldError::geometry(format!(
                "spacing must be finite and positive, got {:?}",
                spacing.to_array()
            )));
        }
        let index_to_world = direction.scaled(&spacing);
        let world_to_index = index_to_world
            .try_inverse()
            .ok_or_else(|| FieldError::geometry("direction matrix is singular"))?;

        Ok(Self {
            shape,
            origin,
            spacing,
            direction,
            index_to_world,
            world_to_index,
        })
    }

    /// Axis-aligned lattice at the physical origin with uniform spacing.
    pub fn axis_aligned(shape: [usize; D], spacing: f64) -> Result<Self> {
        Self::new(shape, Point::origin(), Spacing::uniform(spacing), Direction::identity())
    }

    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Number of lattice sites.
    pub fn voxel_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// `direction · diag(spacing)`.
    pub fn index_to_world_matrix(&self) -> &SMatrix<f64, D, D> {
        &self.index_to_world
    }

    /// Inverse of [`Self::index_to_world_matrix`]; the derivative of lattice
    /// coordinates with respect to physical position.
    pub fn world_to_index_matrix(&self) -> &SMatrix<f64, D, D> {
        &self.world_to_index
    }

    /// Linear index of a lattice site; x varies fastest.
    pub fn linear_index(&self, index: &[usize; D]) -> usize {
        let mut linear = 0;
        for axis in (0..D).rev() {
            linear = linear * self.shape[axis] + index[axis];
        }
        linear
    }

    /// Linear index of a possibly out-of-range site, `None` outside the lattice.
    pub fn checked_linear_index(&self, index: &[isize; D]) -> Option<usize> {
        let mut linear = 0usize;
        for axis in (0..D).rev() {
            let i = index[axis];
            if i < 0 || i as usize >= self.shape[axis] {
                return None;
            }
            linear = linear * self.shape[axis] + i as usize;
        }
        Some(linear)
    }

    /// Inverse of [`Self::linear_index`].
    pub fn lattice_index(&self, linear: usize) -> [usize; D] {
        let mut rest = linear;
        std::array::from_fn(|axis| {
            let i = rest % self.shape[axis];
            rest /= self.shape[axis];
            i
        })
    }

    /// Physical position of a continuous lattice index.
    pub fn index_to_world(&self, index: &SVector<f64, D>) -> SVector<f64, D> {
        self.origin.coords() + self.index_to_world * index
    }

    /// Continuous lattice index of a physical position.
    pub fn world_to_index(&self, point: &SVector<f64, D>) -> SVector<f64, D> {
        self.world_to_index * (point - self.origin.coords())
    }

    /// Physical rest position of a lattice site.
    pub fn rest_position(&self, linear: usize) -> SVector<f64, D> {
        let index = self.lattice_index(linear);
        self.index_to_world(&SVector::from_fn(|i, _| index[i] as f64))
    }

    /// True when both geometries describe the same lattice.
    pub fn same_lattice(&self, other: &Self) -> bool {
        self.shape == other.shape
            && (self.origin.coords() - other.origin.coords()).amax() < 1e-9
            && (self.index_to_world - other.index_to_world).amax() < 1e-9
    }

    /// Fail with a shape mismatch unless both geometries describe the same lattice.
    pub fn ensure_same_lattice(&self, other: &Self) -> Result<()> {
        if self.same_lattice(other) {
            Ok(())
        } else {
            Err(FieldError::shape_mismatch(&self.shape, &other.shape))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oblique() -> FieldGeometry<3> {
        let mut direction = Direction::identity();
        direction[(0, 0)] = 0.0;
        direction[(0, 1)] = -1.0;
        direction[(1, 0)] = 1.0;
        direction[(1, 1)] = 0.0;
        FieldGeometry::new(
            [4, 5, 6],
            Point::new([10.0, -3.0, 2.0]),
            Spacing::new([1.5, 2.0, 0.5]),
            direction,
        )
        .unwrap()
    }

    #[test]
    fn test_linear_index_round_trip() {
        let geometry = oblique();
        assert_eq!(geometry.voxel_count(), 120);
        for linear in [0, 1, 4, 19, 20, 119] {
            let index = geometry.lattice_index(linear);
            assert_eq!(geometry.linear_index(&index), linear);
        }
        assert_eq!(geometry.linear_index(&[1, 2, 3]), 1 + 4 * (2 + 5 * 3));
    }

    #[test]
    fn test_checked_linear_index() {
        let geometry = oblique();
        assert_eq!(geometry.checked_linear_index(&[-1, 0, 0]), None);
        assert_eq!(geometry.checked_linear_index(&[0, 5, 0]), None);
        assert_eq!(geometry.checked_linear_index(&[3, 4, 5]), Some(119));
    }

    #[test]
    fn test_world_index_round_trip() {
        let geometry = oblique();
        let index = SVector::<f64, 3>::new(1.25, 3.5, -0.75);
        let world = geometry.index_to_world(&index);
        let back = geometry.world_to_index(&world);
        assert!((back - index).amax() < 1e-12, "Round trip mismatch: got {}, expected {}", back, index);
    }

    #[test]
    fn test_rest_position_uses_direction() {
        let geometry = oblique();
        // index (1, 0, 0) moves along +y by 1.5
        let p = geometry.rest_position(1);
        assert!((p[0] - 10.0).abs() < 1e-12);
        assert!((p[1] - (-1.5)).abs() < 1e-12);
        assert!((p[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(matches!(
            FieldGeometry::<2>::axis_aligned([0, 4], 1.0),
            Err(FieldError::InvalidGeometry(_))
        ));
        assert!(matches!(
            FieldGeometry::<2>::axis_aligned([4, 4], -1.0),
            Err(FieldError::InvalidGeometry(_))
        ));
        assert!(matches!(
            FieldGeometry::<1>::axis_aligned([4], 1.0),
            Err(FieldError::UnsupportedDimension(1))
        ));
    }
}
