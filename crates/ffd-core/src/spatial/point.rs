//! Point type for physical positions.

use nalgebra::{Point as NaPoint, SVector};
use serde::{Deserialize, Serialize};

use super::Vector;

/// A position in D-dimensional physical space.
///
/// Used for field and lattice origins and for mapped voxel positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point<const D: usize>(pub NaPoint<f64, D>);

impl<const D: usize> Point<D> {
    /// Create a point from coordinates.
    pub fn new(coords: [f64; D]) -> Self {
        Self(NaPoint::from(coords))
    }

    /// The coordinate origin.
    pub fn origin() -> Self {
        Self(NaPoint::origin())
    }

    /// Build a point from single precision coordinates, as stored in field payloads.
    pub fn from_f32(coords: &[f32; D]) -> Self {
        Self(NaPoint::from(SVector::from_fn(|i, _| f64::from(coords[i]))))
    }

    /// Narrow to single precision, the storage precision of field payloads.
    pub fn to_f32(&self) -> [f32; D] {
        std::array::from_fn(|i| self.0.coords[i] as f32)
    }

    /// Coordinates as a column vector.
    pub fn coords(&self) -> &SVector<f64, D> {
        &self.0.coords
    }
}

impl<const D: usize> std::ops::Index<usize> for Point<D> {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0.coords[index]
    }
}

impl<const D: usize> std::ops::IndexMut<usize> for Point<D> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0.coords[index]
    }
}

impl<const D: usize> std::ops::Sub for Point<D> {
    type Output = Vector<D>;

    fn sub(self, other: Self) -> Self::Output {
        Vector(self.0.coords - other.0.coords)
    }
}

impl<const D: usize> std::ops::Add<Vector<D>> for Point<D> {
    type Output = Self;

    fn add(self, vector: Vector<D>) -> Self::Output {
        Self(self.0 + vector.0)
    }
}
