//! Vector fields over a regular lattice.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::FieldGeometry;
use crate::error::{FieldError, Result};

/// What the stored vectors mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    /// Absolute mapped position.
    Deformation,
    /// Offset from the site's rest position.
    Displacement,
}

/// A D-component vector per lattice site.
///
/// The payload is `f32`, the storage precision shared with the device
/// mirrors. Arithmetic on the payload is carried out in `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField<const D: usize> {
    geometry: FieldGeometry<D>,
    data: Vec<[f32; D]>,
    representation: Representation,
}

impl<const D: usize> VectorField<D> {
    /// Wrap an existing payload.
    pub fn new(
        geometry: FieldGeometry<D>,
        data: Vec<[f32; D]>,
        representation: Representation,
    ) -> Result<Self> {
        let expected = geometry.voxel_count();
        if data.len() != expected {
            return Err(FieldError::PayloadLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            geometry,
            data,
            representation,
        })
    }

    /// Field with every vector set to zero.
    pub fn zeros(geometry: FieldGeometry<D>, representation: Representation) -> Self {
        let data = vec![[0.0; D]; geometry.voxel_count()];
        Self {
            geometry,
            data,
            representation,
        }
    }

    /// Identity deformation: every site holds its own rest position.
    pub fn identity(geometry: FieldGeometry<D>) -> Self {
        let mut field = Self::zeros(geometry, Representation::Displacement);
        field.to_deformation();
        field
    }

    pub fn geometry(&self) -> &FieldGeometry<D> {
        &self.geometry
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn data(&self) -> &[[f32; D]] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [[f32; D]] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stored vector at a site, widened to `f64`.
    pub fn vector(&self, linear: usize) -> SVector<f64, D> {
        SVector::from_fn(|i, _| f64::from(self.data[linear][i]))
    }

    /// Store a vector at a site.
    pub fn set_vector(&mut self, linear: usize, value: &SVector<f64, D>) {
        self.data[linear] = std::array::from_fn(|i| value[i] as f32);
    }

    /// Offset from the rest position at a site, whatever the representation.
    pub fn displacement(&self, linear: usize) -> SVector<f64, D> {
        match self.representation {
            Representation::Displacement => self.vector(linear),
            Representation::Deformation => self.vector(linear) - self.geometry.rest_position(linear),
        }
    }

    /// Offsets from the rest positions of every site.
    pub fn displacements(&self) -> Vec<SVector<f64, D>> {
        (0..self.len()).map(|i| self.displacement(i)).collect()
    }

    /// Set every vector to `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = [value; D]);
    }

    /// Multiply every component by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.data
            .iter_mut()
            .flat_map(|v| v.iter_mut())
            .for_each(|c| *c *= factor);
    }

    /// Add rest positions. No-op on a deformation field.
    pub fn to_deformation(&mut self) {
        if self.representation == Representation::Deformation {
            return;
        }
        for linear in 0..self.data.len() {
            let value = self.vector(linear) + self.geometry.rest_position(linear);
            self.set_vector(linear, &value);
        }
        self.representation = Representation::Deformation;
    }

    /// Subtract rest positions. No-op on a displacement field.
    pub fn to_displacement(&mut self) {
        if self.representation == Representation::Displacement {
            return;
        }
        for linear in 0..self.data.len() {
            let value = self.vector(linear) - self.geometry.rest_position(linear);
            self.set_vector(linear, &value);
        }
        self.representation = Representation::Displacement;
    }

    /// Fail unless the field holds the given representation.
    pub fn ensure_representation(&self, expected: Representation) -> Result<()> {
        if self.representation == expected {
            Ok(())
        } else {
            Err(FieldError::Representation {
                expected,
                actual: self.representation,
            })
        }
    }

    /// Consume the field, returning its payload.
    pub fn into_data(self) -> Vec<[f32; D]> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Direction, Point, Spacing};

    fn geometry() -> FieldGeometry<2> {
        FieldGeometry::new(
            [3, 2],
            Point::new([1.0, -2.0]),
            Spacing::new([2.0, 0.5]),
            Direction::identity(),
        )
        .unwrap()
    }

    #[test]
    fn test_payload_length_checked() {
        let err = VectorField::new(geometry(), vec![[0.0; 2]; 5], Representation::Displacement);
        assert_eq!(err, Err(FieldError::PayloadLength { expected: 6, actual: 5 }));
    }

    #[test]
    fn test_identity_holds_rest_positions() {
        let field = VectorField::identity(geometry());
        assert_eq!(field.representation(), Representation::Deformation);
        assert_eq!(field.data()[4], [3.0, -1.5]);
        assert_eq!(field.displacement(4), SVector::<f64, 2>::zeros());
    }

    #[test]
    fn test_conversions_are_tag_guarded() {
        let mut field = VectorField::zeros(geometry(), Representation::Displacement);
        field.data_mut()[1] = [0.25, -0.75];
        let original = field.clone();

        field.to_deformation();
        field.to_deformation();
        assert_eq!(field.data()[1], [3.25, -2.75]);

        field.to_displacement();
        field.to_displacement();
        assert_eq!(field, original);
    }

    #[test]
    fn test_fill_and_scale() {
        let mut field = VectorField::zeros(geometry(), Representation::Displacement);
        field.fill(2.0);
        field.scale(-0.5);
        assert!(field.data().iter().all(|v| *v == [-1.0, -1.0]));
    }

    #[test]
    fn test_ensure_representation() {
        let field = VectorField::zeros(geometry(), Representation::Displacement);
        assert!(field.ensure_representation(Representation::Displacement).is_ok());
        assert!(matches!(
            field.ensure_representation(Representation::Deformation),
            Err(FieldError::Representation { .. })
        ));
    }
}
