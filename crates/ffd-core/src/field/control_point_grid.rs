//! Control-point lattices parametrizing cubic B-spline transforms.

use nalgebra::SVector;
use serde::{Deserialize, Serialize};

use super::{FieldGeometry, Representation, VectorField};
use crate::error::{FieldError, Result};
use crate::spatial::{Point, Spacing};

/// How the control-point coefficients are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parametrization {
    /// Coefficients parametrize the transform directly.
    Displacement,
    /// Coefficients parametrize a stationary velocity field, integrated by
    /// scaling and squaring.
    Velocity { squaring_steps: u32 },
}

impl Parametrization {
    pub fn is_velocity(&self) -> bool {
        matches!(self, Self::Velocity { .. })
    }

    /// Squaring steps of a velocity parametrization, validated to be at least one.
    pub fn squaring_steps(&self) -> Result<u32> {
        match *self {
            Self::Velocity { squaring_steps } if squaring_steps > 0 => Ok(squaring_steps),
            Self::Velocity { .. } => Err(FieldError::parametrization(
                "velocity grids need at least one squaring step",
            )),
            Self::Displacement => Err(FieldError::parametrization(
                "grid is not parametrized as a velocity field",
            )),
        }
    }
}

/// A coarse lattice of spline coefficients plus its parametrization.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPointGrid<const D: usize> {
    lattice: VectorField<D>,
    parametrization: Parametrization,
}

impl<const D: usize> ControlPointGrid<D> {
    /// Wrap an existing lattice of coefficients.
    pub fn new(lattice: VectorField<D>, parametrization: Parametrization) -> Self {
        Self {
            lattice,
            parametrization,
        }
    }

    /// Create a lattice covering `field` with the given physical control-point spacing.
    ///
    /// Each axis holds `ceil(n · s / cp) + 3` nodes and the lattice starts one
    /// control-point step before the field origin, so every voxel has a full
    /// cubic stencil. Coefficients start at the identity, in deformation form.
    pub fn for_field(field: &FieldGeometry<D>, spacing: Spacing<D>) -> Result<Self> {
        if !spacing.is_valid() {
            return Err(FieldError::geometry(format!(
                "control-point spacing must be finite and positive, got {:?}",
                spacing.to_array()
            )));
        }
        let shape: [usize; D] = std::array::from_fn(|axis| {
            let extent = field.shape()[axis] as f64 * field.spacing()[axis];
            (extent / spacing[axis]).ceil() as usize + 3
        });

        let one_step_back = -(field.direction().scaled(&spacing) * SVector::<f64, D>::repeat(1.0));
        let origin = Point(field.origin().0 + one_step_back);

        let geometry = FieldGeometry::new(shape, origin, spacing, *field.direction())?;
        tracing::debug!(?shape, spacing = ?spacing.to_array(), "created control-point grid");

        Ok(Self::new(VectorField::identity(geometry), Parametrization::Displacement))
    }

    /// Same grid with a velocity parametrization.
    pub fn into_velocity(mut self, squaring_steps: u32) -> Self {
        self.parametrization = Parametrization::Velocity { squaring_steps };
        self
    }

    pub fn lattice(&self) -> &VectorField<D> {
        &self.lattice
    }

    pub fn lattice_mut(&mut self) -> &mut VectorField<D> {
        &mut self.lattice
    }

    pub fn geometry(&self) -> &FieldGeometry<D> {
        self.lattice.geometry()
    }

    pub fn parametrization(&self) -> Parametrization {
        self.parametrization
    }

    pub fn set_parametrization(&mut self, parametrization: Parametrization) {
        self.parametrization = parametrization;
    }

    pub fn is_velocity(&self) -> bool {
        self.parametrization.is_velocity()
    }

    /// Squaring steps of a velocity grid, validated to be at least one.
    pub fn squaring_steps(&self) -> Result<u32> {
        self.parametrization.squaring_steps()
    }

    /// Physical spacing between control points.
    pub fn control_point_spacing(&self) -> &Spacing<D> {
        self.geometry().spacing()
    }

    pub fn node_count(&self) -> usize {
        self.lattice.len()
    }

    pub fn representation(&self) -> Representation {
        self.lattice.representation()
    }

    pub fn to_deformation(&mut self) {
        self.lattice.to_deformation();
    }

    pub fn to_displacement(&mut self) {
        self.lattice.to_displacement();
    }

    /// Per-node offsets from the rest lattice.
    pub fn node_displacements(&self) -> Vec<SVector<f64, D>> {
        self.lattice.displacements()
    }

    /// Interior nodes, the sites of the node-based regularizers.
    pub fn interior_nodes(&self) -> impl Iterator<Item = [usize; D]> + '_ {
        let shape = self.geometry().shape();
        let interior: [usize; D] = std::array::from_fn(|axis| shape[axis].saturating_sub(2));
        let count: usize = interior.iter().product();
        (0..count).map(move |mut rest| {
            std::array::from_fn(|axis| {
                let i = rest % interior[axis];
                rest /= interior[axis];
                i + 1
            })
        })
    }

    /// Number of interior nodes.
    pub fn interior_node_count(&self) -> usize {
        self.geometry()
            .shape()
            .iter()
            .map(|n| n.saturating_sub(2))
            .product()
    }
}
