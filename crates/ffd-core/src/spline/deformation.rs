//! Deformation-field evaluation from control-point grids.

use nalgebra::SVector;
use tracing::debug;

use super::basis::BasisKind;
use super::stencil::SiteStencil;
use crate::error::Result;
use crate::field::{ControlPointGrid, Mask, Representation, VectorField};
use crate::transform::{compose_fields, exponentiate_velocity};

/// Evaluate the spline transform parametrized by `grid` at every masked voxel of `field`.
///
/// `field` must be a deformation field. Without `compose` each voxel's rest
/// position is transformed; with `compose` the value already stored at the
/// voxel is used as the query position, so the result is the grid transform
/// applied after the existing field. Unmasked voxels are left untouched.
///
/// Velocity-parametrized grids are exponentiated first; with `compose` the
/// exponentiated field is then composed into `field`.
pub fn evaluate_deformation_field<const D: usize>(
    grid: &ControlPointGrid<D>,
    field: &mut VectorField<D>,
    mask: &Mask,
    compose: bool,
    basis: BasisKind,
) -> Result<()> {
    field.ensure_representation(Representation::Deformation)?;
    mask.ensure_voxel_count(field.len())?;

    if grid.is_velocity() {
        let mut exponentiated = VectorField::identity(field.geometry().clone());
        exponentiate_velocity(grid, &mut exponentiated)?;
        if compose {
            compose_fields(&exponentiated, field, mask)?;
        } else {
            for voxel in mask.iter() {
                field.data_mut()[voxel] = exponentiated.data()[voxel];
            }
        }
        return Ok(());
    }

    debug!(
        voxels = mask.len(),
        nodes = grid.node_count(),
        compose,
        ?basis,
        "evaluating spline deformation field"
    );

    let lattice = grid.geometry();
    let displacements = grid.node_displacements();

    for voxel in mask.iter() {
        let query = if compose {
            field.vector(voxel)
        } else {
            field.geometry().rest_position(voxel)
        };

        let mut offset = SVector::<f64, D>::zeros();
        SiteStencil::at_world(lattice, &query, basis).for_each_node(lattice, |w| {
            if let Some(node) = w.node {
                offset += displacements[node] * w.value;
            }
        });

        field.set_vector(voxel, &(query + offset));
    }

    Ok(())
}
