//! Scaling-and-squaring exponentiation of stationary velocity grids.

use nalgebra::SVector;
use tracing::debug;

use crate::error::Result;
use crate::field::{ControlPointGrid, Mask, Representation, VectorField};
use crate::spline::{BasisKind, SiteStencil};

use super::compose::{compose_fields, interpolate_displaced};

/// Integrate the velocity grid into the deformation field `field`.
///
/// The grid displacement is scaled by `2^-n` (n = squaring steps), evaluated
/// on `field`'s lattice and then self-composed `n` times. The squaring runs on
/// displacements so every step keeps the precision of the offsets rather than
/// that of the absolute positions; the field is turned into deformations once
/// at the end.
pub fn exponentiate_velocity<const D: usize>(
    grid: &ControlPointGrid<D>,
    field: &mut VectorField<D>,
) -> Result<()> {
    let steps = grid.squaring_steps()?;
    field.ensure_representation(Representation::Deformation)?;
    debug!(steps, voxels = field.len(), "exponentiating velocity grid");

    let scale = 0.5f64.powi(steps as i32);
    let velocity: Vec<SVector<f64, D>> = grid.node_displacements().into_iter().map(|v| v * scale).collect();
    let lattice = grid.geometry();

    let mut displacement = VectorField::zeros(field.geometry().clone(), Representation::Displacement);
    for voxel in 0..displacement.len() {
        let query = displacement.geometry().rest_position(voxel);
        let mut offset = SVector::<f64, D>::zeros();
        SiteStencil::at_world(lattice, &query, BasisKind::CubicBSpline).for_each_node(lattice, |w| {
            if let Some(node) = w.node {
                offset += velocity[node] * w.value;
            }
        });
        displacement.set_vector(voxel, &offset);
    }

    square_displacements(&mut displacement, steps);
    displacement.to_deformation();
    field.data_mut().copy_from_slice(displacement.data());
    Ok(())
}

/// Compose a deformation field with itself `times` times.
pub fn square<const D: usize>(field: &mut VectorField<D>, times: u32, mask: &Mask) -> Result<()> {
    for _ in 0..times {
        let snapshot = field.clone();
        compose_fields(&snapshot, field, mask)?;
    }
    Ok(())
}

/// [`square`] over every voxel of a displacement field.
fn square_displacements<const D: usize>(field: &mut VectorField<D>, times: u32) {
    for _ in 0..times {
        let snapshot = field.clone();
        for voxel in 0..field.len() {
            let offset = snapshot.vector(voxel) + interpolate_displaced(&snapshot, voxel);
            field.set_vector(voxel, &offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldGeometry, Representation};
    use crate::spatial::Spacing;

    #[test]
    fn test_constant_velocity_gives_translation() {
        let geometry = FieldGeometry::<2>::axis_aligned([16, 16], 1.0).unwrap();
        let mut grid = ControlPointGrid::for_field(&geometry, Spacing::uniform(4.0)).unwrap();
        grid.to_displacement();
        grid.lattice_mut().fill(0.5);
        let grid = grid.into_velocity(4);

        let mut field = VectorField::identity(geometry);
        exponentiate_velocity(&grid, &mut field).unwrap();

        let centre = field.geometry().linear_index(&[8, 8]);
        let d = field.displacement(centre);
        assert!((d[0] - 0.5).abs() < 1e-4, "Translation mismatch: got {}, expected 0.5", d[0]);
        assert!((d[1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_squaring_keeps_offset_precision_far_from_origin() {
        // positions near 300 round to 3e-5 in f32; the offsets are far finer
        let geometry = FieldGeometry::<2>::axis_aligned([320, 8], 1.0).unwrap();
        let mut grid = ControlPointGrid::for_field(&geometry, Spacing::uniform(5.0)).unwrap();
        grid.to_displacement();
        grid.lattice_mut().fill(0.3);
        let grid = grid.into_velocity(6);

        let mut field = VectorField::identity(geometry);
        exponentiate_velocity(&grid, &mut field).unwrap();

        let far = field.geometry().linear_index(&[300, 4]);
        let d = field.displacement(far);
        assert!((d[0] - 0.3).abs() < 1e-4, "Translation mismatch: got {}, expected 0.3", d[0]);
    }

    #[test]
    fn test_rejects_non_velocity_grid() {
        let geometry = FieldGeometry::<2>::axis_aligned([8, 8], 1.0).unwrap();
        let grid = ControlPointGrid::for_field(&geometry, Spacing::uniform(4.0)).unwrap();
        let mut field = VectorField::identity(geometry);
        assert!(exponentiate_velocity(&grid, &mut field).is_err());
        assert_eq!(field.representation(), Representation::Deformation);
    }
}
