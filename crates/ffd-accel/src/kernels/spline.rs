//! Spline deformation-field kernel.

use burn::tensor::backend::Backend;
use ffd_core::{BasisKind, Representation};
use tracing::debug;

use super::common::{cat_waves, gather_weighted, overwrite_rows, rest_positions, SplineStencil};
use super::compose::compose_fields;
use super::velocity::exponentiate_velocity;
use crate::buffer::{DeviceField, DeviceGrid, DeviceMask};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::Result;

/// Evaluate the transform of `grid` at every masked voxel of `field`.
///
/// Same contract as the host evaluation: `field` must hold deformations,
/// `compose` reads the query position from `field`, velocity grids are
/// exponentiated first and out-of-lattice nodes contribute nothing.
#[track_caller]
pub fn evaluate_deformation_field<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    field: &mut DeviceField<B, D>,
    mask: &DeviceMask<B>,
    compose: bool,
    basis: BasisKind,
) -> Result<()> {
    field.ensure_representation(Representation::Deformation)?;
    mask.ensure_voxel_count(field.len())?;

    if grid.parametrization().is_velocity() {
        let mut exponentiated = DeviceField::identity(device, field.geometry().clone())?;
        exponentiate_velocity(device, grid, &mut exponentiated)?;
        if compose {
            compose_fields(device, &exponentiated, field, mask)?;
        } else {
            copy_masked(device, &exponentiated, field, mask)?;
        }
        return Ok(());
    }

    let displacements = grid.node_displacements(device)?;
    evaluate_displacements(device, &displacements, grid.geometry(), field, mask, compose, basis)
}

/// Spline evaluation from node displacements already on the device.
#[track_caller]
pub(crate) fn evaluate_displacements<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    displacements: &burn::tensor::Tensor<B, 2>,
    lattice: &ffd_core::FieldGeometry<D>,
    field: &mut DeviceField<B, D>,
    mask: &DeviceMask<B>,
    compose: bool,
    basis: BasisKind,
) -> Result<()> {
    debug!(voxels = mask.len(), compose, ?basis, "evaluating spline deformation field on device");
    let voxel_count = field.len();
    let geometry = field.geometry().clone();
    let current = field.data().clone();

    let mut voxels = Vec::new();
    let mut values = Vec::new();
    device.dispatch(KernelId::spline_deformation_field(D), mask.len(), |range, faults| {
        let rows = faults.check_indices(mask.slice(range), voxel_count);
        let query = if compose {
            current.clone().select(0, rows.clone())
        } else {
            rest_positions(rows.clone(), &geometry)
        };
        let stencil = SplineStencil::at_world(&query, lattice, basis);
        values.push(query + gather_weighted(displacements, &stencil.nodes, &stencil.weights));
        voxels.push(rows);
    })?;

    if let (Some(rows), Some(values)) = (cat_waves(voxels), cat_waves(values)) {
        field.set_data(overwrite_rows(current, rows, values));
    }
    Ok(())
}

/// Copy the masked rows of `source` into `target`.
#[track_caller]
fn copy_masked<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    source: &DeviceField<B, D>,
    target: &mut DeviceField<B, D>,
    mask: &DeviceMask<B>,
) -> Result<()> {
    let voxel_count = target.len();
    let mut voxels = Vec::new();
    let mut values = Vec::new();
    device.dispatch(KernelId::spline_deformation_field(D), mask.len(), |range, faults| {
        let rows = faults.check_indices(mask.slice(range), voxel_count);
        values.push(source.data().clone().select(0, rows.clone()));
        voxels.push(rows);
    })?;
    if let (Some(rows), Some(values)) = (cat_waves(voxels), cat_waves(values)) {
        target.set_data(overwrite_rows(target.data().clone(), rows, values));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccelConfig;
    use burn_ndarray::NdArray;
    use ffd_core::{ControlPointGrid, FieldGeometry, Mask, Spacing, VectorField};

    type Backend = NdArray<f32>;

    fn device() -> ComputeDevice<Backend> {
        ComputeDevice::select(Default::default(), &AccelConfig::embedded().unwrap()).unwrap()
    }

    fn wavy_grid(geometry: &FieldGeometry<2>) -> ControlPointGrid<2> {
        let mut grid = ControlPointGrid::for_field(geometry, Spacing::uniform(3.0)).unwrap();
        grid.to_displacement();
        for (i, value) in grid.lattice_mut().data_mut().iter_mut().enumerate() {
            *value = [(i as f32 * 0.7).sin(), (i as f32 * 0.3).cos()];
        }
        grid.to_deformation();
        grid
    }

    #[test]
    fn test_matches_host_for_both_bases() {
        let device = device();
        let geometry = FieldGeometry::<2>::axis_aligned([11, 9], 1.0).unwrap();
        let grid = wavy_grid(&geometry);
        let mask = Mask::full(geometry.voxel_count());

        for basis in [BasisKind::CubicBSpline, BasisKind::Linear] {
            let mut host = VectorField::identity(geometry.clone());
            ffd_core::evaluate_deformation_field(&grid, &mut host, &mask, false, basis).unwrap();

            let mut field = DeviceField::upload(&device, &VectorField::identity(geometry.clone())).unwrap();
            let mirror = DeviceGrid::upload(&device, &grid).unwrap();
            let dmask = DeviceMask::upload(&device, &mask).unwrap();
            evaluate_deformation_field(&device, &mirror, &mut field, &dmask, false, basis).unwrap();

            let result = field.download(&device).unwrap();
            for (a, b) in result.data().iter().zip(host.data()) {
                assert!((a[0] - b[0]).abs() < 1e-4 && (a[1] - b[1]).abs() < 1e-4, "{:?}: {:?} vs {:?}", basis, a, b);
            }
        }
    }

    #[test]
    fn test_unmasked_voxels_untouched() {
        let device = device();
        let geometry = FieldGeometry::<2>::axis_aligned([8, 8], 1.0).unwrap();
        let grid = wavy_grid(&geometry);
        let mut host = VectorField::identity(geometry.clone());
        host.data_mut()[5] = [-3.0, -3.0];
        let mask = Mask::from_indices(vec![9, 1, 40], geometry.voxel_count()).unwrap();

        let mut field = DeviceField::upload(&device, &host).unwrap();
        let mirror = DeviceGrid::upload(&device, &grid).unwrap();
        let dmask = DeviceMask::upload(&device, &mask).unwrap();
        evaluate_deformation_field(&device, &mirror, &mut field, &dmask, true, BasisKind::CubicBSpline).unwrap();
        let result = field.download(&device).unwrap();

        assert_eq!(result.data()[5], [-3.0, -3.0]);
        assert_eq!(result.data()[0], host.data()[0]);
        assert_ne!(result.data()[9], host.data()[9]);
    }

    #[test]
    fn test_rejects_displacement_output() {
        let device = device();
        let geometry = FieldGeometry::<2>::axis_aligned([8, 8], 1.0).unwrap();
        let grid = DeviceGrid::upload(&device, &wavy_grid(&geometry)).unwrap();
        let mut field = DeviceField::allocate(&device, geometry, Representation::Displacement).unwrap();
        let mask = DeviceMask::full(&device, field.len());
        assert!(evaluate_deformation_field(&device, &grid, &mut field, &mask, false, BasisKind::CubicBSpline).is_err());
    }
}
