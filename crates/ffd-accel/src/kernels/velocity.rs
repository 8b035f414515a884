//! Scaling-and-squaring on the device.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ffd_core::{BasisKind, FieldGeometry, Representation};
use tracing::debug;

use super::common::{cat_waves, displaced_linear_stencil, gather_weighted, rest_positions, unit_indices, SplineStencil};
use super::compose::compose_fields;
use super::convert::multiply_value;
use crate::buffer::{DeviceField, DeviceGrid, DeviceMask};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::Result;

/// Integrate the velocity grid into the deformation field `field`.
///
/// Squaring runs on displacements; the rest positions are added once at the end.
#[track_caller]
pub fn exponentiate_velocity<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    field: &mut DeviceField<B, D>,
) -> Result<()> {
    let steps = grid.parametrization().squaring_steps()?;
    field.ensure_representation(Representation::Deformation)?;
    debug!(steps, voxels = field.len(), "exponentiating velocity grid on device");

    let velocity = grid.node_displacements(device)?;
    let step = multiply_value(device, &velocity, 0.5f32.powi(steps as i32))?;
    let geometry = field.geometry().clone();
    let mut displacement = step_displacements(device, &step, grid.geometry(), &geometry)?;
    for _ in 0..steps {
        displacement = square_displacements(device, displacement, &geometry)?;
    }

    let mut result = DeviceField::allocate(device, geometry, Representation::Displacement)?;
    result.set_data(displacement);
    result.to_deformation(device)?;
    *field = result;
    Ok(())
}

/// Compose the deformation field `field` with itself `times` times.
#[track_caller]
pub fn square<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    field: &mut DeviceField<B, D>,
    times: u32,
    mask: &DeviceMask<B>,
) -> Result<()> {
    for _ in 0..times {
        let snapshot = field.clone();
        compose_fields(device, &snapshot, field, mask)?;
    }
    Ok(())
}

/// Cubic spline displacement of every voxel of `geometry` from node values `nodes`.
#[track_caller]
fn step_displacements<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    nodes: &Tensor<B, 2>,
    lattice: &FieldGeometry<D>,
    geometry: &FieldGeometry<D>,
) -> Result<Tensor<B, 2>> {
    let units = geometry.voxel_count();
    let mut parts = Vec::new();
    device.dispatch(KernelId::spline_deformation_field(D), units, |range, _| {
        let query = rest_positions(unit_indices(range, device.device()), geometry);
        let stencil = SplineStencil::at_world(&query, lattice, BasisKind::CubicBSpline);
        parts.push(gather_weighted(nodes, &stencil.nodes, &stencil.weights));
    })?;
    Ok(cat_waves(parts).unwrap_or_else(|| Tensor::zeros([0, 4], device.device())))
}

/// One self-composition of a displacement field: `d[v] ← d[v] + d(v + d[v])`.
#[track_caller]
fn square_displacements<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    displacement: Tensor<B, 2>,
    geometry: &FieldGeometry<D>,
) -> Result<Tensor<B, 2>> {
    let units = geometry.voxel_count();
    let mut parts = Vec::new();
    device.dispatch(KernelId::def_field_compose(D), units, |range, _| {
        let voxels = unit_indices(range.clone(), device.device());
        let own = displacement.clone().slice([range, 0..4]);
        let (nodes, weights) = displaced_linear_stencil(voxels, &own, geometry);
        parts.push(own + gather_weighted(&displacement, &nodes, &weights));
    })?;
    Ok(cat_waves(parts).unwrap_or(displacement))
}
