//! Deformation-field composition kernel.

use burn::tensor::backend::Backend;
use ffd_core::Representation;
use tracing::debug;

use super::common::{cat_waves, gather_weighted, linear_stencil, overwrite_rows};
use crate::buffer::{DeviceField, DeviceMask};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::Result;

/// `inner[v] ← inner[v] + disp_outer(inner[v])` for every masked voxel.
///
/// `outer` is interpolated linearly; voxels outside `outer` contribute no
/// displacement.
#[track_caller]
pub fn compose_fields<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    outer: &DeviceField<B, D>,
    inner: &mut DeviceField<B, D>,
    mask: &DeviceMask<B>,
) -> Result<()> {
    inner.ensure_representation(Representation::Deformation)?;
    mask.ensure_voxel_count(inner.len())?;
    debug!(voxels = mask.len(), "composing deformation fields on device");

    let displacements = outer.displacements(device)?;
    let voxel_count = inner.len();
    let current = inner.data().clone();

    let mut voxels = Vec::new();
    let mut values = Vec::new();
    device.dispatch(KernelId::def_field_compose(D), mask.len(), |range, faults| {
        let rows = faults.check_indices(mask.slice(range), voxel_count);
        let positions = current.clone().select(0, rows.clone());
        let (nodes, weights) = linear_stencil(&positions, outer.geometry());
        values.push(positions + gather_weighted(&displacements, &nodes, &weights));
        voxels.push(rows);
    })?;

    if let (Some(rows), Some(values)) = (cat_waves(voxels), cat_waves(values)) {
        inner.set_data(overwrite_rows(current, rows, values));
    }
    Ok(())
}
