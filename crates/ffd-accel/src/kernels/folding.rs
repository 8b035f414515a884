//! Folding correction on the device.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ffd_core::FieldGeometry;
use ffd_registration::regularization::FOLDING_CORRECTION_STEP;
use ffd_registration::JacobianMode;
use tracing::debug;

use super::common::{cat_waves, scatter_add};
use super::jacobian::{cofactor, determinant, node_contributions, split_folded, times_lattice_transpose, DeviceSites};
use crate::buffer::{DeviceGrid, DeviceMask};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::Result;

/// Apply one correction pass and return the number of folded sites found.
///
/// Every folded site pushes its nodes along `cof(J) · M^T · ω_k`; each node
/// with a non-zero direction then moves by the unit direction scaled by
/// [`FOLDING_CORRECTION_STEP`] control-point spacings.
#[track_caller]
pub fn correct_folding<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &mut DeviceGrid<B, D>,
    reference: &FieldGeometry<D>,
    mask: &DeviceMask<B>,
    mode: JacobianMode,
) -> Result<usize> {
    let (folded, directions) = {
        let sites = DeviceSites::new(device, grid, reference, mask, mode)?;
        let m = sites.lattice().world_to_index_matrix();
        let mut counts = Vec::new();
        let mut directions = Tensor::<B, 2>::zeros([grid.node_count(), 4], device.device());
        device.dispatch(sites.folding_kernel(), sites.count(), |range, faults| {
            let batch = sites.batch(range, faults);
            let (valid, _) = split_folded(determinant(&batch.jacobian));
            let folded = valid.neg().add_scalar(1.0);
            let pushed: Vec<Vec<Tensor<B, 1>>> = cofactor(&batch.jacobian)
                .into_iter()
                .map(|row| row.into_iter().map(|v| v * folded.clone()).collect())
                .collect();
            let contributions = node_contributions(&times_lattice_transpose(&pushed, m), &batch.derivative_weights, &batch.nodes);
            directions = scatter_add(directions.clone(), &batch.nodes, contributions);
            counts.push(folded.sum());
        })?;
        (device.sum_partials(counts)?.round() as usize, directions)
    };
    if folded == 0 {
        return Ok(0);
    }

    let spacing = grid.geometry().spacing();
    let step: Vec<f32> = (0..4)
        .map(|c| if c < D { (spacing[c] * FOLDING_CORRECTION_STEP) as f32 } else { 0.0 })
        .collect();
    let step = Tensor::<B, 2>::from_data(TensorData::new(step, [1, 4]), device.device());
    let coefficients = grid.lattice().data().clone();

    let mut parts = Vec::new();
    device.dispatch(KernelId::UpdateControlPointPosition, grid.node_count(), |range, _| {
        let direction = directions.clone().slice([range.clone(), 0..4]);
        let length = direction.clone().powf_scalar(2.0).sum_dim(1).sqrt();
        let moved = length.clone().greater_elem(0.0).float();
        let unit = direction / length.clamp_min(f32::MIN_POSITIVE);
        parts.push(coefficients.clone().slice([range, 0..4]) + unit * moved * step.clone());
    })?;
    if let Some(updated) = cat_waves(parts) {
        grid.lattice_mut().set_data(updated);
    }
    debug!(?mode, folded, "corrected folding on device");
    Ok(folded)
}
