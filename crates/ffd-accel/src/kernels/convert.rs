//! Element-wise field kernels: representation conversion and scaling.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ffd_core::FieldGeometry;

use super::common::{cat_waves, rest_positions, unit_indices};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::DeviceError;

/// `data ± rest position` for every row of a field on `geometry`.
///
/// `sign = 1` turns displacements into deformations, `sign = -1` the reverse.
#[track_caller]
pub fn convert_representation<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    geometry: &FieldGeometry<D>,
    data: &Tensor<B, 2>,
    sign: f32,
) -> Result<Tensor<B, 2>, DeviceError> {
    let units = geometry.voxel_count();
    let mut parts = Vec::new();
    device.dispatch(KernelId::ConvertRepresentation, units, |range, _| {
        let rest = rest_positions(unit_indices(range.clone(), device.device()), geometry);
        let rows = data.clone().slice([range, 0..4]);
        parts.push(rows + rest.mul_scalar(sign));
    })?;
    Ok(cat_waves(parts).unwrap_or_else(|| data.clone()))
}

/// `data · factor` on every row.
#[track_caller]
pub fn multiply_value<B: Backend>(
    device: &ComputeDevice<B>,
    data: &Tensor<B, 2>,
    factor: f32,
) -> Result<Tensor<B, 2>, DeviceError> {
    let units = data.dims()[0];
    let mut parts = Vec::new();
    device.dispatch(KernelId::MultiplyValue, units, |range, _| {
        parts.push(data.clone().slice([range, 0..4]).mul_scalar(factor));
    })?;
    Ok(cat_waves(parts).unwrap_or_else(|| data.clone()))
}
