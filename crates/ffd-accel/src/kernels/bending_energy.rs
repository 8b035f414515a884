//! Approximate bending energy and its gradient on the device.
//!
//! `ApproxSecondDerivatives` computes the per-component Hessian pairs at every
//! interior node as one `[nodes · 4, Q]` buffer; the energy and gradient
//! kernels then read it back by node range.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use tracing::debug;

use super::common::{cat_waves, gather, scatter_add, unit_indices};
use super::node::{interior_count, interior_nodes, NodeStencilTensors};
use crate::buffer::{DeviceField, DeviceGrid};
use crate::config::KernelId;
use crate::device::ComputeDevice;
use crate::error::Result;

struct SecondDerivatives<B: Backend> {
    stencil: NodeStencilTensors<B>,
    /// Hessian pairs `[sites · 4, Q]`, rows `site · 4 + component`.
    values: Option<Tensor<B, 2>>,
    sites: usize,
}

#[track_caller]
fn second_derivatives<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
) -> Result<SecondDerivatives<B>> {
    let lattice = grid.geometry();
    let stencil = NodeStencilTensors::new(lattice, device.device());
    let displacements = grid.node_displacements(device)?;
    let sites = interior_count(lattice);

    let mut parts = Vec::new();
    device.dispatch(KernelId::ApproxSecondDerivatives, sites, |range, _| {
        let w = range.len();
        let nodes = stencil.nodes(interior_nodes(unit_indices(range, device.device()), lattice));
        let p = stencil.node_count();
        let gathered = gather(&displacements, &nodes).swap_dims(1, 2).reshape([w * 4, p]);
        parts.push(gathered.matmul(stencil.second.clone()));
    })?;

    Ok(SecondDerivatives {
        stencil,
        values: cat_waves(parts),
        sites,
    })
}

/// Approximate bending energy, averaged over interior control points.
#[track_caller]
pub fn approx_bending_energy<B: Backend, const D: usize>(device: &ComputeDevice<B>, grid: &DeviceGrid<B, D>) -> Result<f64> {
    let second = second_derivatives(device, grid)?;
    let Some(values) = second.values else {
        return Ok(0.0);
    };
    let q = values.dims()[1];

    let mut partials = Vec::new();
    device.dispatch(KernelId::ApproxBendingEnergy, second.sites, |range, _| {
        let rows = values.clone().slice([range.start * 4..range.end * 4, 0..q]);
        partials.push((rows.powf_scalar(2.0) * second.stencil.pair_factors.clone()).sum());
    })?;

    let energy = device.sum_partials(partials)? / second.sites as f64;
    debug!(nodes = second.sites, energy, "approximate bending energy on device");
    Ok(energy)
}

/// Add `weight · ∂E/∂control point` into `gradient`.
#[track_caller]
pub fn approx_bending_energy_gradient<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    gradient: &mut DeviceField<B, D>,
    weight: f64,
) -> Result<()> {
    grid.geometry().ensure_same_lattice(gradient.geometry())?;
    let second = second_derivatives(device, grid)?;
    let Some(values) = second.values else {
        return Ok(());
    };
    let q = values.dims()[1];
    let p = second.stencil.node_count();
    let scale = (2.0 * weight / second.sites as f64) as f32;
    let lattice = grid.geometry();
    let second_transposed = second.stencil.second.clone().transpose();

    let mut acc = Tensor::<B, 2>::zeros([grid.node_count(), 4], device.device());
    device.dispatch(KernelId::ApproxBendingEnergyGradient, second.sites, |range, _| {
        let w = range.len();
        let rows = values.clone().slice([range.start * 4..range.end * 4, 0..q]);
        let weighted = (rows * second.stencil.pair_factors.clone()).matmul(second_transposed.clone());
        let contributions = weighted.reshape([w, 4, p]).swap_dims(1, 2).mul_scalar(scale);
        let nodes = second.stencil.nodes(interior_nodes(unit_indices(range, device.device()), lattice));
        acc = scatter_add(acc.clone(), &nodes, contributions);
    })?;

    gradient.set_data(gradient.data().clone() + acc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccelConfig;
    use burn_ndarray::NdArray;
    use ffd_core::{ControlPointGrid, FieldGeometry, Representation, Spacing, VectorField};

    type Backend = NdArray<f32>;

    fn setup() -> (ComputeDevice<Backend>, ControlPointGrid<3>) {
        let device = ComputeDevice::select(Default::default(), &AccelConfig::embedded().unwrap()).unwrap();
        let geometry = FieldGeometry::<3>::axis_aligned([10, 9, 8], 1.0).unwrap();
        let mut grid = ControlPointGrid::for_field(&geometry, Spacing::uniform(3.0)).unwrap();
        grid.to_displacement();
        for (i, value) in grid.lattice_mut().data_mut().iter_mut().enumerate() {
            let t = i as f32;
            *value = [(t * 0.31).sin(), (t * 0.17).cos(), (t * 0.53).sin()];
        }
        grid.to_deformation();
        (device, grid)
    }

    #[test]
    fn test_energy_matches_host() {
        let (device, grid) = setup();
        let host = ffd_registration::approx_bending_energy(&grid);
        let mirror = DeviceGrid::upload(&device, &grid).unwrap();
        let value = approx_bending_energy(&device, &mirror).unwrap();
        assert!(((value - host) / host).abs() < 5e-4, "{} vs {}", value, host);
    }

    #[test]
    fn test_gradient_matches_host() {
        let (device, grid) = setup();
        let weight = grid.node_count() as f64;

        let mut host = VectorField::zeros(grid.geometry().clone(), Representation::Displacement);
        ffd_registration::approx_bending_energy_gradient(&grid, &mut host, weight).unwrap();

        let mirror = DeviceGrid::upload(&device, &grid).unwrap();
        let mut gradient =
            DeviceField::allocate(&device, grid.geometry().clone(), Representation::Displacement).unwrap();
        approx_bending_energy_gradient(&device, &mirror, &mut gradient, weight).unwrap();
        let result = gradient.download(&device).unwrap();

        for (a, b) in result.data().iter().zip(host.data()) {
            for c in 0..3 {
                assert!(2.0 * (a[c] - b[c]).abs() < 5e-4 * (1.0 + b[c].abs()), "{:?} vs {:?}", a, b);
            }
        }
    }
}
