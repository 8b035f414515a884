//! Jacobian determinant penalty, its gradient and the per-site values on the device.
//!
//! Sites follow the host engine: interior control points with the node stencil
//! in approximate mode, masked voxels of the reference field with the full
//! cubic stencil in exact mode. Per-site matrices are carried as `[w]`
//! columns, one per entry.

use std::ops::Range;

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use ffd_core::{BasisKind, FieldGeometry};
use ffd_registration::{JacobianMode, PenaltyTerm};
use ffd_registration::regularization::FOLDED_SITE_PENALTY;
use nalgebra::SMatrix;
use tracing::debug;

use super::common::{cat_waves, gather, gather_weighted, rest_positions, scatter_add, unit_indices, SplineStencil};
use super::node::{interior_count, interior_nodes, NodeStencilTensors};
use crate::buffer::{DeviceField, DeviceGrid, DeviceMask};
use crate::config::KernelId;
use crate::device::{ComputeDevice, FaultCounter};
use crate::error::{DeviceError, Result};

/// Square matrix of `[w]` columns, `entries[row][col]`.
pub(crate) type Entries<B> = Vec<Vec<Tensor<B, 1>>>;

/// Jacobians of one wave of sites.
pub(crate) struct SiteJacobians<B: Backend> {
    /// Stencil nodes `[w, P]`.
    pub nodes: Tensor<B, 2, Int>,
    /// Derivative weights per axis, `[w, P]` or `[1, P]`.
    pub derivative_weights: Vec<Tensor<B, 2>>,
    pub jacobian: Entries<B>,
}

/// The sites of one Jacobian evaluation on the device.
pub(crate) struct DeviceSites<'a, B: Backend, const D: usize> {
    mode: JacobianMode,
    lattice: &'a FieldGeometry<D>,
    reference: &'a FieldGeometry<D>,
    mask: &'a DeviceMask<B>,
    displacements: Tensor<B, 2>,
    stencil: NodeStencilTensors<B>,
}

impl<'a, B: Backend, const D: usize> DeviceSites<'a, B, D> {
    #[track_caller]
    pub fn new(
        device: &ComputeDevice<B>,
        grid: &'a DeviceGrid<B, D>,
        reference: &'a FieldGeometry<D>,
        mask: &'a DeviceMask<B>,
        mode: JacobianMode,
    ) -> Result<Self> {
        if mode == JacobianMode::Exact {
            mask.ensure_voxel_count(reference.voxel_count())?;
        }
        Ok(Self {
            mode,
            lattice: grid.geometry(),
            reference,
            mask,
            displacements: grid.node_displacements(device)?,
            stencil: NodeStencilTensors::new(grid.geometry(), device.device()),
        })
    }

    pub fn count(&self) -> usize {
        match self.mode {
            JacobianMode::Approximate => interior_count(self.lattice),
            JacobianMode::Exact => self.mask.len(),
        }
    }

    pub fn lattice(&self) -> &FieldGeometry<D> {
        self.lattice
    }

    pub fn values_kernel(&self) -> KernelId {
        match self.mode {
            JacobianMode::Approximate => KernelId::approx_jacobian_values(D),
            JacobianMode::Exact => KernelId::jacobian_values(D),
        }
    }

    pub fn gradient_kernel(&self) -> KernelId {
        match self.mode {
            JacobianMode::Approximate => KernelId::compute_approx_jac_gradient(D),
            JacobianMode::Exact => KernelId::compute_jac_gradient(D),
        }
    }

    pub fn folding_kernel(&self) -> KernelId {
        match self.mode {
            JacobianMode::Approximate => KernelId::ApproxCorrectFolding,
            JacobianMode::Exact => KernelId::CorrectFolding,
        }
    }

    /// Jacobian matrices of the sites in `range`.
    pub fn batch(&self, range: Range<usize>, faults: &mut FaultCounter<B>) -> SiteJacobians<B> {
        let w = range.len();
        let (nodes, derivative_weights, gradient) = match self.mode {
            JacobianMode::Approximate => {
                let device = self.displacements.device();
                let centres = interior_nodes(unit_indices(range, &device), self.lattice);
                let nodes = self.stencil.nodes(centres);
                let p = self.stencil.node_count();
                let gathered = gather(&self.displacements, &nodes).swap_dims(1, 2).reshape([w * 4, p]);
                let gradient = gathered.matmul(self.stencil.first.clone()).reshape([w, 4, D]);
                let entries = (0..D)
                    .map(|c| {
                        (0..D)
                            .map(|b| gradient.clone().slice([0..w, c..c + 1, b..b + 1]).reshape([w]))
                            .collect()
                    })
                    .collect::<Entries<B>>();
                let weights = (0..D).map(|b| self.stencil.first_along(b)).collect();
                (nodes, weights, entries)
            }
            JacobianMode::Exact => {
                let voxels = faults.check_indices(self.mask.slice(range), self.reference.voxel_count());
                let positions = rest_positions(voxels, self.reference);
                let stencil = SplineStencil::at_world(&positions, self.lattice, BasisKind::CubicBSpline);
                let weights: Vec<Tensor<B, 2>> = (0..D).map(|b| stencil.first_derivative_weights(b)).collect();
                let columns: Vec<Tensor<B, 2>> = weights
                    .iter()
                    .map(|wb| gather_weighted(&self.displacements, &stencil.nodes, wb))
                    .collect();
                let entries = (0..D)
                    .map(|c| {
                        columns
                            .iter()
                            .map(|column| column.clone().slice([0..w, c..c + 1]).reshape([w]))
                            .collect()
                    })
                    .collect::<Entries<B>>();
                (stencil.nodes, weights, entries)
            }
        };

        SiteJacobians {
            nodes,
            derivative_weights,
            jacobian: compose_with_lattice(gradient, self.lattice.world_to_index_matrix()),
        }
    }
}

/// `J = I + G · M` from the index-space gradient `G`.
fn compose_with_lattice<B: Backend, const D: usize>(gradient: Entries<B>, m: &SMatrix<f64, D, D>) -> Entries<B> {
    (0..D)
        .map(|c| {
            (0..D)
                .map(|e| {
                    let mut value = gradient[c][0].clone().mul_scalar(m[(0, e)] as f32);
                    for b in 1..D {
                        value = value + gradient[c][b].clone().mul_scalar(m[(b, e)] as f32);
                    }
                    if c == e {
                        value.add_scalar(1.0)
                    } else {
                        value
                    }
                })
                .collect()
        })
        .collect()
}

pub(crate) fn determinant<B: Backend>(j: &Entries<B>) -> Tensor<B, 1> {
    let e = |r: usize, c: usize| j[r][c].clone();
    if j.len() == 2 {
        e(0, 0) * e(1, 1) - e(0, 1) * e(1, 0)
    } else {
        e(0, 0) * (e(1, 1) * e(2, 2) - e(1, 2) * e(2, 1)) - e(0, 1) * (e(1, 0) * e(2, 2) - e(1, 2) * e(2, 0))
            + e(0, 2) * (e(1, 0) * e(2, 1) - e(1, 1) * e(2, 0))
    }
}

pub(crate) fn cofactor<B: Backend>(j: &Entries<B>) -> Entries<B> {
    let e = |r: usize, c: usize| j[r][c].clone();
    if j.len() == 2 {
        vec![vec![e(1, 1), e(1, 0).neg()], vec![e(0, 1).neg(), e(0, 0)]]
    } else {
        (0..3)
            .map(|r| {
                (0..3)
                    .map(|c| {
                        let (r1, r2, c1, c2) = ((r + 1) % 3, (r + 2) % 3, (c + 1) % 3, (c + 2) % 3);
                        e(r1, c1) * e(r2, c2) - e(r1, c2) * e(r2, c1)
                    })
                    .collect()
            })
            .collect()
    }
}

/// `A · M^T` for per-site `A`.
pub(crate) fn times_lattice_transpose<B: Backend, const D: usize>(a: &Entries<B>, m: &SMatrix<f64, D, D>) -> Entries<B> {
    (0..D)
        .map(|c| {
            (0..D)
                .map(|b| {
                    let mut value = a[c][0].clone().mul_scalar(m[(b, 0)] as f32);
                    for e in 1..D {
                        value = value + a[c][e].clone().mul_scalar(m[(b, e)] as f32);
                    }
                    value
                })
                .collect()
        })
        .collect()
}

/// Per-node contributions `Σ_b h[c][b] · ω_b` as `[w, P, 4]`.
pub(crate) fn node_contributions<B: Backend>(h: &Entries<B>, derivative_weights: &[Tensor<B, 2>], nodes: &Tensor<B, 2, Int>) -> Tensor<B, 3> {
    let [w, p] = nodes.dims();
    let d = h.len();
    let mut parts: Vec<Tensor<B, 3>> = (0..d)
        .map(|c| {
            let mut value = h[c][0].clone().reshape([w, 1]) * derivative_weights[0].clone();
            for b in 1..d {
                value = value + h[c][b].clone().reshape([w, 1]) * derivative_weights[b].clone();
            }
            value.reshape([w, p, 1])
        })
        .collect();
    parts.push(Tensor::zeros([w, p, 4 - d], &nodes.device()));
    Tensor::cat(parts, 2)
}

/// `(valid, det)` with folded sites' determinant replaced by one.
pub(crate) fn split_folded<B: Backend>(det: Tensor<B, 1>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let valid = det.clone().greater_elem(0.0).float();
    let safe = det * valid.clone() - valid.clone().sub_scalar(1.0);
    (valid, safe)
}

fn site_determinants<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    sites: &DeviceSites<'_, B, D>,
) -> std::result::Result<Tensor<B, 1>, DeviceError> {
    let mut parts = Vec::new();
    device.dispatch(sites.values_kernel(), sites.count(), |range, faults| {
        parts.push(determinant(&sites.batch(range, faults).jacobian));
    })?;
    Ok(cat_waves(parts).unwrap_or_else(|| Tensor::zeros([0], device.device())))
}

/// Jacobian determinant of every site, in site order.
#[track_caller]
pub fn jacobian_determinants<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    reference: &FieldGeometry<D>,
    mask: &DeviceMask<B>,
    mode: JacobianMode,
) -> Result<Tensor<B, 1>> {
    let sites = DeviceSites::new(device, grid, reference, mask, mode)?;
    Ok(site_determinants(device, &sites)?)
}

/// Mean log-squared Jacobian determinant over the sites of `mode`.
#[track_caller]
pub fn jacobian_penalty<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    reference: &FieldGeometry<D>,
    mask: &DeviceMask<B>,
    mode: JacobianMode,
) -> Result<PenaltyTerm> {
    let sites = DeviceSites::new(device, grid, reference, mask, mode)?;
    let count = sites.count();
    let determinants = site_determinants(device, &sites)?;

    let mut totals = Vec::new();
    let mut folded = Vec::new();
    device.dispatch(KernelId::LogSquaredValues, count, |range, _| {
        let (valid, safe) = split_folded(determinants.clone().slice([range]));
        let invalid = valid.clone().neg().add_scalar(1.0);
        let log = safe.log();
        totals.push((log.clone() * log * valid + invalid.clone().mul_scalar(FOLDED_SITE_PENALTY as f32)).sum());
        folded.push(invalid.sum());
    })?;

    let total = device.sum_partials(totals)?;
    let folded_sites = device.sum_partials(folded)?.round() as usize;
    let value = if count == 0 { 0.0 } else { total / count as f64 };
    debug!(?mode, sites = count, folded = folded_sites, value, "jacobian penalty on device");
    Ok(PenaltyTerm {
        value,
        folded_sites,
        sites: count,
    })
}

/// Add `weight · ∂penalty/∂control point` into `gradient`. Folded sites do not contribute.
#[track_caller]
pub fn jacobian_penalty_gradient<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    grid: &DeviceGrid<B, D>,
    reference: &FieldGeometry<D>,
    mask: &DeviceMask<B>,
    gradient: &mut DeviceField<B, D>,
    weight: f64,
    mode: JacobianMode,
) -> Result<()> {
    grid.geometry().ensure_same_lattice(gradient.geometry())?;
    let sites = DeviceSites::new(device, grid, reference, mask, mode)?;
    let count = sites.count();
    if count == 0 {
        return Ok(());
    }
    let scale = weight / count as f64;
    let m = sites.lattice().world_to_index_matrix();

    let mut acc = Tensor::<B, 2>::zeros([grid.node_count(), 4], device.device());
    device.dispatch(sites.gradient_kernel(), count, |range, faults| {
        let batch = sites.batch(range, faults);
        let (valid, safe) = split_folded(determinant(&batch.jacobian));
        // 2 ln det · J^-T, zero on folded sites
        let coefficient = safe.clone().log().mul_scalar((2.0 * scale) as f32) * valid / safe;
        let inverse_transpose: Entries<B> = cofactor(&batch.jacobian)
            .into_iter()
            .map(|row| row.into_iter().map(|v| v * coefficient.clone()).collect())
            .collect();
        let h = times_lattice_transpose(&inverse_transpose, m);
        let contributions = node_contributions(&h, &batch.derivative_weights, &batch.nodes);
        acc = scatter_add(acc.clone(), &batch.nodes, contributions);
    })?;

    gradient.set_data(gradient.data().clone() + acc);
    Ok(())
}
