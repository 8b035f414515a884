//! Bending energy of cubic B-spline control-point grids.
//!
//! Bending energy penalizes second-order derivatives of the transform,
//! favouring deformations with minimal curvature:
//!
//! E = Σ_c [ ∂²u_c/∂x² ² + ∂²u_c/∂y² ² + 2 (∂²u_c/∂x∂y)² ]  (2D)
//!
//! E = Σ_c [ XX² + YY² + ZZ² + 2 (XY² + YZ² + XZ²) ]  (3D)
//!
//! The approximation evaluates the derivatives only at interior control
//! points, with the node-aligned cubic stencil, in lattice-index units, and
//! averages over those nodes. Since the Hessian is symmetric the per-node term
//! is the squared Frobenius norm of each component's Hessian.

use ffd_core::spline::NodeStencil;
use ffd_core::{ControlPointGrid, VectorField};
use nalgebra::{SMatrix, SVector};
use tracing::debug;

use super::trait_::{add_into, Regularizer};
use crate::error::Result;
use crate::validation::validate_gradient_lattice;

/// Per-component Hessians of the displacement at an interior node.
fn node_hessians<const D: usize>(
    grid: &ControlPointGrid<D>,
    displacements: &[SVector<f64, D>],
    node: &[usize; D],
) -> [SMatrix<f64, D, D>; D] {
    let mut hessians = [SMatrix::<f64, D, D>::zeros(); D];
    NodeStencil::at_node(node).for_each_node(grid.geometry(), |w| {
        if let Some(k) = w.node {
            for (c, hessian) in hessians.iter_mut().enumerate() {
                *hessian += w.second * displacements[k][c];
            }
        }
    });
    hessians
}

/// Approximate bending energy, averaged over interior control points.
pub fn approx_bending_energy<const D: usize>(grid: &ControlPointGrid<D>) -> f64 {
    let count = grid.interior_node_count();
    if count == 0 {
        return 0.0;
    }
    let displacements = grid.node_displacements();
    let total: f64 = grid
        .interior_nodes()
        .map(|node| {
            node_hessians(grid, &displacements, &node)
                .iter()
                .map(|h| h.norm_squared())
                .sum::<f64>()
        })
        .sum();

    let energy = total / count as f64;
    debug!(nodes = count, energy, "approximate bending energy");
    energy
}

/// Add `weight · ∂E/∂control point` into `gradient`.
pub fn approx_bending_energy_gradient<const D: usize>(
    grid: &ControlPointGrid<D>,
    gradient: &mut VectorField<D>,
    weight: f64,
) -> Result<()> {
    validate_gradient_lattice(grid, gradient)?;
    let count = grid.interior_node_count();
    if count == 0 {
        return Ok(());
    }

    let displacements = grid.node_displacements();
    let scale = 2.0 * weight / count as f64;
    let mut acc = vec![SVector::<f64, D>::zeros(); grid.node_count()];

    for node in grid.interior_nodes() {
        let hessians = node_hessians(grid, &displacements, &node);
        NodeStencil::at_node(&node).for_each_node(grid.geometry(), |w| {
            if let Some(k) = w.node {
                for (c, hessian) in hessians.iter().enumerate() {
                    acc[k][c] += scale * hessian.dot(&w.second);
                }
            }
        });
    }

    add_into(gradient, &acc);
    Ok(())
}

/// Bending energy regularizer for control-point grids.
///
/// # Example
///
/// ```rust,ignore
/// use ffd_registration::regularization::BendingEnergyRegularizer;
///
/// let reg = BendingEnergyRegularizer::new(0.1);
/// let energy = reg.penalty(&grid)?;
/// reg.add_gradient(&grid, &mut gradient)?;
/// ```
#[derive(Clone, Debug)]
pub struct BendingEnergyRegularizer {
    weight: f64,
}

impl BendingEnergyRegularizer {
    /// Create a new bending energy regularizer.
    pub fn new(weight: f64) -> Self {
        Self { weight }
    }
}

impl Default for BendingEnergyRegularizer {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl<const D: usize> Regularizer<D> for BendingEnergyRegularizer {
    fn penalty(&self, grid: &ControlPointGrid<D>) -> Result<f64> {
        Ok(approx_bending_energy(grid))
    }

    fn add_gradient(&self, grid: &ControlPointGrid<D>, gradient: &mut VectorField<D>) -> Result<()> {
        approx_bending_energy_gradient(grid, gradient, self.weight)
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}
