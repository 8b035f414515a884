//! Folding correction for control-point grids.
//!
//! Every folded site (`det J ≤ 0`) pushes its stencil nodes along the
//! direction that increases its determinant, `cof(J) · M^T · ∂w_k/∂ξ`. Each
//! node with a non-zero accumulated direction then moves by the unit
//! direction scaled by [`FOLDING_CORRECTION_STEP`] control-point spacings.

use ffd_core::spatial::matrix::{cofactor, determinant};
use ffd_core::spline::Stencil;
use ffd_core::{ControlPointGrid, FieldGeometry, Mask};
use nalgebra::SVector;
use tracing::{debug, warn};

use super::jacobian::{jacobian_determinants, scatter, site_jacobian, JacobianMode, JacobianSites};
use super::trait_::SiteVisitor;
use crate::error::{RegistrationError, Result};

/// Node displacement per correction pass, in control-point spacings.
pub const FOLDING_CORRECTION_STEP: f64 = 0.1;

/// Outcome of [`correct_folding_until_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldingReport {
    /// Correction passes that moved nodes.
    pub iterations: usize,
    /// Folded sites left after the last pass.
    pub folded_sites: usize,
}

struct FoldingAccumulator<'a, const D: usize> {
    lattice: &'a FieldGeometry<D>,
    displacements: Vec<SVector<f64, D>>,
    directions: Vec<SVector<f64, D>>,
    folded: usize,
}

impl<const D: usize> SiteVisitor<D> for FoldingAccumulator<'_, D> {
    fn visit<const K: usize>(&mut self, stencil: &Stencil<D, K>) {
        let jacobian = site_jacobian(stencil, self.lattice, &self.displacements);
        if determinant(&jacobian) > 0.0 {
            return;
        }
        self.folded += 1;
        let c = cofactor(&jacobian) * self.lattice.world_to_index_matrix().transpose();
        scatter(stencil, self.lattice, &c, &mut self.directions);
    }
}

/// Apply one correction pass and return the number of folded sites found.
///
/// The grid is left untouched when no site is folded.
pub fn correct_folding<const D: usize>(
    grid: &mut ControlPointGrid<D>,
    reference: &FieldGeometry<D>,
    mask: &Mask,
    mode: JacobianMode,
) -> Result<usize> {
    let lattice = grid.geometry().clone();
    let (folded, directions) = {
        let sites = JacobianSites::new(grid, reference, mask, mode)?;
        let mut acc = FoldingAccumulator {
            lattice: &lattice,
            displacements: grid.node_displacements(),
            directions: vec![SVector::zeros(); grid.node_count()],
            folded: 0,
        };
        sites.visit(&mut acc);
        (acc.folded, acc.directions)
    };
    if folded == 0 {
        return Ok(0);
    }

    let step = lattice.spacing().0 * FOLDING_CORRECTION_STEP;
    let mut moved = 0;
    for (node, direction) in directions.iter().enumerate() {
        let length = direction.norm();
        if length > 0.0 {
            let value = grid.lattice().vector(node) + (direction / length).component_mul(&step);
            grid.lattice_mut().set_vector(node, &value);
            moved += 1;
        }
    }
    debug!(?mode, folded, moved, "corrected folding");
    Ok(folded)
}

/// Repeat [`correct_folding`] until no site folds or `max_iterations` passes ran.
///
/// The reported folded-site count is measured on the grid left by the last pass.
pub fn correct_folding_until_valid<const D: usize>(
    grid: &mut ControlPointGrid<D>,
    reference: &FieldGeometry<D>,
    mask: &Mask,
    mode: JacobianMode,
    max_iterations: usize,
) -> Result<FoldingReport> {
    if max_iterations == 0 {
        return Err(RegistrationError::invalid_configuration(
            "folding correction needs at least one iteration",
        ));
    }
    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        if correct_folding(grid, reference, mask, mode)? == 0 {
            converged = true;
            break;
        }
        iterations += 1;
    }
    let folded = if converged {
        0
    } else {
        jacobian_determinants(grid, reference, mask, mode)?
            .into_iter()
            .filter(|&d| d <= 0.0)
            .count()
    };
    if folded > 0 {
        warn!(folded, iterations, "folding remains after correction");
    }
    Ok(FoldingReport {
        iterations,
        folded_sites: folded,
    })
}
