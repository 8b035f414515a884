//! Parity harness between the reference and accelerated paths.
//!
//! A [`SyntheticCase`] is built from a [`HarnessConfig`]: a full-size field,
//! a control-point grid covering it with seeded random displacements and a
//! full mask. [`run_parity`] evaluates one [`ParityKind`] on both paths and
//! reports the difference: `max 2·|a - b|` for fields and gradients, the
//! relative difference for scalars.

use std::fmt;
use std::str::FromStr;

use burn::tensor::backend::Backend;
use clap::ValueEnum;
use ffd_accel::kernels;
use ffd_accel::{AccelError, ComputeDevice, DeviceError, DeviceField, DeviceGrid, DeviceMask};
use ffd_core::{BasisKind, ControlPointGrid, FieldError, FieldGeometry, Mask, Representation, Spacing, VectorField};
use ffd_registration::{max_field_difference, relative_difference, JacobianMode, RegistrationError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

/// Quantity compared between the two paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ParityKind {
    /// Deformation field from spline coefficients.
    Def,
    /// Deformation field composition.
    Comp,
    /// Velocity grid exponentiation.
    Exp,
    /// Approximate bending energy value.
    Be,
    /// Approximate bending energy gradient.
    Beg,
    /// Approximate Jacobian penalty value.
    Ajac,
    /// Exact Jacobian penalty value.
    Jac,
    /// Approximate Jacobian penalty gradient.
    Ajacg,
    /// Exact Jacobian penalty gradient.
    Jacg,
}

impl ParityKind {
    pub const ALL: [ParityKind; 9] = [
        ParityKind::Def,
        ParityKind::Comp,
        ParityKind::Exp,
        ParityKind::Be,
        ParityKind::Beg,
        ParityKind::Ajac,
        ParityKind::Jac,
        ParityKind::Ajacg,
        ParityKind::Jacg,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParityKind::Def => "def",
            ParityKind::Comp => "comp",
            ParityKind::Exp => "exp",
            ParityKind::Be => "be",
            ParityKind::Beg => "beg",
            ParityKind::Ajac => "ajac",
            ParityKind::Jac => "jac",
            ParityKind::Ajacg => "ajacg",
            ParityKind::Jacg => "jacg",
        }
    }

    /// Name of the compared quantity in failure messages.
    pub fn quantity(self) -> &'static str {
        match self {
            ParityKind::Def => "Deformation field",
            ParityKind::Comp => "Deformation field composition",
            ParityKind::Exp => "Velocity field exponentiation",
            ParityKind::Be => "Bending energy value",
            ParityKind::Beg => "Bending energy gradient",
            ParityKind::Ajac => "Approx. Jacobian based penalty term value",
            ParityKind::Jac => "Jacobian based penalty term value",
            ParityKind::Ajacg => "Approx. Jacobian based penalty term gradient",
            ParityKind::Jacg => "Jacobian based penalty term gradient",
        }
    }

    /// Jacobian mode of the penalty kinds.
    pub fn jacobian_mode(self) -> Option<JacobianMode> {
        match self {
            ParityKind::Ajac | ParityKind::Ajacg => Some(JacobianMode::Approximate),
            ParityKind::Jac | ParityKind::Jacg => Some(JacobianMode::Exact),
            _ => None,
        }
    }
}

impl fmt::Display for ParityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParityKind {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParityKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ParityError::UnknownKind(s.to_string()))
    }
}

/// Errors that stop a comparison before a difference is available.
#[derive(Error, Debug)]
pub enum ParityError {
    #[error("unsupported dimension {0} (expected 2 or 3)")]
    UnsupportedDimension(usize),

    #[error("unknown test type '{0}'")]
    UnknownKind(String),

    #[error("invalid harness configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Accel(#[from] AccelError),
}

impl From<DeviceError> for ParityError {
    fn from(err: DeviceError) -> Self {
        Self::Accel(err.into())
    }
}

/// Settings of one harness run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Voxels along every axis of the synthetic field.
    pub size: usize,
    /// Control-point spacing in voxels.
    pub spacing: f64,
    pub seed: u64,
    /// Largest accepted difference.
    pub tolerance: f64,
    /// Squaring steps of the `exp` comparison.
    pub squaring_steps: u32,
    /// Half-width of the random displacement range, in control-point spacings.
    pub amplitude: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            size: 128,
            spacing: 5.0,
            seed: 0,
            tolerance: 5e-4,
            squaring_steps: 6,
            amplitude: 0.5,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<(), ParityError> {
        if self.size == 0 {
            return Err(ParityError::InvalidConfig("field size must be positive".into()));
        }
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(ParityError::InvalidConfig(format!("invalid spacing {}", self.spacing)));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ParityError::InvalidConfig(format!("invalid tolerance {}", self.tolerance)));
        }
        if self.squaring_steps == 0 {
            return Err(ParityError::InvalidConfig("squaring steps must be at least one".into()));
        }
        if !(self.amplitude.is_finite() && self.amplitude >= 0.0) {
            return Err(ParityError::InvalidConfig(format!("invalid amplitude {}", self.amplitude)));
        }
        Ok(())
    }
}

/// Inputs shared by both paths.
#[derive(Debug, Clone)]
pub struct SyntheticCase<const D: usize> {
    pub reference: FieldGeometry<D>,
    /// Deformation-representation grid covering `reference`.
    pub grid: ControlPointGrid<D>,
    pub mask: Mask,
}

impl<const D: usize> SyntheticCase<D> {
    pub fn generate(config: &HarnessConfig) -> Result<Self, ParityError> {
        config.validate()?;
        let reference = FieldGeometry::axis_aligned([config.size; D], 1.0)?;
        let mut grid = ControlPointGrid::for_field(&reference, Spacing::uniform(config.spacing))?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let width = (2.0 * config.amplitude * config.spacing) as f32;
        grid.to_displacement();
        for value in grid.lattice_mut().data_mut() {
            for component in value.iter_mut() {
                *component = width * (rng.random::<f32>() - 0.5);
            }
        }
        grid.to_deformation();
        let mask = Mask::full(reference.voxel_count());
        debug!(dim = D, nodes = grid.node_count(), voxels = mask.len(), "generated synthetic case");
        Ok(Self { reference, grid, mask })
    }

    /// Reference-path deformation field of the grid.
    pub fn deformation_field(&self) -> Result<VectorField<D>, ParityError> {
        let mut field = VectorField::identity(self.reference.clone());
        ffd_core::evaluate_deformation_field(&self.grid, &mut field, &self.mask, false, BasisKind::CubicBSpline)?;
        Ok(field)
    }
}

/// Outcome of one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ParityReport {
    pub dim: usize,
    pub kind: ParityKind,
    pub difference: f64,
    pub tolerance: f64,
    /// Host and device values of scalar kinds.
    pub values: Option<(f64, f64)>,
    /// Host and device folded-site counts of the penalty kinds.
    pub folded_sites: Option<(usize, usize)>,
}

impl ParityReport {
    pub fn passed(&self) -> bool {
        let folded_mismatch = matches!(self.folded_sites, Some((host, device)) if host != device);
        !folded_mismatch && self.difference <= self.tolerance
    }

    /// Message naming the failing quantity, `None` when the comparison passed.
    pub fn failure(&self) -> Option<String> {
        if let Some((host, device)) = self.folded_sites {
            if host != device {
                return Some(format!(
                    "[dim={}] {} folded site count differs: {} vs {}",
                    self.dim,
                    self.kind.quantity(),
                    host,
                    device
                ));
            }
        }
        if self.difference <= self.tolerance {
            return None;
        }
        Some(format!(
            "[dim={}] {} difference too high: {}",
            self.dim,
            self.kind.quantity(),
            self.difference
        ))
    }
}

/// Evaluate `kind` on both paths for a `dim`-dimensional synthetic case.
pub fn run_parity<B: Backend>(
    device: &ComputeDevice<B>,
    dim: usize,
    kind: ParityKind,
    config: &HarnessConfig,
) -> Result<ParityReport, ParityError> {
    config.validate()?;
    info!(dim, %kind, size = config.size, spacing = config.spacing, "running parity comparison");
    let report = match dim {
        2 => compare::<B, 2>(device, kind, config)?,
        3 => compare::<B, 3>(device, kind, config)?,
        other => return Err(ParityError::UnsupportedDimension(other)),
    };
    info!(dim, %kind, difference = report.difference, passed = report.passed(), "parity comparison done");
    Ok(report)
}

fn compare<B: Backend, const D: usize>(
    device: &ComputeDevice<B>,
    kind: ParityKind,
    config: &HarnessConfig,
) -> Result<ParityReport, ParityError> {
    let case = SyntheticCase::<D>::generate(config)?;
    let mask = DeviceMask::upload(device, &case.mask)?;
    let grid = DeviceGrid::upload(device, &case.grid)?;
    let weight = case.grid.node_count() as f64;

    let mut report = ParityReport {
        dim: D,
        kind,
        difference: 0.0,
        tolerance: config.tolerance,
        values: None,
        folded_sites: None,
    };

    match kind {
        ParityKind::Def => {
            let host = case.deformation_field()?;
            let mut field = DeviceField::identity(device, case.reference.clone())?;
            kernels::evaluate_deformation_field(device, &grid, &mut field, &mask, false, BasisKind::CubicBSpline)?;
            report.difference = max_field_difference(&host, &field.download(device)?)?;
        }
        ParityKind::Comp => {
            let mut host = case.deformation_field()?;
            let outer = host.clone();
            let device_outer = DeviceField::upload(device, &outer)?;
            let mut field = DeviceField::upload(device, &host)?;
            ffd_core::compose_fields(&outer, &mut host, &case.mask)?;
            kernels::compose_fields(device, &device_outer, &mut field, &mask)?;
            report.difference = max_field_difference(&host, &field.download(device)?)?;
        }
        ParityKind::Exp => {
            let velocity = case.grid.clone().into_velocity(config.squaring_steps);
            let mut host = VectorField::identity(case.reference.clone());
            ffd_core::exponentiate_velocity(&velocity, &mut host)?;
            let velocity_grid = DeviceGrid::upload(device, &velocity)?;
            let mut field = DeviceField::identity(device, case.reference.clone())?;
            kernels::exponentiate_velocity(device, &velocity_grid, &mut field)?;
            report.difference = max_field_difference(&host, &field.download(device)?)?;
        }
        ParityKind::Be => {
            let host = ffd_registration::approx_bending_energy(&case.grid);
            let value = kernels::approx_bending_energy(device, &grid)?;
            report.values = Some((host, value));
            report.difference = relative_difference(host, value);
        }
        ParityKind::Beg => {
            let mut host = VectorField::zeros(case.grid.geometry().clone(), Representation::Displacement);
            ffd_registration::approx_bending_energy_gradient(&case.grid, &mut host, weight)?;
            let mut gradient = DeviceField::allocate(device, case.grid.geometry().clone(), Representation::Displacement)?;
            kernels::approx_bending_energy_gradient(device, &grid, &mut gradient, weight)?;
            report.difference = max_field_difference(&host, &gradient.download(device)?)?;
        }
        ParityKind::Ajac | ParityKind::Jac => {
            let mode = penalty_mode(kind);
            let host = ffd_registration::jacobian_penalty(&case.grid, &case.reference, &case.mask, mode)?;
            let term = kernels::jacobian_penalty(device, &grid, &case.reference, &mask, mode)?;
            report.values = Some((host.value, term.value));
            report.folded_sites = Some((host.folded_sites, term.folded_sites));
            report.difference = relative_difference(host.value, term.value);
        }
        ParityKind::Ajacg | ParityKind::Jacg => {
            let mode = penalty_mode(kind);
            let mut host = VectorField::zeros(case.grid.geometry().clone(), Representation::Displacement);
            ffd_registration::jacobian_penalty_gradient(&case.grid, &case.reference, &case.mask, &mut host, weight, mode)?;
            let mut gradient = DeviceField::allocate(device, case.grid.geometry().clone(), Representation::Displacement)?;
            kernels::jacobian_penalty_gradient(device, &grid, &case.reference, &mask, &mut gradient, weight, mode)?;
            report.difference = max_field_difference(&host, &gradient.download(device)?)?;
        }
    }
    Ok(report)
}

fn penalty_mode(kind: ParityKind) -> JacobianMode {
    kind.jacobian_mode().unwrap_or(JacobianMode::Exact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ParityKind::ALL {
            assert_eq!(kind.name().parse::<ParityKind>().unwrap(), kind);
        }
        assert!(matches!("bend".parse::<ParityKind>(), Err(ParityError::UnknownKind(_))));
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.size, 128);
        assert_eq!(config.spacing, 5.0);
        assert_eq!(config.seed, 0);
        assert_eq!(config.tolerance, 5e-4);
        assert_eq!(config.squaring_steps, 6);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = HarnessConfig {
            squaring_steps: 0,
            ..HarnessConfig::default()
        };
        assert!(matches!(config.validate(), Err(ParityError::InvalidConfig(_))));
    }

    #[test]
    fn test_synthetic_case_is_seeded() {
        let config = HarnessConfig {
            size: 12,
            ..HarnessConfig::default()
        };
        let a = SyntheticCase::<2>::generate(&config).unwrap();
        let b = SyntheticCase::<2>::generate(&config).unwrap();
        assert_eq!(a.grid, b.grid);
        assert_eq!(a.grid.representation(), Representation::Deformation);

        let mut displacements = a.grid.clone();
        displacements.to_displacement();
        let bound = (config.amplitude * config.spacing) as f32 + 1e-4;
        assert!(displacements.lattice().data().iter().flatten().all(|v| v.abs() <= bound));

        let other = SyntheticCase::<2>::generate(&HarnessConfig { seed: 1, ..config }).unwrap();
        assert_ne!(a.grid, other.grid);
    }

    #[test]
    fn test_failure_message() {
        let report = ParityReport {
            dim: 3,
            kind: ParityKind::Def,
            difference: 0.01,
            tolerance: 5e-4,
            values: None,
            folded_sites: None,
        };
        assert!(!report.passed());
        assert_eq!(report.failure().unwrap(), "[dim=3] Deformation field difference too high: 0.01");

        let folded = ParityReport {
            kind: ParityKind::Jac,
            difference: 0.0,
            folded_sites: Some((2, 3)),
            ..report
        };
        assert!(!folded.passed());
        assert!(folded.failure().unwrap().contains("folded site count"));
    }

    #[test]
    fn test_nan_difference_fails() {
        let report = ParityReport {
            dim: 2,
            kind: ParityKind::Be,
            difference: f64::NAN,
            tolerance: 5e-4,
            values: Some((1.0, f64::NAN)),
            folded_sites: None,
        };
        assert!(!report.passed());
        assert!(report.failure().is_some());
    }
}
