//! Tuning configuration of the accelerated path.
//!
//! Group sizes are keyed by (kernel, capability tier) in a [`TuningTable`]
//! that is loaded once at startup. The default table is embedded from
//! `block_sizes.json` and can be replaced by a file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

const EMBEDDED_TUNING: &str = include_str!("block_sizes.json");

/// Every kernel of the accelerated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KernelId {
    #[serde(rename = "spline_deformation_field_2d")]
    SplineDeformationField2D,
    #[serde(rename = "spline_deformation_field_3d")]
    SplineDeformationField3D,
    #[serde(rename = "approx_second_derivatives")]
    ApproxSecondDerivatives,
    #[serde(rename = "approx_bending_energy")]
    ApproxBendingEnergy,
    #[serde(rename = "approx_bending_energy_gradient")]
    ApproxBendingEnergyGradient,
    #[serde(rename = "approx_jacobian_values_2d")]
    ApproxJacobianValues2D,
    #[serde(rename = "approx_jacobian_values_3d")]
    ApproxJacobianValues3D,
    #[serde(rename = "jacobian_values_2d")]
    JacobianValues2D,
    #[serde(rename = "jacobian_values_3d")]
    JacobianValues3D,
    #[serde(rename = "log_squared_values")]
    LogSquaredValues,
    #[serde(rename = "compute_approx_jac_gradient_2d")]
    ComputeApproxJacGradient2D,
    #[serde(rename = "compute_approx_jac_gradient_3d")]
    ComputeApproxJacGradient3D,
    #[serde(rename = "compute_jac_gradient_2d")]
    ComputeJacGradient2D,
    #[serde(rename = "compute_jac_gradient_3d")]
    ComputeJacGradient3D,
    #[serde(rename = "approx_correct_folding")]
    ApproxCorrectFolding,
    #[serde(rename = "correct_folding")]
    CorrectFolding,
    #[serde(rename = "def_field_compose_2d")]
    DefFieldCompose2D,
    #[serde(rename = "def_field_compose_3d")]
    DefFieldCompose3D,
    #[serde(rename = "update_control_point_position")]
    UpdateControlPointPosition,
    #[serde(rename = "convert_representation")]
    ConvertRepresentation,
    #[serde(rename = "multiply_value")]
    MultiplyValue,
}

impl KernelId {
    pub const ALL: [KernelId; 21] = [
        KernelId::SplineDeformationField2D,
        KernelId::SplineDeformationField3D,
        KernelId::ApproxSecondDerivatives,
        KernelId::ApproxBendingEnergy,
        KernelId::ApproxBendingEnergyGradient,
        KernelId::ApproxJacobianValues2D,
        KernelId::ApproxJacobianValues3D,
        KernelId::JacobianValues2D,
        KernelId::JacobianValues3D,
        KernelId::LogSquaredValues,
        KernelId::ComputeApproxJacGradient2D,
        KernelId::ComputeApproxJacGradient3D,
        KernelId::ComputeJacGradient2D,
        KernelId::ComputeJacGradient3D,
        KernelId::ApproxCorrectFolding,
        KernelId::CorrectFolding,
        KernelId::DefFieldCompose2D,
        KernelId::DefFieldCompose3D,
        KernelId::UpdateControlPointPosition,
        KernelId::ConvertRepresentation,
        KernelId::MultiplyValue,
    ];

    pub fn spline_deformation_field(dim: usize) -> Self {
        if dim == 2 {
            Self::SplineDeformationField2D
        } else {
            Self::SplineDeformationField3D
        }
    }

    pub fn def_field_compose(dim: usize) -> Self {
        if dim == 2 {
            Self::DefFieldCompose2D
        } else {
            Self::DefFieldCompose3D
        }
    }

    pub fn approx_jacobian_values(dim: usize) -> Self {
        if dim == 2 {
            Self::ApproxJacobianValues2D
        } else {
            Self::ApproxJacobianValues3D
        }
    }

    pub fn jacobian_values(dim: usize) -> Self {
        if dim == 2 {
            Self::JacobianValues2D
        } else {
            Self::JacobianValues3D
        }
    }

    pub fn compute_approx_jac_gradient(dim: usize) -> Self {
        if dim == 2 {
            Self::ComputeApproxJacGradient2D
        } else {
            Self::ComputeApproxJacGradient3D
        }
    }

    pub fn compute_jac_gradient(dim: usize) -> Self {
        if dim == 2 {
            Self::ComputeJacGradient2D
        } else {
            Self::ComputeJacGradient3D
        }
    }
}

/// Compute capability of a device, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn tier(&self) -> CapabilityTier {
        CapabilityTier::from_capability(*self)
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ComputeCapability {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidCapability(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// Capability tiers with distinct group-size tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTier {
    /// Below 1.2.
    Sm1x,
    /// 1.2 up to 2.0.
    Sm12,
    /// 2.0 and above.
    Sm20,
}

impl CapabilityTier {
    pub fn from_capability(capability: ComputeCapability) -> Self {
        if capability >= ComputeCapability::new(2, 0) {
            Self::Sm20
        } else if capability >= ComputeCapability::new(1, 2) {
            Self::Sm12
        } else {
            Self::Sm1x
        }
    }
}

/// Group size per kernel and capability tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuningTable {
    tiers: BTreeMap<CapabilityTier, BTreeMap<KernelId, usize>>,
}

impl TuningTable {
    /// Table shipped with the crate.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_json(EMBEDDED_TUNING)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading tuning table");
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Group sizes of one tier.
    pub fn tier(&self, tier: CapabilityTier) -> Result<&BTreeMap<KernelId, usize>, ConfigError> {
        self.tiers
            .get(&tier)
            .filter(|kernels| !kernels.is_empty())
            .ok_or(ConfigError::MissingTier(tier))
    }

    pub fn group_size(&self, tier: CapabilityTier, kernel: KernelId) -> Result<usize, ConfigError> {
        self.tier(tier)?
            .get(&kernel)
            .copied()
            .ok_or(ConfigError::MissingKernel { kernel, tier })
    }

    pub fn set_group_size(&mut self, tier: CapabilityTier, kernel: KernelId, group_size: usize) {
        self.tiers.entry(tier).or_default().insert(kernel, group_size);
    }

    pub fn remove_tier(&mut self, tier: CapabilityTier) {
        self.tiers.remove(&tier);
    }
}

/// Limits of the device a [`ComputeDevice`](crate::device::ComputeDevice) runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    pub compute_capability: ComputeCapability,
    /// Largest group size a launch may use.
    pub max_group_size: usize,
    /// Groups resident per wave of a dispatch.
    pub resident_groups: usize,
    /// Largest buffer, in `f32` elements.
    pub max_buffer_elements: usize,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>, compute_capability: ComputeCapability) -> Self {
        Self {
            name: name.into(),
            compute_capability,
            max_group_size: 1024,
            resident_groups: 32,
            max_buffer_elements: 1 << 30,
        }
    }

    pub fn with_resident_groups(mut self, resident_groups: usize) -> Self {
        self.resident_groups = resident_groups;
        self
    }

    pub fn with_max_buffer_elements(mut self, max_buffer_elements: usize) -> Self {
        self.max_buffer_elements = max_buffer_elements;
        self
    }

    pub fn tier(&self) -> CapabilityTier {
        self.compute_capability.tier()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_group_size == 0 || self.resident_groups == 0 || self.max_buffer_elements == 0 {
            return Err(ConfigError::InvalidProfile(format!(
                "'{}' needs non-zero group size, resident groups and buffer limit",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::new("host tensor device", ComputeCapability::new(2, 0))
    }
}

/// Configuration of the accelerated path, built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccelConfig {
    pub profile: DeviceProfile,
    pub tuning: TuningTable,
}

impl AccelConfig {
    pub fn new(profile: DeviceProfile, tuning: TuningTable) -> Self {
        Self { profile, tuning }
    }

    /// Default profile with the embedded tuning table.
    pub fn embedded() -> Result<Self, ConfigError> {
        Ok(Self::new(DeviceProfile::default(), TuningTable::embedded()?))
    }

    pub fn with_capability(mut self, capability: ComputeCapability) -> Self {
        self.profile.compute_capability = capability;
        self
    }

    pub fn with_tuning_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        self.tuning = TuningTable::from_path(path)?;
        Ok(self)
    }
}
