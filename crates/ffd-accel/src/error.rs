//! Error types of the accelerated execution path.

use std::fmt;
use std::panic::Location;

use ffd_core::FieldError;
use ffd_registration::RegistrationError;
use thiserror::Error;

use crate::config::{CapabilityTier, KernelId};

/// Grid and group geometry of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Units per group.
    pub group_size: usize,
    /// Groups needed to cover every unit.
    pub group_count: usize,
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid [{},1,1] block [{},1,1]", self.group_count, self.group_size)
    }
}

/// A fault raised by the device, a launch or a transfer.
///
/// Always fatal; see [`fail_fast`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("file '{file}' in line {line} : {message}.")]
pub struct DeviceError {
    pub file: &'static str,
    pub line: u32,
    pub message: String,
    pub launch: Option<LaunchConfig>,
}

impl DeviceError {
    /// Error attributed to the caller's source location.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::at(Location::caller(), message, None)
    }

    pub(crate) fn at(location: &'static Location<'static>, message: impl Into<String>, launch: Option<LaunchConfig>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            message: message.into(),
            launch,
        }
    }
}

/// Errors building the accelerated path configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no tuning entries for capability tier {0:?}")]
    MissingTier(CapabilityTier),

    #[error("no group size for kernel {kernel:?} on tier {tier:?}")]
    MissingKernel { kernel: KernelId, tier: CapabilityTier },

    #[error("invalid compute capability '{0}', expected <major>.<minor>")]
    InvalidCapability(String),

    #[error("invalid device profile: {0}")]
    InvalidProfile(String),

    #[error("failed to read tuning table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse tuning table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors of the accelerated path.
#[derive(Debug, Error)]
pub enum AccelError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Result type for accelerated path operations.
pub type Result<T> = std::result::Result<T, AccelError>;

/// Unwrap `result` or terminate the process with failure status.
///
/// Device faults are reported with their source location and launch geometry.
pub fn fail_fast<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(%err, "fatal accelerated path error");
            match &err {
                AccelError::Device(device) => {
                    eprintln!("[ffd device error] {}", device);
                    if let Some(launch) = device.launch {
                        eprintln!("[ffd device error] {}", launch);
                    }
                }
                other => eprintln!("[ffd error] {}", other),
            }
            std::process::exit(1)
        }
    }
}
