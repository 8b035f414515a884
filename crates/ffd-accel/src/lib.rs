//! Accelerated execution path of the free-form deformation engine.
//!
//! Every host operation has a device counterpart built from burn tensor
//! kernels: spline evaluation, composition, velocity exponentiation, bending
//! energy, Jacobian penalties and folding correction. Kernels run on a
//! [`ComputeDevice`] whose group sizes come from a [`TuningTable`] keyed by
//! capability tier; device faults surface as [`DeviceError`] and are made
//! fatal by [`fail_fast`].

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod kernels;

pub use buffer::{DeviceField, DeviceGrid, DeviceMask};
pub use config::{AccelConfig, CapabilityTier, ComputeCapability, DeviceProfile, KernelId, TuningTable};
pub use device::{ComputeDevice, FaultCounter};
pub use error::{fail_fast, AccelError, ConfigError, DeviceError, LaunchConfig, Result};
