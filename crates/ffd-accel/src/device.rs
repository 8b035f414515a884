//! Device selection and kernel dispatch.
//!
//! A [`ComputeDevice`] pairs a burn device with the group sizes of its
//! capability tier. Kernels are dispatched as a number of independent units
//! that run in waves of `group_size · resident_groups`; each dispatch ends with
//! a synchronising read of its fault counter.

use std::collections::BTreeMap;
use std::ops::Range;
use std::panic::Location;

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use tracing::{debug, info};

use crate::config::{AccelConfig, CapabilityTier, DeviceProfile, KernelId};
use crate::error::{ConfigError, DeviceError, LaunchConfig};

/// Device-side count of faulting units in one dispatch.
///
/// Units that would address memory outside a buffer are counted and then
/// redirected to a valid row, the analogue of an illegal-address fault.
#[derive(Debug)]
pub struct FaultCounter<B: Backend> {
    count: Tensor<B, 1, Int>,
}

impl<B: Backend> FaultCounter<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            count: Tensor::zeros([1], device),
        }
    }

    /// Count indices outside `0..bound` and return them clamped into range.
    pub fn check_indices(&mut self, indices: Tensor<B, 1, Int>, bound: usize) -> Tensor<B, 1, Int> {
        let bound = bound as i64;
        let below = indices.clone().lower_elem(0).int().sum();
        let above = indices.clone().greater_equal_elem(bound).int().sum();
        self.count = self.count.clone() + below + above;
        indices.clamp(0, (bound - 1).max(0))
    }

    fn read(self) -> i64 {
        self.count.into_scalar().elem::<i64>()
    }
}

/// A selected compute device with the tuning of its capability tier.
#[derive(Debug, Clone)]
pub struct ComputeDevice<B: Backend> {
    device: B::Device,
    profile: DeviceProfile,
    tier: CapabilityTier,
    group_sizes: BTreeMap<KernelId, usize>,
}

impl<B: Backend> ComputeDevice<B> {
    /// Reserve `device` under `config`.
    ///
    /// Fails when the profile is invalid or the tuning table lacks an entry
    /// for any kernel of the profile's tier.
    pub fn select(device: B::Device, config: &AccelConfig) -> Result<Self, ConfigError> {
        config.profile.validate()?;
        let tier = config.profile.tier();
        let group_sizes = config.tuning.tier(tier)?.clone();
        if let Some(kernel) = KernelId::ALL.iter().find(|k| !group_sizes.contains_key(k)) {
            return Err(ConfigError::MissingKernel { kernel: *kernel, tier });
        }

        info!(
            device = %config.profile.name,
            capability = %config.profile.compute_capability,
            ?tier,
            "selected compute device"
        );
        Ok(Self {
            device,
            profile: config.profile.clone(),
            tier,
            group_sizes,
        })
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    pub fn group_size(&self, kernel: KernelId) -> Option<usize> {
        self.group_sizes.get(&kernel).copied()
    }

    /// Launch geometry covering `units` units of `kernel`.
    #[track_caller]
    pub fn launch_config(&self, kernel: KernelId, units: usize) -> Result<LaunchConfig, DeviceError> {
        self.launch_config_at(Location::caller(), kernel, units)
    }

    fn launch_config_at(
        &self,
        location: &'static Location<'static>,
        kernel: KernelId,
        units: usize,
    ) -> Result<LaunchConfig, DeviceError> {
        let group_size = self.group_size(kernel).unwrap_or(0);
        let launch = LaunchConfig {
            group_size,
            group_count: if group_size == 0 { 0 } else { units.div_ceil(group_size) },
        };
        if group_size == 0 || group_size > self.profile.max_group_size {
            return Err(DeviceError::at(
                location,
                format!("invalid configuration argument for {:?}", kernel),
                Some(launch),
            ));
        }
        Ok(launch)
    }

    /// Run `units` units of `kernel` in waves.
    ///
    /// `wave` receives the unit range of each wave and the dispatch's fault
    /// counter. Any fault recorded by a wave fails the whole dispatch.
    #[track_caller]
    pub fn dispatch<F>(&self, kernel: KernelId, units: usize, mut wave: F) -> Result<LaunchConfig, DeviceError>
    where
        F: FnMut(Range<usize>, &mut FaultCounter<B>),
    {
        let location = Location::caller();
        let launch = self.launch_config_at(location, kernel, units)?;
        let width = launch.group_size * self.profile.resident_groups;

        let mut faults = FaultCounter::new(&self.device);
        let mut waves = 0;
        let mut start = 0;
        while start < units {
            let end = (start + width).min(units);
            wave(start..end, &mut faults);
            waves += 1;
            start = end;
        }

        debug!(
            ?kernel,
            units,
            group_size = launch.group_size,
            group_count = launch.group_count,
            waves,
            "dispatched kernel"
        );

        let faulted = faults.read();
        if faulted > 0 {
            return Err(DeviceError::at(
                location,
                format!("illegal address in {:?}: {} units out of range", kernel, faulted),
                Some(launch),
            ));
        }
        Ok(launch)
    }

    /// Fail when a buffer of `elements` floats exceeds the device limit.
    #[track_caller]
    pub fn check_allocation(&self, elements: usize) -> Result<(), DeviceError> {
        if elements > self.profile.max_buffer_elements {
            return Err(DeviceError::new(format!(
                "out of memory: {} elements requested, {} available",
                elements, self.profile.max_buffer_elements
            )));
        }
        Ok(())
    }

    /// Copy host rows into a new `[rows, 4]` device buffer.
    #[track_caller]
    pub fn upload_rows(&self, values: Vec<f32>) -> Result<Tensor<B, 2>, DeviceError> {
        self.check_allocation(values.len())?;
        if values.len() % 4 != 0 {
            return Err(DeviceError::new(format!(
                "failed transfer: {} values do not form rows of 4",
                values.len()
            )));
        }
        let rows = values.len() / 4;
        Ok(Tensor::from_data(TensorData::new(values, [rows, 4]), &self.device))
    }

    /// Copy host indices into a new device index buffer.
    #[track_caller]
    pub fn upload_indices(&self, values: Vec<i64>) -> Result<Tensor<B, 1, Int>, DeviceError> {
        self.check_allocation(values.len())?;
        let len = values.len();
        Ok(Tensor::from_data(TensorData::new(values, [len]), &self.device))
    }

    /// Copy a device buffer back to the host.
    #[track_caller]
    pub fn download<const R: usize>(&self, tensor: Tensor<B, R>) -> Result<Vec<f32>, DeviceError> {
        let location = Location::caller();
        tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| DeviceError::at(location, format!("failed transfer: {:?}", err), None))
    }

    /// Add per-wave partial sums on the host.
    #[track_caller]
    pub fn sum_partials(&self, partials: Vec<Tensor<B, 1>>) -> Result<f64, DeviceError> {
        if partials.is_empty() {
            return Ok(0.0);
        }
        let values = self.download(Tensor::cat(partials, 0))?;
        Ok(values.iter().map(|&v| f64::from(v)).sum())
    }
}
