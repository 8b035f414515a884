//! Device mirrors of host fields, grids and masks.
//!
//! Mirrors are created by explicit uploads and read back by explicit
//! downloads; nothing is synchronised implicitly. Vector rows are stored as
//! `[n, 4]` float tensors whose fourth column is always zero.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use ffd_core::{ControlPointGrid, FieldError, FieldGeometry, Mask, Parametrization, Representation, VectorField};
use tracing::debug;

use crate::device::ComputeDevice;
use crate::error::{DeviceError, Result};
use crate::kernels::convert::{convert_representation, multiply_value};

/// Device mirror of a [`VectorField`].
#[derive(Debug, Clone)]
pub struct DeviceField<B: Backend, const D: usize> {
    geometry: FieldGeometry<D>,
    data: Tensor<B, 2>,
    representation: Representation,
}

impl<B: Backend, const D: usize> DeviceField<B, D> {
    #[track_caller]
    pub fn upload(device: &ComputeDevice<B>, field: &VectorField<D>) -> std::result::Result<Self, DeviceError> {
        let mut rows = Vec::with_capacity(field.len() * 4);
        for value in field.data() {
            rows.extend_from_slice(value);
            rows.extend(std::iter::repeat(0.0).take(4 - D));
        }
        debug!(voxels = field.len(), "uploading vector field");
        Ok(Self {
            geometry: field.geometry().clone(),
            data: device.upload_rows(rows)?,
            representation: field.representation(),
        })
    }

    /// Zero-filled field on `geometry`.
    #[track_caller]
    pub fn allocate(
        device: &ComputeDevice<B>,
        geometry: FieldGeometry<D>,
        representation: Representation,
    ) -> std::result::Result<Self, DeviceError> {
        let rows = geometry.voxel_count();
        device.check_allocation(rows * 4)?;
        Ok(Self {
            data: Tensor::zeros([rows, 4], device.device()),
            geometry,
            representation,
        })
    }

    /// Identity deformation field on `geometry`.
    #[track_caller]
    pub fn identity(device: &ComputeDevice<B>, geometry: FieldGeometry<D>) -> std::result::Result<Self, DeviceError> {
        let mut field = Self::allocate(device, geometry, Representation::Displacement)?;
        field.to_deformation(device)?;
        Ok(field)
    }

    #[track_caller]
    pub fn download(&self, device: &ComputeDevice<B>) -> Result<VectorField<D>> {
        let rows = device.download(self.data.clone())?;
        let data = rows
            .chunks_exact(4)
            .map(|row| std::array::from_fn(|c| row[c]))
            .collect();
        Ok(VectorField::new(self.geometry.clone(), data, self.representation)?)
    }

    pub fn geometry(&self) -> &FieldGeometry<D> {
        &self.geometry
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    pub fn len(&self) -> usize {
        self.geometry.voxel_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `[n, 4]` rows.
    pub fn data(&self) -> &Tensor<B, 2> {
        &self.data
    }

    pub(crate) fn set_data(&mut self, data: Tensor<B, 2>) {
        self.data = data;
    }

    pub fn ensure_representation(&self, expected: Representation) -> std::result::Result<(), FieldError> {
        if self.representation != expected {
            return Err(FieldError::Representation {
                expected,
                actual: self.representation,
            });
        }
        Ok(())
    }

    /// Rows as displacements, converting on the device when needed.
    #[track_caller]
    pub fn displacements(&self, device: &ComputeDevice<B>) -> std::result::Result<Tensor<B, 2>, DeviceError> {
        match self.representation {
            Representation::Displacement => Ok(self.data.clone()),
            Representation::Deformation => convert_representation(device, &self.geometry, &self.data, -1.0),
        }
    }

    #[track_caller]
    pub fn to_deformation(&mut self, device: &ComputeDevice<B>) -> std::result::Result<(), DeviceError> {
        if self.representation == Representation::Displacement {
            self.data = convert_representation(device, &self.geometry, &self.data, 1.0)?;
            self.representation = Representation::Deformation;
        }
        Ok(())
    }

    #[track_caller]
    pub fn to_displacement(&mut self, device: &ComputeDevice<B>) -> std::result::Result<(), DeviceError> {
        if self.representation == Representation::Deformation {
            self.data = convert_representation(device, &self.geometry, &self.data, -1.0)?;
            self.representation = Representation::Displacement;
        }
        Ok(())
    }

    /// Multiply every component by `factor`.
    #[track_caller]
    pub fn multiply_value(&mut self, device: &ComputeDevice<B>, factor: f32) -> std::result::Result<(), DeviceError> {
        self.data = multiply_value(device, &self.data, factor)?;
        Ok(())
    }

    /// Set every component to `value`; padding stays zero.
    pub fn fill(&mut self, value: f32) {
        let rows = self.len();
        let device = self.data.device();
        let components = Tensor::<B, 2>::full([rows, D], value, &device);
        self.data = if D < 4 {
            Tensor::cat(vec![components, Tensor::zeros([rows, 4 - D], &device)], 1)
        } else {
            components
        };
    }
}

/// Device mirror of a [`ControlPointGrid`].
#[derive(Debug, Clone)]
pub struct DeviceGrid<B: Backend, const D: usize> {
    lattice: DeviceField<B, D>,
    parametrization: Parametrization,
}

impl<B: Backend, const D: usize> DeviceGrid<B, D> {
    #[track_caller]
    pub fn upload(device: &ComputeDevice<B>, grid: &ControlPointGrid<D>) -> std::result::Result<Self, DeviceError> {
        Ok(Self {
            lattice: DeviceField::upload(device, grid.lattice())?,
            parametrization: grid.parametrization(),
        })
    }

    #[track_caller]
    pub fn download(&self, device: &ComputeDevice<B>) -> Result<ControlPointGrid<D>> {
        Ok(ControlPointGrid::new(self.lattice.download(device)?, self.parametrization))
    }

    pub fn lattice(&self) -> &DeviceField<B, D> {
        &self.lattice
    }

    pub fn lattice_mut(&mut self) -> &mut DeviceField<B, D> {
        &mut self.lattice
    }

    pub fn geometry(&self) -> &FieldGeometry<D> {
        self.lattice.geometry()
    }

    pub fn parametrization(&self) -> Parametrization {
        self.parametrization
    }

    pub fn set_parametrization(&mut self, parametrization: Parametrization) {
        self.parametrization = parametrization;
    }

    pub fn node_count(&self) -> usize {
        self.lattice.len()
    }

    /// Node offsets from the rest lattice, `[nodes, 4]`.
    #[track_caller]
    pub fn node_displacements(&self, device: &ComputeDevice<B>) -> std::result::Result<Tensor<B, 2>, DeviceError> {
        self.lattice.displacements(device)
    }
}

/// Device mirror of a [`Mask`].
#[derive(Debug, Clone)]
pub struct DeviceMask<B: Backend> {
    indices: Tensor<B, 1, Int>,
    len: usize,
    voxel_count: usize,
}

impl<B: Backend> DeviceMask<B> {
    #[track_caller]
    pub fn upload(device: &ComputeDevice<B>, mask: &Mask) -> std::result::Result<Self, DeviceError> {
        let indices = mask.iter().map(|i| i as i64).collect();
        Ok(Self {
            indices: device.upload_indices(indices)?,
            len: mask.len(),
            voxel_count: mask.voxel_count(),
        })
    }

    /// Every voxel of a field with `voxel_count` voxels.
    pub fn full(device: &ComputeDevice<B>, voxel_count: usize) -> Self {
        Self {
            indices: Tensor::arange(0..voxel_count as i64, device.device()),
            len: voxel_count,
            voxel_count,
        }
    }

    /// Indices of the voxels in `range` of the mask order.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Tensor<B, 1, Int> {
        self.indices.clone().slice([range])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    pub fn ensure_voxel_count(&self, voxel_count: usize) -> std::result::Result<(), FieldError> {
        if self.voxel_count != voxel_count {
            return Err(FieldError::mask(format!(
                "mask covers {} voxels, field has {}",
                self.voxel_count, voxel_count
            )));
        }
        Ok(())
    }
}
