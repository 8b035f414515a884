//! Composition of deformation fields.

use nalgebra::SVector;
use tracing::debug;

use crate::error::Result;
use crate::field::{FieldGeometry, Mask, Representation, VectorField};

/// Compose `outer` after `inner`, in place: `inner[v] ← inner[v] + disp_outer(inner[v])`.
///
/// `inner` must be a deformation field. The displacement of `outer` is
/// resampled with bilinear/trilinear interpolation; voxels outside `outer`
/// contribute no displacement. Only masked voxels of `inner` change.
pub fn compose_fields<const D: usize>(
    outer: &VectorField<D>,
    inner: &mut VectorField<D>,
    mask: &Mask,
) -> Result<()> {
    inner.ensure_representation(Representation::Deformation)?;
    mask.ensure_voxel_count(inner.len())?;
    debug!(voxels = mask.len(), "composing deformation fields");

    for voxel in mask.iter() {
        let position = inner.vector(voxel);
        let offset = interpolate_displacement(outer, &position);
        inner.set_vector(voxel, &(position + offset));
    }
    Ok(())
}

/// Linear interpolation of a field's displacement at a physical position.
pub fn interpolate_displacement<const D: usize>(
    field: &VectorField<D>,
    position: &SVector<f64, D>,
) -> SVector<f64, D> {
    let geometry: &FieldGeometry<D> = field.geometry();
    let index = geometry.world_to_index(position);
    let base: [isize; D] = std::array::from_fn(|axis| index[axis].floor() as isize);
    let frac: [f64; D] = std::array::from_fn(|axis| index[axis] - index[axis].floor());
    corner_sum(field, &base, &frac)
}

/// Linear interpolation of a displacement field at voxel `voxel` shifted by
/// its own stored displacement.
///
/// The sample index is split into the integer voxel index plus a small
/// shift, so the fractional weights do not depend on the magnitude of the
/// world coordinates.
pub fn interpolate_displaced<const D: usize>(field: &VectorField<D>, voxel: usize) -> SVector<f64, D> {
    let geometry = field.geometry();
    let index = geometry.lattice_index(voxel);
    let shift = geometry.world_to_index_matrix() * field.displacement(voxel);
    let base: [isize; D] = std::array::from_fn(|axis| index[axis] as isize + shift[axis].floor() as isize);
    let frac: [f64; D] = std::array::from_fn(|axis| shift[axis] - shift[axis].floor());
    corner_sum(field, &base, &frac)
}

fn corner_sum<const D: usize>(field: &VectorField<D>, base: &[isize; D], frac: &[f64; D]) -> SVector<f64, D> {
    let geometry = field.geometry();
    let mut offset = SVector::<f64, D>::zeros();
    for corner in 0..(1usize << D) {
        let mut weight = 1.0;
        let site: [isize; D] = std::array::from_fn(|axis| {
            let upper = (corner >> axis) & 1 == 1;
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
            base[axis] + upper as isize
        });
        if let Some(linear) = geometry.checked_linear_index(&site) {
            offset += field.displacement(linear) * weight;
        }
    }
    offset
}
