//! Voxel inclusion masks.

use crate::error::{FieldError, Result};

/// The voxels taking part in an evaluation, as linear indices.
///
/// Order does not matter. Indices are unique and within the lattice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    indices: Vec<usize>,
    voxel_count: usize,
}

impl Mask {
    /// Every voxel of a lattice with `voxel_count` sites.
    pub fn full(voxel_count: usize) -> Self {
        Self {
            indices: (0..voxel_count).collect(),
            voxel_count,
        }
    }

    /// Explicit list of voxels. Out-of-range and repeated indices are rejected.
    pub fn from_indices(indices: Vec<usize>, voxel_count: usize) -> Result<Self> {
        let mut seen = vec![false; voxel_count];
        for &index in &indices {
            if index >= voxel_count {
                return Err(FieldError::mask(format!(
                    "index {} outside a lattice of {} voxels",
                    index, voxel_count
                )));
            }
            if std::mem::replace(&mut seen[index], true) {
                return Err(FieldError::mask(format!("index {} listed twice", index)));
            }
        }
        Ok(Self {
            indices,
            voxel_count,
        })
    }

    /// Dense per-voxel mask: entry `v` is the voxel index when voxel `v`
    /// takes part and negative otherwise.
    pub fn from_dense(dense: &[i32]) -> Result<Self> {
        let indices = dense
            .iter()
            .filter(|&&v| v >= 0)
            .map(|&v| v as usize)
            .collect();
        Self::from_indices(indices, dense.len())
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of voxels in the lattice the mask refers to.
    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Fail unless the mask refers to a lattice of `voxel_count` sites.
    pub fn ensure_voxel_count(&self, voxel_count: usize) -> Result<()> {
        if self.voxel_count == voxel_count {
            Ok(())
        } else {
            Err(FieldError::mask(format!(
                "mask covers {} voxels, field has {}",
                self.voxel_count, voxel_count
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mask() {
        let mask = Mask::full(4);
        assert_eq!(mask.indices(), &[0, 1, 2, 3]);
        assert!(mask.ensure_voxel_count(4).is_ok());
        assert!(mask.ensure_voxel_count(5).is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_out_of_range() {
        assert!(Mask::from_indices(vec![0, 2, 2], 4).is_err());
        assert!(Mask::from_indices(vec![0, 4], 4).is_err());
        assert!(Mask::from_indices(vec![3, 0, 1], 4).is_ok());
    }

    #[test]
    fn test_from_dense_skips_negative_entries() {
        let mask = Mask::from_dense(&[0, -1, 2, -1]).unwrap();
        assert_eq!(mask.indices(), &[0, 2]);
        assert_eq!(mask.voxel_count(), 4);
    }
}
