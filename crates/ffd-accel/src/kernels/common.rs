//! Tensor building blocks shared by the kernels.
//!
//! Per-unit data lives in `[w, 4]` float rows (padding column zero) or in
//! `[w]` columns; stencils are `[w, K^D]` weight and node-index tensors with
//! x as the fastest axis.

use std::ops::Range;

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use ffd_core::spline::basis::basis_tensor;
use ffd_core::{BasisKind, FieldGeometry};

/// Unit indices of a wave.
pub fn unit_indices<B: Backend>(range: Range<usize>, device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::arange(range.start as i64..range.end as i64, device)
}

/// Split linear lattice indices into per-axis coordinates.
pub fn decode_linear<B: Backend, const D: usize>(linear: Tensor<B, 1, Int>, shape: &[usize; D]) -> Vec<Tensor<B, 1, Int>> {
    let mut coords = Vec::with_capacity(D);
    let mut rest = linear;
    for &n in shape.iter() {
        let n = n as i64;
        let next = rest.clone().div_scalar(n);
        coords.push(rest - next.clone().mul_scalar(n));
        rest = next;
    }
    coords
}

/// Split `[w, 4]` rows into their first `D` columns.
pub fn columns<B: Backend, const D: usize>(rows: &Tensor<B, 2>) -> Vec<Tensor<B, 1>> {
    let w = rows.dims()[0];
    (0..D).map(|c| rows.clone().slice([0..w, c..c + 1]).reshape([w])).collect()
}

/// Assemble `[w]` columns into `[w, 4]` rows with zero padding.
pub fn pad_columns<B: Backend>(cols: Vec<Tensor<B, 1>>) -> Tensor<B, 2> {
    let w = cols[0].dims()[0];
    let device = cols[0].device();
    let padding = 4 - cols.len();
    let mut parts: Vec<Tensor<B, 2>> = cols.into_iter().map(|c| c.reshape([w, 1])).collect();
    if padding > 0 {
        parts.push(Tensor::zeros([w, padding], &device));
    }
    Tensor::cat(parts, 1)
}

/// World positions of lattice coordinates, as `[w, 4]` rows.
pub fn index_to_world<B: Backend, const D: usize>(coords: &[Tensor<B, 1>], geometry: &FieldGeometry<D>) -> Tensor<B, 2> {
    let matrix = geometry.index_to_world_matrix();
    let origin = geometry.origin();
    let cols = (0..D)
        .map(|e| {
            let mut value = coords[0].clone().mul_scalar(matrix[(e, 0)] as f32);
            for (a, coord) in coords.iter().enumerate().skip(1) {
                value = value + coord.clone().mul_scalar(matrix[(e, a)] as f32);
            }
            value.add_scalar(origin[e] as f32)
        })
        .collect();
    pad_columns(cols)
}

/// Rest positions of the given linear voxel indices, as `[w, 4]` rows.
pub fn rest_positions<B: Backend, const D: usize>(linear: Tensor<B, 1, Int>, geometry: &FieldGeometry<D>) -> Tensor<B, 2> {
    let coords: Vec<Tensor<B, 1>> = decode_linear(linear, &geometry.shape())
        .into_iter()
        .map(|c| c.float())
        .collect();
    index_to_world(&coords, geometry)
}

/// Continuous lattice coordinates of world positions, one `[w]` column per axis.
pub fn world_to_index<B: Backend, const D: usize>(positions: &Tensor<B, 2>, geometry: &FieldGeometry<D>) -> Vec<Tensor<B, 1>> {
    let matrix = geometry.world_to_index_matrix();
    let origin = geometry.origin();
    let centred: Vec<Tensor<B, 1>> = columns::<B, D>(positions)
        .into_iter()
        .enumerate()
        .map(|(e, c)| c.sub_scalar(origin[e] as f32))
        .collect();
    (0..D)
        .map(|a| {
            let mut value = centred[0].clone().mul_scalar(matrix[(a, 0)] as f32);
            for (e, c) in centred.iter().enumerate().skip(1) {
                value = value + c.clone().mul_scalar(matrix[(a, e)] as f32);
            }
            value
        })
        .collect()
}

/// Per-axis stencil nodes of a wave.
pub struct AxisNodes<B: Backend> {
    /// Node index along the axis, clamped into the lattice, `[w, K]`.
    pub index: Tensor<B, 2, Int>,
    /// 1 for nodes inside the lattice, 0 outside, `[w, K]`.
    pub valid: Tensor<B, 2>,
}

impl<B: Backend> AxisNodes<B> {
    /// Nodes `base + 0..K` along an axis with `n` nodes.
    pub fn new(base: Tensor<B, 1, Int>, k: usize, n: usize) -> Self {
        let w = base.dims()[0];
        let offsets = Tensor::<B, 1, Int>::arange(0..k as i64, &base.device()).reshape([1, k]);
        let index = base.reshape([w, 1]) + offsets;
        let n = n as i64;
        let valid = index.clone().greater_equal_elem(0).float() * index.clone().lower_elem(n).float();
        Self {
            index: index.clamp(0, n - 1),
            valid,
        }
    }
}

/// Outer product of per-axis `[w, K]` weights into `[w, K^D]`, x fastest.
pub fn outer_weights<B: Backend>(axes: &[Tensor<B, 2>]) -> Tensor<B, 2> {
    let [w, k] = axes[0].dims();
    let mut combined = axes[0].clone();
    let mut width = k;
    for axis in &axes[1..] {
        combined = (combined.reshape([w, 1, width]) * axis.clone().reshape([w, k, 1])).reshape([w, k * width]);
        width *= k;
    }
    combined
}

/// Linear lattice indices `[w, K^D]` of the per-axis stencil nodes, x fastest.
pub fn outer_indices<B: Backend, const D: usize>(axes: &[AxisNodes<B>], shape: &[usize; D]) -> Tensor<B, 2, Int> {
    let [w, k] = axes[0].index.dims();
    let mut combined = axes[0].index.clone();
    let mut width = k;
    let mut stride = 1i64;
    for (axis, nodes) in axes.iter().enumerate().skip(1) {
        stride *= shape[axis - 1] as i64;
        let along = nodes.index.clone().mul_scalar(stride).reshape([w, k, 1]);
        combined = (combined.reshape([w, 1, width]) + along).reshape([w, k * width]);
        width *= k;
    }
    combined
}

/// Spline stencil of a wave of world positions on `lattice`.
pub struct SplineStencil<B: Backend> {
    /// Node indices `[w, 4^D]`.
    pub nodes: Tensor<B, 2, Int>,
    /// Basis weights of valid nodes `[w, 4^D]`.
    pub weights: Tensor<B, 2>,
    axes: Vec<AxisNodes<B>>,
    fractions: Vec<Tensor<B, 1>>,
}

impl<B: Backend> SplineStencil<B> {
    pub fn at_world<const D: usize>(positions: &Tensor<B, 2>, lattice: &FieldGeometry<D>, kind: BasisKind) -> Self {
        let mut axes = Vec::with_capacity(D);
        let mut fractions = Vec::with_capacity(D);
        for (a, xi) in world_to_index(positions, lattice).into_iter().enumerate() {
            let floor = xi.clone().floor();
            let base = floor.clone().int().sub_scalar(1);
            fractions.push(xi - floor);
            axes.push(AxisNodes::new(base, 4, lattice.shape()[a]));
        }
        let weights: Vec<Tensor<B, 2>> = fractions
            .iter()
            .zip(&axes)
            .map(|(u, nodes)| basis_tensor(kind, u.clone()) * nodes.valid.clone())
            .collect();
        Self {
            nodes: outer_indices(&axes, &lattice.shape()),
            weights: outer_weights(&weights),
            axes,
            fractions,
        }
    }

    /// Cubic first-derivative weights along `axis` `[w, 4^D]` (value weights elsewhere).
    pub fn first_derivative_weights(&self, axis: usize) -> Tensor<B, 2> {
        let weights: Vec<Tensor<B, 2>> = self
            .fractions
            .iter()
            .zip(&self.axes)
            .enumerate()
            .map(|(a, (u, nodes))| {
                let basis = if a == axis {
                    ffd_core::spline::basis::cubic_bspline_first_basis_tensor(u.clone())
                } else {
                    basis_tensor(BasisKind::CubicBSpline, u.clone())
                };
                basis * nodes.valid.clone()
            })
            .collect();
        outer_weights(&weights)
    }
}

/// Bilinear / trilinear stencil `[w, 2^D]` of world positions on a voxel lattice.
pub fn linear_stencil<B: Backend, const D: usize>(positions: &Tensor<B, 2>, geometry: &FieldGeometry<D>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
    let mut axes = Vec::with_capacity(D);
    let mut weights = Vec::with_capacity(D);
    for (a, xi) in world_to_index(positions, geometry).into_iter().enumerate() {
        let floor = xi.clone().floor();
        let (nodes, pair) = linear_axis(floor.clone().int(), xi - floor, geometry.shape()[a]);
        axes.push(nodes);
        weights.push(pair);
    }
    (outer_indices(&axes, &geometry.shape()), outer_weights(&weights))
}

/// Linear stencil at `voxels` shifted by the world-space `offsets` `[w, 4]`.
///
/// The lattice coordinate is kept as integer voxel index plus a small shift,
/// so the weights carry the precision of the offsets.
pub fn displaced_linear_stencil<B: Backend, const D: usize>(
    voxels: Tensor<B, 1, Int>,
    offsets: &Tensor<B, 2>,
    geometry: &FieldGeometry<D>,
) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
    let matrix = geometry.world_to_index_matrix();
    let coords = decode_linear(voxels, &geometry.shape());
    let cols = columns::<B, D>(offsets);
    let mut axes = Vec::with_capacity(D);
    let mut weights = Vec::with_capacity(D);
    for (a, coord) in coords.into_iter().enumerate() {
        let mut shift = cols[0].clone().mul_scalar(matrix[(a, 0)] as f32);
        for (e, c) in cols.iter().enumerate().skip(1) {
            shift = shift + c.clone().mul_scalar(matrix[(a, e)] as f32);
        }
        let floor = shift.clone().floor();
        let (nodes, pair) = linear_axis(coord + floor.clone().int(), shift - floor, geometry.shape()[a]);
        axes.push(nodes);
        weights.push(pair);
    }
    (outer_indices(&axes, &geometry.shape()), outer_weights(&weights))
}

/// Nodes `base, base + 1` and their weights `1 - u, u` along one axis.
fn linear_axis<B: Backend>(base: Tensor<B, 1, Int>, u: Tensor<B, 1>, n: usize) -> (AxisNodes<B>, Tensor<B, 2>) {
    let w = u.dims()[0];
    let u = u.reshape([w, 1]);
    let nodes = AxisNodes::new(base, 2, n);
    let pair = Tensor::cat(vec![u.clone().neg().add_scalar(1.0), u], 1) * nodes.valid.clone();
    (nodes, pair)
}

/// Rows of `values` at `nodes`, `[w, P, 4]`.
pub fn gather<B: Backend>(values: &Tensor<B, 2>, nodes: &Tensor<B, 2, Int>) -> Tensor<B, 3> {
    let [w, p] = nodes.dims();
    values.clone().select(0, nodes.clone().reshape([w * p])).reshape([w, p, 4])
}

/// `Σ_k weights[:, k] · values[nodes[:, k]]`, `[w, 4]`.
pub fn gather_weighted<B: Backend>(values: &Tensor<B, 2>, nodes: &Tensor<B, 2, Int>, weights: &Tensor<B, 2>) -> Tensor<B, 2> {
    let [w, p] = nodes.dims();
    (gather(values, nodes) * weights.clone().reshape([w, p, 1])).sum_dim(1).reshape([w, 4])
}

/// Overwrite `rows` of `target` with `values`. `rows` must be unique.
pub fn overwrite_rows<B: Backend>(target: Tensor<B, 2>, rows: Tensor<B, 1, Int>, values: Tensor<B, 2>) -> Tensor<B, 2> {
    let current = target.clone().select(0, rows.clone());
    target.select_assign(0, rows.clone(), current.neg()).select_assign(0, rows, values)
}

/// Scatter-add `[w, P, 4]` contributions into `target` rows `nodes`.
pub fn scatter_add<B: Backend>(target: Tensor<B, 2>, nodes: &Tensor<B, 2, Int>, values: Tensor<B, 3>) -> Tensor<B, 2> {
    let [w, p] = nodes.dims();
    target.select_assign(0, nodes.clone().reshape([w * p]), values.reshape([w * p, 4]))
}

/// Concatenate the per-wave parts of a kernel output.
pub fn cat_waves<B: Backend, const R: usize, K>(parts: Vec<Tensor<B, R, K>>) -> Option<Tensor<B, R, K>>
where
    K: burn::tensor::TensorKind<B> + burn::tensor::BasicOps<B>,
{
    if parts.is_empty() {
        None
    } else {
        Some(Tensor::cat(parts, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn to_vec<const R: usize>(t: Tensor<Backend, R>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_rest_positions_match_geometry() {
        let device = Default::default();
        let geometry = FieldGeometry::<3>::axis_aligned([4, 3, 2], 2.0).unwrap();
        let linear = unit_indices::<Backend>(0..24, &device);
        let rows = to_vec(rest_positions(linear, &geometry));
        for voxel in 0..24 {
            let expected = geometry.rest_position(voxel);
            for c in 0..3 {
                assert!((rows[voxel * 4 + c] as f64 - expected[c]).abs() < 1e-6);
            }
            assert_eq!(rows[voxel * 4 + 3], 0.0);
        }
    }

    #[test]
    fn test_outer_indices_are_x_fastest() {
        let device = Default::default();
        let base = Tensor::<Backend, 1, Int>::from_ints([0], &device);
        let axes = vec![AxisNodes::new(base.clone(), 2, 5), AxisNodes::new(base, 2, 5)];
        let nodes = outer_indices(&axes, &[5, 5]);
        assert_eq!(nodes.into_data().convert::<i64>().to_vec::<i64>().unwrap(), vec![0, 1, 5, 6]);
    }

    #[test]
    fn test_out_of_lattice_nodes_have_zero_weight() {
        let device = Default::default();
        let base = Tensor::<Backend, 1, Int>::from_ints([-2, 3], &device);
        let nodes = AxisNodes::new(base, 4, 5);
        assert_eq!(to_vec(nodes.valid), vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        let index = nodes.index.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(index, vec![0, 0, 0, 1, 3, 4, 4, 4]);
    }

    #[test]
    fn test_displaced_stencil_matches_world_stencil() {
        let device = Default::default();
        let geometry = FieldGeometry::<2>::axis_aligned([6, 5], 2.0).unwrap();
        let voxels = Tensor::<Backend, 1, Int>::from_ints([0, 7, 13, 29], &device);
        let offsets = Tensor::<Backend, 2>::from_floats(
            [[0.5, 0.25, 0.0, 0.0], [-1.5, 3.0, 0.0, 0.0], [2.75, -0.5, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]],
            &device,
        );
        let positions = rest_positions(voxels.clone(), &geometry) + offsets.clone();
        let (world_nodes, world_weights) = linear_stencil(&positions, &geometry);
        let (nodes, weights) = displaced_linear_stencil(voxels, &offsets, &geometry);
        assert_eq!(
            nodes.into_data().convert::<i64>().to_vec::<i64>().unwrap(),
            world_nodes.into_data().convert::<i64>().to_vec::<i64>().unwrap()
        );
        for (a, b) in to_vec(weights).iter().zip(to_vec(world_weights)) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_overwrite_rows() {
        let device = Default::default();
        let target = Tensor::<Backend, 2>::from_data(TensorData::new(vec![1.0f32; 12], [3, 4]), &device);
        let rows = Tensor::<Backend, 1, Int>::from_ints([2, 0], &device);
        let values = Tensor::<Backend, 2>::from_floats([[7.0, 7.0, 7.0, 0.0], [5.0, 5.0, 5.0, 0.0]], &device);
        let out = to_vec(overwrite_rows(target, rows, values));
        assert_eq!(&out[0..4], &[5.0, 5.0, 5.0, 0.0]);
        assert_eq!(&out[4..8], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&out[8..12], &[7.0, 7.0, 7.0, 0.0]);
    }
}
