//! Node-centred stencil constants for the kernels working at control points.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use ffd_core::spline::NodeStencil;
use ffd_core::FieldGeometry;

use super::common::decode_linear;

/// Index pairs `(a, b)`, `a ≤ b`, of the distinct second derivatives.
pub fn hessian_pairs<const D: usize>() -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize)> = (0..D).map(|a| (a, a)).collect();
    for a in 0..D {
        for b in a + 1..D {
            pairs.push((a, b));
        }
    }
    pairs
}

/// Device copies of the 3-per-axis node stencil weights.
#[derive(Debug, Clone)]
pub struct NodeStencilTensors<B: Backend> {
    /// Linear node offsets from the centre, `[1, 3^D]`.
    pub offsets: Tensor<B, 2, Int>,
    /// First-derivative weights, `[3^D, D]`.
    pub first: Tensor<B, 2>,
    /// Second-derivative weights per Hessian pair, `[3^D, Q]`.
    pub second: Tensor<B, 2>,
    /// 1 on diagonal pairs and 2 on off-diagonal pairs, `[1, Q]`.
    pub pair_factors: Tensor<B, 2>,
}

impl<B: Backend> NodeStencilTensors<B> {
    pub fn new<const D: usize>(lattice: &FieldGeometry<D>, device: &B::Device) -> Self {
        let stencil = NodeStencil::<D>::at_node(&[1; D]);
        let shape = lattice.shape();
        let pairs = hessian_pairs::<D>();
        let nodes = NodeStencil::<D>::NODES;

        let mut offsets = Vec::with_capacity(nodes);
        let mut first = Vec::with_capacity(nodes * D);
        let mut second = Vec::with_capacity(nodes * pairs.len());
        for flat in 0..nodes {
            let mut rest = flat;
            let offset: [usize; D] = std::array::from_fn(|_| {
                let o = rest % 3;
                rest /= 3;
                o
            });
            let mut linear = 0i64;
            let mut stride = 1i64;
            for axis in 0..D {
                linear += (offset[axis] as i64 - 1) * stride;
                stride *= shape[axis] as i64;
            }
            offsets.push(linear);

            let weights = stencil.weights(&offset, None);
            first.extend((0..D).map(|b| weights.first[b] as f32));
            second.extend(pairs.iter().map(|&(a, b)| weights.second[(a, b)] as f32));
        }
        let factors: Vec<f32> = pairs.iter().map(|&(a, b)| if a == b { 1.0 } else { 2.0 }).collect();

        Self {
            offsets: Tensor::from_data(TensorData::new(offsets, [1, nodes]), device),
            first: Tensor::from_data(TensorData::new(first, [nodes, D]), device),
            second: Tensor::from_data(TensorData::new(second, [nodes, pairs.len()]), device),
            pair_factors: Tensor::from_data(TensorData::new(factors, [1, pairs.len()]), device),
        }
    }

    pub fn node_count(&self) -> usize {
        self.offsets.dims()[1]
    }

    /// First-derivative weights along `axis` as a `[1, 3^D]` row.
    pub fn first_along(&self, axis: usize) -> Tensor<B, 2> {
        let nodes = self.node_count();
        self.first.clone().slice([0..nodes, axis..axis + 1]).reshape([1, nodes])
    }

    /// Stencil node indices `[w, 3^D]` around the centre nodes `[w]`.
    pub fn nodes(&self, centres: Tensor<B, 1, Int>) -> Tensor<B, 2, Int> {
        let w = centres.dims()[0];
        centres.reshape([w, 1]) + self.offsets.clone()
    }
}

/// Number of interior nodes, `1 ≤ i_a ≤ n_a - 2` along every axis.
pub fn interior_count<const D: usize>(lattice: &FieldGeometry<D>) -> usize {
    lattice.shape().iter().map(|&n| n.saturating_sub(2)).product()
}

/// Linear indices of the interior nodes with the given interior unit indices.
pub fn interior_nodes<B: Backend, const D: usize>(units: Tensor<B, 1, Int>, lattice: &FieldGeometry<D>) -> Tensor<B, 1, Int> {
    let shape = lattice.shape();
    let interior: [usize; D] = std::array::from_fn(|a| shape[a].saturating_sub(2));
    let mut linear = units.zeros_like();
    let mut stride = 1i64;
    for (axis, coord) in decode_linear(units, &interior).into_iter().enumerate() {
        linear = linear + coord.add_scalar(1).mul_scalar(stride);
        stride *= shape[axis] as i64;
    }
    linear
}
