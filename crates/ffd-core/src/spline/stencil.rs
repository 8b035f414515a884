//! Separable tensor-product stencils over control-point lattices.
//!
//! A stencil holds per-axis weights for `K` consecutive nodes starting at a
//! base index. Visiting it yields, for every node of the `K^D` neighbourhood,
//! the product weight, its first derivatives and its second derivatives with
//! respect to the lattice coordinates.

use nalgebra::{SMatrix, SVector};

use super::basis::{BasisKind, NODE_FIRST_DERIVATIVES, NODE_SECOND_DERIVATIVES, NODE_VALUES};
use crate::field::FieldGeometry;

/// Weights of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisWeights<const K: usize> {
    pub values: [f64; K],
    pub first: [f64; K],
    pub second: [f64; K],
}

/// Weights of one node of a visited stencil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeWeights<const D: usize> {
    /// Linear node index, `None` when the node lies outside the lattice.
    pub node: Option<usize>,
    pub value: f64,
    /// `∂w/∂ξ_b`.
    pub first: SVector<f64, D>,
    /// `∂²w/∂ξ_a∂ξ_b`.
    pub second: SMatrix<f64, D, D>,
}

/// A `K`-node-per-axis stencil anchored at `base`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil<const D: usize, const K: usize> {
    base: [isize; D],
    axes: [AxisWeights<K>; D],
}

/// Four-node stencil of a cubic (or linear) basis at an arbitrary position.
pub type SiteStencil<const D: usize> = Stencil<D, 4>;
/// Three-node stencil of the cubic basis at a control point.
pub type NodeStencil<const D: usize> = Stencil<D, 3>;

impl<const D: usize> Stencil<D, 4> {
    /// Stencil at continuous lattice coordinate `xi`.
    pub fn at_lattice_coordinate(xi: &SVector<f64, D>, kind: BasisKind) -> Self {
        let base = std::array::from_fn(|axis| xi[axis].floor() as isize - 1);
        let axes = std::array::from_fn(|axis| {
            let u = xi[axis] - xi[axis].floor();
            AxisWeights {
                values: kind.values(u),
                first: kind.first_derivatives(u),
                second: kind.second_derivatives(u),
            }
        });
        Self { base, axes }
    }

    /// Stencil at physical position `point` over `lattice`.
    pub fn at_world(lattice: &FieldGeometry<D>, point: &SVector<f64, D>, kind: BasisKind) -> Self {
        Self::at_lattice_coordinate(&lattice.world_to_index(point), kind)
    }
}

impl<const D: usize> Stencil<D, 3> {
    /// Cubic stencil centred on the control point `node`.
    pub fn at_node(node: &[usize; D]) -> Self {
        let base = std::array::from_fn(|axis| node[axis] as isize - 1);
        let axes = [AxisWeights {
            values: NODE_VALUES,
            first: NODE_FIRST_DERIVATIVES,
            second: NODE_SECOND_DERIVATIVES,
        }; D];
        Self { base, axes }
    }
}

impl<const D: usize, const K: usize> Stencil<D, K> {
    /// Number of nodes in the neighbourhood.
    pub const NODES: usize = K.pow(D as u32);

    pub fn base(&self) -> &[isize; D] {
        &self.base
    }

    pub fn axes(&self) -> &[AxisWeights<K>; D] {
        &self.axes
    }

    /// Visit every node of the neighbourhood, x fastest.
    pub fn for_each_node<F>(&self, lattice: &FieldGeometry<D>, mut visit: F)
    where
        F: FnMut(NodeWeights<D>),
    {
        for flat in 0..Self::NODES {
            let mut rest = flat;
            let offset: [usize; D] = std::array::from_fn(|_| {
                let o = rest % K;
                rest /= K;
                o
            });
            let index: [isize; D] = std::array::from_fn(|axis| self.base[axis] + offset[axis] as isize);
            visit(self.weights(&offset, lattice.checked_linear_index(&index)));
        }
    }

    /// Product weights of the node at `offset` within the neighbourhood.
    pub fn weights(&self, offset: &[usize; D], node: Option<usize>) -> NodeWeights<D> {
        let value_of = |axis: usize| self.axes[axis].values[offset[axis]];
        let first_of = |axis: usize| self.axes[axis].first[offset[axis]];
        let second_of = |axis: usize| self.axes[axis].second[offset[axis]];

        let value = (0..D).map(value_of).product();
        let first = SVector::<f64, D>::from_fn(|b, _| {
            (0..D).map(|a| if a == b { first_of(a) } else { value_of(a) }).product()
        });
        let second = SMatrix::<f64, D, D>::from_fn(|a, b| {
            (0..D)
                .map(|c| {
                    if a == b && c == a {
                        second_of(c)
                    } else if c == a || c == b {
                        first_of(c)
                    } else {
                        value_of(c)
                    }
                })
                .product()
        });

        NodeWeights {
            node,
            value,
            first,
            second,
        }
    }
}
