//! Cubic B-spline and linear basis functions.
//!
//! Every function returns the weights of the four stencil nodes
//! `floor(ξ) - 1 ..= floor(ξ) + 2` for the fractional coordinate `u = ξ - floor(ξ)`.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Interpolation basis used by the spline evaluation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BasisKind {
    /// Non-interpolating cubic B-spline.
    #[default]
    CubicBSpline,
    /// Bilinear / trilinear interpolation of the two nearest nodes per axis.
    Linear,
}

impl BasisKind {
    /// Basis selected by a "use spline interpolation" flag.
    pub fn from_spline_flag(use_spline: bool) -> Self {
        if use_spline {
            Self::CubicBSpline
        } else {
            Self::Linear
        }
    }

    pub fn values(self, u: f64) -> [f64; 4] {
        match self {
            Self::CubicBSpline => cubic_bspline(u),
            Self::Linear => [0.0, 1.0 - u, u, 0.0],
        }
    }

    pub fn first_derivatives(self, u: f64) -> [f64; 4] {
        match self {
            Self::CubicBSpline => cubic_bspline_first(u),
            Self::Linear => [0.0, -1.0, 1.0, 0.0],
        }
    }

    pub fn second_derivatives(self, u: f64) -> [f64; 4] {
        match self {
            Self::CubicBSpline => cubic_bspline_second(u),
            Self::Linear => [0.0; 4],
        }
    }
}

/// Cubic B-spline weights at a node-aligned site (`u = 0`), neighbours `-1, 0, +1`.
pub const NODE_VALUES: [f64; 3] = [1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0];
/// First derivatives at a node-aligned site.
pub const NODE_FIRST_DERIVATIVES: [f64; 3] = [-0.5, 0.0, 0.5];
/// Second derivatives at a node-aligned site.
pub const NODE_SECOND_DERIVATIVES: [f64; 3] = [1.0, -2.0, 1.0];

pub fn cubic_bspline(u: f64) -> [f64; 4] {
    let v = 1.0 - u;
    let u2 = u * u;
    let u3 = u2 * u;
    [
        v * v * v / 6.0,
        (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0,
        (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0,
        u3 / 6.0,
    ]
}

pub fn cubic_bspline_first(u: f64) -> [f64; 4] {
    let v = 1.0 - u;
    let u2 = u * u;
    [
        -0.5 * v * v,
        1.5 * u2 - 2.0 * u,
        -1.5 * u2 + u + 0.5,
        0.5 * u2,
    ]
}

pub fn cubic_bspline_second(u: f64) -> [f64; 4] {
    [1.0 - u, 3.0 * u - 2.0, -3.0 * u + 1.0, u]
}

/// Cubic B-spline weights for a batch of fractional coordinates.
pub fn cubic_bspline_tensor<B: Backend>(u: Tensor<B, 1>) -> [Tensor<B, 1>; 4] {
    // B0 = (1-u)^3 / 6
    let one_minus_u = u.clone().neg().add_scalar(1.0);
    let b0 = one_minus_u.powf_scalar(3.0).div_scalar(6.0);

    // B1 = (3u^3 - 6u^2 + 4) / 6
    let u2 = u.clone() * u.clone();
    let u3 = u2.clone() * u.clone();
    let b1 = (u3.clone().mul_scalar(3.0) - u2.clone().mul_scalar(6.0))
        .add_scalar(4.0)
        .div_scalar(6.0);

    // B2 = (-3u^3 + 3u^2 + 3u + 1) / 6
    let b2 = (u3.clone().mul_scalar(-3.0) + u2.mul_scalar(3.0) + u.mul_scalar(3.0))
        .add_scalar(1.0)
        .div_scalar(6.0);

    // B3 = u^3 / 6
    let b3 = u3.div_scalar(6.0);

    [b0, b1, b2, b3]
}

/// First derivatives of the cubic B-spline weights for a batch of fractional coordinates.
pub fn cubic_bspline_first_tensor<B: Backend>(u: Tensor<B, 1>) -> [Tensor<B, 1>; 4] {
    let one_minus_u = u.clone().neg().add_scalar(1.0);
    let u2 = u.clone() * u.clone();

    let d0 = (one_minus_u.clone() * one_minus_u).mul_scalar(-0.5);
    let d1 = u2.clone().mul_scalar(1.5) - u.clone().mul_scalar(2.0);
    let d2 = (u2.clone().mul_scalar(-1.5) + u).add_scalar(0.5);
    let d3 = u2.mul_scalar(0.5);

    [d0, d1, d2, d3]
}

/// Linear weights for a batch of fractional coordinates.
pub fn linear_tensor<B: Backend>(u: Tensor<B, 1>) -> [Tensor<B, 1>; 4] {
    let zeros = u.zeros_like();
    let one_minus_u = u.clone().neg().add_scalar(1.0);
    [zeros.clone(), one_minus_u, u, zeros]
}

/// Batch weights `[Batch, 4]` for the given basis.
pub fn basis_tensor<B: Backend>(kind: BasisKind, u: Tensor<B, 1>) -> Tensor<B, 2> {
    let [b0, b1, b2, b3] = match kind {
        BasisKind::CubicBSpline => cubic_bspline_tensor(u),
        BasisKind::Linear => linear_tensor(u),
    };
    Tensor::cat(
        vec![
            b0.unsqueeze_dim::<2>(1),
            b1.unsqueeze_dim::<2>(1),
            b2.unsqueeze_dim::<2>(1),
            b3.unsqueeze_dim::<2>(1),
        ],
        1,
    )
}

/// Batch first derivatives `[Batch, 4]` of the cubic basis.
pub fn cubic_bspline_first_basis_tensor<B: Backend>(u: Tensor<B, 1>) -> Tensor<B, 2> {
    let [d0, d1, d2, d3] = cubic_bspline_first_tensor(u);
    Tensor::cat(
        vec![
            d0.unsqueeze_dim::<2>(1),
            d1.unsqueeze_dim::<2>(1),
            d2.unsqueeze_dim::<2>(1),
            d3.unsqueeze_dim::<2>(1),
        ],
        1,
    )
}
