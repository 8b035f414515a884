//! Determinant and cofactor matrix of 2x2 and 3x3 Jacobians by cofactor
//! expansion.

use nalgebra::SMatrix;

/// Determinant of a 2x2 or 3x3 matrix. Other sizes yield NaN.
pub fn determinant<const D: usize>(m: &SMatrix<f64, D, D>) -> f64 {
    match D {
        2 => m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        3 => {
            m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
                - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
                + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
        }
        _ => f64::NAN,
    }
}

/// Cofactor matrix, `cof(m) = det(m) · m^-T`, defined even when `m` is singular.
pub fn cofactor<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    let mut c = SMatrix::<f64, D, D>::zeros();
    match D {
        2 => {
            c[(0, 0)] = m[(1, 1)];
            c[(0, 1)] = -m[(1, 0)];
            c[(1, 0)] = -m[(0, 1)];
            c[(1, 1)] = m[(0, 0)];
        }
        3 => {
            for i in 0..3 {
                for j in 0..3 {
                    let (r0, r1) = ((i + 1) % 3, (i + 2) % 3);
                    let (c0, c1) = ((j + 1) % 3, (j + 2) % 3);
                    c[(i, j)] = m[(r0, c0)] * m[(r1, c1)] - m[(r0, c1)] * m[(r1, c0)];
                }
            }
        }
        _ => c.fill(f64::NAN),
    }
    c
}
