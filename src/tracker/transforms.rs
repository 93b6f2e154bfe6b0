//! Vector transform capability
//!
//! Motion and measurement models enter the core as opaque transforms:
//! given a mean they produce a mapped mean, and given a linearisation
//! point a Jacobian. Affine transforms expose their (A, b) directly so the
//! push-forward can skip linearisation entirely.

use nalgebra::{DMatrix, DVector};

/// A differentiable map between vector spaces, consumed by the Gaussian
/// push-forward.
pub trait VectorTransform: Send + Sync {
    /// Map a mean vector through the transform.
    fn apply(&self, mean: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of the map at the given linearisation point.
    fn jacobian(&self, mean: &DVector<f64>) -> DMatrix<f64>;

    /// Affine fast path: `Some((A, b))` when the map is exactly
    /// `x ↦ A x + b`.
    fn linear(&self) -> Option<(&DMatrix<f64>, &DVector<f64>)> {
        None
    }
}

/// An exactly affine transform `x ↦ A x + b`.
#[derive(Debug, Clone)]
pub struct AffineTransform {
    matrix: DMatrix<f64>,
    offset: DVector<f64>,
}

impl AffineTransform {
    pub fn new(matrix: DMatrix<f64>, offset: DVector<f64>) -> Self {
        assert_eq!(matrix.nrows(), offset.len());
        Self { matrix, offset }
    }

    /// Pure linear map with zero offset.
    pub fn linear_map(matrix: DMatrix<f64>) -> Self {
        let offset = DVector::zeros(matrix.nrows());
        Self { matrix, offset }
    }

    /// Constant-acceleration motion over a planar state laid out as
    /// (x, vx, ax, y, vy, ay).
    pub fn constant_acceleration_2d(dt: f64) -> Self {
        let half = 0.5 * dt * dt;
        let a = DMatrix::from_row_slice(
            6,
            6,
            &[
                1.0, dt, half, 0.0, 0.0, 0.0,
                0.0, 1.0, dt, 0.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0, dt, half,
                0.0, 0.0, 0.0, 0.0, 1.0, dt,
                0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
            ],
        );
        Self::linear_map(a)
    }

    /// Projection onto selected state indices, e.g. a position sensor
    /// reading (x, y) out of a six-dimensional state.
    pub fn projection(state_dim: usize, indices: &[usize]) -> Self {
        let mut a = DMatrix::zeros(indices.len(), state_dim);
        for (row, &col) in indices.iter().enumerate() {
            a[(row, col)] = 1.0;
        }
        Self::linear_map(a)
    }
}

impl VectorTransform for AffineTransform {
    fn apply(&self, mean: &DVector<f64>) -> DVector<f64> {
        &self.matrix * mean + &self.offset
    }

    fn jacobian(&self, _mean: &DVector<f64>) -> DMatrix<f64> {
        self.matrix.clone()
    }

    fn linear(&self) -> Option<(&DMatrix<f64>, &DVector<f64>)> {
        Some((&self.matrix, &self.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_apply_and_jacobian() {
        let t = AffineTransform::new(
            DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 3.0]),
            DVector::from_row_slice(&[1.0, -1.0]),
        );
        let out = t.apply(&DVector::from_row_slice(&[1.0, 1.0]));
        assert_eq!(out[0], 3.0);
        assert_eq!(out[1], 2.0);
        assert!(t.linear().is_some());
    }

    #[test]
    fn test_constant_acceleration_advances_position() {
        let t = AffineTransform::constant_acceleration_2d(1.0);
        let state = DVector::from_row_slice(&[0.0, 1.0, 2.0, 10.0, 0.0, 0.0]);
        let next = t.apply(&state);
        assert!((next[0] - 2.0).abs() < 1e-12); // x + vx + a/2
        assert!((next[1] - 3.0).abs() < 1e-12); // vx + a
        assert!((next[3] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_selects_indices() {
        let t = AffineTransform::projection(6, &[0, 3]);
        let state = DVector::from_row_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let z = t.apply(&state);
        assert_eq!(z.len(), 2);
        assert_eq!(z[0], 1.0);
        assert_eq!(z[1], 4.0);
    }
}
