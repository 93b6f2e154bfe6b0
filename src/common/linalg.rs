//! Linear algebra utilities
//!
//! Numerical kernels shared by the factor algebra: symmetric positive
//! definite solves with a jitter fallback, log-sum-exp, and scatter/gather
//! helpers for mapping factor blocks between variable scopes.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::factors::FactorError;

/// ln(2π), used by every Gaussian mass computation.
pub const LN_2PI: f64 = 1.8378770664093453;

/// Relative jitter added to the diagonal when a Cholesky factorisation
/// fails: ε = JITTER_SCALE × tr(K)/d.
pub const JITTER_SCALE: f64 = 1e-9;

/// Cholesky-factorise a symmetric positive definite matrix.
///
/// On failure, retries once with a jitter of `JITTER_SCALE × tr(m)/d`
/// added to the diagonal; a second failure is reported as
/// [`FactorError::Singular`] with the supplied context.
pub fn cholesky_jittered(
    m: &DMatrix<f64>,
    context: &str,
) -> Result<Cholesky<f64, Dyn>, FactorError> {
    if let Some(chol) = m.clone().cholesky() {
        return Ok(chol);
    }

    let d = m.nrows().max(1) as f64;
    let trace: f64 = m.diagonal().iter().sum();
    let eps = if trace > 0.0 {
        JITTER_SCALE * trace / d
    } else {
        JITTER_SCALE
    };

    let mut jittered = m.clone();
    for i in 0..m.nrows() {
        jittered[(i, i)] += eps;
    }

    jittered.cholesky().ok_or_else(|| FactorError::Singular {
        context: context.to_string(),
    })
}

/// Solve `m x = rhs` for an SPD matrix, with the jitter fallback.
pub fn spd_solve(
    m: &DMatrix<f64>,
    rhs: &DVector<f64>,
    context: &str,
) -> Result<DVector<f64>, FactorError> {
    Ok(cholesky_jittered(m, context)?.solve(rhs))
}

/// Invert an SPD matrix, with the jitter fallback.
pub fn spd_inverse(m: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>, FactorError> {
    Ok(cholesky_jittered(m, context)?.inverse())
}

/// Log-determinant of an SPD matrix via its Cholesky factor.
pub fn spd_log_det(m: &DMatrix<f64>, context: &str) -> Result<f64, FactorError> {
    let chol = cholesky_jittered(m, context)?;
    Ok(2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>())
}

/// Compute log(sum(exp(x))) in a numerically stable way.
///
/// Returns −∞ for an empty slice or when every entry is −∞. Non-finite
/// entries are skipped so that zero-mass components never poison the sum.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max_val = values
        .iter()
        .cloned()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum: f64 = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - max_val).exp())
        .sum();
    max_val + sum.ln()
}

/// Make a matrix symmetric by averaging with its transpose.
///
/// Precision matrices drift off symmetry after repeated products and
/// Schur complements; constructors funnel through this.
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (matrix + matrix.transpose())
}

/// Gather the sub-matrix at the given row and column index sets.
pub fn gather_matrix(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(rows.len(), cols.len());
    for (i, &r) in rows.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            out[(i, j)] = m[(r, c)];
        }
    }
    out
}

/// Gather the sub-vector at the given index set.
pub fn gather_vector(v: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_iterator(idx.len(), idx.iter().map(|&i| v[i]))
}

/// Add `src` into `dst` at the given row and column index sets.
pub fn scatter_add_matrix(
    dst: &mut DMatrix<f64>,
    rows: &[usize],
    cols: &[usize],
    src: &DMatrix<f64>,
) {
    for (i, &r) in rows.iter().enumerate() {
        for (j, &c) in cols.iter().enumerate() {
            dst[(r, c)] += src[(i, j)];
        }
    }
}

/// Add `src` into `dst` at the given index set.
pub fn scatter_add_vector(dst: &mut DVector<f64>, idx: &[usize], src: &DVector<f64>) {
    for (i, &r) in idx.iter().enumerate() {
        dst[r] += src[i];
    }
}
