//! Canonical-form Gaussian factor
//!
//! A single Gaussian parameterised by precision K, information vector h and
//! log-normaliser g over a sorted variable scope. The canonical form is
//! closed under product, quotient, marginalisation and conditioning, which
//! is what makes it the working currency of belief-update propagation.
//!
//! Mass bookkeeping: the factor's total mass is
//! `exp(g + ½ hᵀK⁻¹h + ½ d ln 2π − ½ ln det K)` when K is positive
//! definite; [`GaussianFactor::log_mass`] returns −∞ otherwise, so that
//! vacuous or improper factors report zero mass instead of failing.

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::{
    cholesky_jittered, gather_matrix, gather_vector, scatter_add_matrix, scatter_add_vector,
    spd_inverse, spd_log_det, symmetrize, LN_2PI,
};
use crate::common::Scope;
use crate::tracker::transforms::VectorTransform;

use super::FactorError;

/// Relative tolerance for the PSD check performed by [`GaussianFactor::cancel`].
const INDEFINITE_TOL: f64 = 1e-6;

/// A Gaussian in canonical (information) form.
#[derive(Debug, Clone)]
pub struct GaussianFactor {
    scope: Scope,
    precision: DMatrix<f64>,
    info: DVector<f64>,
    log_norm: f64,
}

impl GaussianFactor {
    /// The multiplicative identity on `scope`: K = 0, h = 0, g = 0.
    pub fn vacuous(scope: Scope) -> Self {
        let d = scope.len();
        Self {
            scope,
            precision: DMatrix::zeros(d, d),
            info: DVector::zeros(d),
            log_norm: 0.0,
        }
    }

    /// Build from canonical parameters directly.
    pub fn from_canonical(
        scope: Scope,
        precision: DMatrix<f64>,
        info: DVector<f64>,
        log_norm: f64,
    ) -> Result<Self, FactorError> {
        if precision.nrows() != scope.len()
            || precision.ncols() != scope.len()
            || info.len() != scope.len()
        {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "canonical parameters of dimension {}x{} / {} on a scope of {} variables",
                    precision.nrows(),
                    precision.ncols(),
                    info.len(),
                    scope.len()
                ),
            });
        }
        Ok(Self {
            scope,
            precision: symmetrize(&precision),
            info,
            log_norm,
        })
    }

    /// Build from moment parameters so that the factor's total mass is
    /// `weight` (`log_weight = ln weight`).
    pub fn from_moments(
        scope: Scope,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
        log_weight: f64,
    ) -> Result<Self, FactorError> {
        let d = scope.len();
        if mean.len() != d || covariance.nrows() != d || covariance.ncols() != d {
            return Err(FactorError::ScopeMismatch {
                context: format!("moments of dimension {} on a scope of {} variables", mean.len(), d),
            });
        }
        let precision = spd_inverse(covariance, "covariance in moment construction")?;
        let precision = symmetrize(&precision);
        let info = &precision * mean;
        let log_det_k = -spd_log_det(covariance, "covariance in moment construction")?;
        // g chosen so that log_mass == log_weight
        let log_norm =
            log_weight - 0.5 * mean.dot(&info) - 0.5 * d as f64 * LN_2PI + 0.5 * log_det_k;
        Ok(Self {
            scope,
            precision,
            info,
            log_norm,
        })
    }

    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.scope.len()
    }

    #[inline]
    pub fn precision(&self) -> &DMatrix<f64> {
        &self.precision
    }

    #[inline]
    pub fn info(&self) -> &DVector<f64> {
        &self.info
    }

    #[inline]
    pub fn log_norm(&self) -> f64 {
        self.log_norm
    }

    /// True when K, h and g are all exactly zero.
    pub fn is_vacuous(&self) -> bool {
        self.log_norm == 0.0
            && self.precision.iter().all(|&v| v == 0.0)
            && self.info.iter().all(|&v| v == 0.0)
    }

    /// Relabel the factor onto a new scope of the same dimension, keeping
    /// K, h and g unchanged.
    pub fn with_scope(&self, scope: Scope) -> Result<Self, FactorError> {
        if scope.len() != self.scope.len() {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "relabelling a {}-variable factor onto {} variables",
                    self.scope.len(),
                    scope.len()
                ),
            });
        }
        Ok(Self {
            scope,
            precision: self.precision.clone(),
            info: self.info.clone(),
            log_norm: self.log_norm,
        })
    }

    /// Zero-pad the parameters into a superset scope.
    fn embed(&self, target: &Scope) -> Result<(DMatrix<f64>, DVector<f64>), FactorError> {
        let pos = target
            .positions_of(&self.scope)
            .ok_or_else(|| FactorError::ScopeMismatch {
                context: format!("embedding scope {} into {}", self.scope, target),
            })?;
        let d = target.len();
        let mut k = DMatrix::zeros(d, d);
        let mut h = DVector::zeros(d);
        scatter_add_matrix(&mut k, &pos, &pos, &self.precision);
        scatter_add_vector(&mut h, &pos, &self.info);
        Ok((k, h))
    }

    /// Product: union the scopes, zero-pad, add parameters.
    pub fn absorb(&self, rhs: &GaussianFactor) -> Result<GaussianFactor, FactorError> {
        let scope = self.scope.union(&rhs.scope);
        let (mut k, mut h) = self.embed(&scope)?;
        let (rk, rh) = rhs.embed(&scope)?;
        k += rk;
        h += rh;
        Ok(GaussianFactor {
            scope,
            precision: k,
            info: h,
            log_norm: self.log_norm + rhs.log_norm,
        })
    }

    /// Quotient: identical layout to [`absorb`](Self::absorb) with
    /// subtraction. Reports [`FactorError::NumericallyIndefinite`] when the
    /// resulting precision is not PSD on the divisor's block.
    pub fn cancel(&self, rhs: &GaussianFactor) -> Result<GaussianFactor, FactorError> {
        let scope = self.scope.union(&rhs.scope);
        let (mut k, mut h) = self.embed(&scope)?;
        let (rk, rh) = rhs.embed(&scope)?;
        k -= rk;
        h -= rh;

        // The quotient must stay PSD on the block the divisor touched.
        let overlap = scope
            .positions_of(&rhs.scope)
            .expect("divisor scope is in the union by construction");
        let block = gather_matrix(&k, &overlap, &overlap);
        let eigs = symmetrize(&block).symmetric_eigenvalues();
        let max_eig = eigs.iter().cloned().fold(0.0_f64, |a, b| a.max(b.abs()));
        let min_eig = eigs.iter().cloned().fold(f64::INFINITY, f64::min);
        if min_eig < -INDEFINITE_TOL * (1.0 + max_eig) {
            return Err(FactorError::NumericallyIndefinite {
                context: format!("quotient precision has eigenvalue {:.3e}", min_eig),
            });
        }

        Ok(GaussianFactor {
            scope,
            precision: k,
            info: h,
            log_norm: self.log_norm - rhs.log_norm,
        })
    }

    /// Marginalise onto the subset `keep` by Schur complement.
    ///
    /// The block over the integrated-out variables must be invertible
    /// (after the jitter retry); a fully vacuous rest block is dropped
    /// without integration so vacuous factors marginalise to vacuous.
    pub fn marginalize(&self, keep: &Scope) -> Result<GaussianFactor, FactorError> {
        let keep_pos = self
            .scope
            .positions_of(keep)
            .ok_or_else(|| FactorError::ScopeMismatch {
                context: format!("marginalising {} onto non-subset {}", self.scope, keep),
            })?;
        let rest = self.scope.difference(keep);
        if rest.is_empty() {
            return Ok(self.clone());
        }
        let rest_pos = self
            .scope
            .positions_of(&rest)
            .expect("difference is a subset of scope");

        let k_ss = gather_matrix(&self.precision, &keep_pos, &keep_pos);
        let k_sr = gather_matrix(&self.precision, &keep_pos, &rest_pos);
        let k_rr = gather_matrix(&self.precision, &rest_pos, &rest_pos);
        let h_s = gather_vector(&self.info, &keep_pos);
        let h_r = gather_vector(&self.info, &rest_pos);

        // A rest block with no information at all integrates to a flat
        // contribution; keep the S block unchanged.
        if k_rr.iter().all(|&v| v == 0.0)
            && k_sr.iter().all(|&v| v == 0.0)
            && h_r.iter().all(|&v| v == 0.0)
        {
            return Ok(GaussianFactor {
                scope: keep.clone(),
                precision: k_ss,
                info: h_s,
                log_norm: self.log_norm,
            });
        }

        let chol = cholesky_jittered(&k_rr, "marginal rest block")?;
        let w_h_r = chol.solve(&h_r);
        let w_k_rs = chol.solve(&k_sr.transpose());
        let log_det_rr = 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();

        let precision = symmetrize(&(&k_ss - &k_sr * &w_k_rs));
        let info = &h_s - &k_sr * &w_h_r;
        let log_norm = self.log_norm
            + 0.5 * (rest.len() as f64 * LN_2PI - log_det_rr + h_r.dot(&w_h_r));

        Ok(GaussianFactor {
            scope: keep.clone(),
            precision,
            info,
            log_norm,
        })
    }

    /// Condition on evidence `observed = values` and drop the observed
    /// variables from the scope.
    pub fn observe(
        &self,
        observed: &Scope,
        values: &DVector<f64>,
    ) -> Result<GaussianFactor, FactorError> {
        if values.len() != observed.len() {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "{} evidence values for {} observed variables",
                    values.len(),
                    observed.len()
                ),
            });
        }
        let obs_pos = self
            .scope
            .positions_of(observed)
            .ok_or_else(|| FactorError::ScopeMismatch {
                context: format!("observing {} outside scope {}", observed, self.scope),
            })?;
        let rest = self.scope.difference(observed);
        let rest_pos = self
            .scope
            .positions_of(&rest)
            .expect("difference is a subset of scope");

        let k_rr = gather_matrix(&self.precision, &rest_pos, &rest_pos);
        let k_rs = gather_matrix(&self.precision, &rest_pos, &obs_pos);
        let k_ss = gather_matrix(&self.precision, &obs_pos, &obs_pos);
        let h_r = gather_vector(&self.info, &rest_pos);
        let h_s = gather_vector(&self.info, &obs_pos);

        let info = &h_r - &k_rs * values;
        let log_norm = self.log_norm + h_s.dot(values) - 0.5 * (&k_ss * values).dot(values);

        Ok(GaussianFactor {
            scope: rest,
            precision: k_rr,
            info,
            log_norm,
        })
    }

    /// Linear-Gaussian push-forward `y = A x + b + noise(Q)`, keeping the
    /// joint over (x, y). Marginalise out the source scope afterwards for
    /// the plain push-forward.
    pub fn affine_joint(
        &self,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
        q: &DMatrix<f64>,
        new_scope: &Scope,
    ) -> Result<GaussianFactor, FactorError> {
        let d_x = self.scope.len();
        let d_y = new_scope.len();
        if a.ncols() != d_x || a.nrows() != d_y || b.len() != d_y || q.nrows() != d_y {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "affine model {}x{} with noise {}x{} between scopes of {} and {} variables",
                    a.nrows(),
                    a.ncols(),
                    q.nrows(),
                    q.ncols(),
                    d_x,
                    d_y
                ),
            });
        }
        if !self.scope.intersect(new_scope).is_empty() {
            return Err(FactorError::ScopeMismatch {
                context: format!("push-forward target scope {} overlaps source {}", new_scope, self.scope),
            });
        }

        let w = spd_inverse(q, "process noise in push-forward")?;
        let log_det_w = -spd_log_det(q, "process noise in push-forward")?;
        let at_w = a.transpose() * &w;

        let scope = self.scope.union(new_scope);
        let x_pos = scope.positions_of(&self.scope).expect("source in union");
        let y_pos = scope.positions_of(new_scope).expect("target in union");

        let d = scope.len();
        let mut k = DMatrix::zeros(d, d);
        let mut h = DVector::zeros(d);

        scatter_add_matrix(&mut k, &x_pos, &x_pos, &(&self.precision + &at_w * a));
        scatter_add_matrix(&mut k, &x_pos, &y_pos, &(-&at_w));
        scatter_add_matrix(&mut k, &y_pos, &x_pos, &(-&at_w).transpose());
        scatter_add_matrix(&mut k, &y_pos, &y_pos, &w);
        scatter_add_vector(&mut h, &x_pos, &(&self.info - &at_w * b));
        scatter_add_vector(&mut h, &y_pos, &(&w * b));

        let log_norm = self.log_norm
            - 0.5 * ((&w * b).dot(b) + d_y as f64 * LN_2PI - log_det_w);

        Ok(GaussianFactor {
            scope,
            precision: symmetrize(&k),
            info: h,
            log_norm,
        })
    }

    /// Push-forward through an arbitrary [`VectorTransform`], keeping the
    /// joint. Affine transforms take the exact path; nonlinear transforms
    /// are linearised at the current mean (extended-Kalman style).
    pub fn through_transform(
        &self,
        transform: &dyn VectorTransform,
        noise: &DMatrix<f64>,
        new_scope: &Scope,
    ) -> Result<GaussianFactor, FactorError> {
        if let Some((a, b)) = transform.linear() {
            return self.affine_joint(a, b, noise, new_scope);
        }
        let mu = self.mean()?;
        let jac = transform.jacobian(&mu);
        let bias = transform.apply(&mu) - &jac * &mu;
        self.affine_joint(&jac, &bias, noise, new_scope)
    }

    /// μ = K⁻¹ h.
    pub fn mean(&self) -> Result<DVector<f64>, FactorError> {
        Ok(cholesky_jittered(&self.precision, "precision in mean")?.solve(&self.info))
    }

    /// Σ = K⁻¹.
    pub fn covariance(&self) -> Result<DMatrix<f64>, FactorError> {
        spd_inverse(&self.precision, "precision in covariance")
    }

    /// Squared Mahalanobis distance of `x` from the mean, under this
    /// factor's own precision.
    pub fn mahalanobis_sq(&self, x: &DVector<f64>) -> Result<f64, FactorError> {
        let diff = x - self.mean()?;
        Ok((&self.precision * &diff).dot(&diff))
    }

    /// Total mass in log space; −∞ when the precision is not positive
    /// definite (vacuous and improper factors carry no mass).
    pub fn log_mass(&self) -> f64 {
        let d = self.dim();
        if d == 0 {
            return self.log_norm;
        }
        match self.precision.clone().cholesky() {
            Some(chol) => {
                let log_det = 2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>();
                let quad = self.info.dot(&chol.solve(&self.info));
                self.log_norm + 0.5 * (quad + d as f64 * LN_2PI - log_det)
            }
            None => f64::NEG_INFINITY,
        }
    }

    /// Mass in linear space (0 for improper factors).
    pub fn mass(&self) -> f64 {
        let lm = self.log_mass();
        if lm == f64::NEG_INFINITY {
            0.0
        } else {
            lm.exp()
        }
    }

    /// Shift the log-mass by `delta` (rescale the factor).
    pub fn scale_log_mass(&mut self, delta: f64) {
        self.log_norm += delta;
    }

    /// Structural equality modulo a numeric tolerance on K, h and g.
    pub fn approx_eq(&self, other: &GaussianFactor, tol: f64) -> bool {
        if self.scope != other.scope {
            return false;
        }
        let k_ok = self
            .precision
            .iter()
            .zip(other.precision.iter())
            .all(|(a, b)| (a - b).abs() <= tol);
        let h_ok = self
            .info
            .iter()
            .zip(other.info.iter())
            .all(|(a, b)| (a - b).abs() <= tol);
        k_ok && h_ok && (self.log_norm - other.log_norm).abs() <= tol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Scope, VariableId};

    fn scope(ids: &[u32]) -> Scope {
        Scope::new(ids.iter().map(|&i| VariableId(i)).collect())
    }

    fn unit_gaussian(ids: &[u32], mean: &[f64]) -> GaussianFactor {
        let s = scope(ids);
        let d = s.len();
        GaussianFactor::from_moments(
            s,
            &DVector::from_row_slice(mean),
            &DMatrix::identity(d, d),
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn test_vacuous_is_identity() {
        let f = unit_gaussian(&[0, 1], &[1.0, -2.0]);
        let v = GaussianFactor::vacuous(scope(&[0, 1]));
        let prod = f.absorb(&v).unwrap();
        assert!(prod.approx_eq(&f, 1e-12));
        assert!(v.is_vacuous());
    }

    #[test]
    fn test_from_moments_mass() {
        let f = unit_gaussian(&[0], &[3.0]);
        assert!((f.log_mass() - 0.0).abs() < 1e-10);
        let mut g = f.clone();
        g.scale_log_mass(0.5_f64.ln());
        assert!((g.mass() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_absorb_then_cancel_roundtrip() {
        let f = unit_gaussian(&[0, 2], &[1.0, 2.0]);
        let g = unit_gaussian(&[2, 3], &[0.5, -1.0]);
        let prod = f.absorb(&g).unwrap();
        let back = prod.cancel(&g).unwrap();
        let f_embedded = f.absorb(&GaussianFactor::vacuous(scope(&[3]))).unwrap();
        assert!(back.approx_eq(&f_embedded, 1e-9));
    }

    #[test]
    fn test_cancel_detects_indefinite() {
        let narrow = GaussianFactor::from_moments(
            scope(&[0]),
            &DVector::from_row_slice(&[0.0]),
            &DMatrix::from_row_slice(1, 1, &[1.0]),
            0.0,
        )
        .unwrap();
        let wide = GaussianFactor::from_moments(
            scope(&[0]),
            &DVector::from_row_slice(&[0.0]),
            &DMatrix::from_row_slice(1, 1, &[10.0]),
            0.0,
        )
        .unwrap();
        // wide / narrow has precision 0.1 - 1.0 < 0
        assert!(matches!(
            wide.cancel(&narrow),
            Err(FactorError::NumericallyIndefinite { .. })
        ));
    }

    #[test]
    fn test_marginal_moments_consistent() {
        let s = scope(&[0, 1, 2]);
        let mean = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let cov = DMatrix::from_row_slice(
            3,
            3,
            &[2.0, 0.3, 0.1, 0.3, 1.5, 0.2, 0.1, 0.2, 1.0],
        );
        let f = GaussianFactor::from_moments(s, &mean, &cov, 0.0).unwrap();
        let m = f.marginalize(&scope(&[0, 2])).unwrap();

        let mm = m.mean().unwrap();
        assert!((mm[0] - 1.0).abs() < 1e-9);
        assert!((mm[1] - 3.0).abs() < 1e-9);

        let mc = m.covariance().unwrap();
        assert!((mc[(0, 0)] - 2.0).abs() < 1e-9);
        assert!((mc[(0, 1)] - 0.1).abs() < 1e-9);
        assert!((mc[(1, 1)] - 1.0).abs() < 1e-9);

        // Marginalisation preserves total mass
        assert!((m.log_mass() - f.log_mass()).abs() < 1e-9);
    }

    #[test]
    fn test_observe_reduces_scope_and_weights_evidence() {
        let s = scope(&[0, 1]);
        let mean = DVector::from_row_slice(&[0.0, 0.0]);
        let cov = DMatrix::identity(2, 2);
        let f = GaussianFactor::from_moments(s, &mean, &cov, 0.0).unwrap();

        let at_mean = f
            .observe(&scope(&[1]), &DVector::from_row_slice(&[0.0]))
            .unwrap();
        let off_mean = f
            .observe(&scope(&[1]), &DVector::from_row_slice(&[3.0]))
            .unwrap();
        assert_eq!(at_mean.scope(), &scope(&[0]));
        // Evidence further from the mean leaves less mass behind
        assert!(at_mean.log_mass() > off_mean.log_mass());
        // Mass after conditioning equals the marginal density at the evidence
        let expected = -0.5 * (LN_2PI + 9.0);
        assert!((off_mean.log_mass() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_affine_joint_pushforward() {
        // x ~ N(2, 1); y = 3x + 1 + noise(0.5) => y ~ N(7, 9.5)
        let f = unit_gaussian(&[0], &[2.0]);
        let a = DMatrix::from_row_slice(1, 1, &[3.0]);
        let b = DVector::from_row_slice(&[1.0]);
        let q = DMatrix::from_row_slice(1, 1, &[0.5]);
        let joint = f.affine_joint(&a, &b, &q, &scope(&[5])).unwrap();
        assert_eq!(joint.dim(), 2);

        let y = joint.marginalize(&scope(&[5])).unwrap();
        let mean = y.mean().unwrap();
        let cov = y.covariance().unwrap();
        assert!((mean[0] - 7.0).abs() < 1e-9);
        assert!((cov[(0, 0)] - 9.5).abs() < 1e-9);
        // The push-forward leaves total mass unchanged
        assert!((y.log_mass() - f.log_mass()).abs() < 1e-9);
    }

    #[test]
    fn test_mahalanobis() {
        let f = unit_gaussian(&[0, 1], &[1.0, 1.0]);
        let d = f
            .mahalanobis_sq(&DVector::from_row_slice(&[4.0, 1.0]))
            .unwrap();
        assert!((d - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_vacuous_log_mass_is_neg_inf() {
        let v = GaussianFactor::vacuous(scope(&[0, 1]));
        assert_eq!(v.log_mass(), f64::NEG_INFINITY);
        assert_eq!(v.mass(), 0.0);
    }

    #[test]
    fn test_relabel_keeps_parameters() {
        let f = unit_gaussian(&[0, 1], &[1.0, 2.0]);
        let g = f.with_scope(scope(&[7, 9])).unwrap();
        assert_eq!(g.scope(), &scope(&[7, 9]));
        assert!((g.log_mass() - f.log_mass()).abs() < 1e-12);
    }
}
