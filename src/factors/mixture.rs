//! Canonical Gaussian mixture
//!
//! An ordered set of [`GaussianFactor`] components over a shared scope.
//! Products, quotients, marginals and conditioning lift component-wise;
//! the mixture-specific operations are moment matching (collapse to the
//! single Gaussian sharing the first two moments) and the prune → merge →
//! clip reduction that keeps the component count bounded. The reduction
//! order is a contract: merging must never see a component pruning would
//! have dropped, because near-zero components distort the merged mean.

use smallvec::SmallVec;

use nalgebra::{DMatrix, DVector};

use crate::common::linalg::log_sum_exp;
use crate::common::Scope;
use crate::tracker::transforms::VectorTransform;

use super::canonical::GaussianFactor;
use super::FactorError;

/// Bounds applied by the mixture reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionParams {
    /// Hard cap on the number of components (M*).
    pub max_components: usize,
    /// Log-mass floor below which components are pruned (τ).
    pub prune_log_threshold: f64,
    /// Squared Mahalanobis radius within which components merge (δ).
    pub merge_distance: f64,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            max_components: 16,
            prune_log_threshold: 1e-6_f64.ln(),
            merge_distance: 4.0,
        }
    }
}

/// Gaussian mixture over a shared sorted scope.
#[derive(Debug, Clone)]
pub struct GaussianMixture {
    scope: Scope,
    components: SmallVec<[GaussianFactor; 4]>,
    params: ReductionParams,
}

impl GaussianMixture {
    /// Build from components sharing a scope. Fails on an empty list or a
    /// component whose scope differs.
    pub fn new(
        components: Vec<GaussianFactor>,
        params: ReductionParams,
    ) -> Result<Self, FactorError> {
        let first = components.first().ok_or_else(|| FactorError::ScopeMismatch {
            context: "mixture must have at least one component".to_string(),
        })?;
        let scope = first.scope().clone();
        for c in &components {
            if c.scope() != &scope {
                return Err(FactorError::ScopeMismatch {
                    context: format!("component scope {} differs from {}", c.scope(), scope),
                });
            }
        }
        Ok(Self {
            scope,
            components: components.into(),
            params,
        })
    }

    /// Single-component mixture.
    pub fn from_gaussian(component: GaussianFactor, params: ReductionParams) -> Self {
        Self {
            scope: component.scope().clone(),
            components: std::iter::once(component).collect(),
            params,
        }
    }

    /// Mixture from weighted moment parameters.
    pub fn from_weighted_moments(
        scope: Scope,
        items: &[(f64, DVector<f64>, DMatrix<f64>)],
        params: ReductionParams,
    ) -> Result<Self, FactorError> {
        let components = items
            .iter()
            .map(|(w, mu, sigma)| GaussianFactor::from_moments(scope.clone(), mu, sigma, w.ln()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(components, params)
    }

    /// The multiplicative identity on `scope`.
    pub fn vacuous(scope: Scope, params: ReductionParams) -> Self {
        Self::from_gaussian(GaussianFactor::vacuous(scope), params)
    }

    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[inline]
    pub fn params(&self) -> ReductionParams {
        self.params
    }

    #[inline]
    pub fn components(&self) -> &[GaussianFactor] {
        &self.components
    }

    #[inline]
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// True when the mixture is a single vacuous component.
    pub fn is_vacuous(&self) -> bool {
        self.components.len() == 1 && self.components[0].is_vacuous()
    }

    fn rebuild(&self, scope: Scope, components: Vec<GaussianFactor>) -> Self {
        debug_assert!(!components.is_empty());
        Self {
            scope,
            components: components.into(),
            params: self.params,
        }
    }

    /// Product with another mixture: the component-wise cross product,
    /// reduced if the cap is exceeded.
    pub fn absorb(&self, rhs: &GaussianMixture) -> Result<GaussianMixture, FactorError> {
        let mut product = Vec::with_capacity(self.components.len() * rhs.components.len());
        for a in &self.components {
            for b in &rhs.components {
                product.push(a.absorb(b)?);
            }
        }
        let scope = product[0].scope().clone();
        let mut out = self.rebuild(scope, product);
        out.reduce();
        Ok(out)
    }

    /// Product with a single Gaussian.
    pub fn absorb_gaussian(&self, rhs: &GaussianFactor) -> Result<GaussianMixture, FactorError> {
        let product = self
            .components
            .iter()
            .map(|c| c.absorb(rhs))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = product[0].scope().clone();
        let mut out = self.rebuild(scope, product);
        out.reduce();
        Ok(out)
    }

    /// Quotient by another mixture. A multi-component divisor is first
    /// moment-matched to a single Gaussian, then divided out of every
    /// component; a non-PSD quotient is reported as
    /// [`FactorError::NumericallyIndefinite`].
    pub fn cancel(&self, rhs: &GaussianMixture) -> Result<GaussianMixture, FactorError> {
        let divisor = if rhs.components.len() == 1 {
            rhs.components[0].clone()
        } else {
            rhs.moment_match()?
        };
        self.cancel_gaussian(&divisor)
    }

    /// Quotient by a single Gaussian.
    pub fn cancel_gaussian(&self, rhs: &GaussianFactor) -> Result<GaussianMixture, FactorError> {
        let quotient = self
            .components
            .iter()
            .map(|c| c.cancel(rhs))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = quotient[0].scope().clone();
        Ok(self.rebuild(scope, quotient))
    }

    /// Marginalise every component onto `keep`. A mixture with no mass at
    /// all marginalises to the vacuous mixture instead of failing.
    pub fn marginalize(&self, keep: &Scope) -> Result<GaussianMixture, FactorError> {
        if self.log_mass() == f64::NEG_INFINITY {
            return Ok(GaussianMixture::vacuous(keep.clone(), self.params));
        }
        let comps = self
            .components
            .iter()
            .map(|c| c.marginalize(keep))
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = self.rebuild(keep.clone(), comps);
        out.reduce();
        Ok(out)
    }

    /// Condition every component on `observed = values`.
    pub fn observe(
        &self,
        observed: &Scope,
        values: &DVector<f64>,
    ) -> Result<GaussianMixture, FactorError> {
        let comps = self
            .components
            .iter()
            .map(|c| c.observe(observed, values))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = comps[0].scope().clone();
        Ok(self.rebuild(scope, comps))
    }

    /// Push every component through a transform, keeping the per-component
    /// joint over (source, target) scopes.
    pub fn through_transform(
        &self,
        transform: &dyn VectorTransform,
        noise: &DMatrix<f64>,
        new_scope: &Scope,
    ) -> Result<GaussianMixture, FactorError> {
        let comps = self
            .components
            .iter()
            .map(|c| c.through_transform(transform, noise, new_scope))
            .collect::<Result<Vec<_>, _>>()?;
        let scope = comps[0].scope().clone();
        Ok(self.rebuild(scope, comps))
    }

    /// Relabel onto a new scope of equal dimension.
    pub fn with_scope(&self, scope: Scope) -> Result<GaussianMixture, FactorError> {
        let comps = self
            .components
            .iter()
            .map(|c| c.with_scope(scope.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.rebuild(scope, comps))
    }

    /// Total mass in log space: log-sum-exp over component masses.
    pub fn log_mass(&self) -> f64 {
        let masses: Vec<f64> = self.components.iter().map(|c| c.log_mass()).collect();
        log_sum_exp(&masses)
    }

    /// Mass in linear space (0 when every component is massless).
    pub fn mass(&self) -> f64 {
        let lm = self.log_mass();
        if lm == f64::NEG_INFINITY {
            0.0
        } else {
            lm.exp()
        }
    }

    /// Shift every component's log-mass by `delta`.
    pub fn scale_log_mass(&mut self, delta: f64) {
        for c in &mut self.components {
            c.scale_log_mass(delta);
        }
    }

    /// Rescale so the total mass is one.
    pub fn normalize(&mut self) {
        let lm = self.log_mass();
        if lm.is_finite() {
            self.scale_log_mass(-lm);
        }
    }

    /// Collapse to the single Gaussian with the mixture's first two
    /// moments and total mass. A massless mixture collapses to the vacuous
    /// factor.
    pub fn moment_match(&self) -> Result<GaussianFactor, FactorError> {
        if self.components.len() == 1 {
            return Ok(self.components[0].clone());
        }
        let total = self.log_mass();
        if total == f64::NEG_INFINITY {
            return Ok(GaussianFactor::vacuous(self.scope.clone()));
        }
        collapse(&self.components, self.scope.clone(), total)
    }

    /// Moment match, wrapped back into a single-component mixture.
    pub fn moment_match_mixture(&self) -> Result<GaussianMixture, FactorError> {
        Ok(GaussianMixture::from_gaussian(self.moment_match()?, self.params))
    }

    /// Reduce in place when the component cap is exceeded.
    pub fn reduce(&mut self) {
        if self.components.len() > self.params.max_components {
            self.prune_and_merge();
        }
    }

    /// Prune, merge, then clip, in that order.
    ///
    /// 1. Components with log-mass below τ are dropped; if that would drop
    ///    everything, the M* heaviest are kept instead and merging is
    ///    skipped (nothing of significant mass remains to merge).
    /// 2. Remaining components are scanned in descending mass order; each
    ///    seed absorbs every component within δ of it (squared Mahalanobis
    ///    under the component's own precision) and the subset is collapsed
    ///    by moment matching.
    /// 3. If still over M*, the heaviest M* survive.
    pub fn prune_and_merge(&mut self) {
        let tau = self.params.prune_log_threshold;
        let max = self.params.max_components.max(1);

        let mut kept: Vec<GaussianFactor> = self
            .components
            .iter()
            .filter(|c| {
                let m = c.log_mass();
                m.is_finite() && m >= tau
            })
            .cloned()
            .collect();

        if kept.is_empty() {
            // Fallback clip: every component was below threshold.
            let mut all: Vec<GaussianFactor> = self.components.iter().cloned().collect();
            all.sort_by(|a, b| {
                b.log_mass()
                    .partial_cmp(&a.log_mass())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            all.truncate(max);
            self.components = all.into();
            return;
        }

        kept.sort_by(|a, b| {
            b.log_mass()
                .partial_cmp(&a.log_mass())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut merged: Vec<GaussianFactor> = Vec::new();
        let mut remaining = kept;
        while !remaining.is_empty() {
            let seed_mean = match remaining[0].mean() {
                Ok(m) => m,
                Err(_) => {
                    // Unusable seed: emit as-is and move on.
                    merged.push(remaining.remove(0));
                    continue;
                }
            };

            let mut absorbed: Vec<GaussianFactor> = Vec::new();
            let mut rest: Vec<GaussianFactor> = Vec::new();
            for (idx, comp) in remaining.drain(..).enumerate() {
                let close = idx == 0
                    || comp
                        .mahalanobis_sq(&seed_mean)
                        .map(|d| d <= self.params.merge_distance)
                        .unwrap_or(false);
                if close {
                    absorbed.push(comp);
                } else {
                    rest.push(comp);
                }
            }

            if absorbed.len() == 1 {
                merged.push(absorbed.pop().expect("one absorbed component"));
            } else {
                let subset_mass = log_sum_exp(
                    &absorbed.iter().map(|c| c.log_mass()).collect::<Vec<_>>(),
                );
                match collapse(&absorbed, self.scope.clone(), subset_mass) {
                    Ok(c) => merged.push(c),
                    // Collapse can only fail on degenerate covariances;
                    // keep the heaviest member in that case.
                    Err(_) => merged.push(absorbed.swap_remove(0)),
                }
            }
            remaining = rest;
        }

        if merged.len() > max {
            merged.sort_by(|a, b| {
                b.log_mass()
                    .partial_cmp(&a.log_mass())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            merged.truncate(max);
        }

        self.components = merged.into();
    }

    /// Structural equality modulo tolerance, with components compared
    /// under a canonical sort by mean.
    pub fn approx_eq(&self, other: &GaussianMixture, tol: f64) -> bool {
        if self.scope != other.scope || self.components.len() != other.components.len() {
            return false;
        }
        let mut left: Vec<&GaussianFactor> = self.components.iter().collect();
        let mut right: Vec<&GaussianFactor> = other.components.iter().collect();
        left.sort_by(|a, b| mean_order(a, b));
        right.sort_by(|a, b| mean_order(a, b));
        left.iter()
            .zip(right.iter())
            .all(|(a, b)| a.approx_eq(b, tol))
    }
}

/// Lexicographic order on component means; improper components sort last.
fn mean_order(a: &GaussianFactor, b: &GaussianFactor) -> std::cmp::Ordering {
    match (a.mean().ok(), b.mean().ok()) {
        (Some(ma), Some(mb)) => ma
            .iter()
            .zip(mb.iter())
            .find_map(|(x, y)| x.partial_cmp(y).filter(|o| o.is_ne()))
            .unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

/// Moment-match a component subset carrying total log-mass `total`.
fn collapse(
    components: &[GaussianFactor],
    scope: Scope,
    total: f64,
) -> Result<GaussianFactor, FactorError> {
    let d = scope.len();
    let mut mean = DVector::zeros(d);
    let mut cov = DMatrix::zeros(d, d);

    let mut moments = Vec::with_capacity(components.len());
    for c in components {
        let lm = c.log_mass();
        if lm == f64::NEG_INFINITY {
            continue;
        }
        moments.push((lm, c.mean()?, c.covariance()?));
    }

    for (lm, mu, _) in &moments {
        let w = (lm - total).exp();
        mean += mu * w;
    }
    for (lm, mu, sigma) in &moments {
        let w = (lm - total).exp();
        cov += (sigma + mu * mu.transpose()) * w;
    }
    cov -= &mean * mean.transpose();

    GaussianFactor::from_moments(scope, &mean, &cov, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::VariableId;

    fn scope(ids: &[u32]) -> Scope {
        Scope::new(ids.iter().map(|&i| VariableId(i)).collect())
    }

    fn params(max: usize, tau: f64, delta: f64) -> ReductionParams {
        ReductionParams {
            max_components: max,
            prune_log_threshold: tau,
            merge_distance: delta,
        }
    }

    fn mixture_1d(weights_means: &[(f64, f64)], p: ReductionParams) -> GaussianMixture {
        let items: Vec<_> = weights_means
            .iter()
            .map(|&(w, m)| {
                (
                    w,
                    DVector::from_row_slice(&[m]),
                    DMatrix::from_row_slice(1, 1, &[1.0]),
                )
            })
            .collect();
        GaussianMixture::from_weighted_moments(scope(&[0]), &items, p).unwrap()
    }

    #[test]
    fn test_log_mass_is_sum() {
        let m = mixture_1d(&[(0.25, 0.0), (0.75, 10.0)], ReductionParams::default());
        assert!((m.mass() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_moment_match_single_component_identity() {
        let m = mixture_1d(&[(0.5, 2.0)], ReductionParams::default());
        let matched = m.moment_match().unwrap();
        assert!(matched.approx_eq(&m.components()[0], 1e-12));
    }

    #[test]
    fn test_moment_match_two_components() {
        let m = mixture_1d(&[(0.5, 0.0), (0.5, 4.0)], ReductionParams::default());
        let matched = m.moment_match().unwrap();
        let mean = matched.mean().unwrap();
        let cov = matched.covariance().unwrap();
        assert!((mean[0] - 2.0).abs() < 1e-9);
        // Var = E[sigma] + E[mu^2] - (E[mu])^2 = 1 + 8 - 4 = 5
        assert!((cov[(0, 0)] - 5.0).abs() < 1e-9);
        assert!((matched.log_mass() - m.log_mass()).abs() < 1e-9);
    }

    #[test]
    fn test_massless_mixture_marginalizes_to_vacuous() {
        let v = GaussianMixture::vacuous(scope(&[0, 1]), ReductionParams::default());
        assert_eq!(v.log_mass(), f64::NEG_INFINITY);
        assert_eq!(v.mass(), 0.0);
        let m = v.marginalize(&scope(&[0])).unwrap();
        assert!(m.is_vacuous());
    }

    #[test]
    fn test_prune_drops_light_components() {
        let p = params(10, 0.01_f64.ln(), 0.01);
        let mut m = mixture_1d(&[(1.0, 0.0), (1e-4, 50.0), (0.5, 10.0)], p);
        m.prune_and_merge();
        assert_eq!(m.num_components(), 2);
        for c in m.components() {
            assert!(c.log_mass() >= p.prune_log_threshold);
        }
    }

    #[test]
    fn test_prune_fallback_keeps_heaviest() {
        let p = params(2, 0.0, 0.01); // threshold of ln(1) = 0: everything below
        let mut m = mixture_1d(&[(0.1, 0.0), (0.3, 5.0), (0.2, 10.0)], p);
        m.prune_and_merge();
        assert_eq!(m.num_components(), 2);
        let masses: Vec<f64> = m.components().iter().map(|c| c.mass()).collect();
        assert!((masses[0] - 0.3).abs() < 1e-9);
        assert!((masses[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_merge_collapses_close_components() {
        let p = params(10, 1e-6_f64.ln(), 9.0);
        let mut m = mixture_1d(&[(0.5, 0.0), (0.4, 1.0), (0.3, 100.0)], p);
        m.prune_and_merge();
        // Components at 0 and 1 are within 3 sigma, the one at 100 is not
        assert_eq!(m.num_components(), 2);
        assert!((m.mass() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_merged_components_are_separated() {
        let p = params(10, 1e-9_f64.ln(), 4.0);
        let mut m = mixture_1d(
            &[(0.5, 0.0), (0.4, 0.5), (0.3, 10.0), (0.2, 10.5), (0.1, 30.0)],
            p,
        );
        m.prune_and_merge();
        // No two survivors within the merge radius of each other
        for (i, a) in m.components().iter().enumerate() {
            for b in m.components().iter().skip(i + 1) {
                let da = a.mahalanobis_sq(&b.mean().unwrap()).unwrap();
                let db = b.mahalanobis_sq(&a.mean().unwrap()).unwrap();
                assert!(da > p.merge_distance && db > p.merge_distance);
            }
        }
    }

    #[test]
    fn test_clip_respects_cap() {
        let p = params(3, 1e-12_f64.ln(), 0.01);
        let comps: Vec<(f64, f64)> = (0..8).map(|i| (0.1 + i as f64, i as f64 * 20.0)).collect();
        let mut m = mixture_1d(&comps, p);
        m.prune_and_merge();
        assert!(m.num_components() <= 3);
    }

    #[test]
    fn test_absorb_cross_product_reduces() {
        let p = params(4, 1e-9_f64.ln(), 0.5);
        let a = mixture_1d(&[(0.5, 0.0), (0.5, 5.0), (0.5, 10.0)], p);
        let b = mixture_1d(&[(0.5, 0.0), (0.5, 5.0)], p);
        let prod = a.absorb(&b).unwrap();
        assert!(prod.num_components() <= 4);
    }

    #[test]
    fn test_cancel_by_vacuous_is_identity() {
        let p = ReductionParams::default();
        let m = mixture_1d(&[(0.5, 0.0), (0.5, 3.0)], p);
        let v = GaussianMixture::vacuous(scope(&[0]), p);
        let q = m.cancel(&v).unwrap();
        assert!(q.approx_eq(&m, 1e-12));
    }

    #[test]
    fn test_approx_eq_ignores_component_order() {
        let p = ReductionParams::default();
        let a = mixture_1d(&[(0.5, 0.0), (0.5, 3.0)], p);
        let b = mixture_1d(&[(0.5, 3.0), (0.5, 0.0)], p);
        assert!(a.approx_eq(&b, 1e-12));
    }
}
