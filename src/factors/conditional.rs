//! Conditional linear Gaussian factor
//!
//! Pairs one discrete parent with a Gaussian mixture per parent value:
//! p(y | a) · p(a), where a is the association variable and y the
//! continuous state block shared by all branches. In the tracker each
//! per-measurement factor is one of these: the discrete prior carries the
//! association hypothesis weights, and branch v holds the joint belief
//! over every candidate target's state under the hypothesis that the
//! measurement came from candidate v.

use nalgebra::DVector;

use crate::common::Scope;

use super::discrete::DiscreteFactor;
use super::mixture::GaussianMixture;
use super::FactorError;

/// Discrete-parent conditional over Gaussian mixture branches.
#[derive(Debug, Clone)]
pub struct ConditionalGaussian {
    prior: DiscreteFactor,
    branches: Vec<(usize, GaussianMixture)>,
}

impl ConditionalGaussian {
    /// Build from a discrete prior and one branch per prior value. The
    /// branch keys must equal the prior's support and every branch must
    /// share one continuous scope.
    pub fn new(
        prior: DiscreteFactor,
        mut branches: Vec<(usize, GaussianMixture)>,
    ) -> Result<Self, FactorError> {
        branches.sort_by_key(|&(v, _)| v);
        let branch_keys: Vec<usize> = branches.iter().map(|&(v, _)| v).collect();
        if branch_keys != prior.domain() {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "branch keys {:?} do not match discrete support {:?}",
                    branch_keys,
                    prior.domain()
                ),
            });
        }
        let scope = branches
            .first()
            .map(|(_, b)| b.scope().clone())
            .ok_or_else(|| FactorError::ScopeMismatch {
                context: "conditional Gaussian needs at least one branch".to_string(),
            })?;
        for (v, b) in &branches {
            if b.scope() != &scope {
                return Err(FactorError::ScopeMismatch {
                    context: format!(
                        "branch {} scope {} differs from {}",
                        v,
                        b.scope(),
                        scope
                    ),
                });
            }
        }
        Ok(Self { prior, branches })
    }

    #[inline]
    pub fn prior(&self) -> &DiscreteFactor {
        &self.prior
    }

    #[inline]
    pub fn branches(&self) -> &[(usize, GaussianMixture)] {
        &self.branches
    }

    /// Shared scope of the continuous branches.
    pub fn continuous_scope(&self) -> &Scope {
        self.branches[0].1.scope()
    }

    /// Full scope: continuous children plus the discrete parent.
    pub fn scope(&self) -> Scope {
        self.continuous_scope()
            .union(&Scope::new(vec![self.prior.var()]))
    }

    /// Sum out the discrete parent: a mixture with every branch's
    /// components, each weighted by the prior probability of its branch.
    pub fn marginalize_discrete(&self) -> Result<GaussianMixture, FactorError> {
        let mut components = Vec::new();
        let mut params = None;
        for (value, branch) in &self.branches {
            let p = self.prior.probability_of(*value);
            params.get_or_insert(branch.params());
            if p <= 0.0 {
                continue;
            }
            let log_p = p.ln();
            for comp in branch.components() {
                let mut c = comp.clone();
                c.scale_log_mass(log_p);
                components.push(c);
            }
        }
        if components.is_empty() {
            return Ok(GaussianMixture::vacuous(
                self.continuous_scope().clone(),
                params.unwrap_or_default(),
            ));
        }
        let mut out = GaussianMixture::new(components, params.unwrap_or_default())?;
        out.reduce();
        Ok(out)
    }

    /// Condition every branch on continuous evidence; the result is a
    /// discrete factor whose weight at v is p(a=v) times branch v's
    /// evidence for the observation.
    pub fn condition_on(
        &self,
        observed: &Scope,
        values: &DVector<f64>,
    ) -> Result<DiscreteFactor, FactorError> {
        let mut table = Vec::with_capacity(self.branches.len());
        for (value, branch) in &self.branches {
            let evidence = branch.observe(observed, values)?.mass();
            table.push((*value, self.prior.probability_of(*value) * evidence));
        }
        DiscreteFactor::new(self.prior.var(), table)
    }

    /// Multiply a continuous factor into every branch. Used when a
    /// measurement cluster pulls a belief-update message from an adjacent
    /// state cluster.
    pub fn absorb_continuous(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        for (_, branch) in &mut self.branches {
            *branch = branch.absorb(msg)?;
        }
        Ok(())
    }

    /// Divide a continuous factor out of every branch.
    pub fn cancel_continuous(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        for (_, branch) in &mut self.branches {
            *branch = branch.cancel(msg)?;
        }
        Ok(())
    }

    /// Total mass: sum over branches of prior weight times branch mass.
    pub fn log_mass(&self) -> f64 {
        let masses: Vec<f64> = self
            .branches
            .iter()
            .map(|(v, b)| {
                let p = self.prior.probability_of(*v);
                if p > 0.0 {
                    p.ln() + b.log_mass()
                } else {
                    f64::NEG_INFINITY
                }
            })
            .collect();
        crate::common::linalg::log_sum_exp(&masses)
    }
}
