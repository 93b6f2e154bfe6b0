//! Factor algebra
//!
//! The inference kernel works with four concrete factor kinds:
//!
//! - [`GaussianFactor`] - a single canonical-form Gaussian (C1)
//! - [`GaussianMixture`] - an ordered set of those over one scope (C2)
//! - [`DiscreteFactor`] - a distribution over a small finite domain (C3)
//! - [`ConditionalGaussian`] - a discrete parent selecting among mixture
//!   branches (C4)
//!
//! Cluster nodes store a [`Factor`], a tagged sum over the four. The sum
//! exposes only the capability surface message passing needs (scope,
//! marginalise-to-mixture, absorb, cancel, mass); operations that require
//! a concrete variant stay on the concrete types.

pub mod canonical;
pub mod conditional;
pub mod discrete;
pub mod mixture;

pub use canonical::GaussianFactor;
pub use conditional::ConditionalGaussian;
pub use discrete::DiscreteFactor;
pub use mixture::{GaussianMixture, ReductionParams};

use std::fmt;

use crate::common::Scope;

/// Errors raised by the factor algebra.
#[derive(Debug, Clone)]
pub enum FactorError {
    /// Matrix inversion failed after the jitter retry.
    Singular {
        /// Which matrix failed.
        context: String,
    },

    /// A quotient produced a precision that is not PSD on the divisor's
    /// block.
    NumericallyIndefinite {
        /// Description of the offending quotient.
        context: String,
    },

    /// Factors were combined over incompatible scopes.
    ScopeMismatch {
        /// Description of the mismatch.
        context: String,
    },
}

impl fmt::Display for FactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorError::Singular { context } => {
                write!(f, "matrix inversion failed: {}", context)
            }
            FactorError::NumericallyIndefinite { context } => {
                write!(f, "numerically indefinite result: {}", context)
            }
            FactorError::ScopeMismatch { context } => {
                write!(f, "scope mismatch: {}", context)
            }
        }
    }
}

impl std::error::Error for FactorError {}

/// Tagged sum over the four concrete factor kinds.
#[derive(Debug, Clone)]
pub enum Factor {
    Gaussian(GaussianFactor),
    Mixture(GaussianMixture),
    Discrete(DiscreteFactor),
    Conditional(ConditionalGaussian),
}

impl Factor {
    /// Full scope of the factor (for a conditional, the continuous scope
    /// plus the discrete parent).
    pub fn scope(&self) -> Scope {
        match self {
            Factor::Gaussian(g) => g.scope().clone(),
            Factor::Mixture(m) => m.scope().clone(),
            Factor::Discrete(d) => Scope::new(vec![d.var()]),
            Factor::Conditional(c) => c.scope(),
        }
    }

    /// Marginalise onto a continuous sepset, producing a mixture message.
    ///
    /// For a conditional factor the discrete parent is summed out first,
    /// so the message is the mixture over association branches.
    pub fn marginalize_to_mixture(&self, keep: &Scope) -> Result<GaussianMixture, FactorError> {
        match self {
            Factor::Gaussian(g) => Ok(GaussianMixture::from_gaussian(
                g.marginalize(keep)?,
                ReductionParams::default(),
            )),
            Factor::Mixture(m) => m.marginalize(keep),
            Factor::Conditional(c) => c.marginalize_discrete()?.marginalize(keep),
            Factor::Discrete(_) => Err(FactorError::ScopeMismatch {
                context: "cannot take a continuous marginal of a discrete factor".to_string(),
            }),
        }
    }

    /// Multiply a mixture message into this factor in place.
    pub fn absorb_mixture(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        match self {
            Factor::Gaussian(g) => {
                let lifted = GaussianMixture::from_gaussian(g.clone(), msg.params());
                *self = Factor::Mixture(lifted.absorb(msg)?);
                Ok(())
            }
            Factor::Mixture(m) => {
                *m = m.absorb(msg)?;
                Ok(())
            }
            Factor::Conditional(c) => c.absorb_continuous(msg),
            Factor::Discrete(_) => Err(FactorError::ScopeMismatch {
                context: "cannot absorb a continuous message into a discrete factor".to_string(),
            }),
        }
    }

    /// Divide a mixture message out of this factor in place.
    pub fn cancel_mixture(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        match self {
            Factor::Gaussian(g) => {
                let lifted = GaussianMixture::from_gaussian(g.clone(), msg.params());
                *self = Factor::Mixture(lifted.cancel(msg)?);
                Ok(())
            }
            Factor::Mixture(m) => {
                *m = m.cancel(msg)?;
                Ok(())
            }
            Factor::Conditional(c) => c.cancel_continuous(msg),
            Factor::Discrete(_) => Err(FactorError::ScopeMismatch {
                context: "cannot cancel a continuous message from a discrete factor".to_string(),
            }),
        }
    }

    /// Total mass in log space.
    pub fn log_mass(&self) -> f64 {
        match self {
            Factor::Gaussian(g) => g.log_mass(),
            Factor::Mixture(m) => m.log_mass(),
            Factor::Discrete(d) => {
                let total = d.total_mass();
                if total > 0.0 {
                    total.ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            Factor::Conditional(c) => c.log_mass(),
        }
    }

    pub fn as_mixture(&self) -> Option<&GaussianMixture> {
        match self {
            Factor::Mixture(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_conditional(&self) -> Option<&ConditionalGaussian> {
        match self {
            Factor::Conditional(c) => Some(c),
            _ => None,
        }
    }
}

impl From<GaussianFactor> for Factor {
    fn from(f: GaussianFactor) -> Self {
        Factor::Gaussian(f)
    }
}

impl From<GaussianMixture> for Factor {
    fn from(f: GaussianMixture) -> Self {
        Factor::Mixture(f)
    }
}

impl From<DiscreteFactor> for Factor {
    fn from(f: DiscreteFactor) -> Self {
        Factor::Discrete(f)
    }
}

impl From<ConditionalGaussian> for Factor {
    fn from(f: ConditionalGaussian) -> Self {
        Factor::Conditional(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{VariableAllocator, VariableId};
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_factor_scope_variants() {
        let mut alloc = VariableAllocator::new();
        let x = alloc.allocate_state(2);
        let a = alloc.allocate_association();

        let g: Factor = GaussianFactor::vacuous(x.clone()).into();
        assert_eq!(g.scope(), x);

        let d: Factor = DiscreteFactor::uniform(a, &[0, 1]).unwrap().into();
        assert_eq!(d.scope(), Scope::new(vec![a]));
    }

    #[test]
    fn test_gaussian_promotes_to_mixture_on_absorb() {
        let mut alloc = VariableAllocator::new();
        let x = alloc.allocate_state(1);
        let mut f: Factor = GaussianFactor::from_moments(
            x.clone(),
            &DVector::from_row_slice(&[0.0]),
            &DMatrix::identity(1, 1),
            0.0,
        )
        .unwrap()
        .into();

        let msg = GaussianMixture::from_weighted_moments(
            x,
            &[(
                1.0,
                DVector::from_row_slice(&[1.0]),
                DMatrix::identity(1, 1),
            )],
            ReductionParams::default(),
        )
        .unwrap();

        f.absorb_mixture(&msg).unwrap();
        assert!(f.as_mixture().is_some());
    }

    #[test]
    fn test_discrete_rejects_continuous_ops() {
        let d: Factor = DiscreteFactor::uniform(VariableId(0), &[0, 1]).unwrap().into();
        let s = Scope::new(vec![VariableId(1)]);
        assert!(d.marginalize_to_mixture(&s).is_err());
    }
}
