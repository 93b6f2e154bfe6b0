//! Error types for the tracker and the cluster graph
//!
//! Transient numerical trouble is recovered locally and surfaced through
//! per-step metrics; the variants here are the conditions that terminate
//! a step (or indicate a caller bug).

use std::fmt;

use crate::factors::FactorError;
use crate::graph::NodeId;

/// Errors that can occur while running the tracker.
#[derive(Debug, Clone)]
pub enum TrackerError {
    /// A factor operation failed (singular marginal, indefinite quotient,
    /// scope mismatch).
    Factor(FactorError),

    /// Attempt to connect two clusters whose scopes are disjoint.
    EmptySepset {
        /// One endpoint.
        left: NodeId,
        /// The other endpoint.
        right: NodeId,
    },

    /// A node id was not present in the graph.
    MissingNode {
        /// The missing id.
        id: NodeId,
    },

    /// Two clusters were treated as adjacent without an edge between them.
    MissingEdge {
        /// Sending endpoint.
        from: NodeId,
        /// Receiving endpoint.
        to: NodeId,
    },

    /// A cancel failed twice on the same edge within one step.
    RepeatedIndefinite {
        /// Sending endpoint.
        from: NodeId,
        /// Receiving endpoint.
        to: NodeId,
    },

    /// Invalid configuration.
    Configuration {
        /// Description of the problem.
        description: String,
    },
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Factor(e) => write!(f, "factor operation failed: {}", e),
            TrackerError::EmptySepset { left, right } => {
                write!(
                    f,
                    "clusters {} and {} have disjoint scopes and cannot share an edge",
                    left, right
                )
            }
            TrackerError::MissingNode { id } => write!(f, "no cluster node with id {}", id),
            TrackerError::MissingEdge { from, to } => {
                write!(f, "no edge between clusters {} and {}", from, to)
            }
            TrackerError::RepeatedIndefinite { from, to } => {
                write!(
                    f,
                    "repeated indefinite cancel on edge {} -> {} within one step",
                    from, to
                )
            }
            TrackerError::Configuration { description } => {
                write!(f, "configuration error: {}", description)
            }
        }
    }
}

impl std::error::Error for TrackerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackerError::Factor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FactorError> for TrackerError {
    fn from(e: FactorError) -> Self {
        TrackerError::Factor(e)
    }
}
