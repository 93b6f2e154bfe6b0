//! Cluster node
//!
//! A node carries a factor, an optional target identity, and half of each
//! incident edge: the sepset plus the last sepset marginal received from
//! that neighbour. Storing the marginal (not the ratio) on the receiving
//! side is what makes the belief-update send idempotent: the next ratio
//! divides out exactly what this node already absorbed.

use std::collections::BTreeMap;
use std::fmt;

use crate::common::Scope;
use crate::factors::{Factor, FactorError, GaussianMixture};

/// Stable identifier of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// This node's half of one incident edge.
#[derive(Debug, Clone)]
pub struct EdgeState {
    /// Sorted intersection of the two endpoints' scopes.
    pub sepset: Scope,
    /// Last sepset marginal received from the neighbour.
    pub last_received: GaussianMixture,
}

/// A cluster in the graph.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    id: NodeId,
    identity: Option<usize>,
    factor: Factor,
    edges: BTreeMap<NodeId, EdgeState>,
    cached: Option<Factor>,
}

impl ClusterNode {
    pub(crate) fn new(id: NodeId, identity: Option<usize>, factor: Factor) -> Self {
        Self {
            id,
            identity,
            factor,
            edges: BTreeMap::new(),
            cached: None,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Target tag; `None` for measurement clusters. Identity 0 is the
    /// clutter target.
    #[inline]
    pub fn identity(&self) -> Option<usize> {
        self.identity
    }

    #[inline]
    pub fn factor(&self) -> &Factor {
        &self.factor
    }

    pub fn set_factor(&mut self, factor: Factor) {
        self.factor = factor;
    }

    /// Scope of the node's current factor.
    pub fn scope(&self) -> Scope {
        self.factor.scope()
    }

    /// Marginalise the node's factor onto a sepset.
    pub fn marginalize(&self, sepset: &Scope) -> Result<GaussianMixture, FactorError> {
        self.factor.marginalize_to_mixture(sepset)
    }

    /// Multiply a message into the node's factor.
    pub fn absorb(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        self.factor.absorb_mixture(msg)
    }

    /// Divide a message out of the node's factor.
    pub fn cancel(&mut self, msg: &GaussianMixture) -> Result<(), FactorError> {
        self.factor.cancel_mixture(msg)
    }

    /// Neighbour ids in ascending order.
    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.keys().copied()
    }

    pub fn degree(&self) -> usize {
        self.edges.len()
    }

    pub fn sepset(&self, neighbor: NodeId) -> Option<&Scope> {
        self.edges.get(&neighbor).map(|e| &e.sepset)
    }

    /// Last message received from `neighbor`.
    pub fn received_message(&self, neighbor: NodeId) -> Option<&GaussianMixture> {
        self.edges.get(&neighbor).map(|e| &e.last_received)
    }

    /// Record `msg` as the last message received from `neighbor`.
    pub fn log_message(&mut self, neighbor: NodeId, msg: GaussianMixture) {
        if let Some(edge) = self.edges.get_mut(&neighbor) {
            edge.last_received = msg;
        }
    }

    pub(crate) fn insert_edge(&mut self, neighbor: NodeId, state: EdgeState) {
        self.edges.insert(neighbor, state);
    }

    pub(crate) fn remove_edge(&mut self, neighbor: NodeId) {
        self.edges.remove(&neighbor);
    }

    pub(crate) fn edge(&self, neighbor: NodeId) -> Option<&EdgeState> {
        self.edges.get(&neighbor)
    }

    /// Snapshot the current factor for later comparison.
    pub fn cache_factor(&mut self) {
        self.cached = Some(self.factor.clone());
    }

    pub fn cached_factor(&self) -> Option<&Factor> {
        self.cached.as_ref()
    }
}
