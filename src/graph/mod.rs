//! Cluster graph and belief-update propagation
//!
//! The graph is a flat table of nodes keyed by stable ids; an edge is a
//! pair of per-node halves (sepset plus last received marginal), so there
//! are no ownership cycles and a snapshot is a plain clone of the table.
//!
//! The send primitive follows the belief-update (BUP) discipline: the new
//! message w→v is the ratio of w's current sepset marginal to the last
//! marginal v received along the same edge, v absorbs the ratio, and the
//! stored marginal is replaced. On an acyclic subgraph the send is
//! idempotent under repeated scheduling; on loopy graphs a sweep is one
//! iteration of loopy BUP.

pub mod node;

pub use node::{ClusterNode, EdgeState, NodeId};

use std::collections::{BTreeMap, BTreeSet};

use crate::common::Scope;
use crate::factors::{Factor, FactorError, GaussianMixture, ReductionParams};
use crate::tracker::errors::TrackerError;

/// How an outgoing message is compressed before it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageReduction {
    /// Prune and merge only when the component cap is exceeded.
    Prune,
    /// Collapse to a single moment-matched Gaussian (used on backward and
    /// forward temporal sweeps to stop mixture growth).
    MomentMatch,
}

/// Result of a single BUP send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was absorbed by the receiver.
    Sent,
    /// The cancel was numerically indefinite; the message was treated as
    /// vacuous and the receiver left untouched.
    RecoveredVacuous,
}

/// Counters from a whole-graph propagation sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagationStats {
    pub sent: usize,
    pub recovered: usize,
}

/// Undirected multigraph of cluster nodes with per-edge sepsets.
#[derive(Debug, Clone, Default)]
pub struct ClusterGraph {
    nodes: BTreeMap<NodeId, ClusterNode>,
    next_id: u32,
}

impl ClusterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node carrying `factor`; returns its id.
    pub fn add_node(&mut self, identity: Option<usize>, factor: Factor) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, ClusterNode::new(id, identity, factor));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&ClusterNode, TrackerError> {
        self.nodes.get(&id).ok_or(TrackerError::MissingNode { id })
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut ClusterNode, TrackerError> {
        self.nodes
            .get_mut(&id)
            .ok_or(TrackerError::MissingNode { id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Remove a node and its incident edge halves on both sides.
    pub fn remove_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(&id) {
            for neighbor in node.neighbors() {
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    n.remove_edge(id);
                }
            }
        }
    }

    /// Connect two nodes. The sepset is the sorted intersection of their
    /// scopes; both directions start with a vacuous message. Fails with
    /// [`TrackerError::EmptySepset`] when the scopes are disjoint.
    pub fn add_edge(&mut self, left: NodeId, right: NodeId) -> Result<Scope, TrackerError> {
        let sepset = self
            .node(left)?
            .scope()
            .intersect(&self.node(right)?.scope());
        if sepset.is_empty() {
            return Err(TrackerError::EmptySepset { left, right });
        }
        let vacuous = GaussianMixture::vacuous(sepset.clone(), ReductionParams::default());
        self.install_edge(left, right, sepset.clone(), vacuous.clone(), vacuous);
        Ok(sepset)
    }

    /// Connect two nodes, seeding both directions with `seed` as the
    /// initial exchanged marginal so the first BUP cancellation divides
    /// out the information the endpoints already share.
    pub fn add_edge_seeded(
        &mut self,
        left: NodeId,
        right: NodeId,
        seed: &GaussianMixture,
    ) -> Result<Scope, TrackerError> {
        let sepset = self
            .node(left)?
            .scope()
            .intersect(&self.node(right)?.scope());
        if sepset.is_empty() {
            return Err(TrackerError::EmptySepset { left, right });
        }
        if seed.scope() != &sepset {
            return Err(FactorError::ScopeMismatch {
                context: format!(
                    "edge seed scope {} does not match sepset {}",
                    seed.scope(),
                    sepset
                ),
            }
            .into());
        }
        self.install_edge(left, right, sepset.clone(), seed.clone(), seed.clone());
        Ok(sepset)
    }

    fn install_edge(
        &mut self,
        left: NodeId,
        right: NodeId,
        sepset: Scope,
        left_received: GaussianMixture,
        right_received: GaussianMixture,
    ) {
        if let Some(node) = self.nodes.get_mut(&left) {
            node.insert_edge(
                right,
                EdgeState {
                    sepset: sepset.clone(),
                    last_received: left_received,
                },
            );
        }
        if let Some(node) = self.nodes.get_mut(&right) {
            node.insert_edge(
                left,
                EdgeState {
                    sepset,
                    last_received: right_received,
                },
            );
        }
    }

    /// One belief-update send along the edge `from → to`:
    ///
    /// 1. marginalise `from`'s factor onto the sepset (compressing per
    ///    `reduction`),
    /// 2. divide by the last marginal `to` received on this edge,
    /// 3. absorb the ratio into `to`'s factor and store the new marginal.
    ///
    /// An indefinite cancel is recovered by treating the message as
    /// vacuous; the caller decides how many recoveries to tolerate.
    pub fn send_message(
        &mut self,
        from: NodeId,
        to: NodeId,
        reduction: MessageReduction,
    ) -> Result<SendOutcome, TrackerError> {
        let sepset = self
            .node(to)?
            .edge(from)
            .ok_or(TrackerError::MissingEdge { from, to })?
            .sepset
            .clone();

        let marginal = self.node(from)?.marginalize(&sepset)?;
        let marginal = match reduction {
            MessageReduction::Prune => {
                let mut m = marginal;
                m.reduce();
                m
            }
            MessageReduction::MomentMatch => marginal.moment_match_mixture()?,
        };

        let receiver = self.node_mut(to)?;
        let prev = receiver
            .edge(from)
            .expect("edge existence checked above")
            .last_received
            .clone();

        match marginal.cancel(&prev) {
            Ok(ratio) => {
                receiver.absorb(&ratio)?;
                receiver.log_message(from, marginal);
                Ok(SendOutcome::Sent)
            }
            Err(FactorError::NumericallyIndefinite { context }) => {
                log::warn!(
                    "indefinite message on edge {} -> {} treated as vacuous: {}",
                    from,
                    to,
                    context
                );
                Ok(SendOutcome::RecoveredVacuous)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Depth-first sweep from `root` with an explicit stack. At each visit
    /// the node pulls one message from every neighbour before its own
    /// neighbours are scheduled, then caches its factor. On a tree this is
    /// equivalent to a root-ward collect plus leaf-ward distribute; on a
    /// loopy graph it is one iteration of loopy BUP.
    pub fn propagate_from(&mut self, root: NodeId) -> Result<PropagationStats, TrackerError> {
        if !self.contains(root) {
            return Err(TrackerError::MissingNode { id: root });
        }
        let mut stats = PropagationStats::default();
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack = vec![root];

        while let Some(v) = stack.pop() {
            if !visited.insert(v) {
                continue;
            }
            let neighbors: Vec<NodeId> = self.node(v)?.neighbors().collect();
            for &w in &neighbors {
                match self.send_message(w, v, MessageReduction::Prune)? {
                    SendOutcome::Sent => stats.sent += 1,
                    SendOutcome::RecoveredVacuous => stats.recovered += 1,
                }
            }
            for &w in neighbors.iter().rev() {
                if !visited.contains(&w) {
                    stack.push(w);
                }
            }
            self.node_mut(v)?.cache_factor();
        }
        Ok(stats)
    }
}
