//! Tracker kernel
//!
//! Sequences the per-step pipeline over the cluster graph:
//!
//! 1. [`predict`] - propagate every target through the motion model
//! 2. [`associate`] - gate measurements and build association factors
//! 3. [`update`] - measurement-rooted belief-update propagation
//! 4. [`smooth`] - backward pass over the smoothing window
//! 5. [`select`] - trial a new target and compare log-evidence
//! 6. forward re-propagation, then [`extract`] - emit posterior reports
//!
//! All mutable state lives in an explicit [`TrackerState`] value (variable
//! allocator, the graph, the time-indexed cluster tables): cloning it is a
//! full model snapshot, which is exactly what the model-selection side
//! trial needs.

pub mod associate;
pub mod config;
pub mod errors;
pub mod extract;
pub mod measurements;
pub mod predict;
pub mod select;
pub mod smooth;
pub mod transforms;
pub mod update;

pub use config::{
    AssociationPrior, LaunchState, MotionModel, SensorModel, TrackerConfig, TrackerConfigBuilder,
    UniformAssociationPrior,
};
pub use errors::TrackerError;
pub use extract::TrackReport;
pub use measurements::{InMemorySource, MeasurementSource};
pub use transforms::{AffineTransform, VectorTransform};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::{Scope, VariableAllocator};
use crate::factors::GaussianMixture;
use crate::graph::{ClusterGraph, NodeId, SendOutcome};

/// Per-step diagnostic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepMetrics {
    /// Indefinite cancels recovered by treating the message as vacuous.
    pub numeric_recoveries: usize,
    /// Measurements whose gate admitted only the clutter hypothesis.
    pub clutter_dropped: usize,
    /// Model-selection trials run.
    pub model_trials: usize,
    /// Trials that were accepted.
    pub model_accepted: usize,
}

/// The tracker's entire mutable state.
#[derive(Debug, Clone)]
pub struct TrackerState {
    pub(crate) vars: VariableAllocator,
    pub(crate) graph: ClusterGraph,
    /// State cluster ids per step; slot 0 is the clutter cluster.
    pub(crate) state_nodes: BTreeMap<usize, Vec<NodeId>>,
    /// Measurement cluster ids per step (only the live step has any).
    pub(crate) meas_nodes: BTreeMap<usize, Vec<NodeId>>,
    /// Per-target state scope per step, parallel to `state_nodes`.
    pub(crate) state_scopes: BTreeMap<usize, Vec<Scope>>,
    pub(crate) next_identity: usize,
    pub(crate) metrics: StepMetrics,
    edge_recoveries: BTreeMap<(NodeId, NodeId), usize>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            vars: VariableAllocator::new(),
            graph: ClusterGraph::new(),
            state_nodes: BTreeMap::new(),
            meas_nodes: BTreeMap::new(),
            state_scopes: BTreeMap::new(),
            next_identity: 1,
            metrics: StepMetrics::default(),
            edge_recoveries: BTreeMap::new(),
        }
    }

    fn begin_step(&mut self) {
        self.metrics = StepMetrics::default();
        self.edge_recoveries.clear();
    }

    /// Account for a send outcome. The first indefinite cancel on an edge
    /// within a step is recovered and counted; the second is fatal.
    pub(crate) fn record_send(
        &mut self,
        from: NodeId,
        to: NodeId,
        outcome: SendOutcome,
    ) -> Result<(), TrackerError> {
        if outcome == SendOutcome::RecoveredVacuous {
            self.metrics.numeric_recoveries += 1;
            let count = self.edge_recoveries.entry((from, to)).or_insert(0);
            *count += 1;
            if *count >= 2 {
                return Err(TrackerError::RepeatedIndefinite { from, to });
            }
        }
        Ok(())
    }
}

/// Output of one tracker step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub time: usize,
    pub reports: Vec<TrackReport>,
    pub metrics: StepMetrics,
    pub new_target_accepted: bool,
}

/// Recursive multi-target tracker over a canonical Gaussian cluster
/// graph.
pub struct Tracker {
    config: TrackerConfig,
    association_prior: Arc<dyn AssociationPrior>,
    state: TrackerState,
}

impl Tracker {
    /// Create a tracker with a uniform association prior and seed step 0
    /// with the clutter cluster plus one cluster per configured launch
    /// state.
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        Self::with_association_prior(config, Arc::new(UniformAssociationPrior))
    }

    /// Create a tracker with a custom association-prior submodel.
    pub fn with_association_prior(
        config: TrackerConfig,
        association_prior: Arc<dyn AssociationPrior>,
    ) -> Result<Self, TrackerError> {
        let mut state = TrackerState::new();
        let params = config.reduction_params();

        let mut nodes = Vec::with_capacity(config.launch_states.len() + 1);
        let mut scopes = Vec::with_capacity(config.launch_states.len() + 1);

        let clutter_scope = state.vars.allocate_state(config.state_dim);
        let clutter = GaussianMixture::from_weighted_moments(
            clutter_scope.clone(),
            &[(
                1.0,
                config.clutter_prior.mean.clone(),
                config.clutter_prior.covariance.clone(),
            )],
            params,
        )?;
        nodes.push(state.graph.add_node(Some(0), clutter.into()));
        scopes.push(clutter_scope);

        for (i, launch) in config.launch_states.iter().enumerate() {
            let scope = state.vars.allocate_state(config.state_dim);
            let prior = GaussianMixture::from_weighted_moments(
                scope.clone(),
                &[(1.0, launch.mean.clone(), launch.covariance.clone())],
                params,
            )?;
            nodes.push(state.graph.add_node(Some(i + 1), prior.into()));
            scopes.push(scope);
        }

        state.next_identity = config.launch_states.len() + 1;
        state.state_nodes.insert(0, nodes);
        state.state_scopes.insert(0, scopes);

        Ok(Self {
            config,
            association_prior,
            state,
        })
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut TrackerState {
        &mut self.state
    }

    /// Run one full pipeline step at time `t` (t ≥ 1).
    pub fn step<S: MeasurementSource>(
        &mut self,
        source: &S,
        t: usize,
    ) -> Result<StepOutput, TrackerError> {
        assert!(t >= 1, "step 0 is the seeded prior");
        self.state.begin_step();
        log::info!("tracker step {}", t);

        let prediction = predict::predict_step(&self.config, &mut self.state, t)?;
        associate::build_step(
            &self.config,
            &mut self.state,
            &*self.association_prior,
            source,
            t,
            &prediction,
        )?;
        drop(prediction);
        update::update_step(&mut self.state, t)?;
        smooth::smooth_step(&self.config, &mut self.state, t)?;
        let accepted = select::model_select_step(
            &self.config,
            &mut self.state,
            &*self.association_prior,
            source,
            t,
        )?;
        smooth::forward_step(&self.config, &mut self.state, t)?;
        let reports = extract::extract_step(&self.config, &self.state, t)?;

        Ok(StepOutput {
            time: t,
            reports,
            metrics: self.state.metrics,
            new_target_accepted: accepted,
        })
    }

    /// Run every recorded step and collect the reports.
    pub fn run<S: MeasurementSource>(
        &mut self,
        source: &S,
    ) -> Result<Vec<TrackReport>, TrackerError> {
        let available = source
            .time_step_count()
            .saturating_sub(self.config.sensor_time_offset);
        let mut reports = Vec::new();
        for t in 1..available {
            reports.extend(self.step(source, t)?.reports);
        }
        Ok(reports)
    }

    /// Identities of the state clusters alive at step `t`, ascending.
    pub fn identities_at(&self, t: usize) -> Vec<usize> {
        let mut ids: Vec<usize> = self
            .state
            .state_nodes
            .get(&t)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(|&id| self.state.graph.node(id).ok().and_then(|n| n.identity()))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live measurement clusters at step `t`.
    pub fn measurement_cluster_count(&self, t: usize) -> usize {
        self.state.meas_nodes.get(&t).map_or(0, Vec::len)
    }

    /// Mixture sizes of the state clusters at step `t` (slot order).
    pub fn cluster_mixture_sizes(&self, t: usize) -> Vec<usize> {
        self.state
            .state_nodes
            .get(&t)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(|&id| {
                self.state
                    .graph
                    .node(id)
                    .ok()
                    .and_then(|n| n.factor().as_mixture().map(|m| m.num_components()))
            })
            .collect()
    }

    /// Log-evidence of the current model at step `k`.
    pub fn log_evidence(&self, k: usize) -> Result<f64, TrackerError> {
        select::evidence(&self.state, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn test_config() -> TrackerConfig {
        TrackerConfig::builder()
            .dimensions(6, 2)
            .motion(MotionModel::constant_acceleration_2d(1.0, 0.1))
            .sensor(SensorModel::position_sensor(6, &[0, 3], 1.0))
            .clutter_prior(LaunchState::broad(DVector::zeros(6), 1e4))
            .launch_state(LaunchState::broad(
                DVector::from_row_slice(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
                10.0,
            ))
            .mixture_bounds(4, 1e-3_f64.ln(), 5.0)
            .backward_window(2)
            .output_indices(vec![0, 3])
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_seeds_step_zero() {
        let tracker = Tracker::new(test_config()).unwrap();
        assert_eq!(tracker.identities_at(0), vec![0, 1]);
        assert_eq!(tracker.measurement_cluster_count(0), 0);
    }

    #[test]
    fn test_clutter_cluster_recreated_identically() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        let source = InMemorySource::single_sensor(vec![vec![]; 5]);

        tracker.step(&source, 1).unwrap();
        tracker.step(&source, 2).unwrap();

        let state = tracker.state();
        let c1 = state
            .graph
            .node(state.state_nodes[&1][0])
            .unwrap()
            .factor()
            .as_mixture()
            .unwrap()
            .with_scope(state.state_scopes[&2][0].clone())
            .unwrap();
        let c2 = state
            .graph
            .node(state.state_nodes[&2][0])
            .unwrap()
            .factor()
            .as_mixture()
            .unwrap()
            .clone();
        assert!(c1.approx_eq(&c2, 1e-9));
    }

    #[test]
    fn test_step_output_metrics() {
        let config = test_config();
        let mut tracker = Tracker::new(config).unwrap();
        let far = DVector::from_row_slice(&[900.0, 900.0]);
        let source = InMemorySource::single_sensor(vec![vec![], vec![far]]);

        let out = tracker.step(&source, 1).unwrap();
        assert_eq!(out.metrics.clutter_dropped, 1);
        assert!(!out.new_target_accepted);
    }
}
