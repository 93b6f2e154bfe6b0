//! Prediction step
//!
//! For every target alive at t−1: allocate a fresh state scope for t,
//! moment-match the previous posterior marginal, push it through the
//! motion model keeping the joint over (x_{t−1}, x_t), and wire the new
//! cluster to the old one with both directions of the temporal edge
//! seeded by that marginal, so the first belief-update cancellation on the
//! edge is then a no-op.
//!
//! The clutter target (slot 0) is special: its cluster is the fixed broad
//! clutter prior, recreated every step with no dynamics and no temporal
//! edge.
//!
//! Prediction also derives, per target and per sensor, the predicted
//! measurement joint and its moment-matched marginal, the validation
//! region used by gating. All of that is step scratch: it lives in a
//! [`Prediction`] value consumed by the association step and cannot
//! outlive the step.

use crate::factors::{GaussianFactor, GaussianMixture};

use super::config::TrackerConfig;
use super::errors::TrackerError;
use super::TrackerState;

/// Per-step scratch produced by prediction, indexed by target slot.
pub(crate) struct Prediction {
    /// Predicted state marginal over the fresh t scope, per slot.
    pub marginals: Vec<GaussianMixture>,
    /// Predicted measurement joint over (x_t, z), per slot and sensor.
    pub meas_joints: Vec<Vec<GaussianMixture>>,
    /// Moment-matched predicted measurement per slot and sensor; the
    /// validation region used by gating.
    pub validation: Vec<Vec<GaussianFactor>>,
}

pub(crate) fn predict_step(
    config: &TrackerConfig,
    state: &mut TrackerState,
    t: usize,
) -> Result<Prediction, TrackerError> {
    let prev_nodes = state
        .state_nodes
        .get(&(t - 1))
        .cloned()
        .unwrap_or_default();
    let prev_scopes = state
        .state_scopes
        .get(&(t - 1))
        .cloned()
        .unwrap_or_default();
    let params = config.reduction_params();

    let mut nodes = Vec::with_capacity(prev_nodes.len());
    let mut scopes = Vec::with_capacity(prev_nodes.len());
    let mut marginals = Vec::with_capacity(prev_nodes.len());
    let mut meas_joints = Vec::with_capacity(prev_nodes.len());
    let mut validation = Vec::with_capacity(prev_nodes.len());

    for (slot, &prev_id) in prev_nodes.iter().enumerate() {
        let scope = state.vars.allocate_state(config.state_dim);

        let marginal = if slot == 0 {
            // Clutter keeps no history: a fresh broad prior each step.
            let clutter = GaussianMixture::from_weighted_moments(
                scope.clone(),
                &[(
                    1.0,
                    config.clutter_prior.mean.clone(),
                    config.clutter_prior.covariance.clone(),
                )],
                params,
            )?;
            let id = state.graph.add_node(Some(0), clutter.clone().into());
            nodes.push(id);
            clutter
        } else {
            let identity = state.graph.node(prev_id)?.identity();
            let prev_scope = &prev_scopes[slot];
            let prev_marginal = state
                .graph
                .node(prev_id)?
                .marginalize(prev_scope)?
                .moment_match_mixture()?;

            let joint = prev_marginal.through_transform(
                &*config.motion.transform,
                &config.motion.noise,
                &scope,
            )?;
            let id = state.graph.add_node(identity, joint.clone().into());
            state.graph.add_edge_seeded(prev_id, id, &prev_marginal)?;
            nodes.push(id);

            joint.marginalize(&scope)?
        };

        // Predicted measurement distributions for every sensor; the
        // virtual measurement scope is shared across sensors for a slot.
        let z_scope = state.vars.allocate_measurement(config.meas_dim);
        let mut joints = Vec::with_capacity(config.sensors.len());
        let mut gates = Vec::with_capacity(config.sensors.len());
        for sensor in &config.sensors {
            let joint =
                marginal.through_transform(&*sensor.transform, &sensor.noise, &z_scope)?;
            let gate = joint.marginalize(&z_scope)?.moment_match()?;
            joints.push(joint);
            gates.push(gate);
        }

        scopes.push(scope);
        marginals.push(marginal);
        meas_joints.push(joints);
        validation.push(gates);
    }

    log::debug!("predict({}): {} clusters carried forward", t, nodes.len());

    state.state_nodes.insert(t, nodes);
    state.state_scopes.insert(t, scopes);

    Ok(Prediction {
        marginals,
        meas_joints,
        validation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Tracker;
    use nalgebra::DVector;

    use crate::tracker::config::{LaunchState, MotionModel, SensorModel, TrackerConfig};

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
            .output_indices(vec![0, 3])
            .build()
            .unwrap()
    }

    #[test]
    fn test_predict_carries_identities_and_links() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();

        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();
        let state = tracker.state_mut();

        assert_eq!(state.state_nodes[&1].len(), 2);
        assert_eq!(pred.marginals.len(), 2);
        assert_eq!(pred.validation[1].len(), 1);

        // Clutter cluster has identity 0 and no temporal edge
        let clutter = state.graph.node(state.state_nodes[&1][0]).unwrap();
        assert_eq!(clutter.identity(), Some(0));
        assert_eq!(clutter.degree(), 0);

        // The target cluster keeps its identity and links back to t-1
        let target = state.graph.node(state.state_nodes[&1][1]).unwrap();
        assert_eq!(target.identity(), Some(1));
        assert_eq!(target.degree(), 1);
    }

    #[test]
    fn test_predicted_marginal_follows_motion() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();

        // Launch at y = 1 with zero velocity: prediction stays put but
        // covariance grows by the process noise.
        let mean = pred.marginals[1].moment_match().unwrap().mean().unwrap();
        assert!((mean[0] - 0.0).abs() < 1e-6);
        assert!((mean[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validation_region_in_measurement_space() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();

        let gate = &pred.validation[1][0];
        assert_eq!(gate.dim(), 2);
        let mean = gate.mean().unwrap();
        assert!((mean[0] - 0.0).abs() < 1e-6);
        assert!((mean[1] - 1.0).abs() < 1e-6);
    }
}
