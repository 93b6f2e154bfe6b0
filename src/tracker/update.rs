//! Measurement update step
//!
//! Treats each measurement cluster as the root of a local two-phase
//! exchange: pull one belief-update message from every adjacent state
//! cluster (so later measurement clusters see the information earlier
//! ones contributed), then push the resulting outgoing message back into
//! each state cluster's factor. The division against the predicted
//! marginal seeded on the edge cancels the prediction's double-counted
//! contribution.

use crate::graph::MessageReduction;

use super::errors::TrackerError;
use super::TrackerState;

pub(crate) fn update_step(state: &mut TrackerState, t: usize) -> Result<(), TrackerError> {
    let meas_nodes = state.meas_nodes.get(&t).cloned().unwrap_or_default();

    for m in meas_nodes {
        let neighbors: Vec<_> = state.graph.node(m)?.neighbors().collect();

        for &v in &neighbors {
            let outcome = state.graph.send_message(v, m, MessageReduction::Prune)?;
            state.record_send(v, m, outcome)?;
        }
        for &v in &neighbors {
            let outcome = state.graph.send_message(m, v, MessageReduction::Prune)?;
            state.record_send(m, v, outcome)?;
        }
    }

    log::debug!("update({}): measurement messages delivered", t);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::associate::build_step;
    use crate::tracker::config::{
        LaunchState, MotionModel, SensorModel, TrackerConfig, UniformAssociationPrior,
    };
    use crate::tracker::measurements::InMemorySource;
    use crate::tracker::predict::predict_step;
    use crate::tracker::Tracker;
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
            .output_indices(vec![0, 3])
            .build()
            .unwrap()
    }

    fn run_one_step(config: &TrackerConfig, tracker: &mut Tracker, measurements: Vec<DVector<f64>>) {
        let source = InMemorySource::single_sensor(vec![vec![], measurements]);
        let pred = predict_step(config, tracker.state_mut(), 1).unwrap();
        build_step(
            config,
            tracker.state_mut(),
            &UniformAssociationPrior,
            &source,
            1,
            &pred,
        )
        .unwrap();
        update_step(tracker.state_mut(), 1).unwrap();
    }

    #[test]
    fn test_update_pulls_state_towards_measurement() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        run_one_step(
            &config,
            &mut tracker,
            vec![DVector::from_row_slice(&[3.0, 4.0])],
        );

        let state = tracker.state_mut();
        let target = state.graph.node(state.state_nodes[&1][1]).unwrap();
        let marginal = target
            .marginalize(&state.state_scopes[&1][1])
            .unwrap()
            .moment_match()
            .unwrap();
        let mean = marginal.mean().unwrap();

        // The posterior mean moves from the prior (0, 1) towards the
        // measurement (3, 4).
        assert!(mean[0] > 0.5);
        assert!(mean[3] > 1.5);
    }

    #[test]
    fn test_update_respects_component_cap() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        // Several gated measurements multiply mixture components into the
        // state cluster; the cap must hold afterwards.
        let measurements: Vec<DVector<f64>> = (0..6)
            .map(|i| DVector::from_row_slice(&[0.2 * i as f64, 1.0 + 0.2 * i as f64]))
            .collect();
        run_one_step(&config, &mut tracker, measurements);

        let state = tracker.state_mut();
        for &id in &state.state_nodes[&1] {
            let node = state.graph.node(id).unwrap();
            if let Some(m) = node.factor().as_mixture() {
                assert!(m.num_components() <= 4);
            }
        }
    }

    #[test]
    fn test_update_send_is_idempotent_on_state_edge() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        run_one_step(
            &config,
            &mut tracker,
            vec![DVector::from_row_slice(&[0.0, 1.0])],
        );

        // Re-sending along the same edge with no intervening change must
        // leave the state cluster's belief where it is.
        let state = tracker.state_mut();
        let m = state.meas_nodes[&1][0];
        let v = state.state_nodes[&1][1];
        let before = state
            .graph
            .node(v)
            .unwrap()
            .factor()
            .as_mixture()
            .unwrap()
            .clone();
        state
            .graph
            .send_message(m, v, MessageReduction::Prune)
            .unwrap();
        let after = state
            .graph
            .node(v)
            .unwrap()
            .factor()
            .as_mixture()
            .unwrap()
            .clone();
        assert!(after.approx_eq(&before, 1e-8));
    }
}
