//! Association step
//!
//! Builds, per sensor and per measurement, a conditional linear Gaussian
//! factor coupling the gated candidate targets to the measurement through
//! a fresh discrete association variable. Value 0 of every association
//! variable is the clutter hypothesis; targets enter the domain when the
//! measurement falls inside their validation region (closed gate: the
//! boundary is admitted). A measurement gated by nobody but clutter is
//! dropped; that is expected behaviour and is counted, never an error.
//!
//! Branch p of the conditional starts from candidate p's predicted
//! measurement joint, multiplies in the other candidates' predicted state
//! marginals (they stay informed by their predictions without being tied
//! to this measurement), and then conditions on the observed vector.

use crate::factors::{ConditionalGaussian, GaussianMixture};

use super::config::{AssociationPrior, TrackerConfig};
use super::errors::TrackerError;
use super::measurements::MeasurementSource;
use super::predict::Prediction;
use super::TrackerState;

pub(crate) fn build_step<S: MeasurementSource>(
    config: &TrackerConfig,
    state: &mut TrackerState,
    prior: &dyn AssociationPrior,
    source: &S,
    t: usize,
    prediction: &Prediction,
) -> Result<(), TrackerError> {
    // Measurement clusters from earlier steps have delivered their
    // information; discard them before building this step's.
    let stale: Vec<_> = state.meas_nodes.values().flatten().copied().collect();
    for id in stale {
        state.graph.remove_node(id);
    }
    state.meas_nodes.clear();
    state.meas_nodes.insert(t, Vec::new());

    let slots = state
        .state_nodes
        .get(&t)
        .cloned()
        .unwrap_or_default();

    for (sensor_idx, _) in config.sensors.iter().enumerate() {
        let measurements = source
            .points(sensor_idx, t + config.sensor_time_offset)
            .to_vec();

        // Gate each measurement against every non-clutter target.
        let mut gated = Vec::new();
        for z in measurements {
            if z.len() != config.meas_dim {
                log::warn!(
                    "sensor {} produced a {}-vector at step {}; expected {}, skipped",
                    sensor_idx,
                    z.len(),
                    t,
                    config.meas_dim
                );
                continue;
            }
            let mut domain = vec![0usize];
            for slot in 1..slots.len() {
                let dist = prediction.validation[slot][sensor_idx].mahalanobis_sq(&z)?;
                if dist <= config.validation_gate {
                    domain.push(slot);
                }
            }
            if domain.len() == 1 {
                // Only the clutter hypothesis survived the gate.
                state.metrics.clutter_dropped += 1;
                continue;
            }
            let a = state.vars.allocate_association();
            gated.push((a, domain, z));
        }

        if gated.is_empty() {
            continue;
        }

        let hypotheses: Vec<_> = gated
            .iter()
            .map(|(a, domain, _)| (*a, domain.clone()))
            .collect();
        let priors = prior.marginals(&hypotheses)?;

        for ((_, domain, z), assoc_prior) in gated.into_iter().zip(priors) {
            let z_scope = state.vars.allocate_measurement(config.meas_dim);

            let mut branches = Vec::with_capacity(domain.len());
            for &p in &domain {
                // Relabel the predicted measurement joint's virtual z
                // block onto this measurement's variables. Measurement ids
                // are allocated after every state id, so the sorted order
                // of the blocks is preserved by the relabelling.
                let relabeled = prediction.marginals[p].scope().union(&z_scope);
                let mut branch: GaussianMixture =
                    prediction.meas_joints[p][sensor_idx].with_scope(relabeled)?;

                for &q in &domain {
                    if q != p {
                        branch = branch.absorb(&prediction.marginals[q])?;
                    }
                }
                branches.push((p, branch.observe(&z_scope, &z)?));
            }

            let clg = ConditionalGaussian::new(assoc_prior, branches)?;
            let node = state.graph.add_node(None, clg.into());
            for &p in &domain {
                state
                    .graph
                    .add_edge_seeded(node, slots[p], &prediction.marginals[p])?;
            }
            state
                .meas_nodes
                .get_mut(&t)
                .expect("inserted above")
                .push(node);
        }
    }

    log::debug!(
        "build({}): {} measurement clusters, {} dropped as clutter so far",
        t,
        state.meas_nodes[&t].len(),
        state.metrics.clutter_dropped
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::config::{LaunchState, MotionModel, SensorModel, UniformAssociationPrior};
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
            .validation_gate(9.21)
            .output_indices(vec![0, 3])
            .build()
            .unwrap()
    }

    fn z(a: f64, b: f64) -> DVector<f64> {
        DVector::from_row_slice(&[a, b])
    }

    #[test]
    fn test_gated_measurement_builds_cluster() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        let source = InMemorySource::single_sensor(vec![vec![], vec![z(0.0, 1.0)]]);

        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();
        build_step(
            &config,
            tracker.state_mut(),
            &UniformAssociationPrior,
            &source,
            1,
            &pred,
        )
        .unwrap();

        let state = tracker.state_mut();
        assert_eq!(state.meas_nodes[&1].len(), 1);

        let node = state.graph.node(state.meas_nodes[&1][0]).unwrap();
        let clg = node.factor().as_conditional().unwrap();
        // Clutter plus the one gated target
        assert_eq!(clg.prior().domain(), vec![0, 1]);
        // Connected to both candidate state clusters
        assert_eq!(node.degree(), 2);
    }

    #[test]
    fn test_ungated_measurement_dropped_as_clutter() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        // Far outside the target's validation region
        let source = InMemorySource::single_sensor(vec![vec![], vec![z(500.0, 500.0)]]);

        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();
        build_step(
            &config,
            tracker.state_mut(),
            &UniformAssociationPrior,
            &source,
            1,
            &pred,
        )
        .unwrap();

        let state = tracker.state_mut();
        assert!(state.meas_nodes[&1].is_empty());
        assert_eq!(state.metrics.clutter_dropped, 1);
    }

    #[test]
    fn test_branch_scopes_cover_all_candidates() {
        let config = test_config();
        let mut tracker = Tracker::new(config.clone()).unwrap();
        let source = InMemorySource::single_sensor(vec![vec![], vec![z(0.5, 1.5)]]);

        let pred = predict_step(&config, tracker.state_mut(), 1).unwrap();
        let target_scope = pred.marginals[1].scope().clone();
        let clutter_scope = pred.marginals[0].scope().clone();
        build_step(
            &config,
            tracker.state_mut(),
            &UniformAssociationPrior,
            &source,
            1,
            &pred,
        )
        .unwrap();

        let state = tracker.state_mut();
        let node = state.graph.node(state.meas_nodes[&1][0]).unwrap();
        let clg = node.factor().as_conditional().unwrap();
        let branch_scope = clg.continuous_scope();
        assert!(target_scope.is_subset_of(branch_scope));
        assert!(clutter_scope.is_subset_of(branch_scope));
    }
}
