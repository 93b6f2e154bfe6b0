//! Model selection
//!
//! Decides whether the measurement history is better explained by one
//! more target. The trial runs on a clone of the whole tracker state: the
//! clusters of the last W+1 steps are torn down, a generic launch prior is
//! appended at the window's root, and predict/build/update are replayed
//! over the window followed by a smoothing pass. The trial is accepted iff
//! its log-evidence at the window root beats the incumbent's by more than
//! the configured margin; otherwise the clone is simply dropped and the
//! incumbent state was never touched.

use crate::factors::GaussianMixture;

use super::config::{AssociationPrior, TrackerConfig};
use super::errors::TrackerError;
use super::measurements::MeasurementSource;
use super::{associate, predict, smooth, update, TrackerState};

/// Sum of per-cluster log-masses at step `k`: the model's log-evidence.
pub(crate) fn evidence(state: &TrackerState, k: usize) -> Result<f64, TrackerError> {
    let mut total = 0.0;
    for &id in state.state_nodes.get(&k).map(Vec::as_slice).unwrap_or(&[]) {
        total += state.graph.node(id)?.factor().log_mass();
    }
    Ok(total)
}

pub(crate) fn model_select_step<S: MeasurementSource>(
    config: &TrackerConfig,
    state: &mut TrackerState,
    prior: &dyn AssociationPrior,
    source: &S,
    t: usize,
) -> Result<bool, TrackerError> {
    if t <= config.backward_window + 1 {
        return Ok(false);
    }
    let k = t - config.backward_window;

    let lambda_old = evidence(state, k)?;

    let mut trial = state.clone();

    // Tear down the window: the replay rebuilds clusters K..=t from the
    // K−1 beliefs, which keep everything smoothing already told them.
    for i in k..=t {
        if let Some(ids) = trial.state_nodes.remove(&i) {
            for id in ids {
                trial.graph.remove_node(id);
            }
        }
        trial.state_scopes.remove(&i);
    }
    let stale: Vec<_> = trial.meas_nodes.values().flatten().copied().collect();
    for id in stale {
        trial.graph.remove_node(id);
    }
    trial.meas_nodes.clear();

    // Append the candidate target at the window root.
    let scope = trial.vars.allocate_state(config.state_dim);
    let launch = GaussianMixture::from_weighted_moments(
        scope.clone(),
        &[(
            1.0,
            config.new_target_prior.mean.clone(),
            config.new_target_prior.covariance.clone(),
        )],
        config.reduction_params(),
    )?;
    let identity = trial.next_identity;
    trial.next_identity += 1;
    let node = trial.graph.add_node(Some(identity), launch.into());

    let root = k - 1;
    trial
        .state_nodes
        .get_mut(&root)
        .ok_or(TrackerError::Configuration {
            description: format!("no state clusters recorded at step {}", root),
        })?
        .push(node);
    trial
        .state_scopes
        .get_mut(&root)
        .ok_or(TrackerError::Configuration {
            description: format!("no state scopes recorded at step {}", root),
        })?
        .push(scope);

    // Replay the window under the extended model.
    for i in k..=t {
        let prediction = predict::predict_step(config, &mut trial, i)?;
        associate::build_step(config, &mut trial, prior, source, i, &prediction)?;
        update::update_step(&mut trial, i)?;
    }
    smooth::smooth_step(config, &mut trial, t)?;

    let lambda_new = evidence(&trial, k)?;
    let accept = lambda_new - lambda_old > config.evidence_margin;

    log::info!(
        "model selection at t={}: log-evidence {:.4} (incumbent) vs {:.4} (extended) -> {}",
        t,
        lambda_old,
        lambda_new,
        if accept { "accept" } else { "reject" }
    );

    if accept {
        *state = trial;
    }
    state.metrics.model_trials += 1;
    if accept {
        state.metrics.model_accepted += 1;
    }
    Ok(accept)
}
