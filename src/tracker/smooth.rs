//! Temporal smoothing
//!
//! Once the history is deeper than the backward window W, every
//! non-clutter target sends belief-update messages backwards along its
//! temporal edges, newest step first, for W hops; outgoing messages are
//! moment-matched so mixture size cannot explode in the backward
//! traversal. The forward pass then re-propagates the smoothed beliefs
//! toward the present over the same window, oldest step first.

use crate::graph::MessageReduction;

use super::config::TrackerConfig;
use super::errors::TrackerError;
use super::TrackerState;

/// Backward pass over the smoothing window.
pub(crate) fn smooth_step(
    config: &TrackerConfig,
    state: &mut TrackerState,
    t: usize,
) -> Result<(), TrackerError> {
    if t <= config.backward_window {
        return Ok(());
    }

    let slot_count = state.state_nodes.get(&t).map_or(0, |s| s.len());
    for slot in 1..slot_count {
        for j in 0..config.backward_window {
            let (from_t, to_t) = (t - j, t - j - 1);
            let Some((from, to)) = temporal_pair(state, from_t, to_t, slot) else {
                continue;
            };
            let outcome = state
                .graph
                .send_message(from, to, MessageReduction::MomentMatch)?;
            state.record_send(from, to, outcome)?;
        }
    }

    log::debug!("smooth({}): backward window of {} applied", t, config.backward_window);
    Ok(())
}

/// Forward re-propagation of smoothed beliefs over the window.
pub(crate) fn forward_step(
    config: &TrackerConfig,
    state: &mut TrackerState,
    t: usize,
) -> Result<(), TrackerError> {
    if t <= config.backward_window {
        return Ok(());
    }

    let slot_count = state.state_nodes.get(&t).map_or(0, |s| s.len());
    for slot in 1..slot_count {
        for j in (1..=config.backward_window).rev() {
            let (from_t, to_t) = (t - j, t - j + 1);
            let Some((from, to)) = temporal_pair(state, from_t, to_t, slot) else {
                continue;
            };
            let outcome = state
                .graph
                .send_message(from, to, MessageReduction::MomentMatch)?;
            state.record_send(from, to, outcome)?;
        }
    }

    log::debug!("forward({}): window of {} re-propagated", t, config.backward_window);
    Ok(())
}

/// Node pair for `slot` at two adjacent steps, when the target exists at
/// both (targets admitted by model selection have no clusters before
/// their birth step).
fn temporal_pair(
    state: &TrackerState,
    from_t: usize,
    to_t: usize,
    slot: usize,
) -> Option<(crate::graph::NodeId, crate::graph::NodeId)> {
    let from = state.state_nodes.get(&from_t)?.get(slot)?;
    let to = state.state_nodes.get(&to_t)?.get(slot)?;
    Some((*from, *to))
}
