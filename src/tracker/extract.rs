//! State extraction
//!
//! Marginalises every non-clutter cluster at a step onto its state scope
//! and emits one report per mixture component: time, target identity, the
//! mean projected onto the configured output indices, and the component's
//! mass. Reports are ordered by (time ascending, identity ascending, mass
//! descending) and render as one semicolon-separated line each.

use std::fmt::Write as _;

use serde::Serialize;

use super::config::TrackerConfig;
use super::errors::TrackerError;
use super::TrackerState;

/// One extracted mixture component of one target's posterior.
#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    /// Time step.
    pub time: usize,
    /// Target identity (never 0; clutter is not extracted).
    pub identity: usize,
    /// Posterior component mean, projected onto the configured indices.
    pub mean: Vec<f64>,
    /// Component mass.
    pub mass: f64,
}

impl TrackReport {
    /// Render as `time;identity;m0;m1;...;mass`.
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        let _ = write!(line, "{};{}", self.time, self.identity);
        for v in &self.mean {
            let _ = write!(line, ";{:.6}", v);
        }
        let _ = write!(line, ";{:.6e}", self.mass);
        line
    }
}

/// Sort key: time ascending, identity ascending, mass descending.
pub(crate) fn sort_reports(reports: &mut [TrackReport]) {
    reports.sort_by(|a, b| {
        (a.time, a.identity)
            .cmp(&(b.time, b.identity))
            .then_with(|| {
                b.mass
                    .partial_cmp(&a.mass)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}

pub(crate) fn extract_step(
    config: &TrackerConfig,
    state: &TrackerState,
    t: usize,
) -> Result<Vec<TrackReport>, TrackerError> {
    let slots = state.state_nodes.get(&t).map(Vec::as_slice).unwrap_or(&[]);
    let scopes = state.state_scopes.get(&t).map(Vec::as_slice).unwrap_or(&[]);

    let mut reports = Vec::new();
    for (slot, &id) in slots.iter().enumerate().skip(1) {
        let node = state.graph.node(id)?;
        let identity = node.identity().unwrap_or(slot);
        let marginal = node.marginalize(&scopes[slot])?;

        for comp in marginal.components() {
            let Ok(mean) = comp.mean() else {
                // A massless component has no moments to report.
                continue;
            };
            reports.push(TrackReport {
                time: t,
                identity,
                mean: config.output_indices.iter().map(|&i| mean[i]).collect(),
                mass: comp.mass(),
            });
        }
    }

    sort_reports(&mut reports);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_line_format() {
        let report = TrackReport {
            time: 3,
            identity: 1,
            mean: vec![1.25, -2.5],
            mass: 0.75,
        };
        let line = report.to_line();
        assert!(line.starts_with("3;1;1.250000;-2.500000;"));
        assert!(line.contains("7.5"));
    }

    #[test]
    fn test_sort_order() {
        let mut reports = vec![
            TrackReport { time: 2, identity: 1, mean: vec![], mass: 0.1 },
            TrackReport { time: 1, identity: 2, mean: vec![], mass: 0.9 },
            TrackReport { time: 1, identity: 1, mean: vec![], mass: 0.2 },
            TrackReport { time: 1, identity: 1, mean: vec![], mass: 0.8 },
        ];
        sort_reports(&mut reports);
        assert_eq!(
            reports
                .iter()
                .map(|r| (r.time, r.identity))
                .collect::<Vec<_>>(),
            vec![(1, 1), (1, 1), (1, 2), (2, 1)]
        );
        // Within a (time, identity) group, heavier components first
        assert!(reports[0].mass > reports[1].mass);
    }
}
