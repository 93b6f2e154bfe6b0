/*!
# Canopus - recursive multi-target Bayesian tracking

A factor-graph tracker for an unknown, time-varying number of targets.
Noisy position-like measurements from several fixed sensors are fused into
per-target posterior beliefs represented as canonical-form Gaussian
mixtures on a cluster graph; data association is handled by
conditional linear Gaussian factors over discrete association variables,
and new targets are admitted by comparing model log-evidence.

## Features

- Gaussian mixture algebra in canonical (information) form: product,
  quotient, marginalisation, conditioning, moment matching, pruning and
  merging
- Cluster graph with belief-update propagation (BUP): cached message
  cancellation, forward filtering, backward smoothing
- Per-sensor validation gating and conditional-linear-Gaussian
  association factors with a dedicated clutter target
- Model selection by windowed evidence comparison on a cloned state

## Modules

- [`factors`] - the four concrete factor kinds and their algebra
- [`graph`] - cluster nodes, sepsets and the BUP send primitive
- [`tracker`] - the per-step pipeline and its configuration
- [`common`] - variable allocation, scopes, numerical kernels

## Example

```no_run
use canopus::tracker::{
    InMemorySource, LaunchState, MotionModel, SensorModel, Tracker, TrackerConfig,
};
use nalgebra::DVector;

let config = TrackerConfig::builder()
    .dimensions(6, 2)
    .motion(MotionModel::constant_acceleration_2d(1.0, 0.1))
    .sensor(SensorModel::position_sensor(6, &[0, 3], 1.0))
    .clutter_prior(LaunchState::broad(DVector::zeros(6), 1e4))
    .launch_state(LaunchState::broad(DVector::zeros(6), 10.0))
    .output_indices(vec![0, 3])
    .build()
    .unwrap();

let source = InMemorySource::single_sensor(vec![
    vec![],
    vec![DVector::from_row_slice(&[0.5, 0.5])],
    vec![DVector::from_row_slice(&[1.1, 0.9])],
]);

let mut tracker = Tracker::new(config).unwrap();
let reports = tracker.run(&source).unwrap();
for report in &reports {
    println!("{}", report.to_line());
}
```
*/

pub mod common;
pub mod factors;
pub mod graph;
pub mod tracker;

pub use factors::{
    ConditionalGaussian, DiscreteFactor, Factor, FactorError, GaussianFactor, GaussianMixture,
    ReductionParams,
};
pub use tracker::{Tracker, TrackerConfig, TrackerError};
