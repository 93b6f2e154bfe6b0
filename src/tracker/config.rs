//! Tracker configuration
//!
//! Decomposed configuration types in place of one monolithic parameter
//! struct: a motion model, per-sensor measurement models, the clutter and
//! launch priors, mixture-reduction bounds and the gating/smoothing/model
//! selection thresholds. A builder validates the combination once, so the
//! pipeline can assume consistent dimensions throughout.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::common::VariableId;
use crate::factors::{DiscreteFactor, FactorError, ReductionParams};

use super::errors::TrackerError;
use super::transforms::{AffineTransform, VectorTransform};

/// A Gaussian prior used for launches, the clutter target and
/// model-selection trials.
#[derive(Debug, Clone)]
pub struct LaunchState {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl LaunchState {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Self {
        Self { mean, covariance }
    }

    /// Broad isotropic prior centred at `mean`.
    pub fn broad(mean: DVector<f64>, variance: f64) -> Self {
        let d = mean.len();
        Self {
            covariance: DMatrix::identity(d, d) * variance,
            mean,
        }
    }
}

/// Motion model: a state-to-state transform plus process noise Q_R.
#[derive(Clone)]
pub struct MotionModel {
    pub transform: Arc<dyn VectorTransform>,
    pub noise: DMatrix<f64>,
}

impl MotionModel {
    pub fn new(transform: Arc<dyn VectorTransform>, noise: DMatrix<f64>) -> Self {
        Self { transform, noise }
    }

    /// Constant-acceleration planar motion with isotropic process noise.
    pub fn constant_acceleration_2d(dt: f64, noise_variance: f64) -> Self {
        Self {
            transform: Arc::new(AffineTransform::constant_acceleration_2d(dt)),
            noise: DMatrix::identity(6, 6) * noise_variance,
        }
    }

    #[inline]
    pub fn x_dim(&self) -> usize {
        self.noise.nrows()
    }
}

impl std::fmt::Debug for MotionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionModel")
            .field("noise", &self.noise)
            .finish_non_exhaustive()
    }
}

/// Sensor model: a state-to-measurement transform plus noise Q_Z.
#[derive(Clone)]
pub struct SensorModel {
    pub transform: Arc<dyn VectorTransform>,
    pub noise: DMatrix<f64>,
}

impl SensorModel {
    pub fn new(transform: Arc<dyn VectorTransform>, noise: DMatrix<f64>) -> Self {
        Self { transform, noise }
    }

    /// Position sensor reading the given state indices with isotropic
    /// noise.
    pub fn position_sensor(state_dim: usize, indices: &[usize], noise_variance: f64) -> Self {
        let d = indices.len();
        Self {
            transform: Arc::new(AffineTransform::projection(state_dim, indices)),
            noise: DMatrix::identity(d, d) * noise_variance,
        }
    }

    #[inline]
    pub fn z_dim(&self) -> usize {
        self.noise.nrows()
    }
}

impl std::fmt::Debug for SensorModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorModel")
            .field("noise", &self.noise)
            .finish_non_exhaustive()
    }
}

/// Supplier of association priors, one discrete factor per association
/// variable. The reference design is uniform over the gated candidate
/// set, but anything that can answer marginals over the hypothesis
/// domains plugs in here.
pub trait AssociationPrior: Send + Sync {
    fn marginals(
        &self,
        hypotheses: &[(VariableId, Vec<usize>)],
    ) -> Result<Vec<DiscreteFactor>, FactorError>;
}

/// Uniform prior over each candidate domain.
#[derive(Debug, Clone, Default)]
pub struct UniformAssociationPrior;

impl AssociationPrior for UniformAssociationPrior {
    fn marginals(
        &self,
        hypotheses: &[(VariableId, Vec<usize>)],
    ) -> Result<Vec<DiscreteFactor>, FactorError> {
        hypotheses
            .iter()
            .map(|(var, domain)| DiscreteFactor::uniform(*var, domain))
            .collect()
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// State dimension d_x.
    pub state_dim: usize,
    /// Measurement dimension d_z.
    pub meas_dim: usize,
    /// Sampling period Δt (informational; the motion transform already
    /// encodes it).
    pub time_step: f64,
    /// Motion model with process noise Q_R.
    pub motion: MotionModel,
    /// One measurement model per sensor.
    pub sensors: Vec<SensorModel>,
    /// Fixed broad prior recreated for the clutter target every step.
    pub clutter_prior: LaunchState,
    /// Priors for the targets seeded at step zero.
    pub launch_states: Vec<LaunchState>,
    /// Generic prior used when model selection trials a new target.
    pub new_target_prior: LaunchState,
    /// Mixture cap M*.
    pub max_components: usize,
    /// Log-mass pruning floor τ.
    pub prune_log_threshold: f64,
    /// Squared Mahalanobis merge radius δ.
    pub merge_distance: f64,
    /// Gate threshold γ: a measurement is a candidate for a target when
    /// its squared Mahalanobis distance in measurement space is ≤ γ
    /// (the gate is closed: the boundary is admitted).
    pub validation_gate: f64,
    /// Backward smoothing window W.
    pub backward_window: usize,
    /// Model-selection acceptance margin θ.
    pub evidence_margin: f64,
    /// Offset added to the time index of every measurement query.
    pub sensor_time_offset: usize,
    /// State indices reported by extraction.
    pub output_indices: Vec<usize>,
}

impl TrackerConfig {
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Reduction bounds handed to every mixture the tracker constructs.
    pub fn reduction_params(&self) -> ReductionParams {
        ReductionParams {
            max_components: self.max_components,
            prune_log_threshold: self.prune_log_threshold,
            merge_distance: self.merge_distance,
        }
    }

    #[inline]
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    fn validate(&self) -> Result<(), TrackerError> {
        let fail = |description: String| {
            Err(TrackerError::Configuration { description })
        };
        if self.state_dim == 0 || self.meas_dim == 0 {
            return fail("state and measurement dimensions must be nonzero".into());
        }
        if self.sensors.is_empty() {
            return fail("at least one sensor model is required".into());
        }
        if self.motion.x_dim() != self.state_dim {
            return fail(format!(
                "process noise is {}x{} but the state dimension is {}",
                self.motion.noise.nrows(),
                self.motion.noise.ncols(),
                self.state_dim
            ));
        }
        if self.motion.noise.clone().cholesky().is_none() {
            return fail("process noise Q_R must be positive definite".into());
        }
        for (i, sensor) in self.sensors.iter().enumerate() {
            if sensor.z_dim() != self.meas_dim {
                return fail(format!(
                    "sensor {} noise is {}x{} but the measurement dimension is {}",
                    i,
                    sensor.noise.nrows(),
                    sensor.noise.ncols(),
                    self.meas_dim
                ));
            }
            if sensor.noise.clone().cholesky().is_none() {
                return fail(format!("sensor {} noise Q_Z must be positive definite", i));
            }
        }
        for prior in std::iter::once(&self.clutter_prior)
            .chain(self.launch_states.iter())
            .chain(std::iter::once(&self.new_target_prior))
        {
            if prior.mean.len() != self.state_dim {
                return fail(format!(
                    "a prior mean has dimension {} but the state dimension is {}",
                    prior.mean.len(),
                    self.state_dim
                ));
            }
            if prior.covariance.clone().cholesky().is_none() {
                return fail("prior covariances must be positive definite".into());
            }
        }
        if self.max_components == 0 {
            return fail("the mixture cap must be at least one".into());
        }
        if self.validation_gate <= 0.0 {
            return fail("the validation gate must be positive".into());
        }
        if let Some(&bad) = self.output_indices.iter().find(|&&i| i >= self.state_dim) {
            return fail(format!(
                "output index {} exceeds the state dimension {}",
                bad, self.state_dim
            ));
        }
        Ok(())
    }
}

/// Builder for [`TrackerConfig`].
#[derive(Debug, Default)]
pub struct TrackerConfigBuilder {
    state_dim: Option<usize>,
    meas_dim: Option<usize>,
    time_step: Option<f64>,
    motion: Option<MotionModel>,
    sensors: Vec<SensorModel>,
    clutter_prior: Option<LaunchState>,
    launch_states: Vec<LaunchState>,
    new_target_prior: Option<LaunchState>,
    max_components: Option<usize>,
    prune_log_threshold: Option<f64>,
    merge_distance: Option<f64>,
    validation_gate: Option<f64>,
    backward_window: Option<usize>,
    evidence_margin: Option<f64>,
    sensor_time_offset: Option<usize>,
    output_indices: Option<Vec<usize>>,
}

impl TrackerConfigBuilder {
    pub fn dimensions(mut self, state_dim: usize, meas_dim: usize) -> Self {
        self.state_dim = Some(state_dim);
        self.meas_dim = Some(meas_dim);
        self
    }

    pub fn time_step(mut self, dt: f64) -> Self {
        self.time_step = Some(dt);
        self
    }

    pub fn motion(mut self, motion: MotionModel) -> Self {
        self.motion = Some(motion);
        self
    }

    pub fn sensor(mut self, sensor: SensorModel) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn sensors(mut self, sensors: Vec<SensorModel>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn clutter_prior(mut self, prior: LaunchState) -> Self {
        self.clutter_prior = Some(prior);
        self
    }

    pub fn launch_state(mut self, prior: LaunchState) -> Self {
        self.launch_states.push(prior);
        self
    }

    pub fn new_target_prior(mut self, prior: LaunchState) -> Self {
        self.new_target_prior = Some(prior);
        self
    }

    pub fn mixture_bounds(
        mut self,
        max_components: usize,
        prune_log_threshold: f64,
        merge_distance: f64,
    ) -> Self {
        self.max_components = Some(max_components);
        self.prune_log_threshold = Some(prune_log_threshold);
        self.merge_distance = Some(merge_distance);
        self
    }

    pub fn validation_gate(mut self, gate: f64) -> Self {
        self.validation_gate = Some(gate);
        self
    }

    pub fn backward_window(mut self, window: usize) -> Self {
        self.backward_window = Some(window);
        self
    }

    pub fn evidence_margin(mut self, margin: f64) -> Self {
        self.evidence_margin = Some(margin);
        self
    }

    pub fn sensor_time_offset(mut self, offset: usize) -> Self {
        self.sensor_time_offset = Some(offset);
        self
    }

    pub fn output_indices(mut self, indices: Vec<usize>) -> Self {
        self.output_indices = Some(indices);
        self
    }

    pub fn build(self) -> Result<TrackerConfig, TrackerError> {
        let missing = |what: &str| TrackerError::Configuration {
            description: format!("{} is required", what),
        };
        let motion = self.motion.ok_or_else(|| missing("a motion model"))?;
        let state_dim = self.state_dim.unwrap_or_else(|| motion.x_dim());
        let meas_dim = self
            .meas_dim
            .or_else(|| self.sensors.first().map(|s| s.z_dim()))
            .ok_or_else(|| missing("a measurement dimension or sensor model"))?;

        let clutter_prior = self
            .clutter_prior
            .unwrap_or_else(|| LaunchState::broad(DVector::zeros(state_dim), 1e6));
        let new_target_prior = self
            .new_target_prior
            .unwrap_or_else(|| clutter_prior.clone());

        let config = TrackerConfig {
            state_dim,
            meas_dim,
            time_step: self.time_step.unwrap_or(1.0),
            motion,
            sensors: self.sensors,
            clutter_prior,
            launch_states: self.launch_states,
            new_target_prior,
            max_components: self.max_components.unwrap_or(16),
            prune_log_threshold: self.prune_log_threshold.unwrap_or(1e-6_f64.ln()),
            merge_distance: self.merge_distance.unwrap_or(4.0),
            validation_gate: self.validation_gate.unwrap_or(9.21),
            backward_window: self.backward_window.unwrap_or(2),
            evidence_margin: self.evidence_margin.unwrap_or(0.0),
            sensor_time_offset: self.sensor_time_offset.unwrap_or(0),
            output_indices: self.output_indices.unwrap_or_else(|| vec![0, 2, 4]),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> TrackerConfigBuilder {
        TrackerConfig::builder()
            .dimensions(6, 2)
            .motion(MotionModel::constant_acceleration_2d(1.0, 0.1))
            .sensor(SensorModel::position_sensor(6, &[0, 3], 1.0))
            .clutter_prior(LaunchState::broad(DVector::zeros(6), 1e4))
            .output_indices(vec![0, 3])
    }

    #[test]
    fn test_builder_defaults() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.state_dim, 6);
        assert_eq!(config.meas_dim, 2);
        assert_eq!(config.sensor_count(), 1);
        assert_eq!(config.backward_window, 2);
        assert_eq!(config.sensor_time_offset, 0);
    }

    #[test]
    fn test_builder_requires_motion() {
        let result = TrackerConfig::builder()
            .sensor(SensorModel::position_sensor(6, &[0, 3], 1.0))
            .build();
        assert!(matches!(result, Err(TrackerError::Configuration { .. })));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let result = base_builder()
            .launch_state(LaunchState::broad(DVector::zeros(4), 1.0))
            .build();
        assert!(matches!(result, Err(TrackerError::Configuration { .. })));
    }

    #[test]
    fn test_output_index_out_of_range_rejected() {
        let result = base_builder().output_indices(vec![0, 9]).build();
        assert!(matches!(result, Err(TrackerError::Configuration { .. })));
    }

    #[test]
    fn test_uniform_association_prior() {
        let prior = UniformAssociationPrior;
        let factors = prior
            .marginals(&[(VariableId(7), vec![0, 2, 3])])
            .unwrap();
        assert_eq!(factors.len(), 1);
        assert!((factors[0].probability_of(2) - 1.0 / 3.0).abs() < 1e-12);
    }
}
