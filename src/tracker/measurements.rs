//! Measurement source capability
//!
//! The core never touches files; it consumes anything that can answer
//! "which d_z-vectors did sensor s report at step t". Out-of-range
//! queries yield an empty slice, which matters because the configured
//! sensor time offset can push queries past the recorded horizon.

use nalgebra::DVector;

/// Supplier of per-sensor, per-step measurement sets.
pub trait MeasurementSource {
    /// Measurement vectors from `sensor` at `time`; empty when out of
    /// range.
    fn points(&self, sensor: usize, time: usize) -> &[DVector<f64>];

    /// Number of recorded time steps.
    fn time_step_count(&self) -> usize;
}

/// Measurements held in memory, indexed `[sensor][time][measurement]`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    per_sensor: Vec<Vec<Vec<DVector<f64>>>>,
}

impl InMemorySource {
    pub fn new(per_sensor: Vec<Vec<Vec<DVector<f64>>>>) -> Self {
        Self { per_sensor }
    }

    /// Single-sensor convenience constructor.
    pub fn single_sensor(steps: Vec<Vec<DVector<f64>>>) -> Self {
        Self {
            per_sensor: vec![steps],
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.per_sensor.len()
    }
}

impl MeasurementSource for InMemorySource {
    fn points(&self, sensor: usize, time: usize) -> &[DVector<f64>] {
        self.per_sensor
            .get(sensor)
            .and_then(|steps| steps.get(time))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn time_step_count(&self) -> usize {
        self.per_sensor
            .iter()
            .map(|steps| steps.len())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_source() {
        let z = |a: f64, b: f64| DVector::from_row_slice(&[a, b]);
        let source = InMemorySource::single_sensor(vec![
            vec![z(0.0, 0.0)],
            vec![z(1.0, 1.0), z(2.0, 2.0)],
        ]);

        assert_eq!(source.time_step_count(), 2);
        assert_eq!(source.points(0, 1).len(), 2);
        assert!(source.points(0, 5).is_empty());
        assert!(source.points(3, 0).is_empty());
    }
}
