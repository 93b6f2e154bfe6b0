//! Command-line tracking driver
//!
//! Loads a JSON scenario description plus whitespace-separated per-sensor
//! measurement files (`sensor_<i>.txt`, one line per time step) and
//! streams extraction reports to stdout, one `time;identity;...;mass`
//! line per posterior component.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use nalgebra::DVector;
use serde::Deserialize;

use canopus::tracker::{
    InMemorySource, LaunchState, MotionModel, SensorModel, Tracker, TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario description (JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Directory containing sensor_<i>.txt measurement files
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Gaussian prior as it appears in scenario files.
#[derive(Debug, Deserialize)]
struct PriorSpec {
    mean: Vec<f64>,
    variance: f64,
}

impl PriorSpec {
    fn to_launch_state(&self) -> LaunchState {
        LaunchState::broad(DVector::from_vec(self.mean.clone()), self.variance)
    }
}

/// JSON scenario description.
#[derive(Debug, Deserialize)]
struct ScenarioSpec {
    state_dim: usize,
    meas_dim: usize,
    #[serde(default = "default_time_step")]
    time_step: f64,
    process_noise_variance: f64,
    measurement_noise_variance: f64,
    /// State indices each position sensor reads.
    sensor_indices: Vec<usize>,
    sensor_count: usize,
    clutter: PriorSpec,
    #[serde(default)]
    launches: Vec<PriorSpec>,
    new_target: PriorSpec,
    max_components: usize,
    /// Linear weight floor; stored internally in log space.
    prune_threshold: f64,
    merge_distance: f64,
    validation_gate: f64,
    backward_window: usize,
    #[serde(default)]
    evidence_margin: f64,
    #[serde(default)]
    sensor_time_offset: usize,
    output_indices: Vec<usize>,
}

fn default_time_step() -> f64 {
    1.0
}

fn build_config(spec: &ScenarioSpec) -> Result<TrackerConfig, Box<dyn std::error::Error>> {
    let mut builder = TrackerConfig::builder()
        .dimensions(spec.state_dim, spec.meas_dim)
        .time_step(spec.time_step)
        .motion(MotionModel::constant_acceleration_2d(
            spec.time_step,
            spec.process_noise_variance,
        ))
        .clutter_prior(spec.clutter.to_launch_state())
        .new_target_prior(spec.new_target.to_launch_state())
        .mixture_bounds(
            spec.max_components,
            spec.prune_threshold.ln(),
            spec.merge_distance,
        )
        .validation_gate(spec.validation_gate)
        .backward_window(spec.backward_window)
        .evidence_margin(spec.evidence_margin)
        .sensor_time_offset(spec.sensor_time_offset)
        .output_indices(spec.output_indices.clone());

    for _ in 0..spec.sensor_count {
        builder = builder.sensor(SensorModel::position_sensor(
            spec.state_dim,
            &spec.sensor_indices,
            spec.measurement_noise_variance,
        ));
    }
    for launch in &spec.launches {
        builder = builder.launch_state(launch.to_launch_state());
    }

    Ok(builder.build()?)
}

/// Read one sensor file: each line is a time step of whitespace-separated
/// floats, chunked into d_z-vectors. A short trailing chunk is rejected.
fn load_sensor_file(
    path: &Path,
    meas_dim: usize,
) -> Result<Vec<Vec<DVector<f64>>>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let mut steps = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| format!("{}:{}: {}", path.display(), line_no + 1, e))?;
        if values.len() % meas_dim != 0 {
            return Err(format!(
                "{}:{}: {} values is not a multiple of the measurement dimension {}",
                path.display(),
                line_no + 1,
                values.len(),
                meas_dim
            )
            .into());
        }
        steps.push(
            values
                .chunks(meas_dim)
                .map(DVector::from_row_slice)
                .collect(),
        );
    }
    Ok(steps)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let spec: ScenarioSpec = serde_json::from_str(&fs::read_to_string(&args.scenario)?)?;
    let config = build_config(&spec)?;

    let mut per_sensor = Vec::with_capacity(spec.sensor_count);
    for i in 0..spec.sensor_count {
        let path = args.data_dir.join(format!("sensor_{}.txt", i));
        per_sensor.push(load_sensor_file(&path, spec.meas_dim)?);
    }
    let source = InMemorySource::new(per_sensor);

    let mut tracker = Tracker::new(config)?;
    let reports = tracker.run(&source)?;
    for report in &reports {
        println!("{}", report.to_line());
    }

    log::info!("emitted {} reports", reports.len());
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
