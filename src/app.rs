//! Reference launcher: loads a configuration file, assembles a small probe
//! runtime (a counter environment, a tracking agent, and a mean trainer),
//! and runs it until shutdown. Exit codes: 0 on a normal shutdown, 1 on a
//! fatal runtime error, 2 on a configuration error.

use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::builder::RuntimeBuilder;
use crate::config::LaunchConfig;
use crate::data::buffer::{BufferSpec, StepData};
use crate::data::fabric::DataCollector;
use crate::error::DynError;
use crate::interaction::agent::{Agent, Environment};
use crate::interaction::core::Interaction;
use crate::interaction::paced::FixedIntervalInteraction;
use crate::model::interface::Model;
use crate::model::registry::ModelRegistry;
use crate::orchestrator::control::RunError;
use crate::runtime::trigger::Trigger;
use crate::trainer::base::{Trainer, TrainerSession};

const PROBE_STREAM: &str = "probe";
const PROBE_MODEL: &str = "mean";

/// Concurrent inference and learning runtime.
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Interaction interval of the probe loop, in seconds
    #[arg(long, default_value_t = 0.1)]
    interval: f64,

    /// Training cadence of the probe trainer, in seconds
    #[arg(long, default_value_t = 1.0)]
    train_interval: f64,
}

/// Launcher entry point; returns the process exit code.
pub fn run() -> i32 {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    let config = match LaunchConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err}");
            return 2;
        }
    };
    match launch_probe(config, args.interval, args.train_interval) {
        Ok(()) => 0,
        Err(err) => {
            let code = err.exit_code();
            match code {
                2 => error!("configuration error: {err}"),
                _ => error!("runtime failed: {err}"),
            }
            code
        }
    }
}

fn launch_probe(config: LaunchConfig, interval: f64, train_interval: f64) -> Result<(), RunError> {
    let mut builder = RuntimeBuilder::new(config)?;
    builder.add_buffer(PROBE_STREAM, &BufferSpec::fifo(["value", "step"], 256))?;
    builder.add_model(
        PROBE_MODEL,
        Box::new(ScalarModel::default()),
        Some(Box::new(ScalarModel::default())),
    )?;

    let agent = TrackingAgent::new(builder.collector(PROBE_STREAM)?, builder.models());
    let interaction = Interaction::new(Box::new(agent), Box::new(CounterEnvironment::default()));
    let driver = FixedIntervalInteraction::new(interaction, interval)
        .map_err(|err| crate::config::ConfigError::invalid("interval", err.to_string()))?;
    builder.set_interaction(Box::new(driver))?;
    builder.add_trainer(
        PROBE_MODEL,
        Box::new(MeanTrainer::default()),
        Trigger::every(train_interval),
    )?;

    builder.build()?.run()
}

/// Scalar parameter container used by the probe assembly.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScalarModel {
    pub value: f64,
}

impl Model for ScalarModel {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::write(dir.join("scalar.json"), serde_json::to_vec(self)?)?;
        Ok(())
    }

    fn load_from(&mut self, dir: &Path) -> Result<(), DynError> {
        let raw = fs::read(dir.join("scalar.json"))?;
        *self = serde_json::from_slice(&raw)?;
        Ok(())
    }

    fn copy_params_to(&self, other: &mut dyn Model) -> Result<(), DynError> {
        let target = other
            .as_any_mut()
            .downcast_mut::<ScalarModel>()
            .ok_or("publish target is not a ScalarModel")?;
        target.value = self.value;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Emits a slowly drifting counter as the observation.
#[derive(Debug, Default)]
struct CounterEnvironment {
    step: u64,
}

impl Environment<f64, f64> for CounterEnvironment {
    fn observe(&mut self) -> Result<f64, DynError> {
        self.step += 1;
        // Deterministic wobble keeps the mean moving without an RNG.
        Ok((self.step % 32) as f64 + (self.step as f64 * 0.1).sin())
    }

    fn affect(&mut self, _action: f64) -> Result<(), DynError> {
        Ok(())
    }
}

/// Reads the published mean and records each observation into the stream.
struct TrackingAgent {
    collector: DataCollector,
    models: Arc<ModelRegistry>,
    step: u64,
}

impl TrackingAgent {
    fn new(collector: DataCollector, models: Arc<ModelRegistry>) -> Self {
        Self {
            collector,
            models,
            step: 0,
        }
    }
}

impl Agent<f64, f64> for TrackingAgent {
    fn step(&mut self, observation: f64) -> Result<f64, DynError> {
        self.step += 1;
        let mean = {
            let entry = self.models.get(PROBE_MODEL)?;
            let view = entry.inference_view()?;
            match view.model().as_any().downcast_ref::<ScalarModel>() {
                Some(model) => model.value,
                None => return Err("inference model is not a ScalarModel".into()),
            }
        };
        self.collector.collect(
            StepData::new()
                .with("value", observation)
                .with("step", self.step),
        )?;
        Ok(observation - mean)
    }
}

/// Averages the collected values into the scalar model.
#[derive(Debug, Default)]
struct MeanTrainer;

impl Trainer for MeanTrainer {
    fn is_trainable(&mut self, session: &TrainerSession) -> bool {
        session
            .data_user(PROBE_STREAM)
            .map(|user| user.count() > 0)
            .unwrap_or(false)
    }

    fn train(&mut self, session: &mut TrainerSession) -> Result<(), DynError> {
        let snapshot = session.data(PROBE_STREAM)?;
        let values = snapshot.column("value").unwrap_or(&[]);
        let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
        let mean = if values.is_empty() {
            0.0
        } else {
            sum / values.len() as f64
        };
        let entry = session.model(PROBE_MODEL)?;
        let mut training = entry.training_view();
        match training.as_any_mut().downcast_mut::<ScalarModel>() {
            Some(model) => model.value = mean,
            None => return Err("training model is not a ScalarModel".into()),
        }
        Ok(())
    }
}
