use std::any::Any;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tandem::{
    Agent, BufferSpec, DataCollector, DynError, Environment, FixedIntervalInteraction,
    Interaction, LaunchConfig, LifecycleState, Model, ModelRegistry, RuntimeBuilder, StepData,
    Trainer, TrainerSession, Trigger,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WeightModel {
    weight: f64,
}

impl Model for WeightModel {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::write(dir.join("weight.json"), serde_json::to_vec(self)?)?;
        Ok(())
    }

    fn load_from(&mut self, dir: &Path) -> Result<(), DynError> {
        let raw = fs::read(dir.join("weight.json"))?;
        *self = serde_json::from_slice(&raw)?;
        Ok(())
    }

    fn copy_params_to(&self, other: &mut dyn Model) -> Result<(), DynError> {
        other
            .as_any_mut()
            .downcast_mut::<WeightModel>()
            .ok_or("publish target is not a WeightModel")?
            .weight = self.weight;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SignalEnv {
    tick: u64,
}

impl Environment<f64, f64> for SignalEnv {
    fn observe(&mut self) -> Result<f64, DynError> {
        self.tick += 1;
        Ok((self.tick % 10) as f64)
    }

    fn affect(&mut self, _action: f64) -> Result<(), DynError> {
        Ok(())
    }
}

/// Streams observations and records the publish sequence it sees on every
/// inference read.
struct ObservingAgent {
    collector: DataCollector,
    models: Arc<ModelRegistry>,
    observed_seqs: Arc<Mutex<Vec<u64>>>,
}

impl Agent<f64, f64> for ObservingAgent {
    fn step(&mut self, observation: f64) -> Result<f64, DynError> {
        let entry = self.models.get("weights")?;
        let view = entry.inference_view()?;
        self.observed_seqs.lock().unwrap().push(view.publish_seq());
        let weight = view
            .model()
            .as_any()
            .downcast_ref::<WeightModel>()
            .ok_or("inference model is not a WeightModel")?
            .weight;
        drop(view);
        self.collector
            .collect(StepData::new().with("obs", observation))?;
        Ok(observation * weight)
    }
}

/// Nudges the weight toward the latest observation mean each firing.
struct MeanTrainer;

impl Trainer for MeanTrainer {
    fn is_trainable(&mut self, session: &TrainerSession) -> bool {
        session
            .data_user("experience")
            .map(|user| user.count() > 0)
            .unwrap_or(false)
    }

    fn train(&mut self, session: &mut TrainerSession) -> Result<(), DynError> {
        let snapshot = session.data("experience")?;
        let values: Vec<f64> = snapshot
            .column("obs")
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| v.as_f64())
            .collect();
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        let entry = session.model("weights")?;
        let mut view = entry.training_view();
        let model = view
            .as_any_mut()
            .downcast_mut::<WeightModel>()
            .ok_or("training model is not a WeightModel")?;
        model.weight = 0.9 * model.weight + 0.1 * mean;
        Ok(())
    }
}

/// Interaction at 50 Hz and training at 10 Hz for ~2 seconds: the agent must
/// observe a monotone publish sequence with plenty of distinct values.
#[test]
fn concurrent_training_publishes_while_the_agent_reads() {
    let root = TempDir::new().unwrap();
    let mut config = LaunchConfig::with_states_dir(root.path().join("states"));
    config.max_uptime_seconds = 2.5;
    let mut builder = RuntimeBuilder::new(config).unwrap();

    builder
        .add_buffer("experience", &BufferSpec::fifo(["obs"], 512))
        .unwrap();
    builder
        .add_model(
            "weights",
            Box::new(WeightModel { weight: 0.0 }),
            Some(Box::new(WeightModel { weight: 0.0 })),
        )
        .unwrap();

    let observed_seqs = Arc::new(Mutex::new(Vec::new()));
    let agent = ObservingAgent {
        collector: builder.collector("experience").unwrap(),
        models: builder.models(),
        observed_seqs: observed_seqs.clone(),
    };
    let interaction = Interaction::new(Box::new(agent), Box::new(SignalEnv { tick: 0 }));
    builder
        .set_interaction(Box::new(
            FixedIntervalInteraction::new(interaction, 0.02).unwrap(),
        ))
        .unwrap();
    builder
        .add_trainer("weights", Box::new(MeanTrainer), Trigger::every(0.1))
        .unwrap();

    let orchestrator = builder.build().unwrap();
    let handle = orchestrator.handle();
    orchestrator.run().unwrap();
    assert_eq!(handle.state(), LifecycleState::Stopped);

    let seqs = observed_seqs.lock().unwrap().clone();
    assert!(seqs.len() > 50, "expected ~100 reads, got {}", seqs.len());
    for window in seqs.windows(2) {
        assert!(window[1] >= window[0], "publish_seq went backwards");
    }
    let distinct: BTreeSet<u64> = seqs.iter().copied().collect();
    assert!(
        distinct.len() >= 15,
        "expected at least 15 distinct publishes, got {}",
        distinct.len()
    );
}
