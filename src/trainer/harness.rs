use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DynError;
use crate::persistence::Persistable;
use crate::runtime::context::RuntimeContext;
use crate::runtime::trigger::Trigger;

use super::base::{Trainer, TrainerSession};

/// Back-off applied between trigger polls so an idle trainer does not spin.
pub const DEFAULT_TRAINER_THROTTLE: Duration = Duration::from_millis(1);

const TRIGGER_RECORD_FILE: &str = "trigger.json";

#[derive(Serialize, Deserialize)]
struct TriggerRecord {
    trigger: Trigger,
}

/// Owns one trainer together with its trigger, throttle, and session.
/// The trainer thread drives this in a poll/train loop; the persistence
/// controller reaches it through a shared [`TrainerStateHandle`].
pub struct TrainerHarness {
    name: String,
    trainer: Box<dyn Trainer>,
    trigger: Trigger,
    throttle: Duration,
    session: TrainerSession,
}

impl TrainerHarness {
    pub fn new(
        name: impl Into<String>,
        trainer: Box<dyn Trainer>,
        trigger: Trigger,
        throttle: Duration,
        session: TrainerSession,
    ) -> Self {
        Self {
            name: name.into(),
            trainer,
            trigger,
            throttle,
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Arms the trigger and runs the trainer's setup hook. Called once on
    /// the trainer thread before it reports ready.
    pub fn setup(&mut self, ctx: &RuntimeContext) -> Result<(), DynError> {
        self.trigger.arm(ctx.clock().virtual_now());
        self.trainer.setup(&mut self.session)
    }

    /// Polls the trigger and, when it fires and the trainer is trainable,
    /// runs one iteration followed by a publish of every touched entry.
    /// Returns whether an iteration ran.
    pub fn run_iteration(&mut self, ctx: &RuntimeContext) -> Result<bool, DynError> {
        let now = ctx.clock().virtual_now();
        if !self.trigger.poll(now) {
            return Ok(false);
        }
        if !self.trainer.is_trainable(&self.session) {
            return Ok(false);
        }
        debug!(trainer = %self.name, "training iteration");
        self.trainer.train(&mut self.session)?;
        self.session.publish_touched()?;
        Ok(true)
    }

    pub fn teardown(&mut self) -> Result<(), DynError> {
        self.trainer.teardown()
    }
}

/// Shared handle registered with the state store; serializes the trigger
/// alongside any trainer-private state.
#[derive(Clone)]
pub struct TrainerStateHandle {
    inner: Arc<Mutex<TrainerHarness>>,
}

impl TrainerStateHandle {
    pub fn new(inner: Arc<Mutex<TrainerHarness>>) -> Self {
        Self { inner }
    }
}

impl Persistable for TrainerStateHandle {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::create_dir_all(dir)?;
        let harness = self.inner.lock().unwrap();
        let record = TriggerRecord {
            trigger: harness.trigger.clone(),
        };
        fs::write(
            dir.join(TRIGGER_RECORD_FILE),
            serde_json::to_vec_pretty(&record)?,
        )?;
        harness.trainer.save_to(dir)
    }

    fn load_from(&self, dir: &Path) -> Result<(), DynError> {
        let mut harness = self.inner.lock().unwrap();
        let path = dir.join(TRIGGER_RECORD_FILE);
        let raw = fs::read(&path)?;
        let record: TriggerRecord = serde_json::from_slice(&raw)?;
        harness.trigger = record.trigger;
        harness.trainer.load_from(dir)
    }
}
