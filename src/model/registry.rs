use std::collections::BTreeMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use thiserror::Error;

use crate::error::DynError;
use crate::persistence::Persistable;

use super::interface::Model;

/// Errors raised by the model registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model '{0}' is already registered")]
    DuplicateModel(String),
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("model '{0}' has no inference side")]
    NoInferenceSide(String),
}

/// Named pair of training and inference parameters sharing one identity.
///
/// The training side is mutated exclusively by its owning trainer through
/// [`ModelEntry::training_view`]. The inference side is read concurrently by
/// the interaction thread and only ever updated by [`ModelEntry::publish`],
/// which mirrors the training parameters under the write lock. Between
/// publishes, the inference side equals the training side as of the last
/// publish; readers never observe a partial copy.
pub struct ModelEntry {
    name: String,
    training: Mutex<Box<dyn Model>>,
    inference: Option<RwLock<Box<dyn Model>>>,
    publish_seq: AtomicU64,
}

impl ModelEntry {
    /// Creates an entry. Pass `None` for `inference` to declare a
    /// trainer-private entry that is never published.
    pub fn new(
        name: impl Into<String>,
        training: Box<dyn Model>,
        inference: Option<Box<dyn Model>>,
    ) -> Self {
        Self {
            name: name.into(),
            training: Mutex::new(training),
            inference: inference.map(RwLock::new),
            publish_seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_inference(&self) -> bool {
        self.inference.is_some()
    }

    /// Number of publishes so far. Monotonically increasing.
    pub fn publish_seq(&self) -> u64 {
        self.publish_seq.load(Ordering::Acquire)
    }

    /// Exclusive handle over the training parameters. The guard must be
    /// released before a publish of the same entry can proceed.
    pub fn training_view(&self) -> TrainingView<'_> {
        TrainingView {
            guard: self.training.lock().unwrap(),
        }
    }

    /// Shared read handle over the inference parameters, together with the
    /// publish sequence observed at acquisition. Do not call
    /// [`ModelEntry::publish`] while holding one of these.
    pub fn inference_view(&self) -> Result<InferenceView<'_>, RegistryError> {
        let lock = self
            .inference
            .as_ref()
            .ok_or_else(|| RegistryError::NoInferenceSide(self.name.clone()))?;
        let guard = lock.read().unwrap();
        let seq = self.publish_seq.load(Ordering::Acquire);
        Ok(InferenceView { guard, seq })
    }

    /// Mirrors the current training parameters into the inference side and
    /// increments the publish sequence. Blocks until no inference reader is
    /// active. A no-op for trainer-private entries.
    pub fn publish(&self) -> Result<u64, DynError> {
        let lock = match self.inference.as_ref() {
            Some(lock) => lock,
            None => return Ok(self.publish_seq()),
        };
        let training = self.training.lock().unwrap();
        let mut inference = lock.write().unwrap();
        training.copy_params_to(inference.as_mut())?;
        Ok(self.publish_seq.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

impl Persistable for ModelEntry {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::create_dir_all(dir)?;
        self.training.lock().unwrap().save_to(dir)
    }

    fn load_from(&self, dir: &Path) -> Result<(), DynError> {
        {
            let mut training = self.training.lock().unwrap();
            training.load_from(dir)?;
        }
        // Refresh the inference twin so restored parameters are visible to
        // the interaction side immediately.
        self.publish()?;
        Ok(())
    }
}

/// Exclusive guard over the training side of an entry.
pub struct TrainingView<'a> {
    guard: MutexGuard<'a, Box<dyn Model>>,
}

impl Deref for TrainingView<'_> {
    type Target = dyn Model;

    fn deref(&self) -> &Self::Target {
        self.guard.as_ref()
    }
}

impl DerefMut for TrainingView<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.as_mut()
    }
}

/// Shared read guard over the inference side of an entry.
pub struct InferenceView<'a> {
    guard: RwLockReadGuard<'a, Box<dyn Model>>,
    seq: u64,
}

impl InferenceView<'_> {
    pub fn model(&self) -> &dyn Model {
        self.guard.as_ref()
    }

    /// Publish sequence current when this view was acquired.
    pub fn publish_seq(&self) -> u64 {
        self.seq
    }
}

/// Registry mapping names to model entries.
///
/// The map itself is locked only for lookups and registration; entry-level
/// locks order after it, then training before inference, then any buffer
/// mutex. Every code path acquires locks in that order.
#[derive(Default)]
pub struct ModelRegistry {
    entries: RwLock<BTreeMap<String, Arc<ModelEntry>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ModelEntry) -> Result<Arc<ModelEntry>, RegistryError> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(entry.name()) {
            return Err(RegistryError::DuplicateModel(entry.name().to_string()));
        }
        let entry = Arc::new(entry);
        entries.insert(entry.name().to_string(), entry.clone());
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<ModelEntry>, RegistryError> {
        self.entries
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<Arc<ModelEntry>> {
        self.entries.read().unwrap().values().cloned().collect()
    }
}
