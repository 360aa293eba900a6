use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::data::buffer::{BufferSnapshot, DataError};
use crate::data::fabric::{DataFabric, DataUser};
use crate::error::DynError;
use crate::model::registry::{ModelEntry, ModelRegistry, RegistryError};

/// User-implemented training task, executed on its own thread whenever its
/// trigger fires.
///
/// Inside `train`, pull consumer snapshots through the session *before*
/// acquiring any training view: snapshots copy under a brief buffer lock and
/// never wait on the interaction thread, which keeps the global lock order
/// intact. Entries touched through [`TrainerSession::model`] are published
/// automatically after `train` returns.
pub trait Trainer: Send {
    /// Called once when the trainer thread starts.
    fn setup(&mut self, session: &mut TrainerSession) -> Result<(), DynError> {
        let _ = session;
        Ok(())
    }

    /// One training iteration.
    fn train(&mut self, session: &mut TrainerSession) -> Result<(), DynError>;

    /// Gate evaluated after the trigger fires; return false to skip this
    /// iteration (for example while a stream is still warming up).
    fn is_trainable(&mut self, session: &TrainerSession) -> bool {
        let _ = session;
        true
    }

    /// Called once when the trainer thread exits.
    fn teardown(&mut self) -> Result<(), DynError> {
        Ok(())
    }

    /// Persists trainer-private state (optimizer moments, counters) into
    /// `dir` during a state save.
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        let _ = dir;
        Ok(())
    }

    /// Restores trainer-private state from `dir`.
    fn load_from(&mut self, dir: &Path) -> Result<(), DynError> {
        let _ = dir;
        Ok(())
    }
}

/// Capabilities handed to a trainer: consumer lookups on the data fabric and
/// training-model lookups on the registry. Tracks which entries were touched
/// so the harness can publish them after the iteration.
pub struct TrainerSession {
    fabric: Arc<DataFabric>,
    registry: Arc<ModelRegistry>,
    touched: BTreeSet<String>,
}

impl TrainerSession {
    pub(crate) fn new(fabric: Arc<DataFabric>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            fabric,
            registry,
            touched: BTreeSet::new(),
        }
    }

    /// Consumer snapshot of a stream.
    pub fn data(&self, stream: &str) -> Result<BufferSnapshot, DataError> {
        Ok(self.fabric.user(stream)?.snapshot())
    }

    /// Consumer handle, for `count`/`count_added_since` style queries.
    pub fn data_user(&self, stream: &str) -> Result<DataUser, DataError> {
        self.fabric.user(stream)
    }

    /// Looks up a model entry and marks it for publishing after `train`.
    /// Acquire training views through the returned entry; when a trainer
    /// works with several entries it must take their views in name order.
    pub fn model(&mut self, name: &str) -> Result<Arc<ModelEntry>, RegistryError> {
        let entry = self.registry.get(name)?;
        self.touched.insert(name.to_string());
        Ok(entry)
    }

    /// Entry names accumulated by [`TrainerSession::model`].
    pub fn touched(&self) -> impl Iterator<Item = &str> {
        self.touched.iter().map(String::as_str)
    }

    /// Publishes every touched entry, in name order.
    pub(crate) fn publish_touched(&self) -> Result<(), DynError> {
        for name in &self.touched {
            let entry = self.registry.get(name)?;
            entry.publish()?;
        }
        Ok(())
    }
}
