use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::DynError;
use crate::persistence::Persistable;
use crate::runtime::clock::Clock;

use super::buffer::{BufferSnapshot, BufferSpec, DataBuffer, DataError, StepData};

const STREAM_RECORD_FILE: &str = "buffer.json";

/// Live state behind one stream: the buffer plus the virtual timestamps of
/// the most recent `capacity` collect calls.
struct StreamState {
    buffer: DataBuffer,
    stamps: VecDeque<f64>,
}

impl StreamState {
    fn record_stamp(&mut self, now: f64) {
        if self.stamps.len() >= self.buffer.capacity() {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
    }
}

/// On-disk form of a stream, written into persistence records.
#[derive(Serialize, Deserialize)]
struct StreamRecord {
    fields: Vec<String>,
    capacity: usize,
    rows: Vec<StepData>,
    stamps: Vec<f64>,
}

/// Registry of experience streams. The interaction side receives
/// [`DataCollector`] handles and trainers receive [`DataUser`] handles; both
/// share a single mutex per stream, so every access is exclusive and brief.
pub struct DataFabric {
    clock: Clock,
    streams: BTreeMap<String, Arc<Mutex<StreamState>>>,
}

impl DataFabric {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            streams: BTreeMap::new(),
        }
    }

    /// Declares a stream. Fails on duplicate names or an invalid spec.
    pub fn register(&mut self, name: impl Into<String>, spec: &BufferSpec) -> Result<(), DataError> {
        let name = name.into();
        if self.streams.contains_key(&name) {
            return Err(DataError::DuplicateStream(name));
        }
        let buffer = DataBuffer::new(spec)?;
        let capacity = buffer.capacity();
        self.streams.insert(
            name,
            Arc::new(Mutex::new(StreamState {
                buffer,
                stamps: VecDeque::with_capacity(capacity),
            })),
        );
        Ok(())
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Producer endpoint for the interaction side.
    pub fn collector(&self, name: &str) -> Result<DataCollector, DataError> {
        let shared = self
            .streams
            .get(name)
            .ok_or_else(|| DataError::UnknownStream(name.to_string()))?;
        Ok(DataCollector {
            name: name.to_string(),
            clock: self.clock.clone(),
            shared: shared.clone(),
        })
    }

    /// Consumer endpoint for trainers.
    pub fn user(&self, name: &str) -> Result<DataUser, DataError> {
        let shared = self
            .streams
            .get(name)
            .ok_or_else(|| DataError::UnknownStream(name.to_string()))?;
        Ok(DataUser {
            name: name.to_string(),
            shared: shared.clone(),
        })
    }
}

/// Producer handle: appends tuples atomically under the stream mutex.
#[derive(Clone)]
pub struct DataCollector {
    name: String,
    clock: Clock,
    shared: Arc<Mutex<StreamState>>,
}

impl DataCollector {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends one tuple. The tuple's field set must equal the declared
    /// field set; mismatches are reported synchronously and are not fatal.
    pub fn collect(&self, data: StepData) -> Result<(), DataError> {
        let now = self.clock.virtual_now();
        let mut state = self.shared.lock().unwrap();
        state.buffer.push(data)?;
        state.record_stamp(now);
        Ok(())
    }
}

/// Consumer handle: pulls independent snapshots of the stream.
#[derive(Clone)]
pub struct DataUser {
    name: String,
    shared: Arc<Mutex<StreamState>>,
}

impl DataUser {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies the resident tuples out. The snapshot is independent of
    /// subsequent writes.
    pub fn snapshot(&self) -> BufferSnapshot {
        self.shared.lock().unwrap().buffer.snapshot()
    }

    /// Current number of resident tuples.
    pub fn count(&self) -> usize {
        self.shared.lock().unwrap().buffer.len()
    }

    /// Number of collect calls at or after the given virtual timestamp,
    /// bounded by the stream capacity.
    pub fn count_added_since(&self, virtual_ts: f64) -> usize {
        let state = self.shared.lock().unwrap();
        state
            .stamps
            .iter()
            .rev()
            .take_while(|stamp| **stamp >= virtual_ts)
            .count()
    }
}

impl Persistable for DataUser {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::create_dir_all(dir).map_err(|source| DataError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(STREAM_RECORD_FILE);
        let state = self.shared.lock().unwrap();
        let record = StreamRecord {
            fields: state.buffer.fields().map(str::to_string).collect(),
            capacity: state.buffer.capacity(),
            rows: state.buffer.rows().cloned().collect(),
            stamps: state.stamps.iter().copied().collect(),
        };
        let encoded = serde_json::to_vec_pretty(&record).map_err(|source| DataError::Corrupt {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, encoded).map_err(|source| DataError::Io { path, source })?;
        Ok(())
    }

    fn load_from(&self, dir: &Path) -> Result<(), DynError> {
        let path = dir.join(STREAM_RECORD_FILE);
        let raw = fs::read(&path).map_err(|source| DataError::Io {
            path: path.clone(),
            source,
        })?;
        let record: StreamRecord =
            serde_json::from_slice(&raw).map_err(|source| DataError::Corrupt { path, source })?;
        let mut state = self.shared.lock().unwrap();
        state.buffer.restore(record.rows)?;
        let capacity = state.buffer.capacity();
        state.stamps = record
            .stamps
            .into_iter()
            .take(capacity)
            .collect();
        Ok(())
    }
}
