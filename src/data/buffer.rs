use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Euler-Mascheroni constant, used by the expected-survival-length formula.
const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

/// One tuple of named fields produced by the interaction loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepData(BTreeMap<String, Value>);

impl StepData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matches(&self, declared: &BTreeSet<String>) -> bool {
        self.0.len() == declared.len() && self.0.keys().all(|k| declared.contains(k))
    }
}

impl FromIterator<(String, Value)> for StepData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Errors raised by the data fabric.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("buffer capacity must be positive")]
    ZeroCapacity,
    #[error("tuple fields [{got}] do not match declared fields [{expected}]")]
    SchemaMismatch { expected: String, got: String },
    #[error("replace probability {0} must lie within [0.0, 1.0]")]
    InvalidProbability(f64),
    #[error("stream '{0}' is already registered")]
    DuplicateStream(String),
    #[error("unknown stream '{0}'")]
    UnknownStream(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stream record at {path} failed to parse: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Replacement policy applied once a buffer is full.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferPolicy {
    /// Oldest-out; insertion order is preserved.
    Fifo,
    /// A uniformly random resident slot is overwritten, gated by
    /// `replace_probability`. Insertion order is not preserved; the resident
    /// set is a deterministic function of the seed.
    RandomReplacement {
        seed: u64,
        replace_probability: f64,
    },
}

impl BufferPolicy {
    pub fn random(seed: u64) -> Self {
        BufferPolicy::RandomReplacement {
            seed,
            replace_probability: 1.0,
        }
    }

    pub fn random_with_probability(seed: u64, probability: f64) -> Result<Self, DataError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DataError::InvalidProbability(probability));
        }
        Ok(BufferPolicy::RandomReplacement {
            seed,
            replace_probability: probability,
        })
    }
}

/// Computes the replacement probability that gives entries an expected
/// survival of `survival_length` inserts in a full buffer of `capacity`
/// slots. The result is clamped to [0.0, 1.0].
pub fn replace_probability_for_survival(capacity: usize, survival_length: usize) -> f64 {
    if capacity == 0 || survival_length == 0 {
        return 1.0;
    }
    let n = capacity as f64;
    let p = n / survival_length as f64 * (n.ln() + EULER_MASCHERONI);
    p.clamp(0.0, 1.0)
}

/// Declared shape of a stream: field set, capacity, and replacement policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSpec {
    pub fields: Vec<String>,
    pub capacity: usize,
    pub policy: BufferPolicy,
}

impl BufferSpec {
    pub fn fifo<I, S>(fields: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            capacity,
            policy: BufferPolicy::Fifo,
        }
    }

    pub fn random_replacement<I, S>(fields: I, capacity: usize, seed: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            capacity,
            policy: BufferPolicy::random(seed),
        }
    }
}

/// Independent copy of a buffer's contents, organized per field. Safe to
/// read without holding any fabric lock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    len: usize,
    columns: BTreeMap<String, Vec<Value>>,
}

impl BufferSnapshot {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Values of one field across all resident tuples, in buffer order.
    pub fn column(&self, field: &str) -> Option<&[Value]> {
        self.columns.get(field).map(Vec::as_slice)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Bounded container for named-field tuples.
pub struct DataBuffer {
    fields: BTreeSet<String>,
    capacity: usize,
    policy: BufferPolicy,
    rows: VecDeque<StepData>,
    rng: Option<StdRng>,
}

impl DataBuffer {
    pub fn new(spec: &BufferSpec) -> Result<Self, DataError> {
        if spec.capacity == 0 {
            return Err(DataError::ZeroCapacity);
        }
        let rng = match spec.policy {
            BufferPolicy::Fifo => None,
            BufferPolicy::RandomReplacement {
                seed,
                replace_probability,
            } => {
                if !(0.0..=1.0).contains(&replace_probability) {
                    return Err(DataError::InvalidProbability(replace_probability));
                }
                Some(StdRng::seed_from_u64(seed))
            }
        };
        Ok(Self {
            fields: spec.fields.iter().cloned().collect(),
            capacity: spec.capacity,
            policy: spec.policy.clone(),
            rows: VecDeque::with_capacity(spec.capacity),
            rng,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Appends one tuple, applying the replacement policy when full.
    pub fn push(&mut self, data: StepData) -> Result<(), DataError> {
        if !data.matches(&self.fields) {
            return Err(DataError::SchemaMismatch {
                expected: join_names(self.fields.iter()),
                got: join_names(data.field_names()),
            });
        }
        if self.rows.len() < self.capacity {
            self.rows.push_back(data);
            return Ok(());
        }
        match &self.policy {
            BufferPolicy::Fifo => {
                self.rows.pop_front();
                self.rows.push_back(data);
            }
            BufferPolicy::RandomReplacement {
                replace_probability,
                ..
            } => {
                let rng = self.rng.as_mut().expect("random policy carries an rng");
                if rng.gen::<f64>() > *replace_probability {
                    return Ok(());
                }
                let slot = rng.gen_range(0..self.capacity);
                self.rows[slot] = data;
            }
        }
        Ok(())
    }

    /// Copies the resident tuples out as per-field columns.
    pub fn snapshot(&self) -> BufferSnapshot {
        let mut columns: BTreeMap<String, Vec<Value>> = self
            .fields
            .iter()
            .map(|f| (f.clone(), Vec::with_capacity(self.rows.len())))
            .collect();
        for row in &self.rows {
            for (field, column) in columns.iter_mut() {
                column.push(row.field(field).cloned().unwrap_or(Value::Null));
            }
        }
        BufferSnapshot {
            len: self.rows.len(),
            columns,
        }
    }

    /// Resident tuples in buffer order, for persistence.
    pub(crate) fn rows(&self) -> impl Iterator<Item = &StepData> {
        self.rows.iter()
    }

    /// Replaces the resident tuples from a persisted record. The replacement
    /// RNG is re-seeded from the declared seed; RNG state is not persisted.
    pub(crate) fn restore(&mut self, rows: Vec<StepData>) -> Result<(), DataError> {
        for row in &rows {
            if !row.matches(&self.fields) {
                return Err(DataError::SchemaMismatch {
                    expected: join_names(self.fields.iter()),
                    got: join_names(row.field_names()),
                });
            }
        }
        self.rows = rows.into_iter().take(self.capacity).collect();
        if let BufferPolicy::RandomReplacement { seed, .. } = self.policy {
            self.rng = Some(StdRng::seed_from_u64(seed));
        }
        Ok(())
    }
}

fn join_names<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for name in names {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(name.as_ref());
    }
    out
}
