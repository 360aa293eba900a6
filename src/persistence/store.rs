use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::DynError;

/// Schema version written into every record manifest.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Manifest file that marks a record as complete.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Record directory names encode the UTC capture instant.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const TMP_PREFIX: &str = ".tmp-";

/// Anything that can serialize its complete state into a directory and
/// restore it later. Registered handles are shared with running threads, so
/// both methods take `&self` and synchronize internally; the runtime is
/// paused for the duration of a save.
pub trait Persistable: Send + Sync {
    fn save_to(&self, dir: &Path) -> Result<(), DynError>;

    fn load_from(&self, dir: &Path) -> Result<(), DynError>;
}

/// Component kinds, each mapping to one subdirectory of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Models,
    Buffers,
    Trainers,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Models => "models",
            ComponentKind::Buffers => "buffers",
            ComponentKind::Trainers => "trainers",
        }
    }
}

/// Errors raised by the persistence controller.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state record {0} has no manifest")]
    PartialRecord(PathBuf),
    #[error("manifest at {path} failed to parse: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state schema {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
    #[error("no loadable state record under {0}")]
    NoRecords(PathBuf),
    #[error("could not pause the runtime for a state save")]
    PauseFailed,
    #[error("{kind}/{name} is already registered")]
    Duplicate { kind: &'static str, name: String },
    #[error("{kind}/{name} failed to {op}: {source}")]
    Component {
        kind: &'static str,
        name: String,
        op: &'static str,
        #[source]
        source: DynError,
    },
}

/// Contents of `manifest.json`. Its presence marks the record complete;
/// `virtual_time` re-anchors the virtual clock on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: u32,
    pub virtual_time: f64,
    pub components: Vec<String>,
}

struct Registration {
    kind: ComponentKind,
    name: String,
    target: Arc<dyn Persistable>,
}

/// Saves and restores every registered component against a directory tree
/// of timestamped records, with bounded retention.
///
/// Records are written under a temporary name and renamed into place once
/// the manifest exists, so a crashed save never leaves a record that load
/// would accept.
pub struct StateStore {
    root: PathBuf,
    max_keep: usize,
    registrations: Vec<Registration>,
}

impl StateStore {
    /// `max_keep == 0` disables retention pruning.
    pub fn new(root: impl Into<PathBuf>, max_keep: usize) -> Result<Self, PersistError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| PersistError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            max_keep,
            registrations: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registers a persistable under `kind/name`. Names are unique per kind.
    pub fn register(
        &mut self,
        kind: ComponentKind,
        name: impl Into<String>,
        target: Arc<dyn Persistable>,
    ) -> Result<(), PersistError> {
        let name = name.into();
        if self
            .registrations
            .iter()
            .any(|r| r.kind == kind && r.name == name)
        {
            return Err(PersistError::Duplicate {
                kind: kind.as_str(),
                name,
            });
        }
        self.registrations.push(Registration {
            kind,
            name,
            target,
        });
        Ok(())
    }

    pub fn component_names(&self) -> Vec<String> {
        self.registrations
            .iter()
            .map(|r| format!("{}/{}", r.kind.as_str(), r.name))
            .collect()
    }

    /// Captures every registered component into a new record under the
    /// configured root. Returns the committed record path.
    pub fn save(&self, virtual_time: f64) -> Result<PathBuf, PersistError> {
        self.save_under(&self.root, virtual_time)
    }

    /// Captures a record under an explicit root (the `save_state [path]`
    /// command). Retention applies only to the store's own root.
    pub fn save_under(&self, root: &Path, virtual_time: f64) -> Result<PathBuf, PersistError> {
        fs::create_dir_all(root).map_err(|source| PersistError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let name = self.unique_record_name(root);
        let tmp = root.join(format!("{TMP_PREFIX}{name}"));
        let committed = root.join(&name);

        fs::create_dir(&tmp).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        let result = self.write_record(&tmp, virtual_time);
        if let Err(err) = result {
            // Best-effort cleanup of the partial record.
            if let Err(cleanup) = fs::remove_dir_all(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial state record");
            }
            return Err(err);
        }
        fs::rename(&tmp, &committed).map_err(|source| PersistError::Io {
            path: committed.clone(),
            source,
        })?;
        info!(record = %committed.display(), "state record committed");
        if root == self.root.as_path() {
            self.prune();
        }
        Ok(committed)
    }

    fn write_record(&self, record: &Path, virtual_time: f64) -> Result<(), PersistError> {
        for registration in &self.registrations {
            let dir = record
                .join(registration.kind.as_str())
                .join(&registration.name);
            fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
                path: dir.clone(),
                source,
            })?;
            registration
                .target
                .save_to(&dir)
                .map_err(|source| PersistError::Component {
                    kind: registration.kind.as_str(),
                    name: registration.name.clone(),
                    op: "save",
                    source,
                })?;
        }
        let manifest = Manifest {
            schema: STATE_SCHEMA_VERSION,
            virtual_time,
            components: self.component_names(),
        };
        let path = record.join(MANIFEST_FILE);
        let encoded = serde_json::to_vec_pretty(&manifest).map_err(|source| {
            PersistError::Manifest {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, encoded).map_err(|source| PersistError::Io { path, source })?;
        Ok(())
    }

    fn unique_record_name(&self, root: &Path) -> String {
        let base = Utc::now().format(RECORD_TIMESTAMP_FORMAT).to_string();
        if !root.join(&base).exists() && !root.join(format!("{TMP_PREFIX}{base}")).exists() {
            return base;
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{base}-{counter}");
            if !root.join(&candidate).exists()
                && !root.join(format!("{TMP_PREFIX}{candidate}")).exists()
            {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Restores every registered component from `record`, in registration
    /// order, and returns its manifest. The record must be complete.
    pub fn load(&self, record: &Path) -> Result<Manifest, PersistError> {
        let manifest = read_manifest(record)?;
        for registration in &self.registrations {
            let dir = record
                .join(registration.kind.as_str())
                .join(&registration.name);
            registration
                .target
                .load_from(&dir)
                .map_err(|source| PersistError::Component {
                    kind: registration.kind.as_str(),
                    name: registration.name.clone(),
                    op: "load",
                    source,
                })?;
        }
        info!(record = %record.display(), "state record restored");
        Ok(manifest)
    }

    /// Resolves a `resume_from` path: a record directory is used directly; a
    /// root directory resolves to its newest complete record.
    pub fn resolve_record(&self, path: &Path) -> Result<PathBuf, PersistError> {
        if path.join(MANIFEST_FILE).is_file() {
            return Ok(path.to_path_buf());
        }
        let mut records = list_record_dirs(path)?;
        records.sort();
        while let Some(candidate) = records.pop() {
            match read_manifest(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(err) => {
                    warn!(record = %candidate.display(), error = %err, "skipping unreadable state record");
                }
            }
        }
        Err(PersistError::NoRecords(path.to_path_buf()))
    }

    /// Deletes the oldest records until at most `max_keep` remain. Failures
    /// are logged and skipped; retention never aborts a save.
    fn prune(&self) {
        if self.max_keep == 0 {
            return;
        }
        let mut records = match list_record_dirs(&self.root) {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to enumerate state records for retention");
                return;
            }
        };
        records.sort();
        while records.len() > self.max_keep {
            let oldest = records.remove(0);
            match fs::remove_dir_all(&oldest) {
                Ok(()) => info!(record = %oldest.display(), "pruned old state record"),
                Err(err) => {
                    warn!(record = %oldest.display(), error = %err, "failed to delete old state record");
                }
            }
        }
    }
}

fn read_manifest(record: &Path) -> Result<Manifest, PersistError> {
    let path = record.join(MANIFEST_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            return Err(PersistError::PartialRecord(record.to_path_buf()));
        }
        Err(source) => return Err(PersistError::Io { path, source }),
    };
    let manifest: Manifest =
        serde_json::from_slice(&raw).map_err(|source| PersistError::Manifest { path, source })?;
    if manifest.schema != STATE_SCHEMA_VERSION {
        return Err(PersistError::SchemaVersion {
            found: manifest.schema,
            expected: STATE_SCHEMA_VERSION,
        });
    }
    Ok(manifest)
}

fn list_record_dirs(root: &Path) -> Result<Vec<PathBuf>, PersistError> {
    let entries = fs::read_dir(root).map_err(|source| PersistError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PersistError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if path.is_dir() && !hidden {
            records.push(path);
        }
    }
    Ok(records)
}
