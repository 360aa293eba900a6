use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem::{
    BufferSpec, Clock, ComponentKind, DataFabric, DynError, Manifest, Model, ModelEntry,
    PersistError, StateStore, StepData, MANIFEST_FILE,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CounterModel {
    count: u64,
}

impl Model for CounterModel {
    fn save_to(&self, dir: &Path) -> Result<(), DynError> {
        fs::write(dir.join("counter.json"), serde_json::to_vec(self)?)?;
        Ok(())
    }

    fn load_from(&mut self, dir: &Path) -> Result<(), DynError> {
        let raw = fs::read(dir.join("counter.json"))?;
        *self = serde_json::from_slice(&raw)?;
        Ok(())
    }

    fn copy_params_to(&self, other: &mut dyn Model) -> Result<(), DynError> {
        let target = other
            .as_any_mut()
            .downcast_mut::<CounterModel>()
            .ok_or("publish target is not a CounterModel")?;
        target.count = self.count;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Fixture {
    _root: TempDir,
    store: StateStore,
    fabric: DataFabric,
    entry: Arc<ModelEntry>,
}

fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let mut store = StateStore::new(root.path(), 0).unwrap();
    let mut fabric = DataFabric::new(Clock::new());
    fabric
        .register("steps", &BufferSpec::fifo(["n"], 8))
        .unwrap();
    let entry = Arc::new(ModelEntry::new(
        "counter",
        Box::new(CounterModel { count: 0 }),
        Some(Box::new(CounterModel { count: 0 })),
    ));
    store
        .register(ComponentKind::Models, "counter", entry.clone())
        .unwrap();
    store
        .register(
            ComponentKind::Buffers,
            "steps",
            Arc::new(fabric.user("steps").unwrap()),
        )
        .unwrap();
    Fixture {
        _root: root,
        store,
        fabric,
        entry,
    }
}

fn set_count(entry: &ModelEntry, count: u64) {
    entry
        .training_view()
        .as_any_mut()
        .downcast_mut::<CounterModel>()
        .unwrap()
        .count = count;
    entry.publish().unwrap();
}

fn read_manifest(record: &Path) -> Manifest {
    serde_json::from_slice(&fs::read(record.join(MANIFEST_FILE)).unwrap()).unwrap()
}

#[test]
fn save_and_load_round_trip_restores_state() {
    let fix = fixture();
    let collector = fix.fabric.collector("steps").unwrap();
    for n in 0..5i64 {
        collector.collect(StepData::new().with("n", n)).unwrap();
    }
    set_count(&fix.entry, 42);

    let record = fix.store.save(12.5).unwrap();
    let manifest = read_manifest(&record);
    assert_eq!(manifest.schema, 1);
    assert_eq!(manifest.virtual_time, 12.5);
    assert!(manifest.components.contains(&"models/counter".to_string()));
    assert!(manifest.components.contains(&"buffers/steps".to_string()));

    // Diverge, then restore.
    set_count(&fix.entry, 99);
    for n in 5..8i64 {
        collector.collect(StepData::new().with("n", n)).unwrap();
    }
    let loaded = fix.store.load(&record).unwrap();
    assert_eq!(loaded.virtual_time, 12.5);

    let view = fix.entry.inference_view().unwrap();
    let model = view.model().as_any().downcast_ref::<CounterModel>().unwrap();
    assert_eq!(model.count, 42);
    drop(view);

    let snapshot = fix.fabric.user("steps").unwrap().snapshot();
    let values: Vec<i64> = snapshot
        .column("n")
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[test]
fn two_saves_without_mutation_are_byte_equivalent() {
    let fix = fixture();
    set_count(&fix.entry, 7);
    let first = fix.store.save(3.0).unwrap();
    let second = fix.store.save(3.0).unwrap();
    assert_ne!(first, second);
    assert_eq!(dir_contents(&first), dir_contents(&second));
}

fn dir_contents(record: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files = Vec::new();
    collect_files(record, record, &mut files);
    files.sort();
    files
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let relative = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
            out.push((relative, fs::read(&path).unwrap()));
        }
    }
}

#[test]
fn retention_keeps_only_the_newest_records() {
    let root = TempDir::new().unwrap();
    let mut store = StateStore::new(root.path(), 2).unwrap();
    let entry = Arc::new(ModelEntry::new(
        "counter",
        Box::new(CounterModel { count: 0 }),
        Some(Box::new(CounterModel { count: 0 })),
    ));
    store
        .register(ComponentKind::Models, "counter", entry)
        .unwrap();

    let first = store.save(1.0).unwrap();
    let second = store.save(2.0).unwrap();
    let third = store.save(3.0).unwrap();

    let mut remaining: Vec<PathBuf> = fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    remaining.sort();
    assert_eq!(remaining, {
        let mut expected = vec![second.clone(), third.clone()];
        expected.sort();
        expected
    });
    assert!(!first.exists());
}

#[test]
fn partial_records_are_ignored_when_resolving() {
    let fix = fixture();
    set_count(&fix.entry, 5);
    let complete = fix.store.save(1.0).unwrap();

    // A newer directory without a manifest must not win.
    let partial = fix.store.root().join("99990101T000000Z");
    fs::create_dir(&partial).unwrap();
    let resolved = fix.store.resolve_record(fix.store.root()).unwrap();
    assert_eq!(resolved, complete);

    assert!(matches!(
        fix.store.load(&partial),
        Err(PersistError::PartialRecord(_))
    ));
}

#[test]
fn unsupported_schema_versions_are_rejected() {
    let fix = fixture();
    let record = fix.store.save(1.0).unwrap();
    let manifest_path = record.join(MANIFEST_FILE);
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
    manifest["schema"] = serde_json::json!(99);
    fs::write(&manifest_path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    assert!(matches!(
        fix.store.load(&record),
        Err(PersistError::SchemaVersion { found: 99, .. })
    ));
}

#[test]
fn resolve_accepts_a_record_directory_directly() {
    let fix = fixture();
    let record = fix.store.save(4.0).unwrap();
    assert_eq!(fix.store.resolve_record(&record).unwrap(), record);
}

#[test]
fn duplicate_registration_is_rejected() {
    let fix = fixture();
    let mut store = fix.store;
    let err = store
        .register(
            ComponentKind::Buffers,
            "steps",
            Arc::new(fix.fabric.user("steps").unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, PersistError::Duplicate { .. }));
}
