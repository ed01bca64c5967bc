//! End-to-end persistence and recovery tests: save/reload round trips, WAL
//! replay, segment rotation, full reset.

use std::path::Path;

use tempfile::tempdir;
use vectours::{Engine, EngineConfig, SearchParameters, Vector, MAX_SEGMENT_SIZE};

fn engine_at(path: &Path, dimension: usize) -> Engine {
    let mut engine = Engine::new(EngineConfig::new(path, dimension)).unwrap();
    engine.init_from_disk().unwrap();
    engine
}

fn ids_of(engine: &Engine, dimension: usize, top_k: usize) -> Vec<String> {
    let params = SearchParameters::new(vec![0.0; dimension]).top_k(top_k);
    engine
        .search(&params)
        .unwrap()
        .into_iter()
        .map(|result| result.id)
        .collect()
}

#[test]
fn insert_get_delete_visibility() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path(), 2);

    let vector = Vector::new("a", vec![1.0, 2.0]);
    engine.insert(vector.clone()).unwrap();
    assert_eq!(engine.get_vector("a").unwrap(), Some(vector));

    engine.delete("a").unwrap();
    assert_eq!(engine.get_vector("a").unwrap(), None);
}

#[test]
fn deleted_ids_leave_no_trace_in_scans() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path(), 1);

    engine.insert(Vector::new("x", vec![1.0])).unwrap();
    engine.delete("x").unwrap();

    assert_eq!(engine.get_vector("x").unwrap(), None);
    assert!(ids_of(&engine, 1, 10).is_empty());
    assert_eq!(engine.stats().live_vectors, 0);
}

#[test]
fn save_and_reload_roundtrip() {
    let dir = tempdir().unwrap();
    {
        let mut engine = engine_at(dir.path(), 1);
        for i in 0..25 {
            engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
        }
        engine.delete("v10").unwrap();
        engine.save_all().unwrap();
        engine.shutdown();
    }

    let engine = engine_at(dir.path(), 1);
    assert_eq!(engine.stats().live_vectors, 24);
    assert_eq!(engine.get_vector("v10").unwrap(), None);
    assert_eq!(
        engine.get_vector("v24").unwrap(),
        Some(Vector::new("v24", vec![24.0]))
    );
}

#[test]
fn empty_store_roundtrip() {
    let dir = tempdir().unwrap();
    {
        let engine = engine_at(dir.path(), 1);
        engine.save_all().unwrap();
    }

    let engine = engine_at(dir.path(), 1);
    assert_eq!(engine.stats().live_vectors, 0);
}

#[test]
fn wal_replay_without_checkpoint_recovers_everything() {
    let dir = tempdir().unwrap();
    {
        // No save_all: recovery must come entirely from the log.
        let mut engine = engine_at(dir.path(), 1);
        for i in 0..5 {
            engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
        }
        engine.delete("v2").unwrap();
        engine.shutdown();
    }

    let engine = engine_at(dir.path(), 1);
    assert_eq!(engine.stats().live_vectors, 4);
    assert_eq!(engine.get_vector("v2").unwrap(), None);
    assert_eq!(
        engine.get_vector("v4").unwrap(),
        Some(Vector::new("v4", vec![4.0]))
    );
}

#[test]
fn wal_replay_is_idempotent_across_restarts() {
    let dir = tempdir().unwrap();
    {
        let mut engine = engine_at(dir.path(), 1);
        for i in 0..8 {
            engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
        }
        engine.shutdown();
    }

    let first = {
        let engine = engine_at(dir.path(), 1);
        let mut ids = ids_of(&engine, 1, 100);
        ids.sort();
        ids
    };
    let second = {
        let engine = engine_at(dir.path(), 1);
        let mut ids = ids_of(&engine, 1, 100);
        ids.sort();
        ids
    };

    assert_eq!(first.len(), 8);
    assert_eq!(first, second);
}

#[test]
fn full_segment_rotation_keeps_every_vector() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path(), 1);

    for i in 0..MAX_SEGMENT_SIZE + 1 {
        engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
    }

    let stats = engine.stats();
    assert_eq!(stats.segments, 2);
    assert_eq!(stats.live_vectors, MAX_SEGMENT_SIZE + 1);

    // And the rotation survives a restart through the WAL alone.
    engine.shutdown();
    drop(engine);
    let engine = engine_at(dir.path(), 1);
    assert_eq!(engine.stats().live_vectors, MAX_SEGMENT_SIZE + 1);
    assert_eq!(
        engine.get_vector(&format!("v{MAX_SEGMENT_SIZE}")).unwrap(),
        Some(Vector::new(format!("v{MAX_SEGMENT_SIZE}"), vec![MAX_SEGMENT_SIZE as f64]))
    );
}

#[test]
fn metadata_survives_a_roundtrip() {
    let dir = tempdir().unwrap();
    let mut metadata = vectours::Metadata::new();
    metadata.insert("source".to_string(), serde_json::json!("sensor-7"));
    metadata.insert("weight".to_string(), serde_json::json!(0.75));

    {
        let mut engine = engine_at(dir.path(), 2);
        engine
            .insert(Vector::with_metadata("m", vec![1.0, 2.0], metadata.clone()))
            .unwrap();
        engine.save_all().unwrap();
        engine.shutdown();
    }

    let engine = engine_at(dir.path(), 2);
    let recovered = engine.get_vector("m").unwrap().unwrap();
    assert_eq!(recovered.metadata, metadata);
}

#[test]
fn drop_all_resets_disk_and_memory() {
    let dir = tempdir().unwrap();
    let mut engine = engine_at(dir.path(), 1);
    for i in 0..10 {
        engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
    }
    engine.save_all().unwrap();

    engine.drop_all().unwrap();
    assert!(engine.insert(Vector::new("a", vec![1.0])).is_err());

    engine.init_from_disk().unwrap();
    assert_eq!(engine.stats().live_vectors, 0);
    engine.insert(Vector::new("a", vec![1.0])).unwrap();
    assert_eq!(engine.stats().live_vectors, 1);
}

#[test]
fn uninitialized_engine_rejects_writes() {
    let dir = tempdir().unwrap();
    let mut engine = Engine::new(EngineConfig::new(dir.path(), 1)).unwrap();

    assert!(engine.insert(Vector::new("a", vec![1.0])).is_err());
    assert!(engine.delete("a").is_err());
}
