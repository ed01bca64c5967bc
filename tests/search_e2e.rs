//! End-to-end search tests across the four strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use vectours::{Engine, EngineConfig, SearchParameters, Vector};

fn engine_with(config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config).unwrap();
    engine.init_from_disk().unwrap();
    engine
}

#[test]
fn brute_force_ranks_by_true_distance() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 2));

    engine.insert(Vector::new("a", vec![0.0, 0.0])).unwrap();
    engine.insert(Vector::new("b", vec![1.0, 0.0])).unwrap();
    engine.insert(Vector::new("c", vec![5.0, 5.0])).unwrap();

    let results = engine
        .search(&SearchParameters::new(vec![0.0, 0.0]).top_k(2))
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].distance, 0.0);
    assert_eq!(results[1].id, "b");
    assert_eq!(results[1].distance, 1.0);
}

#[test]
fn results_never_exceed_top_k_and_stay_sorted() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 3));
    let mut rng = StdRng::seed_from_u64(21);

    for i in 0..100 {
        let values: Vec<f64> = (0..3).map(|_| rng.gen::<f64>() * 10.0).collect();
        engine.insert(Vector::new(format!("v{i}"), values)).unwrap();
    }

    let results = engine
        .search(&SearchParameters::new(vec![5.0, 5.0, 5.0]).top_k(7))
        .unwrap();

    assert_eq!(results.len(), 7);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn query_equal_to_an_inserted_vector_comes_back_first() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 2));

    for i in 0..20 {
        engine
            .insert(Vector::new(format!("v{i}"), vec![i as f64, -(i as f64)]))
            .unwrap();
    }

    let results = engine
        .search(&SearchParameters::new(vec![7.0, -7.0]).top_k(3))
        .unwrap();

    assert_eq!(results[0].id, "v7");
    assert_eq!(results[0].distance, 0.0);
}

#[test]
fn deleted_vectors_never_appear_in_results() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 1));

    engine.insert(Vector::new("keep", vec![1.0])).unwrap();
    engine.insert(Vector::new("drop", vec![2.0])).unwrap();
    engine.delete("drop").unwrap();

    let results = engine
        .search(&SearchParameters::new(vec![2.0]).top_k(10))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "keep");
}

#[test]
fn search_results_carry_metadata() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 1));
    let mut metadata = vectours::Metadata::new();
    metadata.insert("tag".to_string(), serde_json::json!("loop"));

    engine
        .insert(Vector::with_metadata("m", vec![3.0], metadata.clone()))
        .unwrap();

    let results = engine
        .search(&SearchParameters::new(vec![3.0]).top_k(1))
        .unwrap();
    assert_eq!(results[0].metadata, metadata);
}

#[test]
fn ivf_and_brute_force_agree_on_the_nearest_neighbor() {
    let dir = tempdir().unwrap();
    let mut config = EngineConfig::new(dir.path(), 1);
    // Keep the run focused on IVF.
    config.pq_min_vectors = usize::MAX;
    let mut engine = engine_with(config);

    for i in 0..=10_000 {
        engine.insert(Vector::new(format!("v{i}"), vec![i as f64])).unwrap();
    }
    assert!(engine.stats().ivf_ready);

    let brute = engine
        .search(&SearchParameters::new(vec![10_000.0]).allow_ivf(false).top_k(1))
        .unwrap();
    let ivf = engine
        .search(&SearchParameters::new(vec![10_000.0]).top_k(1))
        .unwrap();

    assert_eq!(brute[0].id, "v10000");
    assert_eq!(ivf[0].id, brute[0].id);
}

#[test]
fn pq_search_stays_within_the_query_cluster() {
    let dir = tempdir().unwrap();
    // Train on the full data set: the build triggers at the final insert.
    let mut config = EngineConfig::new(dir.path(), 8);
    config.pq_min_vectors = 180;
    let mut engine = engine_with(config);

    let centers = [0.0f64, 50.0, 100.0];
    let mut rng = StdRng::seed_from_u64(33);
    for (c, center) in centers.iter().enumerate() {
        for i in 0..60 {
            let values: Vec<f64> = (0..8).map(|_| center + rng.gen::<f64>()).collect();
            engine.insert(Vector::new(format!("c{c}-{i}"), values)).unwrap();
        }
    }
    assert!(engine.stats().pq_ready);

    let query = vec![100.5; 8];
    let results = engine
        .search(
            &SearchParameters::new(query)
                .allow_ivf(false)
                .use_pq(true)
                .top_k(5),
        )
        .unwrap();

    assert_eq!(results.len(), 5);
    for result in &results {
        assert!(result.id.starts_with("c2-"), "unexpected hit {}", result.id);
    }
}

#[test]
fn hnsw_search_finds_the_query_cluster() {
    let dir = tempdir().unwrap();
    let mut config = EngineConfig::new(dir.path(), 4);
    config.enable_hnsw = true;
    config.hnsw_min_vectors = 50;
    let mut engine = engine_with(config);

    let centers = [0.0f64, 100.0, 200.0];
    let mut rng = StdRng::seed_from_u64(44);
    for (c, center) in centers.iter().enumerate() {
        for i in 0..50 {
            let values: Vec<f64> = (0..4).map(|_| center + rng.gen::<f64>()).collect();
            engine.insert(Vector::new(format!("h{c}-{i}"), values)).unwrap();
        }
    }
    assert!(engine.stats().hnsw_ready);

    let results = engine
        .search(
            &SearchParameters::new(vec![200.5; 4])
                .use_hnsw(true)
                .top_k(5),
        )
        .unwrap();

    assert_eq!(results.len(), 5);
    for result in &results {
        assert!(result.id.starts_with("h2-"), "unexpected hit {}", result.id);
    }
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn unready_indexes_fall_back_to_brute_force() {
    let dir = tempdir().unwrap();
    let mut engine = engine_with(EngineConfig::new(dir.path(), 1));

    engine.insert(Vector::new("only", vec![4.0])).unwrap();

    // IVF, PQ and HNSW are all below their thresholds; every request shape
    // must still answer.
    for params in [
        SearchParameters::new(vec![4.0]).top_k(1),
        SearchParameters::new(vec![4.0]).use_pq(true).top_k(1),
        SearchParameters::new(vec![4.0]).use_hnsw(true).top_k(1),
    ] {
        let results = engine.search(&params).unwrap();
        assert_eq!(results[0].id, "only");
    }
}
