//! Search engine facade.
//!
//! The only component exposed to external collaborators. Writes flow
//! WAL → segment store → indexes; reads pick one strategy from the request
//! parameters and fall back to a full linear scan when no approximate index
//! is ready.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;

use crate::data::{SearchParameters, SearchResult, Vector};
use crate::distance::euclidean;
use crate::hnsw::{HnswIndex, EF_SEARCH, MIN_VECTORS_FOR_HNSW};
use crate::ivf::{IvfIndex, MIN_VECTORS_FOR_IVF_INDEX};
use crate::pq::{PqError, ProductQuantization, MIN_VECTORS_FOR_PRODUCT_QUANTIZATION};
use crate::saver::SegmentSaver;
use crate::store::{SegmentStore, StoreError, SEGMENTS_DIR};
use crate::wal::{Operation, WalError, WriteAheadLogger};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Pq(#[from] PqError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Engine construction knobs. `EngineConfig::new` gives the production
/// defaults; the index thresholds are only ever lowered in tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub dimension: usize,
    pub enable_hnsw: bool,
    pub save_interval: Duration,
    pub wal_shutdown_timeout: Duration,
    pub ef_search: usize,
    pub ivf_min_vectors: usize,
    pub pq_min_vectors: usize,
    pub hnsw_min_vectors: usize,
}

impl EngineConfig {
    pub fn new(data_dir: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            dimension,
            enable_hnsw: false,
            save_interval: Duration::from_secs(30),
            wal_shutdown_timeout: Duration::from_secs(10),
            ef_search: EF_SEARCH,
            ivf_min_vectors: MIN_VECTORS_FOR_IVF_INDEX,
            pq_min_vectors: MIN_VECTORS_FOR_PRODUCT_QUANTIZATION,
            hnsw_min_vectors: MIN_VECTORS_FOR_HNSW,
        }
    }
}

/// Point-in-time engine introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub segments: usize,
    pub live_vectors: usize,
    pub ivf_ready: bool,
    pub pq_ready: bool,
    pub hnsw_ready: bool,
}

pub struct Engine {
    config: EngineConfig,
    wal: Arc<WriteAheadLogger>,
    store: Arc<RwLock<SegmentStore>>,
    ivf: IvfIndex,
    pq: ProductQuantization,
    hnsw: HnswIndex,
    saver: Option<SegmentSaver>,
}

impl Engine {
    /// Create an engine rooted at `config.data_dir` and start its background
    /// workers. The store stays uninitialized until
    /// [`init_from_disk`](Self::init_from_disk) runs.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        fs::create_dir_all(&config.data_dir)?;
        let wal = Arc::new(WriteAheadLogger::new(config.data_dir.clone())?);
        let store = Arc::new(RwLock::new(SegmentStore::new(
            Arc::clone(&wal),
            config.data_dir.join(SEGMENTS_DIR),
        )?));
        let saver = SegmentSaver::start(Arc::clone(&store), config.save_interval)?;

        Ok(Self {
            ivf: IvfIndex::with_min_vectors(config.ivf_min_vectors),
            pq: ProductQuantization::with_min_training_vectors(
                config.dimension,
                config.pq_min_vectors,
            ),
            hnsw: HnswIndex::with_min_vectors(config.hnsw_min_vectors),
            saver: Some(saver),
            wal,
            store,
            config,
        })
    }

    /// Load persisted segments, replay the WAL from the last checkpoint, and
    /// build whichever indexes the recovered vector set is large enough for.
    ///
    /// Replay is best-effort: an operation that no longer applies is skipped
    /// with a warning rather than aborting recovery.
    pub fn init_from_disk(&mut self) -> Result<(), EngineError> {
        self.store.write().load_from_disk()?;

        let operations = self.wal.load_from_checkpoint()?;
        {
            let mut store = self.store.write();
            for operation in operations {
                let outcome = match operation {
                    Operation::CreateSegment { segment_id } => {
                        store.create_segment_if_not_exists(segment_id, true)
                    }
                    Operation::Insert { vector } => store.insert_vector(vector),
                    Operation::InsertInSegment { vector, segment_id } => {
                        store.insert_vector_in_segment(vector, segment_id)
                    }
                    Operation::Delete { id } => store.delete_vector(&id),
                };
                if let Err(err) = outcome {
                    tracing::warn!(error = %err, "skipping unreplayable wal operation");
                }
            }
        }

        let store = self.store.read();
        let total = store.get_total_vector_count()?;
        if total > self.config.ivf_min_vectors {
            self.ivf.rebuild(&store.get_all_vectors()?);
        }
        if total >= self.config.pq_min_vectors {
            self.pq.build_subspaces(&store.get_all_vectors()?);
        }
        tracing::info!(vectors = total, "engine initialized from disk");
        Ok(())
    }

    /// Durably log and apply one insert, then feed every enabled index.
    pub fn insert(&mut self, vector: Vector) -> Result<(), EngineError> {
        self.check_dimension(vector.values.len())?;

        self.wal
            .append(Operation::Insert {
                vector: vector.clone(),
            })
            .wait()?;
        self.store.write().insert_vector(vector.clone())?;

        let store = self.store.read();
        self.ivf.insert_vector(&vector, &store)?;
        self.pq.insert_vector(&vector);
        if !self.pq.is_built()
            && store.get_total_vector_count()? >= self.config.pq_min_vectors
        {
            self.pq.build_subspaces(&store.get_all_vectors()?);
        }
        if self.config.enable_hnsw {
            self.hnsw.insert_vector(&vector, &store);
        }
        Ok(())
    }

    /// Durably log and apply one delete.
    ///
    /// Indexes are not pruned; stale entries are filtered out when results
    /// are resolved back through the store.
    pub fn delete(&mut self, id: &str) -> Result<(), EngineError> {
        self.wal
            .append(Operation::Delete { id: id.to_owned() })
            .wait()?;
        self.store.write().delete_vector(id)?;
        Ok(())
    }

    pub fn get_vector(&self, id: &str) -> Result<Option<Vector>, EngineError> {
        Ok(self.store.read().get_vector_by_id(id)?)
    }

    /// Answer a query with at most one approximate strategy, falling back to
    /// a full linear scan. Results are sorted ascending by distance and
    /// truncated to `top_k`.
    pub fn search(&self, params: &SearchParameters) -> Result<Vec<SearchResult>, EngineError> {
        self.check_dimension(params.searched_vector.len())?;
        let store = self.store.read();
        let query = &params.searched_vector;

        if params.use_hnsw && self.hnsw.can_search() {
            let vectors = self
                .hnsw
                .search_with_ef(query, params.top_k, self.config.ef_search, &store);
            return Ok(rank_vectors(vectors, query, params.top_k));
        }

        if params.allow_ivf && self.ivf.can_search() {
            // Probe as many clusters as results requested.
            let vectors = self.ivf.search(query, params.top_k, params.top_k);
            let live = vectors
                .into_iter()
                .filter_map(|vector| store.get_vector_by_id(&vector.id).ok().flatten())
                .collect();
            return Ok(rank_vectors(live, query, params.top_k));
        }

        if params.use_pq && self.pq.is_built() {
            let results = self.pq.approx_search(query, params.top_k)?;
            // Approximate distances are kept; metadata comes from the live
            // store, which also drops tombstoned ids.
            let resolved = results
                .into_iter()
                .filter_map(|result| {
                    store
                        .get_vector_by_id(&result.id)
                        .ok()
                        .flatten()
                        .map(|vector| SearchResult {
                            id: result.id,
                            distance: result.distance,
                            metadata: vector.metadata,
                        })
                })
                .collect();
            return Ok(resolved);
        }

        let all = store.get_all_vectors()?;
        Ok(rank_vectors(all, query, params.top_k))
    }

    /// Flush every dirty segment now and advance the WAL checkpoint.
    pub fn save_all(&self) -> Result<(), EngineError> {
        self.store.write().save_dirty_segments()?;
        Ok(())
    }

    /// Full reset: drop all segments (memory and disk), truncate the WAL,
    /// and forget every index. The store must be re-initialized afterwards.
    pub fn drop_all(&mut self) -> Result<(), EngineError> {
        self.store.write().close()?;
        self.wal.clear_log()?;
        self.wal.new_segment(0)?;
        self.ivf = IvfIndex::with_min_vectors(self.config.ivf_min_vectors);
        self.pq = ProductQuantization::with_min_training_vectors(
            self.config.dimension,
            self.config.pq_min_vectors,
        );
        self.hnsw = HnswIndex::with_min_vectors(self.config.hnsw_min_vectors);
        tracing::info!("dropped all data");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let store = self.store.read();
        EngineStats {
            segments: store.segments().len(),
            live_vectors: store.get_total_vector_count().unwrap_or(0),
            ivf_ready: self.ivf.can_search(),
            pq_ready: self.pq.is_built(),
            hnsw_ready: self.hnsw.can_search(),
        }
    }

    /// Stop the background saver and drain the WAL writer. Idempotent; also
    /// runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(saver) = self.saver.take() {
            saver.stop();
        }
        self.wal.shutdown(self.config.wal_shutdown_timeout);
    }

    fn check_dimension(&self, actual: usize) -> Result<(), EngineError> {
        if actual != self.config.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.dimension,
                actual,
            });
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn rank_vectors(vectors: Vec<Vector>, query: &[f64], top_k: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = vectors
        .into_iter()
        .map(|vector| SearchResult {
            distance: euclidean(query, &vector.values),
            id: vector.id,
            metadata: vector.metadata,
        })
        .collect();
    results.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    results.truncate(top_k);
    results
}
