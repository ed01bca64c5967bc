//! Inverted-file (IVF) index.
//!
//! Coarse k-means partitioning of the vector set. Below the build threshold
//! the index stays unbuilt and callers fall back to brute force; once the
//! backing store grows past it, a one-time full build runs. Inserts after
//! the build only append to the nearest cluster, so cluster quality degrades
//! gradually until the next full rebuild.

use crate::data::Vector;
use crate::distance::squared_euclidean;
use crate::kmeans::{self, Cluster};
use crate::store::{SegmentStore, StoreError};

/// Vector count the store must exceed before the index is built.
pub const MIN_VECTORS_FOR_IVF_INDEX: usize = 10_000;

pub struct IvfIndex {
    clusters: Vec<Cluster>,
    built: bool,
    min_vectors: usize,
}

impl Default for IvfIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IvfIndex {
    pub fn new() -> Self {
        Self::with_min_vectors(MIN_VECTORS_FOR_IVF_INDEX)
    }

    pub fn with_min_vectors(min_vectors: usize) -> Self {
        Self {
            clusters: Vec::new(),
            built: false,
            min_vectors,
        }
    }

    pub fn can_search(&self) -> bool {
        self.built
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Feed one inserted vector.
    ///
    /// Built: append to the nearest cluster. Unbuilt: trigger the one-time
    /// full build once the store has grown past the threshold.
    pub fn insert_vector(
        &mut self,
        vector: &Vector,
        store: &SegmentStore,
    ) -> Result<(), StoreError> {
        if self.built {
            if let Some(cluster) = self.nearest_cluster_mut(&vector.values) {
                cluster.members.push(vector.clone());
            }
        } else if store.get_total_vector_count()? > self.min_vectors {
            self.rebuild(&store.get_all_vectors()?);
        }
        Ok(())
    }

    /// Full (re)build from the complete vector set.
    pub fn rebuild(&mut self, vectors: &[Vector]) {
        let k = kmeans::default_cluster_count(vectors.len());
        self.clusters = kmeans::fit(vectors, k);
        self.built = true;
        tracing::info!(
            vectors = vectors.len(),
            clusters = self.clusters.len(),
            "ivf index built"
        );
    }

    /// Probe the `nprobe` clusters nearest to the query, rank every member
    /// vector by true distance, and return at most `top_k`.
    ///
    /// An unbuilt index returns no results; the caller falls back to brute
    /// force.
    pub fn search(&self, query: &[f64], top_k: usize, nprobe: usize) -> Vec<Vector> {
        if !self.built {
            return Vec::new();
        }

        let mut ranked: Vec<&Cluster> = self.clusters.iter().collect();
        ranked.sort_by(|a, b| {
            squared_euclidean(&a.centroid, query)
                .partial_cmp(&squared_euclidean(&b.centroid, query))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut candidates: Vec<&Vector> = ranked
            .iter()
            .take(nprobe)
            .flat_map(|cluster| cluster.members.iter())
            .collect();
        candidates.sort_by(|a, b| {
            squared_euclidean(&a.values, query)
                .partial_cmp(&squared_euclidean(&b.values, query))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        candidates.into_iter().take(top_k).cloned().collect()
    }

    fn nearest_cluster_mut(&mut self, values: &[f64]) -> Option<&mut Cluster> {
        self.clusters.iter_mut().min_by(|a, b| {
            squared_euclidean(&a.centroid, values)
                .partial_cmp(&squared_euclidean(&b.centroid, values))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SEGMENTS_DIR;
    use crate::wal::WriteAheadLogger;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn seeded_store(dir: &TempDir, count: usize) -> (Arc<WriteAheadLogger>, SegmentStore) {
        let wal = Arc::new(WriteAheadLogger::new(dir.path().to_path_buf()).unwrap());
        let mut store =
            SegmentStore::new(Arc::clone(&wal), dir.path().join(SEGMENTS_DIR)).unwrap();
        store.load_from_disk().unwrap();
        for i in 0..count {
            store
                .insert_vector(Vector::new(format!("v{i}"), vec![i as f64]))
                .unwrap();
        }
        (wal, store)
    }

    #[test]
    fn stays_unbuilt_below_threshold() {
        let dir = tempdir().unwrap();
        let (wal, store) = seeded_store(&dir, 10);
        let mut index = IvfIndex::with_min_vectors(50);

        index
            .insert_vector(&Vector::new("x", vec![3.0]), &store)
            .unwrap();

        assert!(!index.can_search());
        assert!(index.search(&[3.0], 5, 5).is_empty());
        wal.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn builds_once_threshold_is_crossed() {
        let dir = tempdir().unwrap();
        let (wal, store) = seeded_store(&dir, 60);
        let mut index = IvfIndex::with_min_vectors(50);

        index
            .insert_vector(&Vector::new("x", vec![3.0]), &store)
            .unwrap();

        assert!(index.can_search());
        assert!(!index.clusters().is_empty());
        wal.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn built_index_appends_to_nearest_cluster() {
        let dir = tempdir().unwrap();
        let (wal, store) = seeded_store(&dir, 60);
        let mut index = IvfIndex::with_min_vectors(50);
        index.rebuild(&store.get_all_vectors().unwrap());

        let before: usize = index.clusters().iter().map(|c| c.members.len()).sum();
        index
            .insert_vector(&Vector::new("x", vec![30.0]), &store)
            .unwrap();
        let after: usize = index.clusters().iter().map(|c| c.members.len()).sum();

        assert_eq!(after, before + 1);
        wal.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn search_returns_nearest_members_first() {
        let dir = tempdir().unwrap();
        let (wal, store) = seeded_store(&dir, 100);
        let mut index = IvfIndex::with_min_vectors(50);
        index.rebuild(&store.get_all_vectors().unwrap());

        let results = index.search(&[99.0], 2, 2);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "v99");
        assert_eq!(results[1].id, "v98");
        wal.shutdown(Duration::from_secs(5));
    }
}
