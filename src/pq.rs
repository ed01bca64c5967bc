//! Product quantization (PQ).
//!
//! Splits each vector into subspaces, learns a 256-centroid codebook per
//! subspace, and stores every vector as one code byte per subspace.
//! Approximate queries never touch full-dimension database vectors:
//!
//! ```text
//! query → distance table [subspaces × 256]
//!       → per encoded vector: sum of one table entry per subspace
//! ```

use std::collections::HashMap;

use thiserror::Error;

use crate::data::{Metadata, SearchResult, Vector};
use crate::distance::squared_euclidean;
use crate::kmeans;

/// Vector count required before codebooks are trained.
pub const MIN_VECTORS_FOR_PRODUCT_QUANTIZATION: usize = 10_000;

/// Centroids per subspace, addressable by a single code byte.
pub const CENTROIDS_PER_SUBSPACE: usize = 256;

#[derive(Debug, Error)]
pub enum PqError {
    #[error("pq codebooks are not built; call build_subspaces first")]
    NotBuilt,
}

pub struct ProductQuantization {
    dimension: usize,
    subspaces: usize,
    subvector_dim: usize,
    // codebooks[m][k] = k-th centroid of subspace m.
    codebooks: Option<Vec<Vec<Vec<f64>>>>,
    encoded: HashMap<String, Vec<u8>>,
    min_training_vectors: usize,
}

impl ProductQuantization {
    pub fn new(dimension: usize) -> Self {
        Self::with_min_training_vectors(dimension, MIN_VECTORS_FOR_PRODUCT_QUANTIZATION)
    }

    pub fn with_min_training_vectors(dimension: usize, min_training_vectors: usize) -> Self {
        let subspaces = subspace_count_for(dimension);
        if dimension % subspaces != 0 {
            tracing::error!(
                dimension,
                subspaces,
                "dimension is not divisible by the subspace count; quantization quality is undefined"
            );
        }
        Self {
            dimension,
            subspaces,
            subvector_dim: dimension / subspaces,
            codebooks: None,
            encoded: HashMap::new(),
            min_training_vectors,
        }
    }

    pub fn is_built(&self) -> bool {
        self.codebooks.is_some()
    }

    pub fn subspace_count(&self) -> usize {
        self.subspaces
    }

    /// Encode and store a new vector when the codebooks exist; otherwise the
    /// vector is picked up by the next [`build_subspaces`](Self::build_subspaces)
    /// pass.
    pub fn insert_vector(&mut self, vector: &Vector) {
        if let Ok(codes) = self.encode(&vector.values) {
            self.encoded.insert(vector.id.clone(), codes);
        }
    }

    /// Train one codebook per subspace over `vectors` and encode them all.
    ///
    /// Skipped below the training minimum; a no-op once built.
    pub fn build_subspaces(&mut self, vectors: &[Vector]) {
        if vectors.len() < self.min_training_vectors {
            tracing::debug!(
                vectors = vectors.len(),
                minimum = self.min_training_vectors,
                "not enough vectors to build pq subspaces, skipping"
            );
            return;
        }
        if self.is_built() {
            return;
        }

        let mut codebooks = Vec::with_capacity(self.subspaces);
        for m in 0..self.subspaces {
            tracing::debug!(subspace = m, "training pq subspace");
            let subvectors: Vec<Vector> = vectors
                .iter()
                .enumerate()
                .map(|(i, vector)| {
                    Vector::new(format!("sub_{i}"), self.subvector(&vector.values, m).to_vec())
                })
                .collect();
            let clusters = kmeans::fit(&subvectors, CENTROIDS_PER_SUBSPACE);
            codebooks.push(
                clusters
                    .into_iter()
                    .map(|cluster| cluster.centroid)
                    .collect::<Vec<_>>(),
            );
        }
        self.codebooks = Some(codebooks);

        for vector in vectors {
            if let Ok(codes) = self.encode(&vector.values) {
                self.encoded.insert(vector.id.clone(), codes);
            }
        }
        tracing::info!(
            vectors = vectors.len(),
            subspaces = self.subspaces,
            "pq codebooks built"
        );
    }

    /// One code byte per subspace: the index of the nearest codebook
    /// centroid.
    pub fn encode(&self, values: &[f64]) -> Result<Vec<u8>, PqError> {
        let codebooks = self.codebooks.as_ref().ok_or(PqError::NotBuilt)?;
        let mut codes = Vec::with_capacity(self.subspaces);
        for (m, codebook) in codebooks.iter().enumerate() {
            let subvector = self.subvector(values, m);
            let mut best = 0usize;
            let mut best_distance = f64::MAX;
            for (k, centroid) in codebook.iter().enumerate() {
                let distance = squared_euclidean(subvector, centroid);
                if distance < best_distance {
                    best_distance = distance;
                    best = k;
                }
            }
            codes.push(best as u8);
        }
        Ok(codes)
    }

    /// Asymmetric-distance search over the encoded set.
    pub fn approx_search(&self, query: &[f64], top_k: usize) -> Result<Vec<SearchResult>, PqError> {
        let codebooks = self.codebooks.as_ref().ok_or(PqError::NotBuilt)?;

        // table[m][k] = ||query subvector m − codebook[m][k]||²
        let table: Vec<Vec<f64>> = codebooks
            .iter()
            .enumerate()
            .map(|(m, codebook)| {
                let subvector = self.subvector(query, m);
                codebook
                    .iter()
                    .map(|centroid| squared_euclidean(subvector, centroid))
                    .collect()
            })
            .collect();

        let mut results: Vec<SearchResult> = self
            .encoded
            .iter()
            .map(|(id, codes)| {
                let total: f64 = codes
                    .iter()
                    .enumerate()
                    .map(|(m, &code)| table[m][code as usize])
                    .sum();
                SearchResult {
                    id: id.clone(),
                    distance: total.sqrt(),
                    metadata: Metadata::new(),
                }
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    fn subvector<'a>(&self, values: &'a [f64], m: usize) -> &'a [f64] {
        let start = m * self.subvector_dim;
        &values[start..start + self.subvector_dim]
    }
}

fn subspace_count_for(dimension: usize) -> usize {
    if dimension <= 128 {
        4
    } else if dimension <= 256 {
        8
    } else if dimension <= 512 {
        16
    } else if dimension <= 1024 {
        32
    } else {
        64
    }
}
