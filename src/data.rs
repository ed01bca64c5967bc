//! Core data types shared by the store and the indexes.

use serde::{Deserialize, Serialize};

/// Opaque metadata document attached to a vector.
///
/// The engine never interprets it beyond round-trip serialization. Absent
/// metadata is the empty map, never a null.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A stored vector: unique string id, fixed-dimension values, metadata.
///
/// Immutable once constructed; derive a renamed copy with [`Vector::with_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub id: String,
    pub values: Vec<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Vector {
    pub fn new(id: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            values,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(id: impl Into<String>, values: Vec<f64>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            values,
            metadata,
        }
    }

    /// A copy of this vector under a new id.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: self.values.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Per-query strategy selection.
///
/// At most one approximate strategy serves a query; when none is requested
/// (or ready) the engine falls back to a full linear scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParameters {
    pub searched_vector: Vec<f64>,
    pub allow_ivf: bool,
    pub use_pq: bool,
    pub use_hnsw: bool,
    pub top_k: usize,
}

impl SearchParameters {
    pub fn new(searched_vector: Vec<f64>) -> Self {
        Self {
            searched_vector,
            allow_ivf: true,
            use_pq: false,
            use_hnsw: false,
            top_k: 10,
        }
    }

    pub fn allow_ivf(mut self, allow: bool) -> Self {
        self.allow_ivf = allow;
        self
    }

    pub fn use_pq(mut self, use_pq: bool) -> Self {
        self.use_pq = use_pq;
        self
    }

    pub fn use_hnsw(mut self, use_hnsw: bool) -> Self {
        self.use_hnsw = use_hnsw;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// One ranked search hit. Produced transiently, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub distance: f64,
    pub metadata: Metadata,
}
