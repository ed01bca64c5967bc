//! Vectours – an embeddable, persistent vector similarity search engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Engine (facade)                       │
//! │      insert / delete / get / search strategy selection      │
//! ├──────────────┬──────────────┬──────────────┬────────────────┤
//! │  IVF Index   │   Product    │  HNSW Index  │  Brute Force   │
//! │  (k-means)   │ Quantization │  (layered)   │  (linear scan) │
//! ├──────────────┴──────────────┴──────────────┴────────────────┤
//! │            SegmentStore (sealed segments + current)         │
//! ├─────────────────────────────────────────────────────────────┤
//! │        Write-Ahead Log (batched writer, checkpointing)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes are logged to the WAL before they touch the segment store; every
//! enabled index is fed incrementally on the insert path. Reads pick one
//! strategy per query ([`SearchParameters`]) and fall back to a full linear
//! scan when no approximate index is ready.

pub mod codec;
pub mod data;
pub mod distance;
pub mod engine;
pub mod hnsw;
pub mod ivf;
pub mod kmeans;
pub mod pq;
mod saver;
pub mod segment;
pub mod store;
pub mod wal;

pub use data::{Metadata, SearchParameters, SearchResult, Vector};
pub use engine::{Engine, EngineConfig, EngineError, EngineStats};
pub use segment::MAX_SEGMENT_SIZE;
