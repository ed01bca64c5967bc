//! HNSW (hierarchical navigable small world) index.
//!
//! A multi-layer proximity graph over vector ids. Insert wires a node into
//! layers `0..=drawn` after a greedy descent from the top; search descends
//! the same way and runs a best-first expansion on layer 0. Vector values
//! are resolved through the segment store on every distance computation, so
//! the graph itself stores nothing but adjacency.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::Vector;
use crate::distance::squared_euclidean;
use crate::store::SegmentStore;

/// Highest layer a node can be assigned to.
pub const MAX_LAYER: usize = 16;

/// Max neighbors per node per layer.
pub const M: usize = 16;

/// Search breadth while wiring a new node.
pub const EF_CONSTRUCTION: usize = 200;

/// Default search breadth at layer 0.
pub const EF_SEARCH: usize = 50;

/// Node count the graph must exceed before it serves queries.
pub const MIN_VECTORS_FOR_HNSW: usize = 10_000;

/// Frontier entry (min-heap by distance).
#[derive(Clone)]
struct Candidate {
    id: String,
    distance: f64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .distance
            .partial_cmp(&self.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Accepted entry (max-heap so the worst result is on top).
#[derive(Clone)]
struct Accepted {
    id: String,
    distance: f64,
}

impl PartialEq for Accepted {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for Accepted {}

impl Ord for Accepted {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Accepted {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct HnswIndex {
    // layers[l]: node id → neighbor ids at layer l.
    layers: Vec<HashMap<String, HashSet<String>>>,
    entry_point: Option<String>,
    node_count: usize,
    min_vectors: usize,
    rng: StdRng,
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HnswIndex {
    pub fn new() -> Self {
        Self::with_min_vectors(MIN_VECTORS_FOR_HNSW)
    }

    pub fn with_min_vectors(min_vectors: usize) -> Self {
        Self::with_min_vectors_and_seed(min_vectors, rand::thread_rng().gen())
    }

    /// Deterministic layer draws for tests.
    pub fn with_min_vectors_and_seed(min_vectors: usize, seed: u64) -> Self {
        Self {
            layers: vec![HashMap::new(); MAX_LAYER + 1],
            entry_point: None,
            node_count: 0,
            min_vectors,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn can_search(&self) -> bool {
        self.node_count > self.min_vectors
    }

    pub fn len(&self) -> usize {
        self.node_count
    }

    pub fn is_empty(&self) -> bool {
        self.node_count == 0
    }

    /// Wire a new node into the graph.
    pub fn insert_vector(&mut self, vector: &Vector, store: &SegmentStore) {
        let node_layer = self.random_layer();
        for layer in 0..=node_layer {
            self.layers[layer].insert(vector.id.clone(), HashSet::new());
        }
        self.node_count += 1;

        if self.entry_point.is_none() {
            self.entry_point = Some(vector.id.clone());
            return;
        }

        // Greedy single-best descent to just above the node's own layer.
        let mut entry_points = vec![self.entry_point.clone().unwrap()];
        for layer in ((node_layer + 1)..=MAX_LAYER).rev() {
            let nearest = self.search_layer(&vector.values, &entry_points, 1, layer, store);
            if let Some((id, _)) = nearest.first() {
                entry_points = vec![id.clone()];
            }
        }

        // Best-first expansion and reciprocal wiring on the node's layers.
        for layer in (0..=node_layer).rev() {
            let neighbors =
                self.search_layer(&vector.values, &entry_points, EF_CONSTRUCTION, layer, store);
            let selected: Vec<String> = neighbors
                .iter()
                .take(M)
                .map(|(id, _)| id.clone())
                .collect();

            for neighbor_id in &selected {
                if let Some(adjacency) = self.layers[layer].get_mut(neighbor_id) {
                    adjacency.insert(vector.id.clone());
                }
                if let Some(adjacency) = self.layers[layer].get_mut(&vector.id) {
                    adjacency.insert(neighbor_id.clone());
                }
                self.prune_neighbors(layer, neighbor_id, store);
            }
            entry_points = selected;
        }
    }

    /// Approximate `top_k` nearest neighbors with the default breadth.
    pub fn search(&self, query: &[f64], top_k: usize, store: &SegmentStore) -> Vec<Vector> {
        self.search_with_ef(query, top_k, EF_SEARCH, store)
    }

    pub fn search_with_ef(
        &self,
        query: &[f64],
        top_k: usize,
        ef_search: usize,
        store: &SegmentStore,
    ) -> Vec<Vector> {
        let Some(entry_point) = self.entry_point.clone() else {
            return Vec::new();
        };

        let mut entry_points = vec![entry_point];
        for layer in (1..=MAX_LAYER).rev() {
            let nearest = self.search_layer(query, &entry_points, 1, layer, store);
            if let Some((id, _)) = nearest.first() {
                entry_points = vec![id.clone()];
            }
        }

        let candidates = self.search_layer(query, &entry_points, ef_search, 0, store);
        candidates
            .into_iter()
            .take(top_k)
            .filter_map(|(id, _)| store.get_vector_by_id(&id).ok().flatten())
            .collect()
    }

    /// Best-first expansion within one layer. Returns up to `ef` ids sorted
    /// by ascending distance to the query.
    fn search_layer(
        &self,
        query: &[f64],
        entry_points: &[String],
        ef: usize,
        layer: usize,
        store: &SegmentStore,
    ) -> Vec<(String, f64)> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef);
        let mut accepted: BinaryHeap<Accepted> = BinaryHeap::with_capacity(ef + 1);

        for id in entry_points {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(distance) = self.distance_to(query, id, store) else {
                continue;
            };
            candidates.push(Candidate {
                id: id.clone(),
                distance,
            });
            accepted.push(Accepted {
                id: id.clone(),
                distance,
            });
        }

        while let Some(current) = candidates.pop() {
            if let Some(worst) = accepted.peek() {
                if current.distance > worst.distance {
                    break;
                }
            }

            let Some(neighbors) = self.layers[layer].get(&current.id) else {
                // Node not registered at this layer.
                continue;
            };
            for neighbor_id in neighbors {
                if !visited.insert(neighbor_id.clone()) {
                    continue;
                }
                let Some(distance) = self.distance_to(query, neighbor_id, store) else {
                    continue;
                };
                let admit = accepted.len() < ef
                    || accepted
                        .peek()
                        .map(|worst| distance < worst.distance)
                        .unwrap_or(true);
                if admit {
                    candidates.push(Candidate {
                        id: neighbor_id.clone(),
                        distance,
                    });
                    accepted.push(Accepted {
                        id: neighbor_id.clone(),
                        distance,
                    });
                    if accepted.len() > ef {
                        accepted.pop();
                    }
                }
            }
        }

        let mut results: Vec<(String, f64)> = accepted
            .into_iter()
            .map(|entry| (entry.id, entry.distance))
            .collect();
        results.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        results
    }

    /// Keep a neighbor list within the per-layer cap by retaining the M
    /// closest neighbors.
    fn prune_neighbors(&mut self, layer: usize, id: &str, store: &SegmentStore) {
        let over_capacity = self.layers[layer]
            .get(id)
            .map(|adjacency| adjacency.len() > M)
            .unwrap_or(false);
        if !over_capacity {
            return;
        }
        let Some(base) = store.get_vector_by_id(id).ok().flatten() else {
            return;
        };

        let adjacency = self.layers[layer].get(id).cloned().unwrap_or_default();
        let mut scored: Vec<(String, f64)> = adjacency
            .into_iter()
            .filter_map(|neighbor_id| {
                self.distance_to(&base.values, &neighbor_id, store)
                    .map(|distance| (neighbor_id, distance))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(M);

        if let Some(adjacency) = self.layers[layer].get_mut(id) {
            *adjacency = scored.into_iter().map(|(neighbor_id, _)| neighbor_id).collect();
        }
    }

    fn distance_to(&self, query: &[f64], id: &str, store: &SegmentStore) -> Option<f64> {
        let vector = store.get_vector_by_id(id).ok().flatten()?;
        Some(squared_euclidean(query, &vector.values))
    }

    /// Exponential-decay layer draw: keep climbing while a fresh uniform
    /// draw lands below 1/e, capped at [`MAX_LAYER`].
    fn random_layer(&mut self) -> usize {
        let threshold = 1.0 / std::f64::consts::E;
        let mut layer = 0;
        while self.rng.gen::<f64>() < threshold && layer < MAX_LAYER {
            layer += 1;
        }
        layer
    }
}
