//! K-means clustering.
//!
//! Standard Lloyd iteration used to build the IVF coarse partitioning and the
//! PQ codebooks: uniform distinct-sample initialization, squared-Euclidean
//! assignment, early stop once every centroid settles.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::Vector;
use crate::distance::squared_euclidean;

/// Convergence bound on a single centroid's squared movement per iteration.
pub const TOLERANCE: f64 = 1e-4;

/// Hard cap on Lloyd iterations.
pub const MAX_ITERATIONS: usize = 50;

/// A cluster: centroid plus the vectors assigned to it.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid: Vec<f64>,
    pub members: Vec<Vector>,
}

impl Cluster {
    pub fn new(centroid: Vec<f64>) -> Self {
        Self {
            centroid,
            members: Vec::new(),
        }
    }
}

/// Cluster count used when the caller has no opinion: `round(3·ln(n))`.
pub fn default_cluster_count(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    ((3.0 * (n as f64).ln()).round() as usize).max(1)
}

/// Partition `vectors` into `k` clusters.
pub fn fit(vectors: &[Vector], k: usize) -> Vec<Cluster> {
    fit_with_rng(vectors, k, &mut rand::thread_rng())
}

/// Deterministic variant of [`fit`] for tests and reproducible builds.
pub fn fit_seeded(vectors: &[Vector], k: usize, seed: u64) -> Vec<Cluster> {
    fit_with_rng(vectors, k, &mut StdRng::seed_from_u64(seed))
}

fn fit_with_rng<R: Rng + ?Sized>(vectors: &[Vector], k: usize, rng: &mut R) -> Vec<Cluster> {
    if vectors.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(vectors.len());
    let dim = vectors[0].values.len();

    // Initial centroids: k distinct input vectors, uniformly at random.
    let mut centroids: Vec<Vec<f64>> = rand::seq::index::sample(rng, vectors.len(), k)
        .iter()
        .map(|i| vectors[i].values.clone())
        .collect();

    let mut assignments = vec![0usize; vectors.len()];
    for iteration in 0..MAX_ITERATIONS {
        for (i, vector) in vectors.iter().enumerate() {
            assignments[i] = nearest_centroid(&vector.values, &centroids);
        }

        let mut sums = vec![vec![0.0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, vector) in vectors.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (sum, value) in sums[c].iter_mut().zip(vector.values.iter()) {
                *sum += value;
            }
        }

        let mut converged = true;
        for c in 0..k {
            if counts[c] == 0 {
                // Empty cluster keeps its centroid.
                continue;
            }
            let count = counts[c] as f64;
            let new_centroid: Vec<f64> = sums[c].iter().map(|sum| sum / count).collect();
            if squared_euclidean(&centroids[c], &new_centroid) >= TOLERANCE {
                converged = false;
            }
            centroids[c] = new_centroid;
        }

        if converged {
            tracing::debug!(iterations = iteration + 1, k, "k-means converged");
            break;
        }
    }

    let mut clusters: Vec<Cluster> = centroids.iter().cloned().map(Cluster::new).collect();
    for vector in vectors {
        let c = nearest_centroid(&vector.values, &centroids);
        clusters[c].members.push(vector.clone());
    }
    clusters
}

/// Index of the nearest centroid, ties broken by the first minimum.
fn nearest_centroid(values: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::MAX;
    for (c, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean(values, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = c;
        }
    }
    best
}
