use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

/// Seeded Lloyd K-Means over dense feature vectors.
///
/// Group identifiers are positional (centroid index), so a fixed seed makes
/// repeated runs on identical input reproduce the exact same labels, not
/// merely the same grouping up to relabeling.
pub struct KMeans {
    pub centroids: Vec<Vec<f64>>,
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

impl KMeans {
    /// Runs K-Means clustering.
    ///
    /// # Arguments
    /// * `data` - List of data points (vectors).
    /// * `k` - Number of clusters (clamped to the number of points).
    /// * `max_iterations` - Iteration budget.
    /// * `seed` - Seed for centroid initialization and empty-cluster reseeding.
    #[must_use]
    pub fn fit(data: &[Vec<f64>], k: usize, max_iterations: usize, seed: u64) -> Self {
        if data.is_empty() || k == 0 {
            return Self {
                centroids: vec![],
                assignments: vec![],
                iterations: 0,
            };
        }

        let k = k.min(data.len());
        let dim = data[0].len();
        let mut rng = StdRng::seed_from_u64(seed);

        // Initialize centroids from k distinct rows
        let mut centroids: Vec<Vec<f64>> = data
            .choose_multiple(&mut rng, k)
            .cloned()
            .collect();

        let mut assignments = vec![0; data.len()];
        let mut changes = true;
        let mut iterations = 0;

        while changes && iterations < max_iterations {
            changes = false;
            iterations += 1;

            // E-step: Assign points to nearest centroid
            let mut new_assignments = vec![0; data.len()];
            for (i, point) in data.iter().enumerate() {
                new_assignments[i] = nearest_centroid(point, &centroids);
            }

            if new_assignments != assignments {
                assignments = new_assignments;
                changes = true;
            }

            // M-step: Update centroids
            let mut sums = vec![vec![0.0; dim]; k];
            let mut counts = vec![0usize; k];

            for (i, &cluster) in assignments.iter().enumerate() {
                for (j, val) in data[i].iter().enumerate() {
                    sums[cluster][j] += val;
                }
                counts[cluster] += 1;
            }

            for j in 0..k {
                if counts[j] > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    for l in 0..dim {
                        centroids[j][l] = sums[j][l] / counts[j] as f64;
                    }
                } else {
                    // Re-seed empty cluster with a random point (keeps robustness)
                    if let Some(random_point) = data.choose(&mut rng) {
                        centroids[j].clone_from(random_point);
                    }
                }
            }
        }

        Self {
            centroids,
            assignments,
            iterations,
        }
    }
}

/// Ties resolve to the lower-indexed centroid (strict `<` scan).
pub(crate) fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut min_dist_sq = f64::MAX;
    let mut best_cluster = 0;

    for (j, centroid) in centroids.iter().enumerate() {
        let dist_sq = distance_sq(point, centroid);
        if dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            best_cluster = j;
        }
    }

    best_cluster
}

fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
