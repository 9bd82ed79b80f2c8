//! k-means++ clustering for codebook training.
//!
//! Seeds with the k-means++ D² weighting, then runs Lloyd iterations until
//! fewer than 1% of points change assignment. Two iteration modes: plain
//! unweighted squared-L2, and an anisotropic mode that penalizes
//! quantization error parallel to the point's own direction, which matters
//! when the codes are scored with inner products.

use crate::simd;

/// Sentinel threshold meaning "no anisotropic weighting".
pub const UNWEIGHTED: f32 = f32::NEG_INFINITY;

/// Default cap on Lloyd iterations.
pub const MAX_ITERATIONS: usize = 16;

/// k-means++ clusterer over a flat point arena.
pub struct KMeansPlusPlusClusterer {
    points: Vec<f32>,
    n: usize,
    dim: usize,
    k: usize,
    centroids: Vec<f32>,
    assignments: Vec<usize>,
    anisotropic_threshold: f32,
    rng_state: u64,
}

impl KMeansPlusPlusClusterer {
    /// Creates a clusterer with k-means++ seeded centroids.
    ///
    /// `points` is a flat arena of `points.len() / dim` vectors. The
    /// threshold selects the iteration mode: [`UNWEIGHTED`] for plain
    /// Lloyd, anything greater for anisotropic weighting.
    ///
    /// # Panics
    ///
    /// Panics if `points` is empty, `dim` is zero, or `k` exceeds the
    /// number of points.
    #[must_use]
    pub fn new(points: &[f32], dim: usize, k: usize, anisotropic_threshold: f32) -> Self {
        assert!(dim > 0, "dimension must be positive");
        assert!(!points.is_empty(), "cannot cluster an empty point set");
        let n = points.len() / dim;
        assert!(k > 0 && k <= n, "cluster count must be in 1..=n");

        let mut clusterer = Self {
            points: points.to_vec(),
            n,
            dim,
            k,
            centroids: vec![0.0; k * dim],
            assignments: vec![0; n],
            anisotropic_threshold,
            rng_state: 0x5DEE_CE66_D1A4_B5B5 ^ (n as u64).rotate_left(17),
        };
        clusterer.seed_centroids();
        clusterer.assign_all();
        clusterer
    }

    /// Creates a clusterer that continues from existing centroids.
    ///
    /// Used by codebook refinement: the initial assignment is exactly the
    /// encoding the existing codebook would produce, so the first Lloyd
    /// step can only keep or lower the loss on the new points.
    ///
    /// # Panics
    ///
    /// Panics if the centroid arena is not a multiple of `dim` or points
    /// are empty.
    #[must_use]
    pub fn with_centroids(
        points: &[f32],
        dim: usize,
        centroids: Vec<f32>,
        anisotropic_threshold: f32,
    ) -> Self {
        assert!(dim > 0, "dimension must be positive");
        assert!(!points.is_empty(), "cannot cluster an empty point set");
        assert!(
            centroids.len() % dim == 0 && !centroids.is_empty(),
            "centroid arena must hold whole vectors"
        );
        let n = points.len() / dim;
        let k = centroids.len() / dim;

        let mut clusterer = Self {
            points: points.to_vec(),
            n,
            dim,
            k,
            centroids,
            assignments: vec![0; n],
            anisotropic_threshold,
            rng_state: 0x5DEE_CE66_D1A4_B5B5 ^ (n as u64).rotate_left(29),
        };
        clusterer.assign_all();
        clusterer
    }

    /// The flat centroid arena, `k * dim` floats.
    #[must_use]
    pub fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    /// Number of clusters.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        self.k
    }

    /// Runs Lloyd iterations until convergence or `max_iterations`.
    ///
    /// Convergence is fewer than 1% of points changing assignment. Returns
    /// the number of iterations performed.
    pub fn cluster(&mut self, max_iterations: usize) -> usize {
        let anisotropic = self.anisotropic_threshold > UNWEIGHTED;
        for iteration in 0..max_iterations {
            let changed = if anisotropic {
                self.cluster_once_anisotropic()
            } else {
                self.cluster_once_unweighted()
            };
            if (changed as f32) < 0.01 * self.n as f32 {
                return iteration + 1;
            }
        }
        max_iterations
    }

    /// One unweighted Lloyd step: recompute means, then reassign.
    ///
    /// Returns the number of points whose assignment changed.
    pub fn cluster_once_unweighted(&mut self) -> usize {
        self.update_centroids();
        self.reassign(false)
    }

    /// One anisotropic Lloyd step: recompute means, then reassign using the
    /// direction-weighted cost.
    ///
    /// Returns the number of points whose assignment changed.
    pub fn cluster_once_anisotropic(&mut self) -> usize {
        self.update_centroids();
        self.reassign(true)
    }

    fn point(&self, i: usize) -> &[f32] {
        &self.points[i * self.dim..(i + 1) * self.dim]
    }

    fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dim..(c + 1) * self.dim]
    }

    fn next_random(&mut self) -> u64 {
        let mut state = self.rng_state;
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state = state;
        state
    }

    fn next_unit_f32(&mut self) -> f32 {
        (self.next_random() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// k-means++ seeding: first centroid uniform, the rest D²-weighted.
    fn seed_centroids(&mut self) {
        let first = (self.next_random() % self.n as u64) as usize;
        let dim = self.dim;
        let first_point = self.point(first).to_vec();
        self.centroids[..dim].copy_from_slice(&first_point);

        let mut d2: Vec<f32> = (0..self.n)
            .map(|i| simd::squared_l2(self.point(i), &first_point))
            .collect();

        for c in 1..self.k {
            let total: f32 = d2.iter().sum();
            let chosen = if total > 0.0 {
                let mut target = self.next_unit_f32() * total;
                let mut chosen = self.n - 1;
                for (i, &weight) in d2.iter().enumerate() {
                    target -= weight;
                    if target <= 0.0 {
                        chosen = i;
                        break;
                    }
                }
                chosen
            } else {
                // all remaining points coincide with a centroid
                c % self.n
            };

            let point = self.point(chosen).to_vec();
            self.centroids[c * dim..(c + 1) * dim].copy_from_slice(&point);
            for i in 0..self.n {
                let dist = simd::squared_l2(self.point(i), &point);
                d2[i] = d2[i].min(dist);
            }
        }
    }

    fn assign_all(&mut self) {
        let anisotropic = self.anisotropic_threshold > UNWEIGHTED;
        self.reassign(anisotropic);
    }

    fn reassign(&mut self, anisotropic: bool) -> usize {
        let mut changed = 0;
        for i in 0..self.n {
            let mut best = 0;
            let mut best_cost = f32::MAX;
            for c in 0..self.k {
                let cost = if anisotropic {
                    self.anisotropic_cost(self.point(i), self.centroid(c))
                } else {
                    simd::squared_l2(self.point(i), self.centroid(c))
                };
                if cost < best_cost {
                    best_cost = cost;
                    best = c;
                }
            }
            if self.assignments[i] != best {
                self.assignments[i] = best;
                changed += 1;
            }
        }
        changed
    }

    /// Cost of representing `point` by `centroid` with the residual split
    /// into components parallel and orthogonal to the point's direction.
    ///
    /// The parallel weight is `(|p|^2 - T) / |p|^2`; points whose alignment
    /// with the centroid falls below `T` contribute through the orthogonal
    /// component alone.
    fn anisotropic_cost(&self, point: &[f32], centroid: &[f32]) -> f32 {
        let threshold = self.anisotropic_threshold;
        let p_norm = simd::dot_product(point, point);
        if p_norm <= 0.0 {
            return simd::squared_l2(point, centroid);
        }

        let total = simd::squared_l2(point, centroid);
        // dot(r, p) with r = p - c
        let residual_dot = p_norm - simd::dot_product(centroid, point);
        let parallel = residual_dot * residual_dot / p_norm;
        let orthogonal = (total - parallel).max(0.0);

        let c_norm = simd::dot_product(centroid, centroid);
        let alignment = if c_norm > 0.0 {
            simd::dot_product(point, centroid) / (p_norm * c_norm).sqrt()
        } else {
            0.0
        };
        if alignment < threshold {
            return orthogonal;
        }

        let parallel_weight = ((p_norm - threshold) / p_norm).max(0.0);
        (1.0 + parallel_weight) * parallel + orthogonal
    }

    /// Recomputes each centroid as the mean of its assigned points; empty
    /// clusters are reseeded from the point furthest from its centroid.
    fn update_centroids(&mut self) {
        let dim = self.dim;
        let mut sums = vec![0.0f32; self.k * dim];
        let mut counts = vec![0usize; self.k];

        for i in 0..self.n {
            let c = self.assignments[i];
            counts[c] += 1;
            let point = &self.points[i * dim..(i + 1) * dim];
            let sum = &mut sums[c * dim..(c + 1) * dim];
            simd::add_in_place(sum, point);
        }

        for c in 0..self.k {
            if counts[c] == 0 {
                continue;
            }
            let slice = &mut sums[c * dim..(c + 1) * dim];
            simd::scale(slice, 1.0 / counts[c] as f32);
            self.centroids[c * dim..(c + 1) * dim].copy_from_slice(slice);
        }

        let mut reseeded: Vec<usize> = Vec::new();
        for c in 0..self.k {
            if counts[c] == 0 {
                let furthest = self.furthest_point(&reseeded);
                reseeded.push(furthest);
                let point = self.point(furthest).to_vec();
                self.centroids[c * dim..(c + 1) * dim].copy_from_slice(&point);
            }
        }
    }

    /// The point furthest from its assigned centroid, skipping `excluded`.
    fn furthest_point(&self, excluded: &[usize]) -> usize {
        let mut best = 0;
        let mut best_dist = -1.0f32;
        for i in 0..self.n {
            if excluded.contains(&i) {
                continue;
            }
            let dist = simd::squared_l2(self.point(i), self.centroid(self.assignments[i]));
            if dist > best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }
}
