//! Permutation machinery shared by the shape ANOVA and disparity tests.
//!
//! Significance in this crate is assessed by residual randomization: residuals
//! of a reduced model are shuffled across specimens, added back to that
//! model's fitted values, and the statistic of interest is recomputed.
//!
//! Permutation `i` draws from its own generator seeded with `seed + i`, so
//! results are identical whether permutations run sequentially or in parallel.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Configuration for permutation testing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermutationConfig {
    /// Number of random permutations (the observed arrangement is added on top).
    pub n_permutations: usize,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Whether to use parallel computation.
    pub parallel: bool,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            n_permutations: 999,
            seed: 42,
            parallel: true,
        }
    }
}

impl PermutationConfig {
    /// Create a quick configuration for testing (fewer permutations).
    pub fn quick() -> Self {
        Self {
            n_permutations: 99,
            ..Default::default()
        }
    }
}

/// Simple deterministic random number generator for permutations.
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        // splitmix64 scramble so nearby seeds give unrelated streams
        let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        Self {
            state: if z == 0 { 0x2545_F491_4F6C_DD1D } else { z },
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        // xorshift64
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Fisher-Yates shuffle
    pub(crate) fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        for i in (1..n).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            slice.swap(i, j);
        }
    }
}

/// The `index`-th random permutation of `0..n` for a given seed.
pub fn permutation(n: usize, seed: u64, index: usize) -> Vec<usize> {
    let mut rng = SimpleRng::new(seed.wrapping_add(index as u64));
    let mut order: Vec<usize> = (0..n).collect();
    rng.shuffle(&mut order);
    order
}

/// Reorder matrix rows: row `i` of the result is row `order[i]` of `m`.
pub fn permute_rows(m: &DMatrix<f64>, order: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(order[i], j)])
}

/// Upper-tail permutation p-value counting the observed value as one permutation.
pub fn permutation_p_value(observed: f64, null: &[f64]) -> f64 {
    // Relative tolerance so values equal up to rounding count as extreme.
    let tol = 1e-10 * observed.abs().max(1e-300);
    let n_extreme = null.iter().filter(|&&v| v >= observed - tol).count();
    (n_extreme as f64 + 1.0) / (null.len() as f64 + 1.0)
}

/// Standardized effect size of `observed` against the null distribution.
///
/// Returns `None` when the null distribution has no spread.
pub fn effect_size(observed: f64, null: &[f64]) -> Option<f64> {
    let values: Vec<f64> = null.iter().copied().filter(|v| v.is_finite()).collect();
    if values.len() < 2 || !observed.is_finite() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    if var <= 0.0 {
        return None;
    }
    Some((observed - mean) / var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_is_valid_and_reproducible() {
        let p = permutation(10, 42, 3);
        let mut sorted = p.clone();
        sorted.sort();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        assert_eq!(p, permutation(10, 42, 3));
        assert_ne!(p, permutation(10, 42, 4));
    }

    #[test]
    fn test_permute_rows() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let p = permute_rows(&m, &[2, 0, 1]);
        assert_eq!(p[(0, 0)], 3.0);
        assert_eq!(p[(1, 1)], 1.0);
    }

    #[test]
    fn test_p_value_counts_observed() {
        assert_eq!(permutation_p_value(10.0, &[1.0, 2.0, 3.0]), 0.25);
        assert_eq!(permutation_p_value(0.0, &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(permutation_p_value(2.0, &[1.0, 2.0, 3.0]), 0.75);
    }

    #[test]
    fn test_effect_size() {
        let z = effect_size(5.0, &[0.0, 1.0, 2.0]).unwrap();
        assert!((z - 4.0).abs() < 1e-12);
        assert!(effect_size(1.0, &[1.0, 1.0]).is_none());
    }
}
