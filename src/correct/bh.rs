//! Benjamini-Hochberg false discovery rate correction for families of
//! pairwise comparisons.

use serde::{Deserialize, Serialize};

/// Result of BH correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BhCorrected {
    /// Comparison labels in original order.
    pub labels: Vec<String>,
    /// Original p-values.
    pub p_values: Vec<f64>,
    /// Adjusted p-values (q-values).
    pub q_values: Vec<f64>,
    /// Number of tests.
    pub n_tests: usize,
}

impl BhCorrected {
    /// Get the q-value for a labelled comparison.
    pub fn get_qvalue(&self, label: &str) -> Option<f64> {
        let idx = self.labels.iter().position(|l| l == label)?;
        self.q_values.get(idx).copied()
    }

    /// Count significant results at a threshold.
    pub fn n_significant(&self, alpha: f64) -> usize {
        self.q_values.iter().filter(|&&q| q < alpha).count()
    }
}

/// Apply Benjamini-Hochberg FDR correction.
///
/// With p-values sorted ascending, `q[i] = min(p[i] * n / rank[i], q[i+1])`,
/// capped at 1.
pub fn correct_bh(p_values: &[f64], labels: &[String]) -> BhCorrected {
    let n = p_values.len();
    if n == 0 {
        return BhCorrected {
            labels: vec![],
            p_values: vec![],
            q_values: vec![],
            n_tests: 0,
        };
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut q_sorted = vec![0.0; n];
    let n_f64 = n as f64;

    // Largest p-value first, then work backwards
    q_sorted[n - 1] = p_values[indices[n - 1]].min(1.0);
    for i in (0..n - 1).rev() {
        let rank = i + 1;
        let adjusted = p_values[indices[i]] * n_f64 / rank as f64;
        q_sorted[i] = adjusted.min(q_sorted[i + 1]).min(1.0);
    }

    let mut q_values = vec![0.0; n];
    for (i, &orig_idx) in indices.iter().enumerate() {
        q_values[orig_idx] = q_sorted[i];
    }

    BhCorrected {
        labels: labels.to_vec(),
        p_values: p_values.to_vec(),
        q_values,
        n_tests: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("pair_{}", i)).collect()
    }

    #[test]
    fn test_bh_ordering() {
        let p_values = vec![0.04, 0.01, 0.03, 0.005];
        let corrected = correct_bh(&p_values, &labels(4));

        assert_eq!(corrected.n_tests, 4);
        // 0.005 * 4 / 1
        assert_relative_eq!(corrected.q_values[3], 0.02, epsilon = 1e-10);
        // min(0.01 * 4 / 2, 0.02)
        assert_relative_eq!(corrected.q_values[1], 0.02, epsilon = 1e-10);
        assert_relative_eq!(corrected.get_qvalue("pair_3").unwrap(), 0.02, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_known_values() {
        let p_values = vec![0.005, 0.01, 0.02, 0.04, 0.1];
        let corrected = correct_bh(&p_values, &labels(5));

        assert_relative_eq!(corrected.q_values[0], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[1], 0.025, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[2], 1.0 / 30.0, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[3], 0.05, epsilon = 1e-10);
        assert_relative_eq!(corrected.q_values[4], 0.1, epsilon = 1e-10);
        assert_eq!(corrected.n_significant(0.05), 3);
    }

    #[test]
    fn test_bh_bounded_and_empty() {
        let corrected = correct_bh(&[0.5, 0.9, 1.0], &labels(3));
        assert!(corrected.q_values.iter().all(|&q| q <= 1.0));

        let empty = correct_bh(&[], &[]);
        assert_eq!(empty.n_tests, 0);
        assert!(empty.q_values.is_empty());
    }
}
