//! Permutation-based hypothesis tests on shape.

pub mod permutation;

pub use disparity::{morphological_disparity, DisparityConfig, DisparityResult, PairwiseDisparity};
pub use permutation::{permutation_p_value, PermutationConfig};
