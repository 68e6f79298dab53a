//! Ordination of shape variation.

pub mod pca;

pub use pca::{pca, PcSummary, PcaResult};
