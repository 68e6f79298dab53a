//! Pipeline composition and execution for shape analyses.
//!
//! An analysis is a list of [`AnalysisStep`]s, written by hand in YAML or
//! assembled with the [`Pipeline`] builder. Steps share one evolving state:
//! the current specimens, their alignment and the most recent PCA. A
//! `subset` step narrows the specimens so that later steps repeat the
//! analysis on a single group.

mod config;
mod report;
mod runner;

pub use config::{AnalysisConfig, AnalysisStep, JoinMode, LandmarkSource, MetadataSource};
pub use report::{AlignmentSummary, AnalysisReport, Scoped, ALL_SPECIMENS};
pub use runner::{run_config, Pipeline};
