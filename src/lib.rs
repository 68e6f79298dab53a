//! Composable Geometric Morphometrics Library
//!
//! This library provides modular primitives for landmark-based shape
//! analysis of two-dimensional specimens.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (LandmarkSet, TPS files, Metadata, Formula)
//! - **align**: Generalized Procrustes superimposition
//! - **shape**: Missing landmarks, outlier screening, thin-plate splines
//! - **model**: Procrustes ANOVA and allometry
//! - **ordinate**: Principal component analysis of shape
//! - **test**: Permutation tests (morphological disparity)
//! - **correct**: Multiple testing correction (Benjamini-Hochberg)
//! - **plot**: Figures as serializable data
//! - **pipeline**: Analysis composition, YAML configuration and reports
//!
//! # Example
//!
//! ```no_run
//! use composable_gm::prelude::*;
//!
//! // Load data
//! let landmarks = read_tps("fish.tps", &TpsOptions::default()).unwrap();
//! let metadata = Metadata::from_tsv("fish_metadata.tsv").unwrap();
//!
//! // Full set, then one species on its own
//! let report = Pipeline::new()
//!     .name("fish-shape")
//!     .align()
//!     .outliers()
//!     .allometry(Some("species"))
//!     .pca(Some("species"))
//!     .subset("species", &["A"], true)
//!     .pca(Some("habitat"))
//!     .disparity("habitat", None, true)
//!     .run(landmarks, Some(metadata))
//!     .unwrap();
//!
//! report.write_to("gm_output").unwrap();
//! ```

pub mod align;
pub mod correct;
pub mod data;
pub mod error;
pub mod model;
pub mod ordinate;
pub mod pipeline;
pub mod plot;
pub mod shape;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::align::{gpa, Alignment, GpaConfig};
    pub use crate::correct::bh::correct_bh;
    pub use crate::data::{
        read_tps, write_tps, DesignMatrix, Formula, LandmarkSet, Metadata, MetadataOptions,
        Specimen, SpecimenIdSource, Term, TpsOptions, Variable, VariableType,
    };
    pub use crate::error::{GmError, Result};
    pub use crate::model::{
        fit_shape_model, size_corrected, test_allometry, AllometryResult, AnovaConfig,
        ShapeAnova,
    };
    pub use crate::ordinate::{pca, PcaResult};
    pub use crate::pipeline::{run_config, AnalysisConfig, AnalysisReport, AnalysisStep, Pipeline};
    pub use crate::plot::{DeformationStyle, Figure, GroupColors, Layer, Palette};
    pub use crate::shape::{find_outliers, resolve_missing, MissingPolicy, OutlierReport};
    pub use crate::test::{
        morphological_disparity, DisparityConfig, DisparityResult, PermutationConfig,
    };
}
