//! Linear models of shape: Procrustes ANOVA and allometry.

pub mod allometry;
pub mod lm;

pub use allometry::{size_corrected, test_allometry, AllometryResult, LOG_CSIZE};
pub use lm::{
    fit_multivariate, fit_shape_model, procrustes_anova, AnovaConfig, AnovaRow,
    MultivariateFit, ShapeAnova,
};
