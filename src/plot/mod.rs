//! Figures as data.
//!
//! Every analysis step can describe its plots as [`Figure`] values. They are
//! written as JSON alongside the numeric results and drawn by the `gm-view`
//! viewer.

pub mod builders;
pub mod color;
pub mod figure;
pub mod hull;

pub use builders::{
    all_specimens_figure, allometry_figure, deformation_figure, disparity_figure,
    outlier_figure, pca_figure, DeformationStyle, Link, PcaPlotOptions,
};
pub use color::{GroupColors, Palette, Rgb};
pub use figure::{read_figures, write_figures, Figure, Layer};
pub use hull::convex_hull;
