//! Shape utilities built on aligned configurations: deformation splines,
//! missing-landmark estimation and outlier screening.

pub mod missing;
pub mod outliers;
pub mod spline;

pub use missing::{estimate_missing, resolve_missing, MissingPolicy};
pub use outliers::{find_outliers, OutlierEntry, OutlierReport};
pub use spline::{deformation_grid, magnify, DeformationGrid, ThinPlateSpline};
