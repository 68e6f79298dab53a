//! Data structures for landmark-based shape analysis.

mod design_matrix;
mod formula;
pub mod landmarks;
mod metadata;
pub mod tps;

pub use design_matrix::DesignMatrix;
pub use formula::{Formula, Term};
pub use landmarks::{LandmarkSet, Specimen};
pub use metadata::{Metadata, MetadataOptions, Variable, VariableType};
pub use tps::{parse_tps, read_tps, write_tps, SpecimenIdSource, TpsOptions};
