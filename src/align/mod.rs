//! Procrustes superimposition of landmark configurations.

pub mod gpa;
pub mod superimpose;

pub use gpa::{gpa, Alignment, GpaConfig};
