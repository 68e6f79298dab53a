//! Generalized Procrustes analysis.
//!
//! Removes translation, scale and rotation from a set of landmark
//! configurations so that only shape variation remains.
//!
//! # Algorithm
//!
//! 1. Record the centroid size of each raw configuration
//! 2. Center each configuration and scale it to unit centroid size
//! 3. Rotate every configuration onto the current reference (first specimen initially)
//! 4. Replace the reference by the normalized mean and repeat until the
//!    Procrustes sum of squares changes by less than the tolerance
//! 5. Optionally project into the tangent space at the consensus

use crate::align::superimpose::{
    center, centroid_size, mean_configuration, procrustes_distance, rotate_onto, scale_to_unit,
    sum_of_squares,
};
use crate::data::landmarks::{configs_to_matrix, LandmarkSet, Specimen};
use crate::error::{GmError, Result};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Configuration for Procrustes superimposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpaConfig {
    /// Maximum number of refinement iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the change in Procrustes sum of squares.
    pub tolerance: f64,
    /// Project aligned shapes into the tangent space at the consensus.
    pub project_tangent: bool,
    /// Scale configurations to unit centroid size.
    pub scale: bool,
}

impl Default for GpaConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-4,
            project_tangent: true,
            scale: true,
        }
    }
}

/// Result of Procrustes superimposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alignment {
    /// Specimen identifiers in row order.
    pub specimen_ids: Vec<String>,
    /// Aligned configurations.
    pub aligned: Vec<Vec<[f64; 2]>>,
    /// Consensus (mean) configuration.
    pub consensus: Vec<[f64; 2]>,
    /// Centroid size of each raw configuration.
    pub centroid_sizes: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the tolerance was reached.
    pub converged: bool,
    /// Summed squared distance of aligned shapes to the consensus.
    pub procrustes_ss: f64,
}

impl Alignment {
    /// Number of specimens.
    pub fn n_specimens(&self) -> usize {
        self.aligned.len()
    }

    /// Number of landmarks.
    pub fn n_landmarks(&self) -> usize {
        self.consensus.len()
    }

    /// Shape variables (specimens × 2k).
    pub fn shape_matrix(&self) -> DMatrix<f64> {
        configs_to_matrix(self.aligned.iter().map(|c| c.as_slice()), self.n_landmarks())
    }

    /// Procrustes distance of each specimen to the consensus.
    pub fn procrustes_distances(&self) -> Vec<f64> {
        self.aligned
            .iter()
            .map(|c| procrustes_distance(c, &self.consensus))
            .collect()
    }

    /// Natural log of centroid sizes.
    pub fn log_centroid_sizes(&self) -> Vec<f64> {
        self.centroid_sizes.iter().map(|s| s.ln()).collect()
    }

    /// Restrict to the given specimens without re-aligning.
    pub fn subset(&self, ids: &[String]) -> Result<Self> {
        let idx = ids
            .iter()
            .map(|id| {
                self.specimen_ids
                    .iter()
                    .position(|s| s == id)
                    .ok_or_else(|| {
                        GmError::SpecimenMismatch(format!("Specimen '{}' not in alignment", id))
                    })
            })
            .collect::<Result<Vec<usize>>>()?;
        let aligned: Vec<Vec<[f64; 2]>> = idx.iter().map(|&i| self.aligned[i].clone()).collect();
        let procrustes_ss = aligned
            .iter()
            .map(|c| procrustes_distance(c, &self.consensus).powi(2))
            .sum();
        Ok(Self {
            specimen_ids: ids.to_vec(),
            aligned,
            consensus: self.consensus.clone(),
            centroid_sizes: idx.iter().map(|&i| self.centroid_sizes[i]).collect(),
            iterations: self.iterations,
            converged: self.converged,
            procrustes_ss,
        })
    }

    /// Aligned coordinates as a landmark set.
    pub fn to_landmark_set(&self) -> Result<LandmarkSet> {
        LandmarkSet::new(
            self.specimen_ids
                .iter()
                .zip(&self.aligned)
                .map(|(id, c)| Specimen::new(id.clone(), c.clone()))
                .collect(),
        )
    }

    /// Replace aligned shapes by rows of a shape matrix (same specimens).
    pub(crate) fn with_shape_matrix(&self, shapes: &DMatrix<f64>) -> Result<Self> {
        if shapes.nrows() != self.n_specimens() || shapes.ncols() != 2 * self.n_landmarks() {
            return Err(GmError::DimensionMismatch {
                expected: self.n_specimens() * 2 * self.n_landmarks(),
                actual: shapes.nrows() * shapes.ncols(),
            });
        }
        let aligned: Vec<Vec<[f64; 2]>> = (0..shapes.nrows())
            .map(|i| crate::data::landmarks::row_to_config(shapes, i))
            .collect();
        let consensus = mean_configuration(&aligned);
        let procrustes_ss = aligned
            .iter()
            .map(|c| procrustes_distance(c, &consensus).powi(2))
            .sum();
        Ok(Self {
            aligned,
            consensus,
            procrustes_ss,
            ..self.clone()
        })
    }
}

/// Superimpose all specimens of a landmark set.
pub fn gpa(set: &LandmarkSet, config: &GpaConfig) -> Result<Alignment> {
    let n = set.n_specimens();
    let k = set.n_landmarks();
    if n < 3 {
        return Err(GmError::InvalidParameter(format!(
            "Procrustes superimposition requires at least 3 specimens, got {}",
            n
        )));
    }
    if k < 3 {
        return Err(GmError::InvalidParameter(format!(
            "Procrustes superimposition requires at least 3 landmarks, got {}",
            k
        )));
    }
    if set.has_missing() {
        let ids: Vec<String> = set.missing_landmarks().into_keys().collect();
        return Err(GmError::MissingLandmarks(format!(
            "specimens with missing landmarks must be estimated or dropped first: {}",
            ids.join(", ")
        )));
    }

    let centroid_sizes: Vec<f64> = set.specimens().iter().map(|s| centroid_size(&s.coords)).collect();
    if let Some(pos) = centroid_sizes.iter().position(|&s| s < 1e-12) {
        return Err(GmError::Numerical(format!(
            "Specimen '{}' has zero centroid size",
            set.specimens()[pos].id
        )));
    }

    let mut shapes: Vec<Vec<[f64; 2]>> = set
        .specimens()
        .iter()
        .map(|s| {
            let centered = center(&s.coords);
            if config.scale {
                scale_to_unit(&centered)
            } else {
                centered
            }
        })
        .collect();

    let mut reference = shapes[0].clone();
    let mut previous_ss = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;
        shapes = shapes.iter().map(|s| rotate_onto(s, &reference)).collect();

        let mut mean = center(&mean_configuration(&shapes));
        if config.scale {
            mean = scale_to_unit(&mean);
        }
        let new_reference = rotate_onto(&mean, &reference);

        let ss: f64 = shapes
            .iter()
            .map(|s| procrustes_distance(s, &new_reference).powi(2))
            .sum();
        debug!("GPA iteration {}: Procrustes SS = {:.6e}", iterations, ss);

        reference = new_reference;
        if (previous_ss - ss).abs() < config.tolerance {
            converged = true;
            break;
        }
        previous_ss = ss;
    }
    // Final pass so every shape is fitted to the final reference.
    shapes = shapes.iter().map(|s| rotate_onto(s, &reference)).collect();

    if !converged {
        warn!(
            "Procrustes superimposition did not converge in {} iterations",
            config.max_iterations
        );
    }

    if config.project_tangent {
        shapes = project_tangent(&shapes, &reference);
    }

    let consensus = mean_configuration(&shapes);
    let procrustes_ss = shapes
        .iter()
        .map(|s| procrustes_distance(s, &consensus).powi(2))
        .sum();

    info!(
        "Aligned {} specimens x {} landmarks in {} iterations (SS = {:.5})",
        n, k, iterations, procrustes_ss
    );

    Ok(Alignment {
        specimen_ids: set.specimen_ids(),
        aligned: shapes,
        consensus,
        centroid_sizes,
        iterations,
        converged,
        procrustes_ss,
    })
}

/// Orthogonal projection into the tangent space at `reference`: `X (I - m mᵀ) + m`
/// with `m` the unit-norm reference vector.
fn project_tangent(shapes: &[Vec<[f64; 2]>], reference: &[[f64; 2]]) -> Vec<Vec<[f64; 2]>> {
    let norm = sum_of_squares(reference).sqrt();
    if norm < 1e-12 {
        return shapes.to_vec();
    }
    let m = DVector::from_iterator(
        2 * reference.len(),
        reference.iter().flat_map(|p| [p[0] / norm, p[1] / norm]),
    );
    let m_scaled: Vec<[f64; 2]> = reference.iter().map(|p| [p[0] / norm, p[1] / norm]).collect();

    shapes
        .iter()
        .map(|s| {
            let x = DVector::from_iterator(2 * s.len(), s.iter().flat_map(|p| [p[0], p[1]]));
            let projected = &x - &m * m.dot(&x);
            projected
                .as_slice()
                .chunks_exact(2)
                .zip(&m_scaled)
                .map(|(c, r)| [c[0] + r[0], c[1] + r[1]])
                .collect()
        })
        .collect()
}
