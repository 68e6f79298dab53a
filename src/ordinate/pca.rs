//! Principal component analysis of Procrustes shape variables.
//!
//! Components are indexed from zero (`0` is PC1). Superimposition removes
//! four dimensions of variation from 2D data, so components with negligible
//! variance are dropped rather than reported as zero.

use crate::align::gpa::Alignment;
use crate::data::landmarks::vector_to_config;
use crate::error::{GmError, Result};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Eigenvalues at or below this fraction of the largest are dropped.
const RELATIVE_TOLERANCE: f64 = 1e-10;

/// Principal components of shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaResult {
    pub specimen_ids: Vec<String>,
    /// Mean shape as a flat vector (x1, y1, x2, y2, ...).
    pub mean: Vec<f64>,
    /// Variance along each component, descending.
    pub eigenvalues: Vec<f64>,
    pub proportion: Vec<f64>,
    pub cumulative: Vec<f64>,
    /// Shape variables × components.
    pub loadings: DMatrix<f64>,
    /// Specimens × components.
    pub scores: DMatrix<f64>,
}

/// Importance of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcSummary {
    pub component: String,
    pub std_dev: f64,
    pub proportion: f64,
    pub cumulative: f64,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Score of specimen `i` on component `pc`.
    pub fn score(&self, i: usize, pc: usize) -> f64 {
        self.scores[(i, pc)]
    }

    /// All scores on one component.
    pub fn component_scores(&self, pc: usize) -> Result<Vec<f64>> {
        self.check_component(pc)?;
        Ok(self.scores.column(pc).iter().copied().collect())
    }

    /// Standard deviation and variance shares per component.
    pub fn summary(&self) -> Vec<PcSummary> {
        self.eigenvalues
            .iter()
            .enumerate()
            .map(|(i, &ev)| PcSummary {
                component: format!("PC{}", i + 1),
                std_dev: ev.sqrt(),
                proportion: self.proportion[i],
                cumulative: self.cumulative[i],
            })
            .collect()
    }

    /// Shape at a given score along one component, other scores at zero.
    pub fn shape_at(&self, pc: usize, score: f64) -> Result<Vec<[f64; 2]>> {
        self.check_component(pc)?;
        let shape: Vec<f64> = self
            .mean
            .iter()
            .zip(self.loadings.column(pc).iter())
            .map(|(m, l)| m + score * l)
            .collect();
        Ok(vector_to_config(&shape))
    }

    /// Shapes at the minimum and maximum observed scores of a component.
    pub fn extreme_shapes(&self, pc: usize) -> Result<(Vec<[f64; 2]>, Vec<[f64; 2]>)> {
        let scores = self.component_scores(pc)?;
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok((self.shape_at(pc, min)?, self.shape_at(pc, max)?))
    }

    /// Mean shape as a configuration.
    pub fn mean_shape(&self) -> Vec<[f64; 2]> {
        vector_to_config(&self.mean)
    }

    /// Scores as tab-separated text, one row per specimen.
    pub fn scores_tsv(&self) -> String {
        let mut out = String::from("specimen");
        for i in 0..self.n_components() {
            out.push_str(&format!("\tPC{}", i + 1));
        }
        out.push('\n');
        for (i, id) in self.specimen_ids.iter().enumerate() {
            out.push_str(id);
            for pc in 0..self.n_components() {
                out.push_str(&format!("\t{:.8}", self.scores[(i, pc)]));
            }
            out.push('\n');
        }
        out
    }

    fn check_component(&self, pc: usize) -> Result<()> {
        if pc >= self.n_components() {
            return Err(GmError::InvalidParameter(format!(
                "PC{} requested but only {} components retained",
                pc + 1,
                self.n_components()
            )));
        }
        Ok(())
    }
}

/// PCA of the aligned shapes via SVD of the centered shape matrix.
pub fn pca(alignment: &Alignment) -> Result<PcaResult> {
    let y = alignment.shape_matrix();
    let n = y.nrows();
    if n < 2 {
        return Err(GmError::EmptyData(
            "PCA requires at least 2 specimens".to_string(),
        ));
    }
    let mean = y.row_mean();
    let centered = DMatrix::from_fn(n, y.ncols(), |i, j| y[(i, j)] - mean[j]);

    let svd = centered.clone().svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| GmError::Numerical("SVD did not produce right singular vectors".to_string()))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let all: Vec<f64> = order
        .iter()
        .map(|&i| svd.singular_values[i].powi(2) / (n - 1) as f64)
        .collect();
    let largest = all.first().copied().unwrap_or(0.0);
    if largest <= 0.0 {
        return Err(GmError::Numerical(
            "Shapes have no variance; all specimens are identical".to_string(),
        ));
    }
    let kept: Vec<usize> = order
        .iter()
        .zip(&all)
        .filter(|(_, &ev)| ev > RELATIVE_TOLERANCE * largest)
        .map(|(&i, _)| i)
        .collect();
    let eigenvalues: Vec<f64> = all.iter().copied().take(kept.len()).collect();
    debug!(
        "PCA kept {} of {} components",
        kept.len(),
        svd.singular_values.len()
    );

    let p = y.ncols();
    let mut loadings = DMatrix::zeros(p, kept.len());
    for (c, &i) in kept.iter().enumerate() {
        let mut axis: DVector<f64> = v_t.row(i).transpose();
        // Largest absolute loading positive
        let dominant = axis.iamax();
        if axis[dominant] < 0.0 {
            axis = -axis;
        }
        loadings.set_column(c, &axis);
    }
    let scores = &centered * &loadings;

    let total: f64 = all.iter().sum();
    let proportion: Vec<f64> = eigenvalues.iter().map(|ev| ev / total).collect();
    let cumulative: Vec<f64> = proportion
        .iter()
        .scan(0.0, |acc, p| {
            *acc += p;
            Some(*acc)
        })
        .collect();

    info!(
        "PCA on {} specimens: PC1 {:.1}%, PC2 {:.1}%",
        n,
        100.0 * proportion.first().copied().unwrap_or(0.0),
        100.0 * proportion.get(1).copied().unwrap_or(0.0)
    );

    Ok(PcaResult {
        specimen_ids: alignment.specimen_ids.clone(),
        mean: mean.iter().copied().collect(),
        eigenvalues,
        proportion,
        cumulative,
        loadings,
        scores,
    })
}
