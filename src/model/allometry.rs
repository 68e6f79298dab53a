//! Allometry: the dependence of shape on size.
//!
//! Shape is regressed on the natural log of centroid size. With a grouping
//! variable the model becomes `~ log_csize * group`, whose interaction term
//! tests homogeneity of allometric slopes among groups.

use crate::align::gpa::Alignment;
use crate::data::{DesignMatrix, Formula, Metadata};
use crate::error::{GmError, Result};
use crate::model::lm::{fit_multivariate, fit_shape_model, AnovaConfig, ShapeAnova};
use log::info;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Name of the size covariate added to the metadata.
pub const LOG_CSIZE: &str = "log_csize";

/// Result of an allometry test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllometryResult {
    pub anova: ShapeAnova,
    /// Specimens used (complete cases for the model).
    pub specimen_ids: Vec<String>,
    /// Natural log of centroid size per specimen.
    pub log_csize: Vec<f64>,
    /// Centered shape projected onto the normalized size coefficient vector.
    pub regression_scores: Vec<f64>,
    /// First principal component of the fitted values.
    pub predicted_line: Vec<f64>,
    /// Common allometric coefficient vector (one entry per shape variable).
    pub slope: Vec<f64>,
    /// Group label per specimen when a grouping variable was used.
    pub groups: Option<Vec<String>>,
    pub group_column: Option<String>,
}

fn with_log_csize(alignment: &Alignment, metadata: &Metadata) -> Result<Metadata> {
    metadata
        .align_to(&alignment.specimen_ids)?
        .with_continuous_column(LOG_CSIZE, &alignment.log_centroid_sizes())
}

/// Test shape ~ log centroid size, optionally with group-specific slopes.
pub fn test_allometry(
    alignment: &Alignment,
    metadata: &Metadata,
    group: Option<&str>,
    config: &AnovaConfig,
) -> Result<AllometryResult> {
    let metadata = with_log_csize(alignment, metadata)?;
    let formula = match group {
        Some(g) => format!("~ {} * {}", LOG_CSIZE, g),
        None => format!("~ {}", LOG_CSIZE),
    };
    let anova = fit_shape_model(alignment, &metadata, &formula, config)?;

    let alignment = alignment.subset(&anova.specimen_ids)?;
    let metadata = metadata.subset_specimens(&anova.specimen_ids)?;
    let y = alignment.shape_matrix();
    let log_csize = alignment.log_centroid_sizes();

    let simple = DesignMatrix::from_formula(&metadata, &Formula::parse(&format!("~ {}", LOG_CSIZE))?)?;
    let slope = fit_multivariate(&y, &simple)?
        .coefficient_row(LOG_CSIZE)
        .ok_or_else(|| GmError::Numerical("Size coefficient missing from fit".to_string()))?;

    let centered = center_columns(&y);
    let regression_scores = regression_scores(&centered, &slope)?;

    let fitted = match &anova.fit {
        Some(fit) => fit.fitted.clone(),
        None => {
            let design = DesignMatrix::from_formula(&metadata, &Formula::parse(&formula)?)?;
            fit_multivariate(&y, &design)?.fitted
        }
    };
    let predicted_line = predicted_line(&fitted, &log_csize);

    let groups = match group {
        Some(g) => Some(metadata.labels(g)?),
        None => None,
    };

    if let Some(row) = anova.row(LOG_CSIZE) {
        info!(
            "Allometry: {:.1}% of shape variation explained by size (p = {:.4})",
            100.0 * row.r_squared,
            row.p_value
        );
    }

    Ok(AllometryResult {
        specimen_ids: anova.specimen_ids.clone(),
        anova,
        log_csize,
        regression_scores,
        predicted_line,
        slope,
        groups,
        group_column: group.map(String::from),
    })
}

/// Allometry-free shapes: residuals of `~ log_csize` added to the consensus.
pub fn size_corrected(alignment: &Alignment) -> Result<Alignment> {
    let metadata = Metadata::from_ids(&alignment.specimen_ids)
        .with_continuous_column(LOG_CSIZE, &alignment.log_centroid_sizes())?;
    let design = DesignMatrix::from_formula(&metadata, &Formula::parse(&format!("~ {}", LOG_CSIZE))?)?;
    let y = alignment.shape_matrix();
    let fit = fit_multivariate(&y, &design)?;

    let mean = y.row_mean();
    let mut corrected = fit.residuals;
    for i in 0..corrected.nrows() {
        for j in 0..corrected.ncols() {
            corrected[(i, j)] += mean[j];
        }
    }
    info!("Removed allometric component from {} specimens", alignment.n_specimens());
    alignment.with_shape_matrix(&corrected)
}

fn center_columns(y: &DMatrix<f64>) -> DMatrix<f64> {
    let mean = y.row_mean();
    DMatrix::from_fn(y.nrows(), y.ncols(), |i, j| y[(i, j)] - mean[j])
}

fn regression_scores(centered: &DMatrix<f64>, slope: &[f64]) -> Result<Vec<f64>> {
    let b = DVector::from_column_slice(slope);
    let norm = b.norm();
    if norm <= f64::EPSILON {
        return Err(GmError::Numerical(
            "Allometric coefficient vector is zero".to_string(),
        ));
    }
    Ok((centered * (b / norm)).iter().copied().collect())
}

/// Scores of the fitted values on their first principal axis, oriented to
/// increase with size.
fn predicted_line(fitted: &DMatrix<f64>, log_csize: &[f64]) -> Vec<f64> {
    let centered = center_columns(fitted);
    let svd = centered.clone().svd(false, true);
    let axis = match (svd.v_t.as_ref(), svd.singular_values.imax()) {
        (Some(v_t), idx) if svd.singular_values[idx] > 0.0 => v_t.row(idx).transpose(),
        _ => return vec![0.0; fitted.nrows()],
    };
    let mut scores: Vec<f64> = (centered * axis).iter().copied().collect();

    let mean_size = log_csize.iter().sum::<f64>() / log_csize.len() as f64;
    let covariance: f64 = scores
        .iter()
        .zip(log_csize)
        .map(|(s, c)| s * (c - mean_size))
        .sum();
    if covariance < 0.0 {
        scores.iter_mut().for_each(|s| *s = -*s);
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::gpa::{gpa, GpaConfig};
    use crate::data::{LandmarkSet, Specimen};
    use crate::test::permutation::PermutationConfig;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Larger specimens have a relatively longer snout (landmark 2).
    fn create_allometric_set() -> LandmarkSet {
        let specimens = (0..12)
            .map(|i| {
                let size = 1.0 + 0.15 * i as f64;
                let snout = 4.0 + 0.3 * i as f64;
                let jitter = 0.03 * (((i * 5) % 3) as f64 - 1.0);
                let coords = vec![
                    [0.0, 0.0],
                    [3.0, 0.0 + jitter],
                    [snout, 1.0],
                    [3.0, 2.0],
                    [0.0, 2.0 - jitter],
                ]
                .into_iter()
                .map(|p| [p[0] * size, p[1] * size])
                .collect();
                Specimen::new(format!("F{}", i), coords)
            })
            .collect();
        LandmarkSet::new(specimens).unwrap()
    }

    fn create_test_metadata() -> Metadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tspecies").unwrap();
        for i in 0..12 {
            let species = if i % 2 == 0 { "A" } else { "B" };
            writeln!(file, "F{}\t{}", i, species).unwrap();
        }
        file.flush().unwrap();
        Metadata::from_tsv(file.path()).unwrap()
    }

    fn config() -> PermutationConfig {
        PermutationConfig {
            n_permutations: 99,
            seed: 11,
            parallel: false,
        }
    }

    #[test]
    fn test_detects_allometry() {
        let alignment = gpa(&create_allometric_set(), &GpaConfig::default()).unwrap();
        let result = test_allometry(&alignment, &create_test_metadata(), None, &config()).unwrap();

        let row = result.anova.row(LOG_CSIZE).unwrap();
        assert!(row.r_squared > 0.5);
        assert!(row.p_value <= 0.05);
        assert_eq!(result.regression_scores.len(), 12);
        assert_eq!(result.slope.len(), 10);
        assert!(result.groups.is_none());

        // Predicted values increase with size.
        let first = result.predicted_line[0];
        let last = result.predicted_line[11];
        assert!(last > first);
    }

    #[test]
    fn test_group_slopes_model() {
        let alignment = gpa(&create_allometric_set(), &GpaConfig::default()).unwrap();
        let result =
            test_allometry(&alignment, &create_test_metadata(), Some("species"), &config()).unwrap();

        let terms: Vec<&str> = result.anova.rows.iter().map(|r| r.term.as_str()).collect();
        assert_eq!(terms, vec!["log_csize", "species", "log_csize:species"]);
        assert_eq!(result.groups.as_ref().unwrap()[1], "B");
    }

    #[test]
    fn test_size_correction_removes_size_signal() {
        let alignment = gpa(&create_allometric_set(), &GpaConfig::default()).unwrap();
        let corrected = size_corrected(&alignment).unwrap();
        assert_eq!(corrected.n_specimens(), 12);
        assert_eq!(corrected.centroid_sizes, alignment.centroid_sizes);

        let metadata = Metadata::from_ids(&corrected.specimen_ids)
            .with_continuous_column(LOG_CSIZE, &corrected.log_centroid_sizes())
            .unwrap();
        let design =
            DesignMatrix::from_formula(&metadata, &Formula::parse("~ log_csize").unwrap()).unwrap();
        let fit = fit_multivariate(&corrected.shape_matrix(), &design).unwrap();
        let slope = fit.coefficient_row(LOG_CSIZE).unwrap();
        for b in slope {
            assert_relative_eq!(b, 0.0, epsilon = 1e-9);
        }
    }
}
