//! Multivariate linear models of shape and Procrustes ANOVA.
//!
//! All Procrustes shape variables are regressed jointly on a design matrix.
//! Sums of squares are traces of the SSCP matrices, computed sequentially
//! (type I) in formula order. Significance of each term comes from residual
//! randomization of the model without that term.

use crate::align::gpa::Alignment;
use crate::data::{DesignMatrix, Formula, Metadata};
use crate::error::{GmError, Result};
use crate::test::permutation::{
    effect_size, permutation, permutation_p_value, permute_rows, PermutationConfig,
};
use log::{info, warn};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

/// Permutation settings for Procrustes ANOVA.
pub type AnovaConfig = PermutationConfig;

/// OLS fit of every shape variable on the same design.
#[derive(Debug, Clone)]
pub struct MultivariateFit {
    /// Coefficient names from the design matrix.
    pub coefficient_names: Vec<String>,
    /// Coefficients (design columns × shape variables).
    pub coefficients: DMatrix<f64>,
    /// Fitted values (specimens × shape variables).
    pub fitted: DMatrix<f64>,
    /// Residuals (specimens × shape variables).
    pub residuals: DMatrix<f64>,
    /// Residual degrees of freedom.
    pub df_residual: usize,
}

impl MultivariateFit {
    /// Coefficient row for a named design column.
    pub fn coefficient_row(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.coefficient_names.iter().position(|n| n == name)?;
        Some(self.coefficients.row(idx).iter().copied().collect())
    }

    /// Residual sum of squares (trace of the residual SSCP).
    pub fn rss(&self) -> f64 {
        self.residuals.norm_squared()
    }
}

/// Fit `y` (specimens × variables) on the design matrix.
pub fn fit_multivariate(y: &DMatrix<f64>, design: &DesignMatrix) -> Result<MultivariateFit> {
    let x = design.matrix();
    let n_specimens = y.nrows();
    if design.n_specimens() != n_specimens {
        return Err(GmError::DimensionMismatch {
            expected: n_specimens,
            actual: design.n_specimens(),
        });
    }
    let df_residual = n_specimens.saturating_sub(design.n_coefficients());
    if df_residual == 0 {
        return Err(GmError::Numerical(
            "Model is saturated (n_specimens <= n_coefficients)".to_string(),
        ));
    }
    let xtx_inv = (x.transpose() * x).try_inverse().ok_or_else(|| {
        GmError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })?;
    let coefficients = &xtx_inv * x.transpose() * y;
    let fitted = x * &coefficients;
    let residuals = y - &fitted;
    Ok(MultivariateFit {
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients,
        fitted,
        residuals,
        df_residual,
    })
}

/// Orthogonal projection (hat) matrix onto the column space of `x`.
/// A design with no columns projects onto zero.
pub(crate) fn hat_matrix(x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    if x.ncols() == 0 {
        return Ok(DMatrix::zeros(n, n));
    }
    let xtx_inv = (x.transpose() * x).try_inverse().ok_or_else(|| {
        GmError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })?;
    Ok(x * xtx_inv * x.transpose())
}

/// One term of a Procrustes ANOVA table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnovaRow {
    pub term: String,
    pub df: usize,
    pub ss: f64,
    pub ms: f64,
    pub r_squared: f64,
    pub f: f64,
    /// Standardized effect size of ln F against its permutation distribution.
    pub z: Option<f64>,
    /// Permutation p-value.
    pub p_value: f64,
    /// Reference p-value from the F distribution.
    pub p_parametric: f64,
}

/// Procrustes ANOVA of a shape model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeAnova {
    pub formula: String,
    pub specimen_ids: Vec<String>,
    pub rows: Vec<AnovaRow>,
    pub residual_df: usize,
    pub residual_ss: f64,
    pub residual_ms: f64,
    pub total_df: usize,
    pub total_ss: f64,
    pub n_permutations: usize,
    /// Coefficients of the full model (design columns × shape variables).
    #[serde(skip)]
    pub fit: Option<MultivariateFit>,
}

impl ShapeAnova {
    /// Look up a term's row.
    pub fn row(&self, term: &str) -> Option<&AnovaRow> {
        self.rows.iter().find(|r| r.term == term)
    }

    /// Render the table as tab-separated text.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("term\tdf\tSS\tMS\tRsq\tF\tZ\tPr(>F)\n");
        for r in &self.rows {
            out.push_str(&format!(
                "{}\t{}\t{:.6}\t{:.6}\t{:.5}\t{:.4}\t{}\t{:.4}\n",
                r.term,
                r.df,
                r.ss,
                r.ms,
                r.r_squared,
                r.f,
                r.z.map(|z| format!("{:.4}", z)).unwrap_or_else(|| "NA".to_string()),
                r.p_value
            ));
        }
        out.push_str(&format!(
            "Residuals\t{}\t{:.6}\t{:.6}\t{:.5}\t\t\t\n",
            self.residual_df,
            self.residual_ss,
            self.residual_ms,
            if self.total_ss > 0.0 {
                self.residual_ss / self.total_ss
            } else {
                0.0
            }
        ));
        out.push_str(&format!("Total\t{}\t{:.6}\t\t\t\t\t\n", self.total_df, self.total_ss));
        out
    }
}

/// Procrustes ANOVA of aligned shapes on metadata variables.
///
/// Specimens with missing values in any formula variable are excluded.
pub fn fit_shape_model(
    alignment: &Alignment,
    metadata: &Metadata,
    formula: &str,
    config: &AnovaConfig,
) -> Result<ShapeAnova> {
    let parsed = Formula::parse(formula)?;
    let metadata = metadata.align_to(&alignment.specimen_ids)?;
    let complete = metadata.complete_cases(&parsed.variables())?;

    let (alignment, metadata) = if complete.len() < alignment.n_specimens() {
        warn!(
            "Excluding {} specimen(s) with missing values for '{}'",
            alignment.n_specimens() - complete.len(),
            formula
        );
        (
            alignment.subset(&complete)?,
            metadata.subset_specimens(&complete)?,
        )
    } else {
        (alignment.clone(), metadata)
    };

    let design = DesignMatrix::from_formula(&metadata, &parsed)?;
    let y = alignment.shape_matrix();
    let mut anova = procrustes_anova(&y, &design, &parsed, config)?;
    anova.specimen_ids = alignment.specimen_ids.clone();
    info!(
        "Shape model {} on {} specimens: {}",
        parsed,
        anova.specimen_ids.len(),
        anova
            .rows
            .iter()
            .map(|r| format!("{} Rsq={:.3} p={:.3}", r.term, r.r_squared, r.p_value))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(anova)
}

/// Sequential Procrustes ANOVA with residual randomization.
pub fn procrustes_anova(
    y: &DMatrix<f64>,
    design: &DesignMatrix,
    formula: &Formula,
    config: &AnovaConfig,
) -> Result<ShapeAnova> {
    let n = y.nrows();
    let full = fit_multivariate(y, design)?;
    let df_residual = full.df_residual;

    // Nested models: base (intercept or nothing), then one per term.
    let base_cols = usize::from(design.has_intercept());
    let mut boundaries = vec![base_cols];
    boundaries.extend(design.term_columns().iter().map(|(_, r)| r.end));
    let hats = boundaries
        .iter()
        .map(|&c| hat_matrix(&design.leading_columns(c)))
        .collect::<Result<Vec<DMatrix<f64>>>>()?;
    let h_full = hats
        .last()
        .cloned()
        .unwrap_or_else(|| DMatrix::zeros(n, n));

    let explained = |h: &DMatrix<f64>, m: &DMatrix<f64>| (h * m).norm_squared();
    let total_ss = y.norm_squared() - explained(&hats[0], y);
    let residual_ss = full.rss();
    let residual_ms = residual_ss / df_residual as f64;
    let total_df = n - base_cols;

    let mut rows = Vec::with_capacity(design.term_columns().len());
    for (j, (term, cols)) in design.term_columns().iter().enumerate() {
        let df = cols.len();
        let h_reduced = &hats[j];
        let h_term = &hats[j + 1];

        let ss = explained(h_term, y) - explained(h_reduced, y);
        let ms = ss / df as f64;
        let f = ms / residual_ms;

        // Reduced-model residual randomization
        let fitted_reduced = h_reduced * y;
        let resid_reduced = y - &fitted_reduced;
        let null_stat = |index: usize| -> (f64, f64) {
            let order = permutation(n, config.seed, index);
            let y_star = &fitted_reduced + permute_rows(&resid_reduced, &order);
            let ss_star = explained(h_term, &y_star) - explained(h_reduced, &y_star);
            let rss_star = y_star.norm_squared() - explained(&h_full, &y_star);
            let f_star = (ss_star / df as f64) / (rss_star / df_residual as f64);
            (ss_star, f_star)
        };
        let null: Vec<(f64, f64)> = if config.parallel {
            (0..config.n_permutations).into_par_iter().map(null_stat).collect()
        } else {
            (0..config.n_permutations).map(null_stat).collect()
        };
        let null_ss: Vec<f64> = null.iter().map(|(ss, _)| *ss).collect();
        let null_log_f: Vec<f64> = null
            .iter()
            .filter(|(_, f)| *f > 0.0)
            .map(|(_, f)| f.ln())
            .collect();

        // statrs panics on a NaN argument
        let p_parametric = if f.is_finite() {
            FisherSnedecor::new(df as f64, df_residual as f64)
                .map(|dist| 1.0 - dist.cdf(f))
                .unwrap_or(f64::NAN)
        } else {
            f64::NAN
        };

        rows.push(AnovaRow {
            term: term.clone(),
            df,
            ss,
            ms,
            r_squared: if total_ss > 0.0 { ss / total_ss } else { 0.0 },
            f,
            z: if f.is_finite() && f > 0.0 {
                effect_size(f.ln(), &null_log_f)
            } else {
                None
            },
            p_value: permutation_p_value(ss, &null_ss),
            p_parametric,
        });
    }

    Ok(ShapeAnova {
        formula: formula.to_string(),
        specimen_ids: design.specimen_ids().to_vec(),
        rows,
        residual_df: df_residual,
        residual_ss,
        residual_ms,
        total_df,
        total_ss,
        n_permutations: config.n_permutations,
        fit: Some(full),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_metadata() -> Metadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tgear\tlength").unwrap();
        for i in 0..10 {
            let gear = if i % 2 == 0 { "gillnet" } else { "seine" };
            writeln!(file, "F{}\t{}\t{}", i, gear, 10 + i).unwrap();
        }
        file.flush().unwrap();
        Metadata::from_tsv(file.path()).unwrap()
    }

    /// Four shape variables: variable 0 tracks length, variable 1 tracks gear,
    /// the rest are small deterministic noise.
    fn create_test_shapes() -> DMatrix<f64> {
        DMatrix::from_fn(10, 4, |i, j| {
            let noise = 0.01 * (((i * 7 + j * 3) % 5) as f64 - 2.0);
            match j {
                0 => 0.1 * i as f64 + noise,
                1 => (if i % 2 == 0 { 0.0 } else { 0.5 }) + noise,
                _ => noise,
            }
        })
    }

    fn config() -> PermutationConfig {
        PermutationConfig {
            n_permutations: 199,
            seed: 7,
            parallel: false,
        }
    }

    #[test]
    fn test_fit_multivariate_recovers_slope() {
        let meta = create_test_metadata();
        let design = DesignMatrix::from_formula(&meta, &Formula::parse("~ length").unwrap()).unwrap();
        let y = create_test_shapes();
        let fit = fit_multivariate(&y, &design).unwrap();

        let slope = fit.coefficient_row("length").unwrap();
        assert_relative_eq!(slope[0], 0.1, epsilon = 0.01);
        assert_eq!(fit.df_residual, 8);
    }

    #[test]
    fn test_sums_of_squares_partition() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ length + gear").unwrap();
        let design = DesignMatrix::from_formula(&meta, &formula).unwrap();
        let y = create_test_shapes();
        let anova = procrustes_anova(&y, &design, &formula, &config()).unwrap();

        let explained: f64 = anova.rows.iter().map(|r| r.ss).sum();
        assert_relative_eq!(explained + anova.residual_ss, anova.total_ss, epsilon = 1e-10);
        assert_eq!(anova.rows.len(), 2);
        assert_eq!(anova.residual_df, 7);
        assert_eq!(anova.total_df, 9);
    }

    #[test]
    fn test_detects_effects() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ length + gear").unwrap();
        let design = DesignMatrix::from_formula(&meta, &formula).unwrap();
        let y = create_test_shapes();
        let anova = procrustes_anova(&y, &design, &formula, &config()).unwrap();

        let length = anova.row("length").unwrap();
        let gear = anova.row("gear").unwrap();
        assert!(length.p_value < 0.05, "length p = {}", length.p_value);
        assert!(gear.p_value < 0.05, "gear p = {}", gear.p_value);
        assert!(length.z.unwrap() > 0.0);
        assert!(length.p_parametric < 0.05);
        assert!(anova.to_tsv().starts_with("term\tdf"));
    }

    #[test]
    fn test_reproducible_and_parallel_agrees() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ gear").unwrap();
        let design = DesignMatrix::from_formula(&meta, &formula).unwrap();
        let y = create_test_shapes();

        let seq = procrustes_anova(&y, &design, &formula, &config()).unwrap();
        let par_config = PermutationConfig {
            parallel: true,
            ..config()
        };
        let par = procrustes_anova(&y, &design, &formula, &par_config).unwrap();
        assert_eq!(seq.rows[0].p_value, par.rows[0].p_value);
    }

    #[test]
    fn test_saturated_model_rejected() {
        let y = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let design = DesignMatrix::from_matrix(
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]),
            vec!["(Intercept)".into(), "x".into()],
            vec!["a".into(), "b".into()],
        );
        assert!(fit_multivariate(&y, &design).is_err());
    }

    #[test]
    fn test_constant_shapes_give_undefined_f() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ gear").unwrap();
        let design = DesignMatrix::from_formula(&meta, &formula).unwrap();
        let y = DMatrix::zeros(10, 4);
        let anova = procrustes_anova(&y, &design, &formula, &config()).unwrap();

        let gear = anova.row("gear").unwrap();
        assert!(gear.f.is_nan());
        assert!(gear.p_parametric.is_nan());
        assert!(gear.z.is_none());
    }
}
