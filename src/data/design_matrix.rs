//! Design matrix construction from metadata and formula.

use crate::data::{Formula, Metadata, Term, Variable, VariableType};
use crate::error::{GmError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::ops::Range;

/// A design matrix for linear modeling of shape.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (specimens × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Specimen IDs (rows).
    specimen_ids: Vec<String>,
    /// Column range produced by each formula term, in formula order.
    term_columns: Vec<(String, Range<usize>)>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(
        matrix: DMatrix<f64>,
        coefficient_names: Vec<String>,
        specimen_ids: Vec<String>,
    ) -> Self {
        let n = matrix.ncols();
        Self {
            matrix,
            coefficient_names,
            specimen_ids,
            term_columns: vec![("(matrix)".to_string(), 0..n)],
            reference_levels: HashMap::new(),
        }
    }

    /// Build a design matrix from metadata and formula.
    ///
    /// Every formula variable must be present and non-missing for every specimen.
    pub fn from_formula(metadata: &Metadata, formula: &Formula) -> Result<Self> {
        let specimen_ids = metadata.specimen_ids().to_vec();
        let n_specimens = specimen_ids.len();

        for var in formula.variables() {
            if !metadata.has_column(var) {
                return Err(GmError::MissingColumn(var.to_string()));
            }
            if let Some(pos) = metadata.column(var)?.iter().position(|v| v.is_missing()) {
                return Err(GmError::InvalidVariableType {
                    column: var.to_string(),
                    reason: format!("missing value for specimen '{}'", specimen_ids[pos]),
                });
            }
        }

        // Reference levels for categorical variables (alphabetically first)
        let mut reference_levels = HashMap::new();
        for var in formula.variables() {
            if metadata.column_type(var) == Some(VariableType::Categorical) {
                let levels = metadata.levels(var)?;
                if let Some(first) = levels.first() {
                    reference_levels.insert(var.to_string(), first.clone());
                }
            }
        }

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut term_columns = Vec::new();

        if formula.intercept {
            coefficient_names.push("(Intercept)".to_string());
            columns.push(vec![1.0; n_specimens]);
        }

        for term in &formula.terms {
            let start = columns.len();
            match term {
                Term::Main(var_name) => {
                    // Without an intercept the first categorical keeps all levels.
                    let keep_reference = !formula.intercept && start == 0;
                    let ref_level = if keep_reference {
                        None
                    } else {
                        reference_levels.get(var_name)
                    };
                    for (name, col) in variable_columns(metadata, var_name, ref_level)? {
                        coefficient_names.push(name);
                        columns.push(col);
                    }
                }
                Term::Interaction(var1, var2) => {
                    let cols1 = variable_columns(metadata, var1, reference_levels.get(var1))?;
                    let cols2 = variable_columns(metadata, var2, reference_levels.get(var2))?;

                    for (name1, col1) in &cols1 {
                        for (name2, col2) in &cols2 {
                            coefficient_names.push(format!("{}:{}", name1, name2));
                            columns.push(col1.iter().zip(col2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
            term_columns.push((term.to_string(), start..columns.len()));
        }

        let n_coef = columns.len();
        let mut matrix = DMatrix::zeros(n_specimens, n_coef);
        for (col_idx, col) in columns.iter().enumerate() {
            for (row_idx, &val) in col.iter().enumerate() {
                matrix[(row_idx, col_idx)] = val;
            }
        }

        Ok(Self {
            matrix,
            coefficient_names,
            specimen_ids,
            term_columns,
            reference_levels,
        })
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Columns `0..n` of the design matrix.
    pub fn leading_columns(&self, n: usize) -> DMatrix<f64> {
        self.matrix.columns(0, n).into_owned()
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Column range produced by each formula term.
    pub fn term_columns(&self) -> &[(String, Range<usize>)] {
        &self.term_columns
    }

    /// Get specimen IDs.
    pub fn specimen_ids(&self) -> &[String] {
        &self.specimen_ids
    }

    /// Number of specimens (rows).
    pub fn n_specimens(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(String::as_str) == Some("(Intercept)")
    }
}

/// Numeric columns for one variable; categorical variables are dummy coded,
/// skipping `ref_level` when given.
fn variable_columns(
    metadata: &Metadata,
    var_name: &str,
    ref_level: Option<&String>,
) -> Result<Vec<(String, Vec<f64>)>> {
    let values = metadata.column(var_name)?;

    match metadata.column_type(var_name) {
        Some(VariableType::Continuous) | Some(VariableType::Ordinal) => {
            let col = values
                .iter()
                .map(|v| match v {
                    Variable::Continuous(x) => Ok(*x),
                    Variable::Ordinal(x) => Ok(*x as f64),
                    other => Err(GmError::InvalidVariableType {
                        column: var_name.to_string(),
                        reason: format!("expected a number, found {:?}", other),
                    }),
                })
                .collect::<Result<Vec<f64>>>()?;
            Ok(vec![(var_name.to_string(), col)])
        }
        Some(VariableType::Categorical) | None => {
            let levels = metadata.levels(var_name)?;
            Ok(levels
                .iter()
                .filter(|level| Some(*level) != ref_level)
                .map(|level| {
                    let col = values
                        .iter()
                        .map(|v| match v {
                            Variable::Categorical(s) if s == level => 1.0,
                            _ => 0.0,
                        })
                        .collect();
                    (format!("{}{}", var_name, level), col)
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_metadata() -> Metadata {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tgear\tlength").unwrap();
        writeln!(file, "F1\tgillnet\t25").unwrap();
        writeln!(file, "F2\tseine\t30").unwrap();
        writeln!(file, "F3\tgillnet\t35").unwrap();
        writeln!(file, "F4\tseine\t28").unwrap();
        file.flush().unwrap();
        Metadata::from_tsv(file.path()).unwrap()
    }

    #[test]
    fn test_intercept_only() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ 1").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert_eq!(dm.n_specimens(), 4);
        assert_eq!(dm.coefficient_names(), &["(Intercept)"]);
        assert!(dm.matrix().iter().all(|&v| v == 1.0));
        assert!(dm.term_columns().is_empty());
    }

    #[test]
    fn test_continuous_variable() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ length").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "length"]);
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![25.0, 30.0, 35.0, 28.0]);
    }

    #[test]
    fn test_categorical_variable() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ gear").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert_eq!(dm.coefficient_names(), &["(Intercept)", "gearseine"]);
        assert_eq!(dm.reference_level("gear"), Some("gillnet"));
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_no_intercept_keeps_all_levels() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ 0 + gear").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert!(!dm.has_intercept());
        assert_eq!(dm.coefficient_names(), &["geargillnet", "gearseine"]);
    }

    #[test]
    fn test_interaction_and_term_columns() {
        let meta = create_test_metadata();
        let formula = Formula::parse("~ length * gear").unwrap();
        let dm = DesignMatrix::from_formula(&meta, &formula).unwrap();

        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "length", "gearseine", "length:gearseine"]
        );
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(col, vec![0.0, 30.0, 0.0, 28.0]);

        let ranges: Vec<Range<usize>> = dm.term_columns().iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(ranges, vec![1..2, 2..3, 3..4]);
        assert_eq!(dm.leading_columns(2).ncols(), 2);
    }

    #[test]
    fn test_missing_values_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tlength").unwrap();
        writeln!(file, "F1\t25").unwrap();
        writeln!(file, "F2\tNA").unwrap();
        file.flush().unwrap();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        let formula = Formula::parse("~ length").unwrap();
        assert!(DesignMatrix::from_formula(&meta, &formula).is_err());
        let formula = Formula::parse("~ depth").unwrap();
        assert!(matches!(
            DesignMatrix::from_formula(&meta, &formula),
            Err(GmError::MissingColumn(_))
        ));
    }
}
