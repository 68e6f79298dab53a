//! Per-specimen metadata (environmental and categorical measurements).

use crate::error::{GmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as ordinal i64.
    pub fn as_ordinal(&self) -> Option<i64> {
        match self {
            Variable::Ordinal(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as a group label.
    pub fn label(&self) -> String {
        match self {
            Variable::Categorical(s) => s.clone(),
            Variable::Continuous(v) => v.to_string(),
            Variable::Ordinal(v) => v.to_string(),
            Variable::Missing => "NA".to_string(),
        }
    }
}

/// Type hint for columns when loading metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// `NaN` and infinities parse as `f64` but are stored as missing.
fn parse_continuous(raw: &str) -> Variable {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Variable::Continuous(v),
        _ => Variable::Missing,
    }
}

/// Options for reading a delimited metadata table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataOptions {
    /// Field delimiter. `None` picks tab for `.tsv`/`.txt` files and comma otherwise.
    pub delimiter: Option<char>,
    /// Cell values treated as missing.
    pub na_values: Vec<String>,
    /// Column holding the specimen ID. `None` uses the first column.
    pub id_column: Option<String>,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            na_values: vec!["NA".to_string(), "na".to_string(), String::new()],
            id_column: None,
        }
    }
}

impl MetadataOptions {
    fn resolve_delimiter(&self, path: &Path) -> Result<u8> {
        let delim = match self.delimiter {
            Some(c) => c,
            None => match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => {
                    '\t'
                }
                _ => ',',
            },
        };
        u8::try_from(delim).map_err(|_| {
            GmError::InvalidParameter(format!("Delimiter '{}' is not a single byte", delim))
        })
    }
}

/// Specimen metadata containing variables for each specimen.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Specimen IDs in row order.
    specimen_ids: Vec<String>,
    /// Column names.
    column_names: Vec<String>,
    /// Data stored as specimen_id -> column_name -> Variable.
    data: HashMap<String, HashMap<String, Variable>>,
    /// Type hints for each column.
    column_types: HashMap<String, VariableType>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self {
            specimen_ids: Vec::new(),
            column_names: Vec::new(),
            data: HashMap::new(),
            column_types: HashMap::new(),
        }
    }

    /// Create metadata holding only specimen IDs and no columns.
    pub fn from_ids(specimen_ids: &[String]) -> Self {
        Self {
            specimen_ids: specimen_ids.to_vec(),
            column_names: Vec::new(),
            data: specimen_ids
                .iter()
                .map(|id| (id.clone(), HashMap::new()))
                .collect(),
            column_types: HashMap::new(),
        }
    }

    /// Load metadata from a TSV file with the ID in the first column.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let opts = MetadataOptions {
            delimiter: Some('\t'),
            ..Default::default()
        };
        Self::from_delimited(path, &opts)
    }

    /// Load metadata from a delimited text file with a header row.
    ///
    /// Columns are inferred as continuous if all non-missing values parse as
    /// numbers, otherwise categorical. Use `with_column_types` to override.
    pub fn from_delimited<P: AsRef<Path>>(path: P, opts: &MetadataOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(opts.resolve_delimiter(path)?)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if header.len() < 2 {
            return Err(GmError::EmptyData(
                "Metadata must have at least one variable column".to_string(),
            ));
        }
        let id_idx = match &opts.id_column {
            Some(name) => header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| GmError::MissingColumn(name.clone()))?,
            None => 0,
        };
        let column_names: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, h)| h.clone())
            .collect();

        // First pass: collect all values to infer types
        let mut raw_data: Vec<(String, Vec<String>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            let specimen_id = record.get(id_idx).unwrap_or("").to_string();
            let values: Vec<String> = (0..header.len())
                .filter(|i| *i != id_idx)
                .map(|i| record.get(i).unwrap_or("").to_string())
                .collect();
            raw_data.push((specimen_id, values));
        }

        if raw_data.is_empty() {
            return Err(GmError::EmptyData("No specimens in metadata".to_string()));
        }

        let is_na = |v: &str| opts.na_values.iter().any(|na| na == v) || v.is_empty();

        // Infer column types
        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = raw_data.iter().all(|(_, values)| {
                let v = values[col_idx].as_str();
                is_na(v) || v.parse::<f64>().is_ok()
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        // Build metadata
        let mut specimen_ids = Vec::new();
        let mut data = HashMap::new();

        for (specimen_id, values) in raw_data {
            if data.contains_key(&specimen_id) {
                return Err(GmError::SpecimenMismatch(format!(
                    "Duplicate specimen ID '{}' in metadata",
                    specimen_id
                )));
            }
            specimen_ids.push(specimen_id.clone());
            let mut specimen_data = HashMap::new();

            for (col_idx, col_name) in column_names.iter().enumerate() {
                let raw = values[col_idx].as_str();
                let var = if is_na(raw) {
                    Variable::Missing
                } else {
                    match column_types.get(col_name) {
                        Some(VariableType::Continuous) => parse_continuous(raw),
                        Some(VariableType::Ordinal) => raw
                            .parse::<i64>()
                            .map(Variable::Ordinal)
                            .unwrap_or(Variable::Missing),
                        Some(VariableType::Categorical) | None => {
                            Variable::Categorical(raw.to_string())
                        }
                    }
                };
                specimen_data.insert(col_name.clone(), var);
            }
            data.insert(specimen_id, specimen_data);
        }

        Ok(Self {
            specimen_ids,
            column_names,
            data,
            column_types,
        })
    }

    /// Set type hints for specific columns.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for (col_name, var_type) in &types {
            self.column_types.insert(col_name.clone(), *var_type);

            for specimen_data in self.data.values_mut() {
                if let Some(var) = specimen_data.get_mut(col_name) {
                    *var = match var {
                        Variable::Categorical(s) => {
                            let trimmed = s.trim();
                            match var_type {
                                VariableType::Continuous => parse_continuous(trimmed),
                                VariableType::Ordinal => trimmed
                                    .parse::<i64>()
                                    .map(Variable::Ordinal)
                                    .unwrap_or(Variable::Missing),
                                VariableType::Categorical => Variable::Categorical(s.clone()),
                            }
                        }
                        Variable::Continuous(v) => match var_type {
                            VariableType::Continuous => Variable::Continuous(*v),
                            VariableType::Ordinal => Variable::Ordinal(*v as i64),
                            VariableType::Categorical => Variable::Categorical(v.to_string()),
                        },
                        Variable::Ordinal(v) => match var_type {
                            VariableType::Continuous => Variable::Continuous(*v as f64),
                            VariableType::Ordinal => Variable::Ordinal(*v),
                            VariableType::Categorical => Variable::Categorical(v.to_string()),
                        },
                        Variable::Missing => Variable::Missing,
                    };
                }
            }
        }
        self
    }

    /// Add (or replace) a continuous column, one value per specimen in order.
    pub fn with_continuous_column(mut self, name: &str, values: &[f64]) -> Result<Self> {
        if values.len() != self.specimen_ids.len() {
            return Err(GmError::DimensionMismatch {
                expected: self.specimen_ids.len(),
                actual: values.len(),
            });
        }
        for (sid, &v) in self.specimen_ids.iter().zip(values) {
            let var = if v.is_finite() {
                Variable::Continuous(v)
            } else {
                Variable::Missing
            };
            self.data
                .entry(sid.clone())
                .or_default()
                .insert(name.to_string(), var);
        }
        if !self.has_column(name) {
            self.column_names.push(name.to_string());
        }
        self.column_types
            .insert(name.to_string(), VariableType::Continuous);
        Ok(self)
    }

    /// Specimen IDs in row order.
    pub fn specimen_ids(&self) -> &[String] {
        &self.specimen_ids
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of specimens.
    pub fn n_specimens(&self) -> usize {
        self.specimen_ids.len()
    }

    /// Number of columns (variables).
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Value of `column` for one specimen.
    pub fn get(&self, specimen_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(specimen_id).and_then(|m| m.get(column))
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(GmError::MissingColumn(column.to_string()));
        }
        Ok(self
            .specimen_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// Group labels for a column, one per specimen in order.
    pub fn labels(&self, column: &str) -> Result<Vec<String>> {
        Ok(self.column(column)?.iter().map(|v| v.label()).collect())
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Get unique levels for a categorical column.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let values = self.column(column)?;
        let mut levels: Vec<String> = values
            .iter()
            .filter_map(|v| v.as_categorical().map(String::from))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        levels.sort();
        Ok(levels)
    }

    /// Keep only the listed specimens, in the given order. Unknown IDs are an error.
    pub fn subset_specimens(&self, specimen_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::new();
        let mut new_specimen_ids = Vec::new();

        for sid in specimen_ids {
            if let Some(specimen_data) = self.data.get(sid) {
                new_data.insert(sid.clone(), specimen_data.clone());
                new_specimen_ids.push(sid.clone());
            } else {
                return Err(GmError::SpecimenMismatch(format!(
                    "Specimen '{}' not found in metadata",
                    sid
                )));
            }
        }

        Ok(Self {
            specimen_ids: new_specimen_ids,
            column_names: self.column_names.clone(),
            data: new_data,
            column_types: self.column_types.clone(),
        })
    }

    /// Align metadata to match the specimen order of a landmark set.
    pub fn align_to(&self, specimen_ids: &[String]) -> Result<Self> {
        self.subset_specimens(specimen_ids)
    }

    /// Positional join: assign `ids` to the metadata rows in file order.
    pub fn with_specimen_ids(&self, ids: &[String]) -> Result<Self> {
        if ids.len() != self.specimen_ids.len() {
            return Err(GmError::DimensionMismatch {
                expected: self.specimen_ids.len(),
                actual: ids.len(),
            });
        }
        let data = self
            .specimen_ids
            .iter()
            .zip(ids)
            .map(|(old, new)| {
                (
                    new.clone(),
                    self.data.get(old).cloned().unwrap_or_default(),
                )
            })
            .collect();
        Ok(Self {
            specimen_ids: ids.to_vec(),
            column_names: self.column_names.clone(),
            data,
            column_types: self.column_types.clone(),
        })
    }

    /// Keep only the named columns, in the given order.
    pub fn select_columns(&self, columns: &[String]) -> Result<Self> {
        for c in columns {
            if !self.has_column(c) {
                return Err(GmError::MissingColumn(c.clone()));
            }
        }
        let data = self
            .data
            .iter()
            .map(|(sid, row)| {
                let kept = row
                    .iter()
                    .filter(|(k, _)| columns.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (sid.clone(), kept)
            })
            .collect();
        let column_types = self
            .column_types
            .iter()
            .filter(|(k, _)| columns.contains(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Ok(Self {
            specimen_ids: self.specimen_ids.clone(),
            column_names: columns.to_vec(),
            data,
            column_types,
        })
    }

    /// IDs of specimens with no missing value in any of `columns`.
    pub fn complete_cases(&self, columns: &[&str]) -> Result<Vec<String>> {
        for c in columns {
            if !self.has_column(c) {
                return Err(GmError::MissingColumn(c.to_string()));
            }
        }
        Ok(self
            .specimen_ids
            .iter()
            .filter(|sid| {
                columns
                    .iter()
                    .all(|c| self.get(sid, c).map(|v| !v.is_missing()).unwrap_or(false))
            })
            .cloned()
            .collect())
    }

    /// IDs of specimens whose `column` label is one of `values`.
    pub fn filter_equals(&self, column: &str, values: &[String]) -> Result<Vec<String>> {
        let labels = self.labels(column)?;
        Ok(self
            .specimen_ids
            .iter()
            .zip(labels)
            .filter(|(_, label)| values.contains(label))
            .map(|(sid, _)| sid.clone())
            .collect())
    }

    /// Check if a specimen has a row.
    pub fn has_specimen(&self, specimen_id: &str) -> bool {
        self.data.contains_key(specimen_id)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tgear\ttemp\tstage").unwrap();
        writeln!(file, "F1\tgillnet\t25.5\t1").unwrap();
        writeln!(file, "F2\tseine\t30\t2").unwrap();
        writeln!(file, "F3\tgillnet\t35\t1").unwrap();
        writeln!(file, "F4\tseine\t28\t3").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_metadata() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.n_specimens(), 4);
        assert_eq!(meta.n_columns(), 3);
        assert_eq!(meta.specimen_ids(), &["F1", "F2", "F3", "F4"]);
        assert_eq!(meta.column_names(), &["gear", "temp", "stage"]);
        assert_eq!(meta.get("F1", "temp").unwrap().as_continuous(), Some(25.5));
    }

    #[test]
    fn test_csv_with_id_column_and_na_marker() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "gear,ID,pH").unwrap();
        writeln!(file, "trap,A,7.1").unwrap();
        writeln!(file, "net,B,-").unwrap();
        file.flush().unwrap();

        let opts = MetadataOptions {
            id_column: Some("ID".to_string()),
            na_values: vec!["-".to_string()],
            ..Default::default()
        };
        let meta = Metadata::from_delimited(file.path(), &opts).unwrap();

        assert_eq!(meta.specimen_ids(), &["A", "B"]);
        assert_eq!(meta.column_names(), &["gear", "pH"]);
        assert_eq!(meta.column_type("pH"), Some(VariableType::Continuous));
        assert!(meta.get("B", "pH").unwrap().is_missing());
    }

    #[test]
    fn test_column_type_inference() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.column_type("gear"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("temp"), Some(VariableType::Continuous));
    }

    #[test]
    fn test_with_column_types() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        let mut types = HashMap::new();
        types.insert("stage".to_string(), VariableType::Ordinal);
        let meta = meta.with_column_types(types);

        let val = meta.get("F2", "stage").unwrap();
        assert_eq!(val.as_ordinal(), Some(2));
    }

    #[test]
    fn test_non_finite_values_are_missing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\ttemp\tdepth").unwrap();
        writeln!(file, "F1\t12.5\t3").unwrap();
        writeln!(file, "F2\tNaN\tinf").unwrap();
        writeln!(file, "F3\t14\t-infinity").unwrap();
        file.flush().unwrap();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.column_type("temp"), Some(VariableType::Continuous));
        assert!(meta.get("F2", "temp").unwrap().is_missing());
        assert!(meta.get("F2", "depth").unwrap().is_missing());
        assert!(meta.get("F3", "depth").unwrap().is_missing());
        assert_eq!(meta.complete_cases(&["temp", "depth"]).unwrap(), vec!["F1"]);

        let mut types = HashMap::new();
        types.insert("depth".to_string(), VariableType::Categorical);
        let mut types_back = HashMap::new();
        types_back.insert("depth".to_string(), VariableType::Continuous);
        let meta = meta.with_column_types(types).with_column_types(types_back);
        assert_eq!(meta.get("F1", "depth").unwrap().as_continuous(), Some(3.0));
        assert!(meta.get("F2", "depth").unwrap().is_missing());
    }

    #[test]
    fn test_levels_and_filter() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.levels("gear").unwrap(), vec!["gillnet", "seine"]);
        let ids = meta.filter_equals("gear", &["seine".to_string()]).unwrap();
        assert_eq!(ids, vec!["F2", "F4"]);
    }

    #[test]
    fn test_subset_and_positional_join() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        let subset = meta.subset_specimens(&["F3".to_string(), "F1".to_string()]).unwrap();
        assert_eq!(subset.specimen_ids(), &["F3", "F1"]);
        assert!(meta.align_to(&["F9".to_string()]).is_err());

        let ids: Vec<String> = (1..=4).map(|i| format!("s{}", i)).collect();
        let renamed = meta.with_specimen_ids(&ids).unwrap();
        assert_eq!(renamed.get("s2", "gear").unwrap().as_categorical(), Some("seine"));
        assert!(meta.with_specimen_ids(&ids[..2]).is_err());
    }

    #[test]
    fn test_missing_values_and_complete_cases() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "specimen\tgear\ttemp").unwrap();
        writeln!(file, "F1\tseine\t25").unwrap();
        writeln!(file, "F2\tseine\tNA").unwrap();
        writeln!(file, "F3\t\t30").unwrap();
        file.flush().unwrap();

        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert!(meta.get("F2", "temp").unwrap().is_missing());
        assert!(meta.get("F3", "gear").unwrap().is_missing());
        assert_eq!(meta.complete_cases(&["gear", "temp"]).unwrap(), vec!["F1"]);
        assert!(meta.complete_cases(&["depth"]).is_err());
    }

    #[test]
    fn test_with_continuous_column_and_select() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path())
            .unwrap()
            .with_continuous_column("log_csize", &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        assert_eq!(meta.get("F4", "log_csize").unwrap().as_continuous(), Some(4.0));

        let narrow = meta
            .select_columns(&["log_csize".to_string(), "gear".to_string()])
            .unwrap();
        assert_eq!(narrow.column_names(), &["log_csize", "gear"]);
        assert!(narrow.get("F1", "temp").is_none());
        assert!(meta.with_continuous_column("x", &[1.0]).is_err());
    }
}
