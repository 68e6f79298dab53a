//! YAML analysis configuration.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::align::gpa::GpaConfig;
use crate::data::{MetadataOptions, SpecimenIdSource, TpsOptions, VariableType};
use crate::error::{GmError, Result};
use crate::plot::DeformationStyle;
use crate::shape::missing::MissingPolicy;

/// A step in the analysis pipeline.
///
/// Component and landmark numbers in configurations are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AnalysisStep {
    /// Generalized Procrustes superimposition of the current specimens.
    Align,
    /// Rank specimens by distance to the consensus.
    Outliers,
    /// Procrustes ANOVA of shape on log centroid size.
    Allometry {
        #[serde(default)]
        group: Option<String>,
    },
    /// Replace shapes by their allometry-free residuals.
    SizeCorrect,
    /// Principal component analysis with a scatter plot.
    Pca {
        #[serde(default)]
        color_by: Option<String>,
        #[serde(default = "default_pcs")]
        pcs: [usize; 2],
        #[serde(default = "default_true")]
        hulls: bool,
        #[serde(default)]
        x_limits: Option<[f64; 2]>,
        #[serde(default)]
        y_limits: Option<[f64; 2]>,
    },
    /// Deformation from the mean shape to the extremes of one component.
    Deformation {
        #[serde(default = "default_pc")]
        pc: usize,
        #[serde(default = "default_magnification")]
        magnification: f64,
        #[serde(default)]
        style: DeformationStyle,
    },
    /// Procrustes ANOVA for an arbitrary formula.
    ShapeModel { formula: String },
    /// Keep specimens whose `column` value is one of `keep`. Realigning
    /// starts again from the raw landmarks and drops any size correction.
    Subset {
        column: String,
        keep: Vec<String>,
        #[serde(default = "default_true")]
        realign: bool,
    },
    /// Compare Procrustes variances among groups.
    Disparity {
        group: String,
        #[serde(default)]
        formula: Option<String>,
        #[serde(default)]
        bh: bool,
    },
}

fn default_pcs() -> [usize; 2] {
    [1, 2]
}

fn default_pc() -> usize {
    1
}

fn default_magnification() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_permutations() -> usize {
    999
}

fn default_seed() -> u64 {
    42
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("gm_output")
}

/// How metadata rows are matched to specimens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Match on the specimen ID column; every specimen must be present.
    #[default]
    ById,
    /// Assign rows to specimens in file order; counts must agree.
    ByOrder,
}

/// Where and how to read landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSource {
    pub path: PathBuf,
    #[serde(default)]
    pub id_source: SpecimenIdSource,
    #[serde(default)]
    pub read_curves: bool,
    #[serde(default = "default_true")]
    pub negative_missing: bool,
    #[serde(default)]
    pub missing: MissingPolicy,
    /// Multiply coordinates by each specimen's `SCALE=` value.
    #[serde(default)]
    pub apply_scale: bool,
}

impl LandmarkSource {
    pub fn tps_options(&self) -> TpsOptions {
        TpsOptions {
            id_source: self.id_source,
            read_curves: self.read_curves,
            negative_missing: self.negative_missing,
        }
    }
}

/// Where and how to read the specimen metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataSource {
    pub path: PathBuf,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub na_values: Option<Vec<String>>,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub join: JoinMode,
    /// Restrict to these columns (besides the ID).
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Override the inferred type of named columns, e.g. `site: categorical`
    /// for numerically coded groups.
    #[serde(default)]
    pub column_types: Option<HashMap<String, VariableType>>,
}

impl MetadataSource {
    pub fn options(&self) -> MetadataOptions {
        let mut options = MetadataOptions {
            delimiter: self.delimiter,
            id_column: self.id_column.clone(),
            ..Default::default()
        };
        if let Some(na) = &self.na_values {
            options.na_values = na.clone();
        }
        options
    }
}

/// A complete analysis: inputs, shared settings and the steps to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub landmarks: LandmarkSource,
    #[serde(default)]
    pub metadata: Option<MetadataSource>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Group colours in hex notation; generated when absent.
    #[serde(default)]
    pub palette: Option<Vec<String>>,
    /// Wireframe links between landmark numbers.
    #[serde(default)]
    pub links: Vec<[usize; 2]>,
    #[serde(default)]
    pub gpa: GpaConfig,
    #[serde(default = "default_permutations")]
    pub permutations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub steps: Vec<AnalysisStep>,
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(GmError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(GmError::from)
    }

    /// Load from a YAML file. Relative input paths are resolved against the
    /// file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_yaml(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.landmarks.path);
        if let Some(meta) = self.metadata.as_mut() {
            resolve(&mut meta.path);
        }
        resolve(&mut self.output_dir);
    }

    /// A commented-by-example configuration covering the full workflow:
    /// align, screen, allometry, PCA, then the same for one species plus a
    /// disparity test among habitats.
    pub fn example() -> Self {
        Self {
            name: "fish-shape".to_string(),
            description: Some("Body shape of two species across habitats".to_string()),
            landmarks: LandmarkSource {
                path: PathBuf::from("fish.tps"),
                id_source: SpecimenIdSource::Id,
                read_curves: false,
                negative_missing: true,
                missing: MissingPolicy::Estimate,
                apply_scale: true,
            },
            metadata: Some(MetadataSource {
                path: PathBuf::from("fish_metadata.csv"),
                delimiter: None,
                na_values: None,
                id_column: Some("specimen".to_string()),
                join: JoinMode::ById,
                columns: None,
                column_types: None,
            }),
            output_dir: default_output_dir(),
            palette: Some(vec!["#1b9e77".to_string(), "#d95f02".to_string(), "#7570b3".to_string()]),
            links: vec![[1, 2], [2, 3], [3, 4], [4, 5], [5, 1]],
            gpa: GpaConfig::default(),
            permutations: default_permutations(),
            seed: default_seed(),
            steps: vec![
                AnalysisStep::Align,
                AnalysisStep::Outliers,
                AnalysisStep::Allometry {
                    group: Some("species".to_string()),
                },
                AnalysisStep::Pca {
                    color_by: Some("species".to_string()),
                    pcs: default_pcs(),
                    hulls: true,
                    x_limits: None,
                    y_limits: None,
                },
                AnalysisStep::Deformation {
                    pc: 1,
                    magnification: 2.0,
                    style: DeformationStyle::Grid,
                },
                AnalysisStep::Subset {
                    column: "species".to_string(),
                    keep: vec!["A".to_string()],
                    realign: true,
                },
                AnalysisStep::Allometry { group: None },
                AnalysisStep::Pca {
                    color_by: Some("habitat".to_string()),
                    pcs: default_pcs(),
                    hulls: true,
                    x_limits: None,
                    y_limits: None,
                },
                AnalysisStep::Disparity {
                    group: "habitat".to_string(),
                    formula: None,
                    bh: true,
                },
            ],
        }
    }
}
