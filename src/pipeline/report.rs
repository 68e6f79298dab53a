//! Collected results of a pipeline run and their export.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::align::gpa::Alignment;
use crate::data::write_tps;
use crate::error::Result;
use crate::model::allometry::AllometryResult;
use crate::model::lm::ShapeAnova;
use crate::ordinate::pca::PcaResult;
use crate::plot::{write_figures, Figure};
use crate::shape::outliers::OutlierReport;
use crate::test::disparity::DisparityResult;

/// Scope label for the full specimen set.
pub const ALL_SPECIMENS: &str = "all";

/// A result tagged with the specimen subset it was computed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scoped<T> {
    pub scope: String,
    pub result: T,
}

/// Key figures of one superimposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub scope: String,
    pub n_specimens: usize,
    pub n_landmarks: usize,
    pub iterations: usize,
    pub converged: bool,
    pub procrustes_ss: f64,
    pub mean_centroid_size: f64,
    /// Specimens dropped or estimated because of missing landmarks.
    pub missing_handled: Vec<String>,
}

impl AlignmentSummary {
    pub fn new(scope: &str, alignment: &Alignment, missing_handled: &[String]) -> Self {
        let n = alignment.centroid_sizes.len().max(1) as f64;
        Self {
            scope: scope.to_string(),
            n_specimens: alignment.n_specimens(),
            n_landmarks: alignment.n_landmarks(),
            iterations: alignment.iterations,
            converged: alignment.converged,
            procrustes_ss: alignment.procrustes_ss,
            mean_centroid_size: alignment.centroid_sizes.iter().sum::<f64>() / n,
            missing_handled: missing_handled.to_vec(),
        }
    }
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub name: String,
    pub alignment_summary: Vec<AlignmentSummary>,
    pub outliers: Vec<Scoped<OutlierReport>>,
    pub allometry: Vec<Scoped<AllometryResult>>,
    pub pca: Vec<Scoped<PcaResult>>,
    pub models: Vec<Scoped<ShapeAnova>>,
    pub disparity: Vec<Scoped<DisparityResult>>,
    pub figures: Vec<Figure>,
    /// One line per executed step.
    pub log: Vec<String>,
    /// Final alignment of each scope, exported as TPS.
    #[serde(skip)]
    pub alignments: Vec<Scoped<Alignment>>,
}

/// `stem.ext` for the full set, `stem_<scope>.ext` for subsets.
fn scoped_file(stem: &str, scope: &str, ext: &str) -> String {
    if scope == ALL_SPECIMENS {
        format!("{}.{}", stem, ext)
    } else {
        format!("{}_{}.{}", stem, scope, ext)
    }
}

/// Second and later uses of a file name get `_2`, `_3`, ... before the
/// extension.
fn unique_name(used: &mut HashMap<String, usize>, name: String) -> String {
    let count = used.entry(name.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        return name;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_{}.{}", stem, count, ext),
        None => format!("{}_{}", name, count),
    }
}

impl AnalysisReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, message: String) {
        info!("{}", message);
        self.log.push(message);
    }

    /// Write all results under `dir`; returns the paths written.
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        let mut used = HashMap::new();

        let mut write = |name: String, contents: String| -> Result<()> {
            let path = dir.join(unique_name(&mut used, name));
            fs::write(&path, contents)?;
            written.push(path);
            Ok(())
        };

        write("report.json".to_string(), serde_json::to_string_pretty(self)?)?;
        for p in &self.pca {
            write(scoped_file("pca_scores", &p.scope, "tsv"), p.result.scores_tsv())?;
        }
        for a in &self.allometry {
            write(scoped_file("anova_allometry", &a.scope, "tsv"), a.result.anova.to_tsv())?;
        }
        for (i, m) in self.models.iter().enumerate() {
            let stem = format!("anova_model{}", i + 1);
            write(scoped_file(&stem, &m.scope, "tsv"), m.result.to_tsv())?;
        }
        for d in &self.disparity {
            let stem = format!("disparity_{}", d.result.group_column);
            write(scoped_file(&stem, &d.scope, "tsv"), d.result.to_tsv())?;
        }

        for a in &self.alignments {
            let path = dir.join(unique_name(&mut used, scoped_file("aligned", &a.scope, "tps")));
            write_tps(&a.result.to_landmark_set()?, &path)?;
            written.push(path);
        }

        written.extend(write_figures(dir.join("figures"), &self.figures)?);
        info!("Wrote {} files to {}", written.len(), dir.display());
        Ok(written)
    }
}
