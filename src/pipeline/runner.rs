//! Pipeline runner for composing and executing analysis steps.

use log::{info, warn};

use super::config::{AnalysisConfig, AnalysisStep, JoinMode};
use super::report::{AlignmentSummary, AnalysisReport, Scoped, ALL_SPECIMENS};
use crate::align::gpa::{gpa, Alignment, GpaConfig};
use crate::data::{read_tps, LandmarkSet, Metadata};
use crate::error::{GmError, Result};
use crate::model::allometry::{size_corrected, test_allometry};
use crate::model::lm::fit_shape_model;
use crate::ordinate::pca::{pca, PcaResult};
use crate::plot::{
    all_specimens_figure, allometry_figure, deformation_figure, disparity_figure,
    outlier_figure, pca_figure, DeformationStyle, Figure, GroupColors, Link, Palette,
    PcaPlotOptions,
};
use crate::shape::missing::resolve_missing;
use crate::shape::outliers::find_outliers;
use crate::test::disparity::{morphological_disparity, DisparityConfig};
use crate::test::permutation::PermutationConfig;

/// Builder for constructing and running analysis pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<AnalysisStep>,
    gpa: GpaConfig,
    permutations: PermutationConfig,
    palette: Option<Palette>,
    links: Vec<Link>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            name: "unnamed".to_string(),
            steps: Vec::new(),
            gpa: GpaConfig::default(),
            permutations: PermutationConfig::default(),
            palette: None,
            links: Vec::new(),
        }
    }

    /// Create from a config. Links are converted from 1-based landmark numbers.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let palette = config
            .palette
            .as_ref()
            .map(|p| Palette::from_hex(p))
            .transpose()?;
        let links = config
            .links
            .iter()
            .map(|&[a, b]| {
                if a == 0 || b == 0 {
                    Err(GmError::InvalidParameter(
                        "Landmark links are numbered from 1".to_string(),
                    ))
                } else {
                    Ok([a - 1, b - 1])
                }
            })
            .collect::<Result<Vec<Link>>>()?;
        Ok(Self {
            name: config.name.clone(),
            steps: config.steps.clone(),
            gpa: config.gpa.clone(),
            permutations: PermutationConfig {
                n_permutations: config.permutations,
                seed: config.seed,
                ..Default::default()
            },
            palette,
            links,
        })
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn gpa_config(mut self, config: GpaConfig) -> Self {
        self.gpa = config;
        self
    }

    pub fn permutations(mut self, config: PermutationConfig) -> Self {
        self.permutations = config;
        self
    }

    pub fn palette(mut self, palette: Palette) -> Self {
        self.palette = Some(palette);
        self
    }

    /// Wireframe links (zero-based landmark indices).
    pub fn links(mut self, links: Vec<Link>) -> Self {
        self.links = links;
        self
    }

    /// Add Procrustes superimposition.
    pub fn align(mut self) -> Self {
        self.steps.push(AnalysisStep::Align);
        self
    }

    /// Add outlier screening.
    pub fn outliers(mut self) -> Self {
        self.steps.push(AnalysisStep::Outliers);
        self
    }

    /// Add an allometry test, optionally with group-specific slopes.
    pub fn allometry(mut self, group: Option<&str>) -> Self {
        self.steps.push(AnalysisStep::Allometry {
            group: group.map(String::from),
        });
        self
    }

    /// Replace shapes by allometry-free residuals.
    pub fn size_correct(mut self) -> Self {
        self.steps.push(AnalysisStep::SizeCorrect);
        self
    }

    /// Add PCA of PC1/PC2 with default plot settings.
    pub fn pca(self, color_by: Option<&str>) -> Self {
        self.pca_with(color_by, [1, 2], true, None, None)
    }

    /// Add PCA with explicit plot settings (1-based components).
    pub fn pca_with(
        mut self,
        color_by: Option<&str>,
        pcs: [usize; 2],
        hulls: bool,
        x_limits: Option<[f64; 2]>,
        y_limits: Option<[f64; 2]>,
    ) -> Self {
        self.steps.push(AnalysisStep::Pca {
            color_by: color_by.map(String::from),
            pcs,
            hulls,
            x_limits,
            y_limits,
        });
        self
    }

    /// Add deformation plots for one component (1-based).
    pub fn deformation(mut self, pc: usize, magnification: f64, style: DeformationStyle) -> Self {
        self.steps.push(AnalysisStep::Deformation {
            pc,
            magnification,
            style,
        });
        self
    }

    /// Add a Procrustes ANOVA.
    pub fn shape_model(mut self, formula: &str) -> Self {
        self.steps.push(AnalysisStep::ShapeModel {
            formula: formula.to_string(),
        });
        self
    }

    /// Restrict later steps to specimens whose `column` is one of `keep`.
    ///
    /// With `realign` the subset is superimposed afresh from the raw
    /// landmarks, so an earlier size correction no longer applies.
    pub fn subset(mut self, column: &str, keep: &[&str], realign: bool) -> Self {
        self.steps.push(AnalysisStep::Subset {
            column: column.to_string(),
            keep: keep.iter().map(|s| s.to_string()).collect(),
            realign,
        });
        self
    }

    /// Add a morphological disparity test.
    pub fn disparity(mut self, group: &str, formula: Option<&str>, bh: bool) -> Self {
        self.steps.push(AnalysisStep::Disparity {
            group: group.to_string(),
            formula: formula.map(String::from),
            bh,
        });
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[AnalysisStep] {
        &self.steps
    }

    /// Run the pipeline. Metadata rows must be keyed by specimen ID.
    pub fn run(&self, landmarks: LandmarkSet, metadata: Option<Metadata>) -> Result<AnalysisReport> {
        if landmarks.has_missing() {
            return Err(GmError::MissingLandmarks(
                "Resolve missing landmarks before running the pipeline".to_string(),
            ));
        }
        let metadata = metadata
            .map(|m| m.align_to(&landmarks.specimen_ids()))
            .transpose()?;

        let mut state = PipelineState {
            pipeline: self,
            landmarks,
            metadata,
            alignment: None,
            size_corrected: false,
            pca: None,
            scope: ALL_SPECIMENS.to_string(),
            report: AnalysisReport::new(&self.name),
        };

        for (i, step) in self.steps.iter().enumerate() {
            state.apply(i, step).map_err(|e| {
                GmError::Pipeline(format!("Step {} ({:?}) failed: {}", i + 1, step, e))
            })?;
        }
        Ok(state.finish())
    }
}

/// Internal state during pipeline execution.
struct PipelineState<'a> {
    pipeline: &'a Pipeline,
    landmarks: LandmarkSet,
    metadata: Option<Metadata>,
    alignment: Option<Alignment>,
    /// The current alignment holds allometry-free residuals.
    size_corrected: bool,
    pca: Option<PcaResult>,
    scope: String,
    report: AnalysisReport,
}

impl PipelineState<'_> {
    fn apply(&mut self, index: usize, step: &AnalysisStep) -> Result<()> {
        let pipeline = self.pipeline;
        if !matches!(step, AnalysisStep::Align | AnalysisStep::Subset { .. }) {
            self.ensure_aligned()?;
        }
        match step {
            AnalysisStep::Align => {
                self.align()?;
                let fig = all_specimens_figure(self.aligned()?, &pipeline.links);
                self.add_figure(index, fig);
            }

            AnalysisStep::Outliers => {
                let report = find_outliers(self.aligned()?);
                let flagged = report.outlier_ids().join(", ");
                self.record(format!(
                    "Outliers: {} above threshold {:.4}{}",
                    report.outlier_ids().len(),
                    report.threshold,
                    if flagged.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", flagged)
                    }
                ));
                self.add_figure(index, outlier_figure(&report));
                let scoped = self.scoped(report);
                self.report.outliers.push(scoped);
            }

            AnalysisStep::Allometry { group } => {
                let metadata = match group {
                    Some(_) => self.metadata()?.clone(),
                    None => self
                        .metadata
                        .clone()
                        .unwrap_or_else(|| Metadata::from_ids(&self.landmarks.specimen_ids())),
                };
                let result = test_allometry(
                    self.aligned()?,
                    &metadata,
                    group.as_deref(),
                    &pipeline.permutations,
                )?;
                let colors = result
                    .groups
                    .as_ref()
                    .map(|g| GroupColors::from_labels(g, pipeline.palette.as_ref()));
                if let Some(row) = result.anova.rows.first() {
                    self.record(format!(
                        "Allometry: Rsq = {:.4}, Z = {}, p = {:.4}",
                        row.r_squared,
                        row.z.map(|z| format!("{:.3}", z)).unwrap_or_else(|| "NA".to_string()),
                        row.p_value
                    ));
                }
                self.add_figure(index, allometry_figure(&result, colors.as_ref()));
                let scoped = self.scoped(result);
                self.report.allometry.push(scoped);
            }

            AnalysisStep::SizeCorrect => {
                let corrected = size_corrected(self.aligned()?)?;
                self.alignment = Some(corrected);
                self.size_corrected = true;
                self.pca = None;
                self.record("Shapes replaced by size-corrected residuals".to_string());
            }

            AnalysisStep::Pca {
                color_by,
                pcs,
                hulls,
                x_limits,
                y_limits,
            } => {
                let result = pca(self.aligned()?)?;
                let options = PcaPlotOptions {
                    pcs: [one_based(pcs[0], "PC")?, one_based(pcs[1], "PC")?],
                    hulls: *hulls,
                    x_limits: *x_limits,
                    y_limits: *y_limits,
                };
                let groups = match color_by {
                    Some(column) => Some(
                        self.metadata()?
                            .subset_specimens(&result.specimen_ids)?
                            .labels(column)?,
                    ),
                    None => None,
                };
                let colors = groups
                    .as_ref()
                    .map(|g| GroupColors::from_labels(g, pipeline.palette.as_ref()));
                let fig = pca_figure(&result, &options, groups.as_deref(), colors.as_ref())?;
                self.record(format!(
                    "PCA: {} components, PC1 {:.1}%, PC2 {:.1}%",
                    result.n_components(),
                    100.0 * result.proportion.first().copied().unwrap_or(0.0),
                    100.0 * result.proportion.get(1).copied().unwrap_or(0.0)
                ));
                self.add_figure(index, fig);
                let scoped = self.scoped(result.clone());
                self.report.pca.push(scoped);
                self.pca = Some(result);
            }

            AnalysisStep::Deformation {
                pc,
                magnification,
                style,
            } => {
                if self.pca.is_none() {
                    info!("Deformation requested without PCA; running PCA");
                    self.pca = Some(pca(self.aligned()?)?);
                }
                let axis = one_based(*pc, "PC")?;
                let result = self
                    .pca
                    .as_ref()
                    .ok_or_else(|| GmError::Pipeline("PCA unavailable".to_string()))?;
                let mean = result.mean_shape();
                let (min, max) = result.extreme_shapes(axis)?;
                let mut figures = Vec::with_capacity(2);
                for (label, target) in [("min", min), ("max", max)] {
                    let mut fig = deformation_figure(
                        &mean,
                        &target,
                        *style,
                        *magnification,
                        &pipeline.links,
                    )?;
                    fig.id = format!("deformation_pc{}_{}", pc, label);
                    fig.title = format!("Mean to PC{} {} (x{})", pc, label, magnification);
                    figures.push(fig);
                }
                for fig in figures {
                    self.add_figure(index, fig);
                }
                self.record(format!("Deformation plots for PC{}", pc));
            }

            AnalysisStep::ShapeModel { formula } => {
                let anova = fit_shape_model(
                    self.aligned()?,
                    self.metadata()?,
                    formula,
                    &pipeline.permutations,
                )?;
                self.record(format!(
                    "Shape model {}: {}",
                    formula,
                    anova
                        .rows
                        .iter()
                        .map(|r| format!("{} (Rsq {:.3}, p {:.4})", r.term, r.r_squared, r.p_value))
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
                let scoped = self.scoped(anova);
                self.report.models.push(scoped);
            }

            AnalysisStep::Subset {
                column,
                keep,
                realign,
            } => {
                let metadata = self.metadata()?;
                let ids = metadata.filter_equals(column, keep)?;
                if ids.is_empty() {
                    return Err(GmError::EmptyData(format!(
                        "No specimens with {} in [{}]",
                        column,
                        keep.join(", ")
                    )));
                }
                let metadata = metadata.subset_specimens(&ids)?;
                self.landmarks = self.landmarks.subset(&ids)?;
                self.metadata = Some(metadata);
                self.scope = format!("{}-{}", column, keep.join("+"));
                self.pca = None;
                if *realign && self.size_corrected {
                    warn!(
                        "Realigning subset {} discards the size correction; \
                         add size_correct after the subset to reapply it",
                        self.scope
                    );
                    self.record("Size correction discarded by realignment".to_string());
                }
                self.alignment = match (self.alignment.take(), *realign) {
                    (_, true) => None,
                    (Some(a), false) => Some(a.subset(&ids)?),
                    (None, false) => None,
                };
                self.record(format!(
                    "Subset to {} specimens with {} in [{}]",
                    ids.len(),
                    column,
                    keep.join(", ")
                ));
                if *realign {
                    self.align()?;
                }
            }

            AnalysisStep::Disparity {
                group,
                formula,
                bh,
            } => {
                let config = DisparityConfig {
                    permutations: pipeline.permutations.clone(),
                    adjust_bh: *bh,
                };
                let result = morphological_disparity(
                    self.aligned()?,
                    self.metadata()?,
                    formula.as_deref().unwrap_or("~ 1"),
                    group,
                    &config,
                )?;
                let colors = GroupColors::new(&result.groups, pipeline.palette.as_ref());
                self.record(format!(
                    "Disparity by {}: {}",
                    group,
                    result
                        .pairwise
                        .iter()
                        .map(|p| format!("{}-{} p = {:.4}", p.group_a, p.group_b, p.p_value))
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
                self.add_figure(index, disparity_figure(&result, Some(&colors)));
                let scoped = self.scoped(result);
                self.report.disparity.push(scoped);
            }
        }
        Ok(())
    }

    /// Superimpose the current specimens.
    fn align(&mut self) -> Result<()> {
        let alignment = gpa(&self.landmarks, &self.pipeline.gpa)?;
        if !alignment.converged {
            warn!(
                "Superimposition of '{}' did not converge in {} iterations",
                self.scope, alignment.iterations
            );
        }
        let summary = AlignmentSummary::new(&self.scope, &alignment, &[]);
        self.record(format!(
            "Aligned {} specimens × {} landmarks ({} iterations)",
            summary.n_specimens, summary.n_landmarks, summary.iterations
        ));
        self.report.alignment_summary.push(summary);
        self.alignment = Some(alignment);
        self.size_corrected = false;
        self.pca = None;
        Ok(())
    }

    /// Superimpose now if no step has yet for the current specimens.
    fn ensure_aligned(&mut self) -> Result<()> {
        if self.alignment.is_none() {
            info!("No alignment for scope '{}'; aligning now", self.scope);
            self.align()?;
        }
        Ok(())
    }

    fn aligned(&self) -> Result<&Alignment> {
        self.alignment
            .as_ref()
            .ok_or_else(|| GmError::Pipeline("Alignment unavailable".to_string()))
    }

    fn metadata(&self) -> Result<&Metadata> {
        self.metadata
            .as_ref()
            .ok_or_else(|| GmError::Pipeline("This step requires metadata".to_string()))
    }

    fn scoped<T>(&self, result: T) -> Scoped<T> {
        Scoped {
            scope: self.scope.clone(),
            result,
        }
    }

    fn record(&mut self, message: String) {
        let message = if self.scope == ALL_SPECIMENS {
            message
        } else {
            format!("[{}] {}", self.scope, message)
        };
        self.report.record(message);
    }

    /// Figure ids are prefixed by step number and suffixed by scope so
    /// exported files sort in execution order and never collide.
    fn add_figure(&mut self, index: usize, mut fig: Figure) {
        fig.id = if self.scope == ALL_SPECIMENS {
            format!("{:02}_{}", index + 1, fig.id)
        } else {
            format!("{:02}_{}_{}", index + 1, fig.id, self.scope)
        };
        self.report.figures.push(fig);
    }

    fn finish(mut self) -> AnalysisReport {
        if let Some(alignment) = self.alignment.take() {
            let scoped = self.scoped(alignment);
            self.report.alignments.push(scoped);
        }
        self.report
    }
}

fn one_based(n: usize, what: &str) -> Result<usize> {
    n.checked_sub(1).ok_or_else(|| {
        GmError::InvalidParameter(format!("{} numbers start at 1, got {}", what, n))
    })
}

/// Load inputs described by a configuration and run its steps.
pub fn run_config(config: &AnalysisConfig) -> Result<AnalysisReport> {
    let source = &config.landmarks;
    let mut landmarks = read_tps(&source.path, &source.tps_options())?;
    info!(
        "Read {} specimens × {} landmarks from {}",
        landmarks.n_specimens(),
        landmarks.n_landmarks(),
        source.path.display()
    );
    if source.apply_scale {
        landmarks = landmarks.apply_scale();
    }
    let (landmarks, handled) = resolve_missing(&landmarks, source.missing)?;

    let metadata = match &config.metadata {
        Some(meta_source) => {
            let raw = Metadata::from_delimited(&meta_source.path, &meta_source.options())?;
            let raw = match &meta_source.columns {
                Some(columns) => raw.select_columns(columns)?,
                None => raw,
            };
            let raw = match &meta_source.column_types {
                Some(types) => {
                    if let Some(unknown) = types.keys().find(|c| !raw.has_column(c)) {
                        return Err(GmError::MissingColumn(unknown.clone()));
                    }
                    raw.with_column_types(types.clone())
                }
                None => raw,
            };
            let joined = match meta_source.join {
                JoinMode::ById => {
                    let missing: Vec<String> = landmarks
                        .specimen_ids()
                        .into_iter()
                        .filter(|id| !raw.has_specimen(id))
                        .collect();
                    if !missing.is_empty() {
                        return Err(GmError::SpecimenMismatch(format!(
                            "{} specimen(s) not found in metadata: {}",
                            missing.len(),
                            missing.join(", ")
                        )));
                    }
                    raw.align_to(&landmarks.specimen_ids())?
                }
                JoinMode::ByOrder => raw.with_specimen_ids(&landmarks.specimen_ids())?,
            };
            Some(joined)
        }
        None => None,
    };

    let pipeline = Pipeline::from_config(config)?;
    let mut report = pipeline.run(landmarks, metadata)?;
    if let Some(first) = report.alignment_summary.first_mut() {
        first.missing_handled = handled;
    }
    Ok(report)
}
