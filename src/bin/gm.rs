//! GM - Geometric Morphometrics CLI
//!
//! Command-line interface for landmark-based shape analysis.

use clap::{Args, Parser, Subcommand, ValueEnum};
use composable_gm::align::GpaConfig;
use composable_gm::data::{read_tps, write_tps, SpecimenIdSource};
use composable_gm::error::Result;
use composable_gm::pipeline::{
    run_config, AnalysisConfig, AnalysisReport, AnalysisStep, JoinMode, LandmarkSource,
    MetadataSource,
};
use composable_gm::shape::MissingPolicy;
use std::path::{Path, PathBuf};

/// CLI-friendly specimen ID source
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliIdSource {
    /// The ID= line of each block
    Id,
    /// The IMAGE= line without its extension
    Image,
    /// Position of the block in the file
    Index,
}

impl From<CliIdSource> for SpecimenIdSource {
    fn from(source: CliIdSource) -> Self {
        match source {
            CliIdSource::Id => SpecimenIdSource::Id,
            CliIdSource::Image => SpecimenIdSource::Image,
            CliIdSource::Index => SpecimenIdSource::Index,
        }
    }
}

/// CLI-friendly missing landmark policy
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMissing {
    /// Stop if any landmark is missing
    Error,
    /// Drop incomplete specimens
    Drop,
    /// Estimate missing landmarks from the mean shape
    Estimate,
}

impl From<CliMissing> for MissingPolicy {
    fn from(policy: CliMissing) -> Self {
        match policy {
            CliMissing::Error => MissingPolicy::Error,
            CliMissing::Drop => MissingPolicy::Drop,
            CliMissing::Estimate => MissingPolicy::Estimate,
        }
    }
}

/// Landmark input options shared by the analysis subcommands
#[derive(Debug, Args)]
struct LandmarkArgs {
    /// Path to TPS landmark file
    #[arg(short, long)]
    landmarks: PathBuf,

    /// Where specimen IDs come from
    #[arg(long, value_enum, default_value = "id")]
    id_source: CliIdSource,

    /// Append CURVES= points as extra landmarks
    #[arg(long)]
    curves: bool,

    /// Keep negative coordinates instead of treating them as missing landmarks
    #[arg(long)]
    keep_negative: bool,

    /// What to do with missing landmarks
    #[arg(long, value_enum, default_value = "error")]
    missing: CliMissing,
}

impl LandmarkArgs {
    fn source(&self) -> LandmarkSource {
        LandmarkSource {
            path: self.landmarks.clone(),
            id_source: self.id_source.into(),
            read_curves: self.curves,
            negative_missing: !self.keep_negative,
            missing: self.missing.into(),
            apply_scale: false,
        }
    }
}

/// Composable Geometric Morphometrics
#[derive(Parser)]
#[command(name = "gm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis from a YAML configuration file
    Run {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Procrustes-align landmarks and write the aligned TPS
    Align {
        #[command(flatten)]
        input: LandmarkArgs,

        /// Output TPS path
        #[arg(short, long)]
        output: PathBuf,

        /// Keep shapes on the hypersphere instead of projecting to tangent space
        #[arg(long)]
        no_projection: bool,
    },

    /// Principal component analysis of aligned shapes
    Pca {
        #[command(flatten)]
        input: LandmarkArgs,

        /// Path to metadata table (specimen ID in the first column)
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Metadata column used to colour the scatter plot
        #[arg(long)]
        color_by: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Test shape allometry (Procrustes ANOVA on log centroid size)
    Allometry {
        #[command(flatten)]
        input: LandmarkArgs,

        /// Path to metadata table
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        /// Grouping column for a size-by-group model
        #[arg(short, long)]
        group: Option<String>,

        /// Number of permutations
        #[arg(long, default_value = "999")]
        permutations: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare Procrustes variance among groups
    Disparity {
        #[command(flatten)]
        input: LandmarkArgs,

        /// Path to metadata table
        #[arg(short, long)]
        metadata: PathBuf,

        /// Grouping column
        #[arg(short, long)]
        group: String,

        /// Model whose residuals are used (default: ~ 1)
        #[arg(short, long)]
        formula: Option<String>,

        /// Number of permutations
        #[arg(long, default_value = "999")]
        permutations: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Add Benjamini-Hochberg adjusted p-values
        #[arg(long)]
        bh: bool,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rank specimens by Procrustes distance to the mean shape
    Outliers {
        #[command(flatten)]
        input: LandmarkArgs,
    },

    /// Generate an example analysis configuration
    Example {
        /// Output path for example config
        #[arg(short, long, default_value = "analysis.yaml")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, output } => cmd_run(&config, output),

        Commands::Align {
            input,
            output,
            no_projection,
        } => cmd_align(&input, &output, !no_projection),

        Commands::Pca {
            input,
            metadata,
            color_by,
            output,
        } => cmd_pca(&input, metadata, color_by, &output),

        Commands::Allometry {
            input,
            metadata,
            group,
            permutations,
            seed,
            output,
        } => cmd_allometry(&input, metadata, group, permutations, seed, output.as_deref()),

        Commands::Disparity {
            input,
            metadata,
            group,
            formula,
            permutations,
            seed,
            bh,
            output,
        } => cmd_disparity(
            &input,
            metadata,
            &group,
            formula,
            permutations,
            seed,
            bh,
            output.as_deref(),
        ),

        Commands::Outliers { input } => cmd_outliers(&input),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Configuration for a single ad-hoc analysis run from the command line.
fn adhoc_config(
    name: &str,
    input: &LandmarkArgs,
    metadata: Option<PathBuf>,
    steps: Vec<AnalysisStep>,
) -> AnalysisConfig {
    AnalysisConfig {
        name: name.to_string(),
        description: None,
        landmarks: input.source(),
        metadata: metadata.map(|path| MetadataSource {
            path,
            delimiter: None,
            na_values: None,
            id_column: None,
            join: JoinMode::ById,
            columns: None,
            column_types: None,
        }),
        output_dir: PathBuf::from("gm_output"),
        palette: None,
        links: Vec::new(),
        gpa: GpaConfig::default(),
        permutations: 999,
        seed: 42,
        steps,
    }
}

fn write_report(report: &AnalysisReport, output: Option<&Path>) -> Result<()> {
    if let Some(dir) = output {
        let written = report.write_to(dir)?;
        eprintln!("Wrote {} files to {:?}", written.len(), dir);
    }
    Ok(())
}

/// Run an analysis from configuration
fn cmd_run(config_path: &PathBuf, output: Option<PathBuf>) -> Result<()> {
    eprintln!("Loading analysis configuration from {:?}...", config_path);
    let mut config = AnalysisConfig::from_file(config_path)?;
    if let Some(dir) = output {
        config.output_dir = dir;
    }

    eprintln!("Running analysis '{}' ({} steps)...", config.name, config.steps.len());
    let report = run_config(&config)?;

    for line in &report.log {
        println!("{}", line);
    }
    write_report(&report, Some(&config.output_dir))?;
    Ok(())
}

/// Align landmarks and write the superimposed coordinates
fn cmd_align(input: &LandmarkArgs, output: &PathBuf, project_tangent: bool) -> Result<()> {
    eprintln!("Loading landmarks from {:?}...", input.landmarks);
    let source = input.source();
    let set = read_tps(&source.path, &source.tps_options())?;
    let (set, handled) = composable_gm::shape::resolve_missing(&set, source.missing)?;
    if !handled.is_empty() {
        eprintln!("  Missing landmarks handled for: {}", handled.join(", "));
    }

    let config = GpaConfig {
        project_tangent,
        ..Default::default()
    };
    let alignment = composable_gm::align::gpa(&set, &config)?;

    println!(
        "Aligned {} specimens x {} landmarks",
        alignment.n_specimens(),
        alignment.n_landmarks()
    );
    println!(
        "  {} iterations, converged: {}, Procrustes SS: {:.6}",
        alignment.iterations, alignment.converged, alignment.procrustes_ss
    );

    write_tps(&alignment.to_landmark_set()?, output)?;
    eprintln!("Wrote aligned coordinates to {:?}", output);
    Ok(())
}

/// PCA of aligned shapes
fn cmd_pca(
    input: &LandmarkArgs,
    metadata: Option<PathBuf>,
    color_by: Option<String>,
    output: &Path,
) -> Result<()> {
    let steps = vec![
        AnalysisStep::Align,
        AnalysisStep::Pca {
            color_by,
            pcs: [1, 2],
            hulls: true,
            x_limits: None,
            y_limits: None,
        },
    ];
    let report = run_config(&adhoc_config("pca", input, metadata, steps))?;

    if let Some(pca) = report.pca.first() {
        println!("component\tstd_dev\tproportion\tcumulative");
        for pc in pca.result.summary() {
            println!(
                "{}\t{:.5}\t{:.4}\t{:.4}",
                pc.component, pc.std_dev, pc.proportion, pc.cumulative
            );
        }
    }
    write_report(&report, Some(output))
}

/// Allometry test
fn cmd_allometry(
    input: &LandmarkArgs,
    metadata: Option<PathBuf>,
    group: Option<String>,
    permutations: usize,
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    let mut config = adhoc_config(
        "allometry",
        input,
        metadata,
        vec![AnalysisStep::Align, AnalysisStep::Allometry { group }],
    );
    config.permutations = permutations;
    config.seed = seed;

    eprintln!("Running allometry test with {} permutations...", permutations);
    let report = run_config(&config)?;

    if let Some(allometry) = report.allometry.first() {
        print!("{}", allometry.result.anova.to_tsv());
    }
    write_report(&report, output)
}

/// Morphological disparity test
#[allow(clippy::too_many_arguments)]
fn cmd_disparity(
    input: &LandmarkArgs,
    metadata: PathBuf,
    group: &str,
    formula: Option<String>,
    permutations: usize,
    seed: u64,
    bh: bool,
    output: Option<&Path>,
) -> Result<()> {
    let steps = vec![
        AnalysisStep::Align,
        AnalysisStep::Disparity {
            group: group.to_string(),
            formula,
            bh,
        },
    ];
    let mut config = adhoc_config("disparity", input, Some(metadata), steps);
    config.permutations = permutations;
    config.seed = seed;

    eprintln!("Comparing Procrustes variance among '{}' groups...", group);
    let report = run_config(&config)?;

    if let Some(disparity) = report.disparity.first() {
        print!("{}", disparity.result.to_tsv());
    }
    write_report(&report, output)
}

/// Outlier screen
fn cmd_outliers(input: &LandmarkArgs) -> Result<()> {
    let config = adhoc_config(
        "outliers",
        input,
        None,
        vec![AnalysisStep::Align, AnalysisStep::Outliers],
    );
    let report = run_config(&config)?;

    if let Some(outliers) = report.outliers.first() {
        let r = &outliers.result;
        println!("specimen\tdistance\toutlier");
        for entry in &r.entries {
            println!(
                "{}\t{:.6}\t{}",
                entry.specimen_id, entry.distance, entry.is_outlier
            );
        }
        eprintln!(
            "\nMedian {:.6}, threshold {:.6}: {} potential outlier(s)",
            r.median,
            r.threshold,
            r.outlier_ids().len()
        );
    }
    Ok(())
}

/// Generate example analysis configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let config = AnalysisConfig::example();
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example configuration to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}
