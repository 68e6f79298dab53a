//! Integration tests for the landmark analysis pipeline.

use composable_gm::pipeline::JoinMode;
use composable_gm::prelude::*;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Twelve five-landmark fish outlines. Species B has a longer snout; sizes
/// grow with the index. Specimen F3 has its snout landmark missing.
fn write_landmarks(dir: &Path) -> PathBuf {
    let mut tps = String::new();
    for i in 0..12 {
        let snout = if i < 6 { 5.0 } else { 6.0 };
        let size = 1.0 + 0.1 * i as f64;
        let wobble = 0.05 * (((i * 7) % 5) as f64 - 2.0);
        let points = [
            [0.0, 0.0],
            [4.0, 0.0],
            [snout + wobble, 1.0],
            [4.0, 2.0 + wobble],
            [0.0, 2.0],
        ];
        writeln!(tps, "LM=5").unwrap();
        for (j, p) in points.iter().enumerate() {
            if i == 3 && j == 2 {
                writeln!(tps, "-1 -1").unwrap();
            } else {
                writeln!(tps, "{:.4} {:.4}", p[0] * size + 10.0, p[1] * size + 5.0).unwrap();
            }
        }
        writeln!(tps, "IMAGE=fish_{}.jpg", i).unwrap();
        writeln!(tps, "ID=F{}", i).unwrap();
        writeln!(tps, "SCALE=1.0").unwrap();
    }
    let path = dir.join("fish.tps");
    fs::write(&path, tps).unwrap();
    path
}

/// Metadata in file order, with an extra unused column.
fn write_metadata(dir: &Path, skip: Option<usize>) -> PathBuf {
    let mut csv = String::from("specimen,species,habitat,collector\n");
    for i in (0..12).filter(|i| Some(*i) != skip) {
        let species = if i < 6 { "A" } else { "B" };
        let habitat = if i % 2 == 0 { "lake" } else { "river" };
        writeln!(csv, "F{},{},{},NA", i, species, habitat).unwrap();
    }
    let path = dir.join("fish_metadata.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn config_for(dir: &Path) -> AnalysisConfig {
    let mut config = AnalysisConfig::example();
    config.landmarks.path = write_landmarks(dir);
    if let Some(meta) = config.metadata.as_mut() {
        meta.path = write_metadata(dir, None);
    }
    config.output_dir = dir.join("out");
    config.permutations = 49;
    config
}

#[test]
fn test_example_workflow_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path());
    let report = run_config(&config).unwrap();

    // Missing snout landmark of F3 is estimated, not dropped
    assert_eq!(report.alignment_summary[0].n_specimens, 12);
    assert_eq!(report.alignment_summary[0].missing_handled, vec!["F3".to_string()]);
    assert_eq!(report.alignment_summary[1].scope, "species-A");
    assert_eq!(report.alignment_summary[1].n_specimens, 6);

    // Full set: species differ in snout length, size varies
    assert_eq!(report.outliers[0].result.entries.len(), 12);
    let pca_all = &report.pca[0].result;
    assert!(pca_all.proportion[0] > 0.3);
    let sum: f64 = pca_all.proportion.iter().sum();
    assert!((sum - 1.0).abs() < 1e-8);

    // Species A on its own
    let disparity = &report.disparity[0];
    assert_eq!(disparity.scope, "species-A");
    assert_eq!(disparity.result.groups, vec!["lake", "river"]);
    assert_eq!(disparity.result.n_per_group, vec![3, 3]);
    assert_eq!(disparity.result.pairwise.len(), 1);
    assert!(disparity.result.pairwise[0].q_value.is_some());

    let written = report.write_to(&config.output_dir).unwrap();
    let out = config.output_dir.clone();
    for name in [
        "report.json",
        "pca_scores.tsv",
        "pca_scores_species-A.tsv",
        "anova_allometry.tsv",
        "anova_allometry_species-A.tsv",
        "disparity_habitat_species-A.tsv",
        "aligned_species-A.tps",
    ] {
        assert!(out.join(name).exists(), "missing {}", name);
    }
    assert!(written.len() > 7);

    let figures = composable_gm::plot::read_figures(out.join("figures")).unwrap();
    assert_eq!(figures.len(), report.figures.len());
    assert!(figures.iter().any(|f| f.id.starts_with("01_aligned_specimens")));

    let aligned = read_tps(out.join("aligned_species-A.tps"), &TpsOptions::default()).unwrap();
    assert_eq!(aligned.n_specimens(), 6);
    assert_eq!(aligned.n_landmarks(), 5);

    let json = fs::read_to_string(out.join("report.json")).unwrap();
    assert!(json.contains("\"name\": \"fish-shape\""));
}

#[test]
fn test_config_file_with_relative_paths() {
    let dir = TempDir::new().unwrap();
    write_landmarks(dir.path());
    write_metadata(dir.path(), None);

    let yaml = r#"
name: habitat-only
landmarks:
  path: fish.tps
  missing: drop
metadata:
  path: fish_metadata.csv
  join: by_id
  columns: [habitat]
permutations: 19
steps:
  - step: align
  - step: shape_model
    formula: "~ habitat"
  - step: disparity
    group: habitat
"#;
    let path = dir.path().join("analysis.yaml");
    fs::write(&path, yaml).unwrap();

    let config = AnalysisConfig::from_file(&path).unwrap();
    assert_eq!(config.output_dir, dir.path().join("gm_output"));

    let report = run_config(&config).unwrap();
    assert_eq!(report.alignment_summary[0].n_specimens, 11);
    assert_eq!(report.alignment_summary[0].missing_handled, vec!["F3".to_string()]);
    assert_eq!(report.models[0].result.n_permutations, 19);
    assert!(report.models[0].result.row("habitat").is_some());
    assert!(report.disparity[0].result.pairwise[0].q_value.is_none());
}

#[test]
fn test_metadata_join_modes() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(dir.path());
    config.steps = vec![AnalysisStep::Align, AnalysisStep::Pca {
        color_by: Some("species".to_string()),
        pcs: [1, 2],
        hulls: false,
        x_limits: None,
        y_limits: None,
    }];

    // A specimen without a metadata row is an error when joining by ID
    let meta_path = write_metadata(dir.path(), Some(7));
    if let Some(meta) = config.metadata.as_mut() {
        meta.path = meta_path;
    }
    match run_config(&config) {
        Err(GmError::SpecimenMismatch(msg)) => assert!(msg.contains("F7")),
        other => panic!("expected specimen mismatch, got {:?}", other.map(|_| ())),
    }

    // ... and a row count mismatch when joining by order
    if let Some(meta) = config.metadata.as_mut() {
        meta.join = JoinMode::ByOrder;
    }
    assert!(run_config(&config).is_err());

    // Complete metadata joined by order works
    let meta_path = write_metadata(dir.path(), None);
    if let Some(meta) = config.metadata.as_mut() {
        meta.path = meta_path;
    }
    let report = run_config(&config).unwrap();
    assert_eq!(report.pca.len(), 1);
}

#[test]
fn test_pipeline_api_matches_config() {
    let dir = TempDir::new().unwrap();
    let landmarks = read_tps(write_landmarks(dir.path()), &TpsOptions::default()).unwrap();
    let (landmarks, dropped) = resolve_missing(&landmarks, MissingPolicy::Drop).unwrap();
    assert_eq!(dropped, vec!["F3".to_string()]);

    let alignment = gpa(&landmarks, &GpaConfig::default()).unwrap();
    let pca_result = pca(&alignment).unwrap();
    let report = Pipeline::new()
        .permutations(PermutationConfig::quick())
        .align()
        .pca(None)
        .run(landmarks, None)
        .unwrap();

    let from_pipeline = &report.pca[0].result;
    assert_eq!(from_pipeline.eigenvalues.len(), pca_result.eigenvalues.len());
    for (a, b) in from_pipeline.eigenvalues.iter().zip(&pca_result.eigenvalues) {
        approx::assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn test_demo_configuration_runs() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/fish.yaml");
    let mut config = AnalysisConfig::from_file(&path).unwrap();
    let out = TempDir::new().unwrap();
    config.output_dir = out.path().to_path_buf();
    config.permutations = 49;

    let report = run_config(&config).unwrap();
    assert_eq!(report.alignment_summary[0].n_specimens, 24);
    assert_eq!(report.alignment_summary[0].missing_handled, vec!["fish_06".to_string()]);
    assert_eq!(report.alignment_summary[1].n_specimens, 12);
    assert!(report.log.len() >= config.steps.len());

    report.write_to(&config.output_dir).unwrap();
    assert!(out.path().join("disparity_habitat_species-A.tsv").exists());
}

#[test]
fn test_numeric_codes_read_as_categories() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(dir.path());
    let mut csv = String::from("specimen,site\n");
    for i in 0..12 {
        writeln!(csv, "F{},{}", i, 1 + i % 3).unwrap();
    }
    let meta_path = dir.path().join("sites.csv");
    fs::write(&meta_path, csv).unwrap();
    config.steps = vec![AnalysisStep::ShapeModel {
        formula: "~ site".to_string(),
    }];
    if let Some(meta) = config.metadata.as_mut() {
        meta.path = meta_path;
    }

    // Inferred as a number: one slope
    let report = run_config(&config).unwrap();
    assert_eq!(report.models[0].result.row("site").unwrap().df, 1);

    // Declared categorical: three sites, two contrasts
    let mut types = std::collections::HashMap::new();
    types.insert("site".to_string(), VariableType::Categorical);
    if let Some(meta) = config.metadata.as_mut() {
        meta.column_types = Some(types);
    }
    let report = run_config(&config).unwrap();
    assert_eq!(report.models[0].result.row("site").unwrap().df, 2);

    // A type for a column the table lacks is an error
    if let Some(meta) = config.metadata.as_mut() {
        if let Some(types) = meta.column_types.as_mut() {
            types.insert("depth".to_string(), VariableType::Continuous);
        }
    }
    assert!(matches!(run_config(&config), Err(GmError::MissingColumn(c)) if c == "depth"));
}
