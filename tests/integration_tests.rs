use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use groupstat::analyzer::{AnalysisRequest, Analyzer, ScalarDictAnalyzer, ScalarNumericAnalyzer, Target};
use groupstat::comparative::{TwoColumnLineAnalyzer, TwoColumnScatterAnalyzer};
use groupstat::config::AnalyzerConfig;
use groupstat::data::Table;
use groupstat::dispatch::{RenderJob, Renderer};
use groupstat::partition::{GroupBy, TaskFamily};
use groupstat::properties::ColumnPropertiesMap;
use groupstat::AnalysisError;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test").join(name)
}

fn results() -> Table {
    Table::from_path(&fixture("results.csv")).expect("Failed to load fixture")
}

fn properties() -> ColumnPropertiesMap {
    ColumnPropertiesMap::from_json_file(&fixture("properties.json")).expect("Failed to load properties")
}

/// Keeps the jobs it receives instead of drawing them.
#[derive(Default)]
struct RecordingRenderer {
    jobs: Mutex<Vec<RenderJob>>,
}

impl Renderer for RecordingRenderer {
    fn render(&self, job: &RenderJob) -> anyhow::Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

struct FailingRenderer;

impl Renderer for FailingRenderer {
    fn render(&self, job: &RenderJob) -> anyhow::Result<()> {
        anyhow::bail!("disk full while writing {}", job.target)
    }
}

/// Run the groupstat binary with the given arguments
fn run_groupstat(args: &[&str]) -> Result<String, String> {
    let output = Command::new(env!("CARGO_BIN_EXE_groupstat"))
        .args(args)
        .output()
        .map_err(|e| format!("Failed to spawn process: {}", e))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stderr).to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

#[test]
fn test_scalar_analysis_by_codec() {
    let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), properties()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("bpppc"), Target::column("compression_time")])
        .with_group_by(GroupBy::column("codec"))
        .with_output_dir("plots");
    let renderer = Arc::new(RecordingRenderer::default());

    let summary = analyzer.analyze(&results(), &request, renderer.clone()).unwrap();

    let labels: Vec<&str> = summary.group_labels().collect();
    assert_eq!(labels, vec!["brotli", "zstd", "all"]);
    assert_eq!(summary.row("all").unwrap().group_size, 12);
    assert_eq!(summary.row("zstd").unwrap().scalar("bpppc_max"), Some(2.3));
    // the infinite sample is left out of the statistics
    assert_eq!(summary.row("brotli").unwrap().scalar("bpppc_max"), Some(2.15));
    assert_eq!(summary.render_columns().count(), 2);

    let jobs = renderer.jobs.lock().unwrap();
    let mut paths: Vec<PathBuf> = jobs.iter().map(|j| j.output_path.clone()).collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("plots/ScalarNumericAnalyzer_bpppc_groupby-codec.png"),
            PathBuf::from("plots/ScalarNumericAnalyzer_compression_time_groupby-codec.png"),
        ]
    );
    let bpppc = jobs.iter().find(|j| j.target == "bpppc").unwrap();
    assert_eq!(bpppc.x_label, "Compressed bits per sample");
    assert_eq!(bpppc.x_bounds, Some((0.0, 2.3)));
    assert_eq!(bpppc.group_labels["zstd"], "zstd (n=6)");
}

#[test]
fn test_histograms_sum_to_one() {
    let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("compression_time")]).with_group_by(GroupBy::column("lossless"));
    let (summary, _) = analyzer.summarize(&results(), &request).unwrap();
    for row in summary.rows.values() {
        let plots = row.plots("compression_time_render-histogram").unwrap();
        let total: f64 = plots[0].y_values.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "group {}", row.group_label);
    }
    assert!(summary.row("true").is_some());
    assert!(summary.row("false").is_some());
}

#[test]
fn test_render_failure_aborts_analysis() {
    let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
    let err = analyzer
        .analyze(&results(), &request, Arc::new(FailingRenderer))
        .unwrap_err();
    match err {
        AnalysisError::Render { path, message } => {
            assert_eq!(path, PathBuf::from("ScalarNumericAnalyzer_bpppc.png"));
            assert!(message.contains("disk full"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_dict_analysis_with_key_bins() {
    let config = AnalyzerConfig {
        combine_keys: Some("histogram2col".to_string()),
        show_individual: false,
        ..Default::default()
    };
    let analyzer = ScalarDictAnalyzer::new(config, properties()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("hist")]);
    let (summary, jobs) = analyzer.summarize(&results(), &request).unwrap();

    let line = &summary.row("all").unwrap().plots("hist_render-line").unwrap()[0];
    assert_eq!(line.x_values, vec![0.5, 1.5]);
    let ticks: Vec<&str> = jobs[0].x_ticks.as_ref().unwrap().iter().map(|(_, l)| l.as_str()).collect();
    assert_eq!(ticks, vec!["[0,2)", "[2,4]"]);
}

#[test]
fn test_dict_analysis_rejects_numeric_column() {
    let analyzer = ScalarDictAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
    let err = analyzer.summarize(&results(), &request).unwrap_err();
    assert!(matches!(err, AnalysisError::Contract(_)));
}

#[test]
fn test_line_analysis_over_families() {
    let families = TaskFamily::load_families(&fixture("families.json")).unwrap();
    let analyzer = TwoColumnLineAnalyzer::new(AnalyzerConfig::default(), properties()).unwrap();
    let request = AnalysisRequest::new(vec![Target::pair("compression_time", "bpppc")])
        .with_group_by(GroupBy::families(families));
    let (summary, jobs) = analyzer.summarize(&results(), &request).unwrap();

    let labels: Vec<&str> = summary.group_labels().collect();
    assert_eq!(labels, vec!["near-lossless", "lossless", "all"]);

    let line = &summary.row("near-lossless").unwrap().plots("compression_time_VS_bpppc_render-line").unwrap()[0];
    assert_eq!(line.len(), 2);
    assert!(line.x_values.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].combine_groups);
    assert_eq!(jobs[0].y_bounds.map(|b| b.0), Some(0.0));
    assert_eq!(jobs[0].y_label.as_deref(), Some("Compressed bits per sample"));
}

#[test]
fn test_scatter_analysis_by_column() {
    let analyzer = TwoColumnScatterAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
    let request = AnalysisRequest::new(vec![Target::pair("compression_time", "bpppc")])
        .with_group_by(GroupBy::column("codec"))
        .with_group_order(vec!["zstd".to_string()]);
    let (summary, jobs) = analyzer.summarize(&results(), &request).unwrap();
    let labels: Vec<&str> = summary.group_labels().collect();
    assert_eq!(labels, vec!["zstd", "brotli", "all"]);
    assert!(jobs[0].output_path.ends_with("TwoColumnScatterAnalyzer_compression_time_VS_bpppc_groupby-codec.png"));
}

#[test]
fn test_summary_serializes_to_json() {
    let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
    let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
    let (summary, _) = analyzer.summarize(&results(), &request).unwrap();
    let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["rows"]["all"]["group_size"], 12);
    assert_eq!(json["rows"]["all"]["values"]["bpppc_render-histogram"][0]["kind"]["type"], "bar");
}

#[test]
fn test_cli_report_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.csv");
    let summary = dir.path().join("summary.json");
    let input = fixture("results.csv");

    let result = run_groupstat(&[
        "--input",
        input.to_str().unwrap(),
        "--analyzer",
        "dict",
        "--columns",
        "hist",
        "--group-by",
        "codec",
        "--output-dir",
        dir.path().to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
        "--summary-json",
        summary.to_str().unwrap(),
        "--no-render",
    ]);
    assert!(result.is_ok(), "Failed: {:?}", result.err());

    let report = fs::read_to_string(&report).unwrap();
    let first = report.lines().next().unwrap();
    assert_eq!(first, "column,brotli,zstd,all");
    assert!(report.lines().any(|l| l.starts_with("hist,0,1,2,3,4")));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["rows"]["zstd"]["group_size"], 6);
}

#[test]
fn test_cli_rejects_unknown_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{"selected_modes": ["violin"]}"#).unwrap();
    let input = fixture("results.csv");

    let result = run_groupstat(&[
        "--input",
        input.to_str().unwrap(),
        "--analyzer",
        "scalar",
        "--columns",
        "bpppc",
        "--config",
        config.to_str().unwrap(),
        "--no-render",
    ]);
    let stderr = result.unwrap_err();
    assert!(stderr.contains("violin"), "stderr: {}", stderr);
}

#[test]
fn test_cli_families_line() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("summary.json");
    let input = fixture("results.csv");
    let families = fixture("families.json");

    let result = run_groupstat(&[
        "--input",
        input.to_str().unwrap(),
        "--analyzer",
        "line",
        "--columns",
        "compression_time~bpppc",
        "--families",
        families.to_str().unwrap(),
        "--summary-json",
        summary.to_str().unwrap(),
        "--no-render",
    ]);
    assert!(result.is_ok(), "Failed: {:?}", result.err());
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["rows"]["lossless"]["group_size"], 4);
    assert_eq!(json["rows"]["near-lossless"]["group_size"], 8);
}
