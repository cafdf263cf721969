use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use groupstat::analyzer::{AnalysisRequest, Analyzer, ScalarDictAnalyzer, ScalarNumericAnalyzer};
use groupstat::comparative::{TwoColumnLineAnalyzer, TwoColumnScatterAnalyzer};
use groupstat::config::AnalyzerConfig;
use groupstat::data::Table;
use groupstat::dispatch::{RenderJob, Renderer};
use groupstat::parser::parse_targets;
use groupstat::partition::{GroupBy, TaskFamily};
use groupstat::properties::ColumnPropertiesMap;
use groupstat::render::PlottersRenderer;
use groupstat::report::write_report_file;
use groupstat::summary::SummaryTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AnalyzerKind {
    /// Histogram of numeric columns
    Scalar,
    /// Mean line over the keys of weight-map columns
    Dict,
    /// Per-task means of column pairs
    Scatter,
    /// One line per task family through column pairs
    Line,
}

#[derive(Parser, Debug)]
#[command(name = "groupstat")]
#[command(about = "Summarize experiment result tables per group and plot them", long_about = None)]
struct Args {
    /// Input table: a CSV or JSON file, `-` reads CSV from stdin
    #[arg(short, long)]
    input: PathBuf,

    #[arg(short, long, value_enum)]
    analyzer: AnalyzerKind,

    /// Columns to analyze (e.g. 'bpppc,psnr' or 'compression_time~bpppc')
    #[arg(short, long)]
    columns: String,

    /// Group rows by the values of this column
    #[arg(long, conflicts_with = "families")]
    group_by: Option<String>,

    /// JSON file with a list of task families to group by
    #[arg(long)]
    families: Option<PathBuf>,

    /// Column identifying the task of each row when grouping by families
    #[arg(long, default_value = "task_name")]
    task_column: String,

    /// Comma separated group order
    #[arg(long, value_delimiter = ',')]
    group_order: Option<Vec<String>>,

    /// JSON analyzer configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON column properties keyed by column name
    #[arg(long)]
    properties: Option<PathBuf>,

    #[arg(short, long, default_value = "plots")]
    output_dir: PathBuf,

    /// Write a CSV report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write the summary table as JSON here
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Compute the summary without drawing plots
    #[arg(long)]
    no_render: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run<A: Analyzer>(
    analyzer: &A,
    table: &Table,
    request: &AnalysisRequest,
    render: bool,
) -> Result<(SummaryTable, Vec<RenderJob>)> {
    let (summary, jobs) = analyzer
        .summarize(table, request)
        .with_context(|| format!("{} failed", analyzer.name()))?;
    info!(
        "{}: {} groups, {} summary columns",
        analyzer.name(),
        summary.len(),
        summary.columns.len()
    );
    if render {
        let renderer: Arc<dyn Renderer> = Arc::new(PlottersRenderer);
        analyzer
            .dispatch(jobs.clone(), renderer)
            .context("Failed to render plots")?;
    }
    Ok((summary, jobs))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let table = Table::from_path(&args.input)
        .with_context(|| format!("Failed to load table from {}", args.input.display()))?;
    let config = match &args.config {
        Some(path) => AnalyzerConfig::from_json_file(path)?,
        None => AnalyzerConfig::default(),
    };
    let properties = match &args.properties {
        Some(path) => ColumnPropertiesMap::from_json_file(path)?,
        None => ColumnPropertiesMap::new(),
    };
    let targets = parse_targets(&args.columns).context("Failed to parse --columns")?;

    let group_by = match (&args.families, &args.group_by) {
        (Some(path), _) => GroupBy::Families {
            families: TaskFamily::load_families(path)?,
            task_column: args.task_column.clone(),
        },
        (None, Some(column)) => GroupBy::column(column),
        (None, None) => GroupBy::None,
    };
    let mut request = AnalysisRequest::new(targets)
        .with_group_by(group_by)
        .with_output_dir(args.output_dir.clone());
    request.group_order = args.group_order.clone();

    let render = !args.no_render;
    let (summary, jobs) = match args.analyzer {
        AnalyzerKind::Scalar => run(&ScalarNumericAnalyzer::new(config, properties)?, &table, &request, render)?,
        AnalyzerKind::Dict => run(&ScalarDictAnalyzer::new(config, properties)?, &table, &request, render)?,
        AnalyzerKind::Scatter => run(&TwoColumnScatterAnalyzer::new(config, properties)?, &table, &request, render)?,
        AnalyzerKind::Line => run(&TwoColumnLineAnalyzer::new(config, properties)?, &table, &request, render)?,
    };

    if let Some(path) = &args.report {
        write_report_file(path, &summary, &jobs)?;
        info!("wrote report {}", path.display());
    }
    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("wrote summary {}", path.display());
    }

    Ok(())
}
