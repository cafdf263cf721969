use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::warn;

use crate::analyzer::{base_render_job, AnalysisRequest, Analyzer, Target};
use crate::config::AnalyzerConfig;
use crate::data::{self, Row, Table};
use crate::dispatch::RenderJob;
use crate::error::{AnalysisError, Result};
use crate::partition::{Group, GroupBy, TaskFamily};
use crate::plotdata::{merge_ranges, PlottableData};
use crate::properties::ColumnPropertiesMap;
use crate::stats;
use crate::summary::{SummaryRow, SummaryTable};

/// Relative margin added around observed data in comparative plots.
const DATA_MARGIN: f64 = 0.05;

/// Mean position of one task with its extent and spread along both axes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPoint {
    pub label: String,
    pub mean_x: f64,
    pub mean_y: f64,
    /// `max - mean` and `mean - min` along x.
    pub x_pos: f64,
    pub x_neg: f64,
    pub y_pos: f64,
    pub y_neg: f64,
    /// Population standard deviations.
    pub x_std: f64,
    pub y_std: f64,
}

impl TaskPoint {
    fn from_pairs(label: &str, pairs: &[(f64, f64)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
        let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();
        let (x_min, x_max) = stats::finite_min_max(&xs)?;
        let (y_min, y_max) = stats::finite_min_max(&ys)?;
        let mean_x = stats::mean(&xs);
        let mean_y = stats::mean(&ys);
        Some(Self {
            label: label.to_string(),
            mean_x,
            mean_y,
            x_pos: x_max - mean_x,
            x_neg: mean_x - x_min,
            y_pos: y_max - mean_y,
            y_neg: mean_y - y_min,
            x_std: stats::std_population(&xs),
            y_std: stats::std_population(&ys),
        })
    }
}

/// Grouping information both comparative analyzers share.
#[derive(Debug, Clone, Default)]
pub struct ComparativePlan {
    families: Option<(Vec<TaskFamily>, String)>,
}

/// Pairs of `(x, y)` where both values are finite. Dropped pairs are reported.
fn finite_pairs(rows: &[&Row], x: &str, y: &str, context: &str) -> Result<Vec<(f64, f64)>> {
    let xs = data::numeric_values(rows, x)?;
    let ys = data::numeric_values(rows, y)?;
    let total = xs.len();
    let pairs: Vec<(f64, f64)> = xs
        .into_iter()
        .zip(ys)
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect();
    if pairs.len() < total {
        warn!(
            "some results of {} are not finite and are not taken into account: {:.2}% elements used",
            context,
            100.0 * pairs.len() as f64 / total as f64
        );
    }
    Ok(pairs)
}

fn task_rows<'g, 't>(group: &'g Group<'t>, task_column: &str, task: &str) -> Vec<&'t Row> {
    group
        .rows
        .iter()
        .copied()
        .filter(|r| r.get(task_column).map(|v| v.to_label()).as_deref() == Some(task))
        .collect()
}

/// Task points of `group`, sorted by x. With family grouping every task of the
/// group's family (every task of every family for the global group) yields one
/// point; otherwise the whole group is a single task.
pub fn task_points(plan: &ComparativePlan, group: &Group<'_>, x: &str, y: &str) -> Result<Vec<TaskPoint>> {
    let mut points = Vec::new();
    match &plan.families {
        Some((families, task_column)) => {
            let selected: Vec<&TaskFamily> = if group.is_global() {
                families.iter().collect()
            } else {
                families.iter().filter(|f| f.label == group.label).collect()
            };
            for family in selected {
                for task in &family.task_names {
                    let rows = task_rows(group, task_column, task);
                    let pairs = finite_pairs(&rows, x, y, task)?;
                    points.extend(TaskPoint::from_pairs(family.task_label(task), &pairs));
                }
            }
        }
        None => {
            let pairs = finite_pairs(&group.rows, x, y, &group.label)?;
            points.extend(TaskPoint::from_pairs(&group.label, &pairs));
        }
    }
    points.sort_by(|a, b| a.mean_x.total_cmp(&b.mean_x).then(a.mean_y.total_cmp(&b.mean_y)));
    Ok(points)
}

fn require_pairs(analyzer: &str, targets: &[Target]) -> Result<()> {
    match targets.iter().find(|t| t.y_column().is_none()) {
        Some(t) => Err(AnalysisError::configuration(format!(
            "{} compares column pairs, got the single column {}",
            analyzer,
            t.key()
        ))),
        None => Ok(()),
    }
}

/// Every task must contribute the same number of rows. The most common count
/// is taken as the expected one, so the error names the odd task out.
fn check_task_sizes(table: &Table, families: &[TaskFamily], task_column: &str) -> Result<()> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in &table.rows {
        if let Some(v) = row.get(task_column) {
            *counts.entry(v.to_label()).or_default() += 1;
        }
    }
    let sizes: Vec<(&TaskFamily, &String, usize)> = families
        .iter()
        .flat_map(|f| f.task_names.iter().map(move |t| (f, t)))
        .map(|(f, t)| (f, t, counts.get(t).copied().unwrap_or(0)))
        .collect();

    let mut frequency: IndexMap<usize, usize> = IndexMap::new();
    for (_, _, n) in &sizes {
        *frequency.entry(*n).or_default() += 1;
    }
    // Ties go to the count seen first.
    let expected = match frequency.iter().rev().max_by_key(|entry| *entry.1) {
        Some((&n, _)) => n,
        None => return Ok(()),
    };

    match sizes.iter().find(|(_, _, n)| *n != expected) {
        Some((family, task, found)) => Err(AnalysisError::configuration(format!(
            "most tasks have {} data points, but {} in family {} has {} data points",
            expected, task, family.label, found
        ))),
        None => Ok(()),
    }
}

fn prepare_plan(analyzer: &str, table: &Table, request: &AnalysisRequest) -> Result<ComparativePlan> {
    require_pairs(analyzer, &request.targets)?;
    match &request.group_by {
        GroupBy::Families { families, task_column } => {
            check_task_sizes(table, families, task_column)?;
            Ok(ComparativePlan {
                families: Some((families.clone(), task_column.clone())),
            })
        }
        _ => Ok(ComparativePlan::default()),
    }
}

fn range_and_std_bars(config: &AnalyzerConfig, points: &[TaskPoint]) -> Vec<PlottableData> {
    let xs: Vec<f64> = points.iter().map(|p| p.mean_x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.mean_y).collect();
    let pick = |f: fn(&TaskPoint) -> f64| points.iter().map(f).collect::<Vec<f64>>();

    let mut bars = Vec::new();
    if config.show_v_range_bar {
        bars.push(
            PlottableData::error_lines(xs.clone(), ys.clone(), pick(|p| p.y_neg), pick(|p| p.y_pos), true)
                .with_line_width(0.75)
                .with_cap_size(3.0),
        );
    }
    if config.show_h_range_bar {
        bars.push(
            PlottableData::error_lines(xs.clone(), ys.clone(), pick(|p| p.x_neg), pick(|p| p.x_pos), false)
                .with_line_width(0.75)
                .with_cap_size(3.0),
        );
    }
    if config.show_v_std_bar {
        bars.push(
            PlottableData::error_lines(xs.clone(), ys.clone(), pick(|p| p.y_std), pick(|p| p.y_std), true)
                .with_line_width(1.0)
                .with_cap_size(2.0),
        );
    }
    if config.show_h_std_bar {
        bars.push(
            PlottableData::error_lines(xs, ys, pick(|p| p.x_std), pick(|p| p.x_std), false)
                .with_line_width(1.0)
                .with_cap_size(2.0),
        );
    }
    bars
}

fn widen(range: (f64, f64)) -> (f64, f64) {
    let span = range.1 - range.0;
    let margin = if span > 0.0 { span * DATA_MARGIN } else { range.0.abs().max(1.0) * DATA_MARGIN };
    (range.0 - margin, range.1 + margin)
}

/// All groups share one panel. Observed bounds get a margin unless
/// configuration or column properties fix them.
fn comparative_render_job<A: Analyzer + ?Sized>(
    analyzer: &A,
    summary: &SummaryTable,
    target: &Target,
    mode: &str,
    request: &AnalysisRequest,
) -> Result<RenderJob> {
    let mut job = base_render_job(analyzer, summary, target, mode, request, true)?;
    let config = analyzer.config();
    let properties = analyzer.properties();
    let x_props = properties.get_or_default(target.x_column());
    let y_props = properties.get_or_default(target.y_column().unwrap_or_default());

    if config.x_min.or(x_props.plot_min).is_none() && config.x_max.or(x_props.plot_max).is_none() {
        job.x_bounds = job.x_bounds.map(widen);
    }
    if config.y_min.or(y_props.plot_min).is_none() && config.y_max.or(y_props.plot_max).is_none() {
        let observed = merge_ranges(job.plots_by_group.values().flatten().map(|p| p.y_range()));
        job.y_bounds = observed.map(widen);
    }

    // Keep one legend entry per group.
    let labels: Vec<(String, String)> = job
        .group_labels
        .iter()
        .map(|(g, l)| (g.clone(), l.clone()))
        .collect();
    for (group, label) in labels {
        if let Some(plots) = job.plots_by_group.get_mut(&group) {
            if let Some(first) = plots.first_mut() {
                first.style.label = Some(label);
            }
        }
    }
    Ok(job)
}

/// Scatter of per-task means of an `(x, y)` column pair.
#[derive(Debug, Clone)]
pub struct TwoColumnScatterAnalyzer {
    config: AnalyzerConfig,
    properties: ColumnPropertiesMap,
}

impl TwoColumnScatterAnalyzer {
    pub const NAME: &'static str = "TwoColumnScatterAnalyzer";
    pub const MODES: &'static [&'static str] = &["scatter"];

    pub fn new(config: AnalyzerConfig, properties: ColumnPropertiesMap) -> Result<Self> {
        config.validate(Self::MODES)?;
        Ok(Self { config, properties })
    }
}

impl Analyzer for TwoColumnScatterAnalyzer {
    type Prepared = ComparativePlan;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn valid_modes(&self) -> &'static [&'static str] {
        Self::MODES
    }

    fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn properties(&self) -> &ColumnPropertiesMap {
        &self.properties
    }

    fn prepare(&self, table: &Table, request: &AnalysisRequest) -> Result<ComparativePlan> {
        prepare_plan(Self::NAME, table, request)
    }

    fn compute_plottable_data(
        &self,
        prepared: &ComparativePlan,
        group: &Group<'_>,
        _row: &SummaryRow,
        target: &Target,
        mode: &str,
    ) -> Result<Vec<PlottableData>> {
        let (x, y) = match (mode, target) {
            ("scatter", Target::Pair { x, y }) => (x, y),
            _ => {
                return Err(AnalysisError::AbstractMethod {
                    class: Self::NAME.to_string(),
                    group: group.label.clone(),
                    column: target.key(),
                    mode: mode.to_string(),
                })
            }
        };
        let config = &self.config;
        let all_pairs = finite_pairs(&group.rows, x, y, &group.label)?;
        if all_pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mean_x = stats::mean(&all_pairs.iter().map(|p| p.0).collect::<Vec<_>>());
        let mean_y = stats::mean(&all_pairs.iter().map(|p| p.1).collect::<Vec<_>>());
        let group_mean = PlottableData::scatter(vec![mean_x], vec![mean_y])
            .with_marker("diamond".to_string())
            .with_marker_size(config.main_marker_size * 3.0)
            .with_alpha(1.0);

        if group.is_global() {
            let (xs, ys): (Vec<f64>, Vec<f64>) = all_pairs.into_iter().unzip();
            return Ok(vec![
                PlottableData::scatter(xs, ys)
                    .with_alpha(config.main_alpha)
                    .with_marker_size(config.main_marker_size),
                group_mean,
            ]);
        }

        let points = task_points(prepared, group, x, y)?;
        let mut plots = vec![PlottableData::scatter(
            points.iter().map(|p| p.mean_x).collect(),
            points.iter().map(|p| p.mean_y).collect(),
        )
        .with_marker_size(config.main_marker_size * 2.0)
        .with_alpha((config.main_alpha * 2.0).min(0.65))];
        plots.extend(range_and_std_bars(config, &points));

        if config.show_individual {
            let mut sorted = all_pairs;
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
            let (xs, ys): (Vec<f64>, Vec<f64>) = sorted.into_iter().unzip();
            plots.push(
                PlottableData::scatter(xs, ys)
                    .with_alpha(0.7 * config.main_alpha)
                    .with_marker_size(config.main_marker_size),
            );
        }
        plots.push(group_mean);
        Ok(plots)
    }

    fn render_job(
        &self,
        _prepared: &ComparativePlan,
        summary: &SummaryTable,
        target: &Target,
        mode: &str,
        request: &AnalysisRequest,
    ) -> Result<RenderJob> {
        comparative_render_job(self, summary, target, mode, request)
    }
}

/// One line per family through the per-task means of an `(x, y)` column pair.
#[derive(Debug, Clone)]
pub struct TwoColumnLineAnalyzer {
    config: AnalyzerConfig,
    properties: ColumnPropertiesMap,
}

impl TwoColumnLineAnalyzer {
    pub const NAME: &'static str = "TwoColumnLineAnalyzer";
    pub const MODES: &'static [&'static str] = &["line"];

    pub fn new(config: AnalyzerConfig, properties: ColumnPropertiesMap) -> Result<Self> {
        config.validate(Self::MODES)?;
        Ok(Self { config, properties })
    }
}

impl Analyzer for TwoColumnLineAnalyzer {
    type Prepared = ComparativePlan;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn valid_modes(&self) -> &'static [&'static str] {
        Self::MODES
    }

    fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn properties(&self) -> &ColumnPropertiesMap {
        &self.properties
    }

    fn prepare(&self, table: &Table, request: &AnalysisRequest) -> Result<ComparativePlan> {
        if !matches!(request.group_by, GroupBy::Families { .. }) {
            return Err(AnalysisError::configuration(format!(
                "{} needs tasks grouped into families",
                Self::NAME
            )));
        }
        prepare_plan(Self::NAME, table, request)
    }

    fn compute_plottable_data(
        &self,
        prepared: &ComparativePlan,
        group: &Group<'_>,
        _row: &SummaryRow,
        target: &Target,
        mode: &str,
    ) -> Result<Vec<PlottableData>> {
        let (x, y) = match (mode, target) {
            ("line", Target::Pair { x, y }) => (x, y),
            _ => {
                return Err(AnalysisError::AbstractMethod {
                    class: Self::NAME.to_string(),
                    group: group.label.clone(),
                    column: target.key(),
                    mode: mode.to_string(),
                })
            }
        };
        let points = task_points(prepared, group, x, y)?;
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let mut plots = vec![PlottableData::line(
            points.iter().map(|p| p.mean_x).collect(),
            points.iter().map(|p| p.mean_y).collect(),
        )
        .with_label(&group.label)
        .with_alpha(self.config.main_alpha.max(0.8))
        .with_line_width(self.config.main_line_width)
        .with_marker_size(self.config.main_marker_size)];
        plots.extend(range_and_std_bars(&self.config, &points));
        Ok(plots)
    }

    fn render_job(
        &self,
        _prepared: &ComparativePlan,
        summary: &SummaryTable,
        target: &Target,
        mode: &str,
        request: &AnalysisRequest,
    ) -> Result<RenderJob> {
        comparative_render_job(self, summary, target, mode, request)
    }
}
