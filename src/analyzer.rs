use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::binning::{self, DictKeyBinner};
use crate::config::AnalyzerConfig;
use crate::data::{self, Table, Weights};
use crate::dispatch::{RenderDispatcher, RenderJob, Renderer};
use crate::error::{AnalysisError, Result};
use crate::histogram::{histogram_plottables, HistogramEngine, HistogramStyle};
use crate::parser::KeyCombination;
use crate::partition::{partition, Group, GroupBy};
use crate::plotdata::{assign_group_styles, merge_ranges, PlottableData};
use crate::properties::ColumnPropertiesMap;
use crate::stats::{self, Description};
use crate::summary::{render_column_name, statistic_columns, Statistic, SummaryBuilder, SummaryRow, SummaryTable};

/// A column, or an `(x, y)` column pair, to analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Target {
    Column(String),
    Pair { x: String, y: String },
}

impl Target {
    pub fn column(name: &str) -> Self {
        Target::Column(name.to_string())
    }

    pub fn pair(x: &str, y: &str) -> Self {
        Target::Pair {
            x: x.to_string(),
            y: y.to_string(),
        }
    }

    /// Name used in derived columns and output paths.
    pub fn key(&self) -> String {
        match self {
            Target::Column(c) => c.clone(),
            Target::Pair { x, y } => format!("{}_VS_{}", x, y),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            Target::Column(c) => vec![c],
            Target::Pair { x, y } => vec![x, y],
        }
    }

    pub fn x_column(&self) -> &str {
        match self {
            Target::Column(c) => c,
            Target::Pair { x, .. } => x,
        }
    }

    pub fn y_column(&self) -> Option<&str> {
        match self {
            Target::Column(_) => None,
            Target::Pair { y, .. } => Some(y),
        }
    }
}

/// One analysis call: what to analyze, how to group, where artifacts go.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub targets: Vec<Target>,
    pub group_by: GroupBy,
    pub group_order: Option<Vec<String>>,
    pub output_dir: PathBuf,
}

impl AnalysisRequest {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            ..Default::default()
        }
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_group_order(mut self, order: Vec<String>) -> Self {
        self.group_order = Some(order);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }
}

/// An analysis producing per-group statistics and one plot per (target, mode).
///
/// Implementors supply [`Analyzer::prepare`] and, for every mode they list in
/// [`Analyzer::valid_modes`], [`Analyzer::compute_plottable_data`]. The provided
/// methods partition the table, build the summary and dispatch rendering.
pub trait Analyzer: Sync {
    /// Whole-table state computed once per call and shared by every group.
    type Prepared: Sync;

    fn name(&self) -> &str;
    fn valid_modes(&self) -> &'static [&'static str];
    fn config(&self) -> &AnalyzerConfig;
    fn properties(&self) -> &ColumnPropertiesMap;

    /// Validate the request against the whole table. Runs before any group is processed.
    fn prepare(&self, table: &Table, request: &AnalysisRequest) -> Result<Self::Prepared>;

    /// Statistics of one raw column over one group.
    fn describe_column(&self, _prepared: &Self::Prepared, group: &Group<'_>, column: &str) -> Result<Description> {
        Ok(stats::describe(&data::numeric_values(&group.rows, column)?))
    }

    fn compute_plottable_data(
        &self,
        _prepared: &Self::Prepared,
        group: &Group<'_>,
        _row: &SummaryRow,
        target: &Target,
        mode: &str,
    ) -> Result<Vec<PlottableData>> {
        Err(AnalysisError::AbstractMethod {
            class: self.name().to_string(),
            group: group.label.clone(),
            column: target.key(),
            mode: mode.to_string(),
        })
    }

    fn declare_columns<'s>(
        &'s self,
        prepared: &'s Self::Prepared,
        request: &AnalysisRequest,
        modes: &[String],
        builder: &mut SummaryBuilder<'s>,
    ) -> Result<()> {
        declare_default_columns(self, prepared, request, modes, builder)
    }

    fn render_job(
        &self,
        _prepared: &Self::Prepared,
        summary: &SummaryTable,
        target: &Target,
        mode: &str,
        request: &AnalysisRequest,
    ) -> Result<RenderJob> {
        base_render_job(self, summary, target, mode, request, self.config().combine_groups)
    }

    /// Build the summary table and the render jobs without rendering.
    fn summarize(&self, table: &Table, request: &AnalysisRequest) -> Result<(SummaryTable, Vec<RenderJob>)> {
        self.summarize_with(table, request, None)
    }

    /// Like [`Analyzer::summarize`], reusing values of a previous summary.
    fn summarize_with(
        &self,
        table: &Table,
        request: &AnalysisRequest,
        previous: Option<&SummaryTable>,
    ) -> Result<(SummaryTable, Vec<RenderJob>)> {
        let config = self.config();
        config.validate(self.valid_modes())?;
        let modes = config.resolve_modes(self.valid_modes())?;
        if request.targets.is_empty() {
            return Err(AnalysisError::configuration("no target columns given"));
        }

        let prepared = self.prepare(table, request)?;
        let groups = partition(
            &table.rows,
            &request.group_by,
            config.show_global,
            request.group_order.as_deref(),
        )?;

        let mut builder = SummaryBuilder::new();
        self.declare_columns(&prepared, request, &modes, &mut builder)?;
        let mut summary = builder.build_with(&groups, previous)?;
        summary.move_render_columns_back();

        let mut jobs = Vec::with_capacity(modes.len() * request.targets.len());
        for mode in &modes {
            for target in &request.targets {
                jobs.push(self.render_job(&prepared, &summary, target, mode, request)?);
            }
        }
        Ok((summary, jobs))
    }

    /// Render `jobs` in parallel and wait for all of them. The first failure aborts the batch.
    fn dispatch(&self, jobs: Vec<RenderJob>, renderer: Arc<dyn Renderer>) -> Result<()> {
        info!("{}: rendering {} plots", self.name(), jobs.len());
        RenderDispatcher::new(renderer, 0)?.run(jobs, self.config().progress_period(), |remaining, total| {
            info!("{} of {} plots remaining", remaining, total)
        })
    }

    /// Summarize, then render every (target, mode) pair.
    fn analyze(&self, table: &Table, request: &AnalysisRequest, renderer: Arc<dyn Renderer>) -> Result<SummaryTable> {
        let (summary, jobs) = self.summarize(table, request)?;
        self.dispatch(jobs, renderer)?;
        Ok(summary)
    }
}

/// Statistics columns for every raw column of every target, then one render
/// column per (target, mode).
pub fn declare_default_columns<'s, A: Analyzer + ?Sized>(
    analyzer: &'s A,
    prepared: &'s A::Prepared,
    request: &AnalysisRequest,
    modes: &[String],
    builder: &mut SummaryBuilder<'s>,
) -> Result<()> {
    for target in &request.targets {
        for column in target.columns() {
            let owned = statistic_columns(column);
            if builder.is_declared(&owned[0]) {
                continue;
            }
            let column = column.to_string();
            builder.declare(owned, move |group, row| {
                let description = analyzer.describe_column(prepared, group, &column)?;
                for stat in Statistic::ALL {
                    row.set_scalar(&stat.column_name(&column), stat.value(&description));
                }
                Ok(())
            })?;
        }
    }

    for mode in modes {
        for target in &request.targets {
            let name = render_column_name(&target.key(), mode);
            let target = target.clone();
            let mode = mode.clone();
            builder.declare(vec![name.clone()], move |group, row| {
                let plots = analyzer.compute_plottable_data(prepared, group, row, &target, &mode)?;
                for pld in &plots {
                    pld.validate()?;
                }
                row.set_plots(&name, plots);
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// `{output_dir}/{name}_{target}[_groupby-{group_by}].{ext}`
pub fn output_path(analyzer_name: &str, target: &Target, request: &AnalysisRequest, extension: &str) -> PathBuf {
    let mut file_name = format!("{}_{}", analyzer_name, target.key());
    if let Some(suffix) = request.group_by.suffix() {
        file_name.push_str(&format!("_groupby-{}", suffix));
    }
    request.output_dir.join(format!("{}.{}", file_name, extension))
}

fn bounds(lo: Option<f64>, hi: Option<f64>, observed: Option<(f64, f64)>) -> Option<(f64, f64)> {
    match (lo.or(observed.map(|o| o.0)), hi.or(observed.map(|o| o.1))) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

/// Rendering parameters shared by all analyzers: styled descriptors of every
/// group, display labels, axis labels and bounds from configuration, column
/// properties or observed data.
pub fn base_render_job<A: Analyzer + ?Sized>(
    analyzer: &A,
    summary: &SummaryTable,
    target: &Target,
    mode: &str,
    request: &AnalysisRequest,
    combine_groups: bool,
) -> Result<RenderJob> {
    let config = analyzer.config();
    let properties = analyzer.properties();

    let mut plots_by_group = summary.plots_by_group(&render_column_name(&target.key(), mode));
    assign_group_styles(&mut plots_by_group, combine_groups);

    let group_labels: IndexMap<String, String> = plots_by_group
        .keys()
        .map(|group| {
            let display = match summary.row(group) {
                Some(row) if config.show_count => format!("{} (n={})", group, row.group_size),
                _ => group.clone(),
            };
            (group.clone(), display)
        })
        .collect();

    let x_properties = properties.get_or_default(target.x_column());
    let observed_x = merge_ranges(plots_by_group.values().flatten().map(|p| p.x_range()));
    let x_bounds = bounds(
        config.x_min.or(x_properties.plot_min),
        config.x_max.or(x_properties.plot_max),
        observed_x,
    );

    let (y_min, y_max, semilog_y) = match target.y_column() {
        Some(y) => {
            let y_properties = properties.get_or_default(y);
            (
                config.y_min.or(y_properties.plot_min),
                config.y_max.or(y_properties.plot_max),
                y_properties.semilog_y,
            )
        }
        None => (config.y_min, config.y_max, x_properties.semilog_y),
    };
    let observed_y = if config.common_group_scale {
        merge_ranges(plots_by_group.values().flatten().map(|p| p.y_range()))
    } else {
        None
    };

    Ok(RenderJob {
        output_path: output_path(analyzer.name(), target, request, config.render.format.extension()),
        target: target.key(),
        mode: mode.to_string(),
        plots_by_group,
        group_labels,
        x_label: x_properties.display_label(),
        y_label: target.y_column().map(|y| properties.label(y)),
        x_bounds,
        y_bounds: bounds(y_min, y_max, observed_y),
        semilog_y,
        combine_groups,
        title: config.plot_title.clone(),
        x_ticks: None,
        options: config.render.clone(),
    })
}

fn require_single_columns(analyzer: &str, targets: &[Target]) -> Result<Vec<String>> {
    targets
        .iter()
        .map(|t| match t {
            Target::Column(c) => Ok(c.clone()),
            Target::Pair { .. } => Err(AnalysisError::configuration(format!(
                "{} analyzes single columns, got the pair {}",
                analyzer,
                t.key()
            ))),
        })
        .collect()
}

/// Histogram analysis of numeric columns.
#[derive(Debug, Clone)]
pub struct ScalarNumericAnalyzer {
    config: AnalyzerConfig,
    properties: ColumnPropertiesMap,
}

/// Analysis range and binning of one numeric column, shared by all groups.
#[derive(Debug, Clone)]
pub struct NumericColumnPlan {
    pub range: (f64, f64),
    engine: HistogramEngine,
}

impl ScalarNumericAnalyzer {
    pub const NAME: &'static str = "ScalarNumericAnalyzer";
    pub const MODES: &'static [&'static str] = &["histogram"];
    pub const Y_LABEL: &'static str = "Sample histogram, average and ±1σ";

    /// Fails with a configuration error when the selected modes or bin settings are invalid.
    pub fn new(config: AnalyzerConfig, properties: ColumnPropertiesMap) -> Result<Self> {
        config.validate(Self::MODES)?;
        Ok(Self { config, properties })
    }
}

impl Analyzer for ScalarNumericAnalyzer {
    type Prepared = IndexMap<String, NumericColumnPlan>;

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

    fn prepare(&self, table: &Table, request: &AnalysisRequest) -> Result<Self::Prepared> {
        let all_rows: Vec<_> = table.rows.iter().collect();
        let mut plans = IndexMap::new();
        for column in require_single_columns(Self::NAME, &request.targets)? {
            let samples = data::numeric_values(&all_rows, &column)?;
            let props = self.properties.get_or_default(&column);
            let observed = stats::finite_min_max(&samples).unwrap_or((0.0, 1.0));
            let lo = self.config.x_min.or(props.plot_min).unwrap_or(observed.0);
            let hi = self.config.x_max.or(props.plot_max).unwrap_or(observed.1);
            if lo > hi {
                return Err(AnalysisError::configuration(format!(
                    "empty analysis range [{}, {}] for {}",
                    lo, hi, column
                )));
            }
            let engine = HistogramEngine::new(self.config.bin_count)?
                .with_bin_width(props.hist_bin_width.or(self.config.bin_width))?;
            let range = if lo == hi { (lo, lo + 1.0) } else { (lo, hi) };
            plans.insert(column, NumericColumnPlan { range, engine });
        }
        Ok(plans)
    }

    fn compute_plottable_data(
        &self,
        prepared: &Self::Prepared,
        group: &Group<'_>,
        row: &SummaryRow,
        target: &Target,
        mode: &str,
    ) -> Result<Vec<PlottableData>> {
        let column = target.x_column();
        let plan = match (mode, prepared.get(column)) {
            ("histogram", Some(plan)) => plan,
            _ => {
                return Err(AnalysisError::AbstractMethod {
                    class: Self::NAME.to_string(),
                    group: group.label.clone(),
                    column: column.to_string(),
                    mode: mode.to_string(),
                })
            }
        };

        let samples = data::numeric_values(&group.rows, column)?;
        let histogram = plan.engine.compute(column, &samples, plan.range)?;
        let props = self.properties.get_or_default(column);
        let style = HistogramStyle {
            x_label: props.display_label(),
            bar_alpha: self.config.main_alpha,
            bar_width_fraction: self.config.bar_width_fraction,
            marker_size: self.config.main_marker_size,
            error_alpha: self.config.secondary_alpha,
            error_line_width: self.config.secondary_line_width,
            semilog_y_min: props.semilog_y.then_some(self.config.semilog_y_min_bound),
        };
        Ok(histogram_plottables(
            &histogram,
            row.require_scalar(&Statistic::Avg.column_name(column))?,
            row.require_scalar(&Statistic::Std.column_name(column))?,
            &style,
        ))
    }

    fn render_job(
        &self,
        prepared: &Self::Prepared,
        summary: &SummaryTable,
        target: &Target,
        mode: &str,
        request: &AnalysisRequest,
    ) -> Result<RenderJob> {
        let mut job = base_render_job(self, summary, target, mode, request, self.config.combine_groups)?;
        if let Some(plan) = prepared.get(target.x_column()) {
            job.x_bounds = Some(plan.range);
        }
        job.y_label = Some(Self::Y_LABEL.to_string());
        if let Some((_, hi)) = job.y_bounds {
            let floor = if job.semilog_y { self.config.semilog_y_min_bound } else { 0.0 };
            let lo = self.config.y_min.unwrap_or(floor);
            job.y_bounds = Some((lo, self.config.y_max.unwrap_or(hi.max(lo))));
        }
        Ok(job)
    }
}

/// Analysis of columns whose cells map keys to weights.
#[derive(Debug, Clone)]
pub struct ScalarDictAnalyzer {
    config: AnalyzerConfig,
    properties: ColumnPropertiesMap,
}

/// Keys of one weight-map column after optional binning, shared by all groups.
#[derive(Debug, Clone)]
pub struct DictColumnPlan {
    /// Display keys, placed at x = 0, 1, ...
    pub keys: Vec<String>,
    pub binner: Option<DictKeyBinner>,
}

impl DictColumnPlan {
    fn x_offset(&self) -> f64 {
        if self.binner.is_some() {
            0.5
        } else {
            0.0
        }
    }

    pub fn x_ticks(&self) -> Vec<(f64, String)> {
        self.keys
            .iter()
            .enumerate()
            .map(|(i, k)| (i as f64 + self.x_offset(), k.clone()))
            .collect()
    }
}

/// Per-key values of one group.
struct KeySeries {
    x: f64,
    values: Vec<f64>,
    description: Description,
}

impl ScalarDictAnalyzer {
    pub const NAME: &'static str = "ScalarDictAnalyzer";
    pub const MODES: &'static [&'static str] = &["line"];

    pub fn new(config: AnalyzerConfig, properties: ColumnPropertiesMap) -> Result<Self> {
        config.validate(Self::MODES)?;
        Ok(Self { config, properties })
    }

    fn plan_column(&self, weights: &[&Weights]) -> Result<DictColumnPlan> {
        match self.config.key_combination()? {
            KeyCombination::None => {
                let mut keys: Vec<String> = Vec::new();
                for w in weights {
                    for k in w.keys() {
                        if !keys.contains(k) {
                            keys.push(k.clone());
                        }
                    }
                }
                sort_keys(&mut keys);
                Ok(DictColumnPlan { keys, binner: None })
            }
            KeyCombination::Histogram { bin_count } => {
                let entries: Vec<Vec<(f64, f64)>> = weights
                    .iter()
                    .map(|w| data::numeric_entries(w))
                    .collect::<Result<_>>()?;
                let keys: Vec<f64> = entries.iter().flatten().map(|(k, _)| *k).collect();
                let (key_min, key_max) = stats::finite_min_max(&keys).unwrap_or((0.0, 1.0));
                let (mass_fraction, width_fraction) = self.config.fractions()?;

                let range = if self.config.x_min.is_some() || self.config.x_max.is_some() {
                    Some((self.config.x_min.unwrap_or(key_min), self.config.x_max.unwrap_or(key_max)))
                } else if mass_fraction != 1.0 {
                    binning::mass_fraction_range(&entries, mass_fraction, self.config.epsilon)
                } else if width_fraction != 1.0 {
                    binning::width_fraction_range(&entries, width_fraction)
                } else {
                    None
                };
                let (lo, hi) = range.unwrap_or((key_min, key_max));

                let binner = DictKeyBinner::new(lo, hi, bin_count)?;
                Ok(DictColumnPlan {
                    keys: binner.labels().to_vec(),
                    binner: Some(binner),
                })
            }
        }
    }

    fn key_series(&self, plan: &DictColumnPlan, group: &Group<'_>, column: &str) -> Result<Vec<KeySeries>> {
        let raw = data::weight_values(&group.rows, column)?;
        let maps: Vec<Weights> = match &plan.binner {
            Some(binner) => raw
                .iter()
                .map(|w| binner.bin(w).map(|b| b.weights))
                .collect::<Result<_>>()?,
            None => raw.into_iter().cloned().collect(),
        };

        let mut series = Vec::with_capacity(plan.keys.len());
        for (i, key) in plan.keys.iter().enumerate() {
            let values: Vec<f64> = maps
                .iter()
                .filter_map(|m| m.get(key).copied())
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                continue;
            }
            let description = stats::describe(&values);
            series.push(KeySeries {
                x: i as f64 + plan.x_offset(),
                values,
                description,
            });
        }
        Ok(series)
    }

    fn plan<'p>(&self, prepared: &'p IndexMap<String, DictColumnPlan>, column: &str) -> Result<&'p DictColumnPlan> {
        prepared
            .get(column)
            .ok_or_else(|| AnalysisError::contract(format!("column '{}' was not prepared", column)))
    }
}

/// Numeric order when every key is a number, lexicographic otherwise.
fn sort_keys(keys: &mut [String]) {
    let numeric: Option<Vec<f64>> = keys.iter().map(|k| k.trim().parse::<f64>().ok()).collect();
    match numeric {
        Some(_) => keys.sort_by(|a, b| {
            let a: f64 = a.trim().parse().unwrap_or(f64::NAN);
            let b: f64 = b.trim().parse().unwrap_or(f64::NAN);
            a.total_cmp(&b)
        }),
        None => keys.sort(),
    }
}

impl Analyzer for ScalarDictAnalyzer {
    type Prepared = IndexMap<String, DictColumnPlan>;

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

    fn prepare(&self, table: &Table, request: &AnalysisRequest) -> Result<Self::Prepared> {
        let all_rows: Vec<_> = table.rows.iter().collect();
        let mut plans = IndexMap::new();
        for column in require_single_columns(Self::NAME, &request.targets)? {
            if let Some(props) = self.properties.get(&column) {
                if !props.has_dict_values {
                    return Err(AnalysisError::contract(format!(
                        "cannot analyze column '{}': has_dict_values is not set",
                        column
                    )));
                }
            }
            let weights = data::weight_values(&all_rows, &column)?;
            let plan = self.plan_column(&weights)?;
            plans.insert(column, plan);
        }
        Ok(plans)
    }

    /// Statistics over the per-key means of the group.
    fn describe_column(&self, prepared: &Self::Prepared, group: &Group<'_>, column: &str) -> Result<Description> {
        let plan = self.plan(prepared, column)?;
        let means: Vec<f64> = self
            .key_series(plan, group, column)?
            .iter()
            .map(|s| s.description.mean)
            .collect();
        Ok(stats::describe(&means))
    }

    fn compute_plottable_data(
        &self,
        prepared: &Self::Prepared,
        group: &Group<'_>,
        _row: &SummaryRow,
        target: &Target,
        mode: &str,
    ) -> Result<Vec<PlottableData>> {
        let column = target.x_column();
        if mode != "line" {
            return Err(AnalysisError::AbstractMethod {
                class: Self::NAME.to_string(),
                group: group.label.clone(),
                column: column.to_string(),
                mode: mode.to_string(),
            });
        }
        let plan = self.plan(prepared, column)?;
        let series = self.key_series(plan, group, column)?;

        let xs: Vec<f64> = series.iter().map(|s| s.x).collect();
        let means: Vec<f64> = series.iter().map(|s| s.description.mean).collect();
        let stds: Vec<f64> = series
            .iter()
            .map(|s| if s.description.std.is_finite() { s.description.std } else { 0.0 })
            .collect();

        let mut plots = vec![PlottableData::line(xs.clone(), means.clone())
            .with_line_width(self.config.main_line_width)
            .with_alpha(self.config.main_alpha.max(0.8))];

        if self.config.show_std_band {
            plots.push(
                PlottableData::horizontal_band(xs.clone(), means.clone(), stds.clone(), stds.clone(), plan.binner.is_some())
                    .with_alpha(self.config.secondary_alpha * 0.5)
                    .with_line_width(0.0),
            );
        }
        if self.config.show_std_bar {
            plots.push(
                PlottableData::error_lines(xs.clone(), means.clone(), stds.clone(), stds, true)
                    .with_line_width(1.0)
                    .with_cap_size(2.0)
                    .with_alpha(0.3),
            );
        }
        if self.config.show_individual {
            for s in &series {
                plots.push(
                    PlottableData::scatter(vec![s.x; s.values.len()], s.values.clone())
                        .with_alpha(0.3)
                        .with_marker_size(10.0)
                        .with_marker("cross".to_string()),
                );
            }
        }

        Ok(plots.into_iter().map(|p| p.with_label(&group.label)).collect())
    }

    fn render_job(
        &self,
        prepared: &Self::Prepared,
        summary: &SummaryTable,
        target: &Target,
        mode: &str,
        request: &AnalysisRequest,
    ) -> Result<RenderJob> {
        let mut job = base_render_job(self, summary, target, mode, request, self.config.combine_groups)?;
        let plan = self.plan(prepared, target.x_column())?;
        let n = plan.keys.len() as f64;
        job.x_bounds = if plan.binner.is_some() {
            Some((0.0, n))
        } else if plan.keys.is_empty() {
            None
        } else {
            let margin = (n - 1.0).max(0.0) / (10.0 * n);
            Some((-margin, n - 1.0 + margin))
        };
        job.x_ticks = Some(plan.x_ticks());
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Row, Value};
    use crate::properties::ColumnProperties;
    use crate::summary::statistic_columns;

    fn numeric_table() -> Table {
        let rows = (0..100)
            .map(|i| {
                Row::new()
                    .with("group", Value::Text(if i < 60 { "a".into() } else { "b".into() }))
                    .with("bpppc", Value::Number((i % 10) as f64))
            })
            .collect();
        Table::from_rows(rows)
    }

    fn dict_table() -> Table {
        let cell = |pairs: &[(&str, f64)]| Value::Weights(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect());
        Table::from_rows(vec![
            Row::new()
                .with("g", Value::Text("x".into()))
                .with("hist", cell(&[("0", 1.0), ("2", 3.0), ("10", 1.0)])),
            Row::new()
                .with("g", Value::Text("y".into()))
                .with("hist", cell(&[("0", 3.0), ("5", 1.0)])),
        ])
    }

    #[test]
    fn test_target_keys() {
        assert_eq!(Target::column("bpppc").key(), "bpppc");
        assert_eq!(Target::pair("time", "psnr").key(), "time_VS_psnr");
        assert_eq!(Target::pair("time", "psnr").y_column(), Some("psnr"));
    }

    #[test]
    fn test_output_path() {
        let request = AnalysisRequest::new(vec![Target::column("bpppc")])
            .with_group_by(GroupBy::column("codec"))
            .with_output_dir("plots");
        assert_eq!(
            output_path("ScalarNumericAnalyzer", &Target::column("bpppc"), &request, "png"),
            PathBuf::from("plots/ScalarNumericAnalyzer_bpppc_groupby-codec.png")
        );
        let request = AnalysisRequest::new(vec![]).with_output_dir("plots");
        assert_eq!(
            output_path("A", &Target::pair("x", "y"), &request, "svg"),
            PathBuf::from("plots/A_x_VS_y.svg")
        );
    }

    #[test]
    fn test_invalid_mode_rejected_at_construction() {
        let config = AnalyzerConfig::default().with_modes(&["violin"]);
        let err = ScalarNumericAnalyzer::new(config, ColumnPropertiesMap::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_numeric_summary() {
        let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("bpppc")]).with_group_by(GroupBy::column("group"));
        let (summary, jobs) = analyzer.summarize(&numeric_table(), &request).unwrap();

        let labels: Vec<&str> = summary.group_labels().collect();
        assert_eq!(labels, vec!["a", "b", "all"]);
        let mut expected = statistic_columns("bpppc");
        expected.push("bpppc_render-histogram".to_string());
        assert_eq!(summary.columns, expected);

        let all = summary.row("all").unwrap();
        assert_eq!(all.group_size, 100);
        assert_eq!(all.scalar("bpppc_avg"), Some(4.5));
        assert_eq!(all.scalar("bpppc_median"), Some(4.5));
        assert_eq!(all.scalar("bpppc_max"), Some(9.0));

        let plots = all.plots("bpppc_render-histogram").unwrap();
        assert_eq!(plots.len(), 2);
        let total: f64 = plots[0].y_values.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);

        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.x_bounds, Some((0.0, 9.0)));
        assert_eq!(job.group_labels["all"], "all (n=100)");
        assert_eq!(job.y_bounds.map(|b| b.0), Some(0.0));
        assert!(job.output_path.ends_with("ScalarNumericAnalyzer_bpppc_groupby-group.png"));
        let colors: Vec<_> = job.plots_by_group.values().map(|p| p[0].style.color.clone()).collect();
        assert_eq!(colors.len(), 3);
        assert!(colors.iter().all(|c| c.is_some()));
    }

    #[test]
    fn test_plot_bounds_from_properties() {
        let properties = ColumnPropertiesMap::new()
            .with(ColumnProperties::new("bpppc").with_bounds(Some(0.0), Some(4.0)));
        let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), properties).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
        let (summary, jobs) = analyzer.summarize(&numeric_table(), &request).unwrap();
        assert_eq!(jobs[0].x_bounds, Some((0.0, 4.0)));
        // clipped samples are tolerated
        assert!(summary.row("all").unwrap().plots("bpppc_render-histogram").is_some());
    }

    #[test]
    fn test_pairs_rejected_by_scalar_analyzer() {
        let analyzer = ScalarNumericAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
        let request = AnalysisRequest::new(vec![Target::pair("bpppc", "group")]);
        assert!(matches!(
            analyzer.summarize(&numeric_table(), &request),
            Err(AnalysisError::Configuration(_))
        ));
    }

    struct BareAnalyzer {
        config: AnalyzerConfig,
        properties: ColumnPropertiesMap,
    }

    impl Analyzer for BareAnalyzer {
        type Prepared = ();

        fn name(&self) -> &str {
            "BareAnalyzer"
        }

        fn valid_modes(&self) -> &'static [&'static str] {
            &["histogram"]
        }

        fn config(&self) -> &AnalyzerConfig {
            &self.config
        }

        fn properties(&self) -> &ColumnPropertiesMap {
            &self.properties
        }

        fn prepare(&self, _table: &Table, _request: &AnalysisRequest) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_plot_computation_is_reported() {
        let analyzer = BareAnalyzer {
            config: AnalyzerConfig::default(),
            properties: ColumnPropertiesMap::new(),
        };
        let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
        let err = analyzer.summarize(&numeric_table(), &request).unwrap_err();
        match err {
            AnalysisError::AbstractMethod { class, group, column, mode } => {
                assert_eq!(class, "BareAnalyzer");
                assert_eq!(group, "all");
                assert_eq!(column, "bpppc");
                assert_eq!(mode, "histogram");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_mode_fails_before_groups() {
        let analyzer = BareAnalyzer {
            config: AnalyzerConfig::default().with_modes(&["scatter"]),
            properties: ColumnPropertiesMap::new(),
        };
        let request = AnalysisRequest::new(vec![Target::column("bpppc")]);
        // an AbstractMethod error would mean a group was processed
        assert!(matches!(
            analyzer.summarize(&numeric_table(), &request),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_dict_without_combination() {
        let config = AnalyzerConfig {
            show_individual: false,
            ..Default::default()
        };
        let analyzer = ScalarDictAnalyzer::new(config, ColumnPropertiesMap::new()).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("hist")]);
        let (summary, jobs) = analyzer.summarize(&dict_table(), &request).unwrap();

        let plots = summary.row("all").unwrap().plots("hist_render-line").unwrap();
        assert!(plots[0].is_line());
        assert_eq!(plots[0].x_values, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(plots[0].y_values, vec![2.0, 3.0, 1.0, 1.0]);
        assert_eq!(plots.len(), 2);

        let ticks = jobs[0].x_ticks.as_ref().unwrap();
        let labels: Vec<&str> = ticks.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(labels, vec!["0", "2", "5", "10"]);
        // statistics over the per-key means
        assert_eq!(summary.row("all").unwrap().scalar("hist_max"), Some(3.0));
    }

    #[test]
    fn test_dict_histogram_combination() {
        let config = AnalyzerConfig {
            combine_keys: Some("histogram2col".to_string()),
            show_std_bar: false,
            show_individual: false,
            ..Default::default()
        };
        let analyzer = ScalarDictAnalyzer::new(config, ColumnPropertiesMap::new()).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("hist")]).with_group_by(GroupBy::column("g"));
        let (summary, jobs) = analyzer.summarize(&dict_table(), &request).unwrap();

        let x = summary.row("x").unwrap().plots("hist_render-line").unwrap();
        assert_eq!(x[0].x_values, vec![0.5, 1.5]);
        assert_eq!(x[0].y_values, vec![4.0, 1.0]);
        assert_eq!(jobs[0].x_bounds, Some((0.0, 2.0)));
        assert_eq!(jobs[0].x_ticks.as_ref().unwrap()[0], (0.5, "[0,5)".to_string()));
    }

    #[test]
    fn test_dict_contract() {
        let properties = ColumnPropertiesMap::new().with(ColumnProperties::new("hist"));
        let analyzer = ScalarDictAnalyzer::new(AnalyzerConfig::default(), properties).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("hist")]);
        let err = analyzer.summarize(&dict_table(), &request).unwrap_err();
        assert!(err.to_string().contains("has_dict_values"));

        let properties = ColumnPropertiesMap::new().with(ColumnProperties::new("g").with_dict_values());
        let analyzer = ScalarDictAnalyzer::new(AnalyzerConfig::default(), properties).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("g")]);
        assert!(matches!(
            analyzer.summarize(&dict_table(), &request),
            Err(AnalysisError::Contract(_))
        ));
    }

    #[test]
    fn test_sort_keys() {
        let mut keys = vec!["10".to_string(), "2".to_string(), "-1".to_string()];
        sort_keys(&mut keys);
        assert_eq!(keys, vec!["-1", "2", "10"]);
        let mut keys = vec!["b".to_string(), "a".to_string(), "1".to_string()];
        sort_keys(&mut keys);
        assert_eq!(keys, vec!["1", "a", "b"]);
    }
}
