use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::partition::Group;
use crate::plotdata::PlottableData;
use crate::stats::Description;

/// Infix marking plot-descriptor columns.
pub const RENDER_INFIX: &str = "_render-";

/// Descriptive statistics stored per target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Min,
    Max,
    Avg,
    Std,
    Median,
}

impl Statistic {
    pub const ALL: [Statistic; 5] = [
        Statistic::Min,
        Statistic::Max,
        Statistic::Avg,
        Statistic::Std,
        Statistic::Median,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Avg => "avg",
            Statistic::Std => "std",
            Statistic::Median => "median",
        }
    }

    pub fn column_name(self, column: &str) -> String {
        format!("{}_{}", column, self.suffix())
    }

    pub fn value(self, description: &Description) -> f64 {
        match self {
            Statistic::Min => description.min,
            Statistic::Max => description.max,
            Statistic::Avg => description.mean,
            Statistic::Std => description.std,
            Statistic::Median => description.median,
        }
    }
}

pub fn statistic_columns(column: &str) -> Vec<String> {
    Statistic::ALL.iter().map(|s| s.column_name(column)).collect()
}

/// Name of the plot-descriptor column for `target` in `mode`.
pub fn render_column_name(target: &str, mode: &str) -> String {
    format!("{}{}{}", target, RENDER_INFIX, mode)
}

pub fn is_render_column(name: &str) -> bool {
    name.contains(RENDER_INFIX)
}

/// A derived value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Scalar(f64),
    Plots(Vec<PlottableData>),
}

/// Derived values of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub group_label: String,
    pub group_size: usize,
    pub values: IndexMap<String, Cell>,
}

impl SummaryRow {
    pub fn new(group_label: impl Into<String>, group_size: usize) -> Self {
        Self {
            group_label: group_label.into(),
            group_size,
            values: IndexMap::new(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.values.get(column)
    }

    pub fn scalar(&self, column: &str) -> Option<f64> {
        match self.values.get(column) {
            Some(Cell::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    /// Scalar value that an earlier column must have produced.
    pub fn require_scalar(&self, column: &str) -> Result<f64> {
        self.scalar(column).ok_or_else(|| {
            AnalysisError::contract(format!(
                "column '{}' is not available for group {:?}",
                column, self.group_label
            ))
        })
    }

    pub fn plots(&self, column: &str) -> Option<&[PlottableData]> {
        match self.values.get(column) {
            Some(Cell::Plots(p)) => Some(p),
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, column: &str, value: f64) {
        self.values.insert(column.to_string(), Cell::Scalar(value));
    }

    pub fn set_plots(&mut self, column: &str, plots: Vec<PlottableData>) {
        self.values.insert(column.to_string(), Cell::Plots(plots));
    }
}

/// One row per group, keyed by group label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryTable {
    pub columns: Vec<String>,
    pub rows: IndexMap<String, SummaryRow>,
}

impl SummaryTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, group_label: &str) -> Option<&SummaryRow> {
        self.rows.get(group_label)
    }

    pub fn group_labels(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(|k| k.as_str())
    }

    pub fn render_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.as_str()).filter(|c| is_render_column(c))
    }

    /// Plot descriptors of `column` for every group that has them.
    pub fn plots_by_group(&self, column: &str) -> IndexMap<String, Vec<PlottableData>> {
        self.rows
            .iter()
            .filter_map(|(label, row)| row.plots(column).map(|p| (label.clone(), p.to_vec())))
            .collect()
    }

    /// Move every `_render-` column after the scalar columns, keeping relative order.
    pub fn move_render_columns_back(&mut self) {
        let (mut front, back): (Vec<String>, Vec<String>) =
            self.columns.drain(..).partition(|c| !is_render_column(c));
        front.extend(back);
        self.columns = front;

        for row in self.rows.values_mut() {
            let columns = &self.columns;
            row.values.sort_by_cached_key(|k, _| columns.iter().position(|c| c == k).unwrap_or(usize::MAX));
        }
    }
}

/// Computes the columns it owns on one group's row.
pub type ColumnFn<'a> = Box<dyn Fn(&Group<'_>, &mut SummaryRow) -> Result<()> + Send + Sync + 'a>;

struct DerivedColumn<'a> {
    owned: Vec<String>,
    compute: ColumnFn<'a>,
}

impl DerivedColumn<'_> {
    fn is_render(&self) -> bool {
        self.owned.iter().any(|c| is_render_column(c))
    }
}

/// Registry of derived columns. Columns are declared up front; `build` then fills
/// one row per group, calling each function at most once per group.
#[derive(Default)]
pub struct SummaryBuilder<'a> {
    columns: Vec<DerivedColumn<'a>>,
}

impl<'a> SummaryBuilder<'a> {
    pub fn new() -> Self {
        Self { columns: Vec::new() }
    }

    /// Register `compute` as the producer of `owned`.
    pub fn declare<F>(&mut self, owned: Vec<String>, compute: F) -> Result<()>
    where
        F: Fn(&Group<'_>, &mut SummaryRow) -> Result<()> + Send + Sync + 'a,
    {
        if owned.is_empty() {
            return Err(AnalysisError::configuration("a derived column function must own a column"));
        }
        for name in &owned {
            if self.is_declared(name) || owned.iter().filter(|o| *o == name).count() > 1 {
                return Err(AnalysisError::configuration(format!(
                    "derived column '{}' declared twice",
                    name
                )));
            }
        }
        self.columns.push(DerivedColumn {
            owned,
            compute: Box::new(compute),
        });
        Ok(())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.owned.iter().any(|o| o == name))
    }

    /// Declared column names, scalar columns first.
    pub fn column_names(&self) -> Vec<String> {
        self.ordered().flat_map(|c| c.owned.iter().cloned()).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &DerivedColumn<'a>> {
        self.columns
            .iter()
            .filter(|c| !c.is_render())
            .chain(self.columns.iter().filter(|c| c.is_render()))
    }

    pub fn build(&self, groups: &[Group<'_>]) -> Result<SummaryTable> {
        self.build_with(groups, None)
    }

    /// Build one row per group. Values present in `previous` for a group of the
    /// same label and size are reused instead of recomputed.
    pub fn build_with(&self, groups: &[Group<'_>], previous: Option<&SummaryTable>) -> Result<SummaryTable> {
        let mut seen = HashSet::new();
        for group in groups {
            if !seen.insert(group.label.as_str()) {
                return Err(AnalysisError::configuration(format!(
                    "group label {:?} appears more than once",
                    group.label
                )));
            }
        }

        let built: Vec<SummaryRow> = groups
            .par_iter()
            .map(|group| {
                let seed = previous
                    .and_then(|p| p.row(&group.label))
                    .filter(|r| r.group_size == group.size());
                self.build_row(group, seed)
            })
            .collect::<Result<_>>()?;

        let mut rows = IndexMap::with_capacity(built.len());
        for row in built {
            rows.insert(row.group_label.clone(), row);
        }

        Ok(SummaryTable {
            columns: self.column_names(),
            rows,
        })
    }

    fn build_row(&self, group: &Group<'_>, seed: Option<&SummaryRow>) -> Result<SummaryRow> {
        let mut row = SummaryRow::new(group.label.clone(), group.size());
        if let Some(seed) = seed {
            for column in self.column_names() {
                if let Some(cell) = seed.get(&column) {
                    row.values.insert(column, cell.clone());
                }
            }
        }

        for column in self.ordered() {
            if column.owned.iter().all(|c| row.contains(c)) {
                debug!("reusing {:?} for group {:?}", column.owned, group.label);
                continue;
            }
            (column.compute)(group, &mut row)?;
            if let Some(missing) = column.owned.iter().find(|c| !row.contains(c)) {
                return Err(AnalysisError::contract(format!(
                    "derived column '{}' was not set for group {:?}",
                    missing, group.label
                )));
            }
        }

        let mut ordered = IndexMap::with_capacity(row.values.len());
        for name in self.column_names() {
            if let Some(cell) = row.values.swap_remove(&name) {
                ordered.insert(name, cell);
            }
        }
        row.values = ordered;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Row, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rows() -> Vec<Row> {
        (0..4).map(|i| Row::new().with("v", Value::Number(i as f64))).collect()
    }

    fn groups(rows: &[Row]) -> Vec<Group<'_>> {
        vec![
            Group::new("low", rows[..2].iter().collect()),
            Group::new("all", rows.iter().collect()),
        ]
    }

    #[test]
    fn test_statistic_names() {
        assert_eq!(
            statistic_columns("bpppc"),
            vec!["bpppc_min", "bpppc_max", "bpppc_avg", "bpppc_std", "bpppc_median"]
        );
        assert_eq!(render_column_name("bpppc", "histogram"), "bpppc_render-histogram");
        assert!(is_render_column("bpppc_render-histogram"));
    }

    #[test]
    fn test_render_columns_computed_after_scalars() {
        let rows = rows();
        let mut builder = SummaryBuilder::new();
        builder
            .declare(vec!["v_render-line".to_string()], |_, row| {
                let count = row.require_scalar("v_count")?;
                row.set_plots("v_render-line", vec![PlottableData::line(vec![0.0], vec![count])]);
                Ok(())
            })
            .unwrap();
        builder
            .declare(vec!["v_count".to_string()], |group, row| {
                row.set_scalar("v_count", group.size() as f64);
                Ok(())
            })
            .unwrap();

        assert_eq!(builder.column_names(), vec!["v_count", "v_render-line"]);
        let table = builder.build(&groups(&rows)).unwrap();
        assert_eq!(table.row("all").unwrap().plots("v_render-line").unwrap()[0].y_values, vec![4.0]);
        assert_eq!(table.row("low").unwrap().scalar("v_count"), Some(2.0));
    }

    #[test]
    fn test_each_function_runs_once_per_group() {
        let rows = rows();
        let calls = AtomicUsize::new(0);
        let mut builder = SummaryBuilder::new();
        builder
            .declare(vec!["a".to_string(), "b".to_string()], |_, row| {
                calls.fetch_add(1, Ordering::SeqCst);
                row.set_scalar("a", 1.0);
                row.set_scalar("b", 2.0);
                Ok(())
            })
            .unwrap();
        builder.build(&groups(&rows)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_previous_values_are_reused() {
        let rows = rows();
        let calls = AtomicUsize::new(0);
        let mut builder = SummaryBuilder::new();
        builder
            .declare(vec!["a".to_string()], |_, row| {
                calls.fetch_add(1, Ordering::SeqCst);
                row.set_scalar("a", 7.0);
                Ok(())
            })
            .unwrap();
        let first = builder.build(&groups(&rows)).unwrap();
        let second = builder.build_with(&groups(&rows), Some(&first)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unset_column_is_reported() {
        let rows = rows();
        let mut builder = SummaryBuilder::new();
        builder
            .declare(vec!["a".to_string(), "b".to_string()], |_, row| {
                row.set_scalar("a", 1.0);
                Ok(())
            })
            .unwrap();
        let err = builder.build(&groups(&rows)).unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_duplicate_declarations() {
        let mut builder = SummaryBuilder::new();
        builder.declare(vec!["a".to_string()], |_, _| Ok(())).unwrap();
        let err = builder.declare(vec!["a".to_string()], |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_group_labels() {
        let rows = rows();
        let builder = SummaryBuilder::new();
        let groups = vec![Group::new("x", vec![&rows[0]]), Group::new("x", vec![&rows[1]])];
        assert!(builder.build(&groups).is_err());
    }

    #[test]
    fn test_move_render_columns_back() {
        let mut row = SummaryRow::new("all", 1);
        row.set_plots("v_render-line", Vec::new());
        row.set_scalar("v_avg", 1.0);
        let mut table = SummaryTable {
            columns: vec!["v_render-line".to_string(), "v_avg".to_string()],
            rows: IndexMap::from([("all".to_string(), row)]),
        };
        table.move_render_columns_back();
        assert_eq!(table.columns, vec!["v_avg", "v_render-line"]);
        let keys: Vec<&String> = table.rows["all"].values.keys().collect();
        assert_eq!(keys, vec!["v_avg", "v_render-line"]);
        assert_eq!(table.render_columns().collect::<Vec<_>>(), vec!["v_render-line"]);
    }
}
