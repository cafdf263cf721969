use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::data::{Row, Value};
use crate::error::{AnalysisError, Result};

/// Label of the synthetic group holding every row.
pub const GLOBAL_GROUP: &str = "all";

/// Column holding the task identity when grouping by families.
pub const DEFAULT_TASK_COLUMN: &str = "task_name";

/// A labelled subset of the input rows, in input order.
#[derive(Debug, Clone)]
pub struct Group<'t> {
    pub label: String,
    pub rows: Vec<&'t Row>,
}

impl<'t> Group<'t> {
    pub fn new(label: impl Into<String>, rows: Vec<&'t Row>) -> Self {
        Self {
            label: label.into(),
            rows,
        }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_global(&self) -> bool {
        self.label == GLOBAL_GROUP
    }
}

/// An ordered list of task names shown under one label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFamily {
    pub label: String,
    #[serde(default)]
    pub task_names: Vec<String>,
    /// Display names for individual tasks.
    #[serde(default)]
    pub name_to_label: IndexMap<String, String>,
}

impl TaskFamily {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_tasks<S: AsRef<str>>(label: impl Into<String>, task_names: &[S]) -> Result<Self> {
        let mut family = Self::new(label);
        for name in task_names {
            family.add_task(name.as_ref(), None)?;
        }
        Ok(family)
    }

    /// Append a task. A name can be added once only.
    pub fn add_task(&mut self, task_name: &str, task_label: Option<&str>) -> Result<()> {
        if self.contains(task_name) {
            return Err(AnalysisError::configuration(format!(
                "task {:?} is already part of family {:?}",
                task_name, self.label
            )));
        }
        self.task_names.push(task_name.to_string());
        if let Some(label) = task_label {
            self.name_to_label.insert(task_name.to_string(), label.to_string());
        }
        Ok(())
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.task_names.iter().any(|t| t == task_name)
    }

    pub fn task_label<'s>(&'s self, task_name: &'s str) -> &'s str {
        self.name_to_label
            .get(task_name)
            .map(|s| s.as_str())
            .unwrap_or(task_name)
    }

    fn check_unique(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for name in &self.task_names {
            if !seen.insert(name.as_str()) {
                return Err(AnalysisError::configuration(format!(
                    "task {:?} appears twice in family {:?}",
                    name, self.label
                )));
            }
        }
        Ok(())
    }

    /// Load a JSON array of families.
    pub fn load_families(path: &Path) -> anyhow::Result<Vec<TaskFamily>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read families {}", path.display()))?;
        let families: Vec<TaskFamily> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse families {}", path.display()))?;
        for family in &families {
            family.check_unique()?;
        }
        Ok(families)
    }
}

/// How rows are split into groups.
#[derive(Debug, Clone, Default)]
pub enum GroupBy {
    /// Only the global group.
    #[default]
    None,
    /// One group per distinct value of a column.
    Column(String),
    /// One group per family, matching each row's task column against the family's tasks.
    Families {
        families: Vec<TaskFamily>,
        task_column: String,
    },
}

impl GroupBy {
    pub fn column(name: &str) -> Self {
        GroupBy::Column(name.to_string())
    }

    pub fn families(families: Vec<TaskFamily>) -> Self {
        GroupBy::Families {
            families,
            task_column: DEFAULT_TASK_COLUMN.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GroupBy::None)
    }

    /// Name used in output file names.
    pub fn suffix(&self) -> Option<&str> {
        match self {
            GroupBy::None => None,
            GroupBy::Column(c) => Some(c),
            GroupBy::Families { .. } => Some("family"),
        }
    }
}

/// Split `rows` into groups.
///
/// The global group is added when `show_global` is set or no grouping is
/// requested. Groups follow `order` when given (unlisted labels are appended
/// alphabetically); otherwise family order for families and case-insensitive
/// alphabetical order for column values. The global group comes last unless
/// `order` names it.
pub fn partition<'t>(
    rows: &'t [Row],
    group_by: &GroupBy,
    show_global: bool,
    order: Option<&[String]>,
) -> Result<Vec<Group<'t>>> {
    let mut groups: IndexMap<String, Vec<&'t Row>> = IndexMap::new();

    match group_by {
        GroupBy::None => {}
        GroupBy::Column(column) => {
            for (idx, row) in rows.iter().enumerate() {
                match row.get(column) {
                    None => {
                        return Err(AnalysisError::contract(format!(
                            "group-by column '{}' not found in row {}",
                            column, idx
                        )))
                    }
                    Some(Value::Missing) => {
                        debug!("row {} has no value for '{}', kept in '{}' only", idx, column, GLOBAL_GROUP)
                    }
                    Some(value) => groups.entry(value.to_label()).or_default().push(row),
                }
            }
            groups.sort_by(|a, _, b, _| a.to_lowercase().cmp(&b.to_lowercase()));
        }
        GroupBy::Families { families, task_column } => {
            for family in families {
                if groups.insert(family.label.clone(), Vec::new()).is_some() {
                    return Err(AnalysisError::configuration(format!(
                        "family label {:?} is used by more than one family",
                        family.label
                    )));
                }
            }
            for (idx, row) in rows.iter().enumerate() {
                let task = row
                    .get(task_column)
                    .ok_or_else(|| {
                        AnalysisError::contract(format!("task column '{}' not found in row {}", task_column, idx))
                    })?
                    .to_label();
                let family = families.iter().find(|f| f.contains(&task)).ok_or_else(|| {
                    AnalysisError::contract(format!("task name {:?} not found in any family", task))
                })?;
                groups.entry(family.label.clone()).or_default().push(row);
            }
        }
    }

    if show_global || group_by.is_none() {
        if groups.contains_key(GLOBAL_GROUP) {
            return Err(AnalysisError::configuration(format!(
                "group label {:?} collides with the global group; disable show_global",
                GLOBAL_GROUP
            )));
        }
        groups.insert(GLOBAL_GROUP.to_string(), rows.iter().collect());
    }

    if let Some(order) = order {
        let mut ordered: IndexMap<String, Vec<&'t Row>> = IndexMap::with_capacity(groups.len());
        for label in order {
            if let Some(rows) = groups.swap_remove(label) {
                ordered.insert(label.clone(), rows);
            }
        }
        let mut rest: Vec<String> = groups.keys().cloned().collect();
        rest.sort_by_key(|l| (l == GLOBAL_GROUP, l.to_lowercase()));
        for label in rest {
            if let Some(rows) = groups.swap_remove(&label) {
                ordered.insert(label, rows);
            }
        }
        groups = ordered;
    }

    Ok(groups
        .into_iter()
        .map(|(label, rows)| Group::new(label, rows))
        .collect())
}
