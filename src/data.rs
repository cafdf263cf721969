use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{AnalysisError, Result};

/// Insertion-ordered key -> weight mapping stored in a single cell.
pub type Weights = IndexMap<String, f64>;

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
    Weights(Weights),
    Missing,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_weights(&self) -> Option<&Weights> {
        match self {
            Value::Weights(w) => Some(w),
            _ => None,
        }
    }

    /// Label used when this value is a grouping key. Booleans are stringified.
    pub fn to_label(&self) -> String {
        match self {
            Value::Number(v) if v.fract() == 0.0 && v.is_finite() => format!("{}", *v as i64),
            Value::Number(v) => v.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Text(s) => s.clone(),
            Value::Weights(w) => format!("{:?}", w),
            Value::Missing => String::new(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Text(_) => "text",
            Value::Weights(_) => "weight mapping",
            Value::Missing => "missing value",
        }
    }
}

/// One experiment run. Never mutated once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: Value) -> Self {
        self.cells.insert(column.to_string(), value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(|k| k.as_str())
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Build a table from rows, collecting headers in order of first appearance.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for c in row.columns() {
                if !headers.iter().any(|h| h == c) {
                    headers.push(c.to_string());
                }
            }
        }
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Load a table from a path, dispatching on extension. `-` reads CSV from stdin.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        if path.as_os_str() == "-" {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read table from stdin")?;
            return Self::from_csv_reader(buffer.as_bytes());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                let json: JsonValue = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
                Self::from_json(&json)
            }
            _ => Self::from_csv_reader(content.as_bytes()),
        }
    }

    /// Create a table from a JSON array of objects. Nested objects become weight maps.
    pub fn from_json(value: &JsonValue) -> anyhow::Result<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| anyhow!("Input data must be a JSON array of objects"))?;

        if array.is_empty() {
            return Err(anyhow!("Input data array is empty"));
        }

        let mut rows = Vec::with_capacity(array.len());
        for (idx, item) in array.iter().enumerate() {
            let obj = item
                .as_object()
                .ok_or_else(|| anyhow!("Items in array must be objects (item {})", idx))?;
            let mut row = Row::new();
            for (key, val) in obj {
                let cell = json_to_value(val)
                    .with_context(|| format!("Unsupported value for field '{}' in item {}", key, idx))?;
                row.cells.insert(key.clone(), cell);
            }
            rows.push(row);
        }

        Ok(Self::from_rows(rows))
    }

    /// Create a table from CSV text. Cells holding a JSON object become weight maps.
    pub fn from_csv_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read CSV row {}", idx + 1))?;
            let mut row = Row::new();
            for (header, field) in headers.iter().zip(record.iter()) {
                let cell = parse_csv_cell(field)
                    .with_context(|| format!("Invalid cell in column '{}' at row {}", header, idx + 1))?;
                row.cells.insert(header.clone(), cell);
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(anyhow!("CSV input must contain at least one data row"));
        }

        Ok(Self { headers, rows })
    }
}

fn parse_special_float(s: &str) -> Option<f64> {
    match s.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

fn json_to_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => parse_special_float(s),
        _ => None,
    }
}

fn json_to_value(value: &JsonValue) -> anyhow::Result<Value> {
    Ok(match value {
        JsonValue::Number(n) => Value::Number(
            n.as_f64()
                .ok_or_else(|| anyhow!("Number {} is not representable as f64", n))?,
        ),
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::String(s) => match parse_special_float(s) {
            Some(v) => Value::Number(v),
            None => Value::Text(s.clone()),
        },
        JsonValue::Null => Value::Missing,
        JsonValue::Object(obj) => {
            let mut weights = Weights::with_capacity(obj.len());
            for (k, v) in obj {
                let w = json_to_number(v)
                    .ok_or_else(|| anyhow!("Weight for key '{}' is not numeric", k))?;
                weights.insert(k.clone(), w);
            }
            Value::Weights(weights)
        }
        JsonValue::Array(_) => return Err(anyhow!("Arrays are not supported as cell values")),
    })
}

fn parse_csv_cell(field: &str) -> anyhow::Result<Value> {
    if field.is_empty() {
        return Ok(Value::Missing);
    }
    if let Ok(v) = field.parse::<f64>() {
        return Ok(Value::Number(v));
    }
    if let Some(v) = parse_special_float(field) {
        return Ok(Value::Number(v));
    }
    match field {
        "true" | "True" => return Ok(Value::Bool(true)),
        "false" | "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if field.starts_with('{') {
        let json: JsonValue = serde_json::from_str(field).context("Failed to parse weight mapping")?;
        return json_to_value(&json);
    }
    Ok(Value::Text(field.to_string()))
}

/// Numeric values of `column` over `rows`. Missing cells become NaN so that they are
/// dropped together with the other non-finite samples.
pub fn numeric_values(rows: &[&Row], column: &str) -> Result<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| match row.get(column) {
            Some(Value::Number(v)) => Ok(*v),
            Some(Value::Missing) => Ok(f64::NAN),
            Some(other) => Err(AnalysisError::contract(format!(
                "column '{}' must be numeric, found {} in row {}",
                column,
                other.type_name(),
                idx
            ))),
            None => Err(AnalysisError::contract(format!(
                "column '{}' not found in row {}",
                column, idx
            ))),
        })
        .collect()
}

/// Weight maps of `column` over `rows`. Any other cell type breaks the
/// `has_dict_values` contract.
pub fn weight_values<'r>(rows: &[&'r Row], column: &str) -> Result<Vec<&'r Weights>> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| match row.get(column) {
            Some(Value::Weights(w)) => Ok(w),
            Some(other) => Err(AnalysisError::contract(format!(
                "column '{}' has_dict_values but row {} holds a {}",
                column,
                idx,
                other.type_name()
            ))),
            None => Err(AnalysisError::contract(format!(
                "column '{}' not found in row {}",
                column, idx
            ))),
        })
        .collect()
}

/// Parse the keys of a weight map as numbers.
pub fn numeric_entries(weights: &Weights) -> Result<Vec<(f64, f64)>> {
    weights
        .iter()
        .map(|(k, w)| {
            k.trim()
                .parse::<f64>()
                .map(|key| (key, *w))
                .map_err(|_| AnalysisError::contract(format!("weight key '{}' is not numeric", k)))
        })
        .collect()
}
