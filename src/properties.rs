use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

/// Per-column display and analysis metadata supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub plot_min: Option<f64>,
    #[serde(default)]
    pub plot_max: Option<f64>,
    #[serde(default)]
    pub has_dict_values: bool,
    #[serde(default)]
    pub semilog_y: bool,
    #[serde(default)]
    pub hist_bin_width: Option<f64>,
}

impl ColumnProperties {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_bounds(mut self, plot_min: Option<f64>, plot_max: Option<f64>) -> Self {
        self.plot_min = plot_min;
        self.plot_max = plot_max;
        self
    }

    pub fn with_dict_values(mut self) -> Self {
        self.has_dict_values = true;
        self
    }

    /// Display label, falling back to the cleaned column name.
    pub fn display_label(&self) -> String {
        match &self.label {
            Some(l) if !l.is_empty() => l.clone(),
            _ => clean_column_name(&self.name),
        }
    }
}

/// Column name -> properties. Lookups of unknown columns yield defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnPropertiesMap {
    entries: HashMap<String, ColumnProperties>,
}

impl ColumnPropertiesMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, properties: ColumnProperties) {
        self.entries.insert(properties.name.clone(), properties);
    }

    pub fn with(mut self, properties: ColumnProperties) -> Self {
        self.insert(properties);
        self
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&ColumnProperties> {
        self.entries.get(column)
    }

    pub fn get_or_default(&self, column: &str) -> ColumnProperties {
        self.entries
            .get(column)
            .cloned()
            .unwrap_or_else(|| ColumnProperties::new(column))
    }

    pub fn label(&self, column: &str) -> String {
        self.get_or_default(column).display_label()
    }

    /// Load a JSON object keyed by column name.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read column properties {}", path.display()))?;
        let mut map: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse column properties {}", path.display()))?;
        for (name, props) in map.entries.iter_mut() {
            if props.name.is_empty() {
                props.name = name.clone();
            }
        }
        Ok(map)
    }
}

/// Version of a column name more suitable for display.
pub fn clean_column_name(column_name: &str) -> String {
    column_name.replace('_', " ").trim().to_string()
}

/// Guess x and y labels from a column name: `a_to_b` yields ("a", Some("b")).
pub fn column_name_to_labels(column_name: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = column_name.split("_to_").collect();
    if parts.len() == 2 {
        (clean_column_name(parts[0]), Some(clean_column_name(parts[1])))
    } else {
        (clean_column_name(column_name), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label_from_name() {
        let map = ColumnPropertiesMap::new();
        assert_eq!(map.label("compression_ratio"), "compression ratio");
        assert!(!map.get_or_default("x").has_dict_values);
    }

    #[test]
    fn test_explicit_label_wins() {
        let map = ColumnPropertiesMap::new().with(ColumnProperties::new("bpppc").with_label("Bits per sample"));
        assert_eq!(map.label("bpppc"), "Bits per sample");
    }

    #[test]
    fn test_column_name_to_labels() {
        assert_eq!(
            column_name_to_labels("symbol_to_count"),
            ("symbol".to_string(), Some("count".to_string()))
        );
        assert_eq!(column_name_to_labels("_ratio_"), ("ratio".to_string(), None));
    }

    #[test]
    fn test_deserialize_map_fills_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.json");
        std::fs::write(&path, r#"{"hist": {"has_dict_values": true, "plot_min": 0}}"#).unwrap();
        let map = ColumnPropertiesMap::from_json_file(&path).unwrap();
        let props = map.get("hist").unwrap();
        assert_eq!(props.name, "hist");
        assert!(props.has_dict_values);
        assert_eq!(props.plot_min, Some(0.0));
    }
}
