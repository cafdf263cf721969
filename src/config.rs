use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AnalysisError, Result};
use crate::parser::{parse_key_combination, KeyCombination};
use crate::RenderOptions;

/// Immutable analysis configuration, built once per analysis call and passed by
/// reference to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Modes to compute. `None` selects every mode the analyzer supports.
    pub selected_modes: Option<Vec<String>>,
    pub show_global: bool,
    pub show_count: bool,
    pub plot_title: Option<String>,

    pub bin_count: usize,
    pub bin_width: Option<f64>,
    pub bar_width_fraction: f64,
    pub common_group_scale: bool,

    pub main_alpha: f64,
    pub secondary_alpha: f64,
    pub main_marker_size: f64,
    pub main_line_width: f64,
    pub secondary_line_width: f64,
    pub semilog_y_min_bound: f64,

    pub x_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,

    /// Key combination for weight-map columns: `histogram` or `histogram<N>col`.
    pub combine_keys: Option<String>,
    pub mass_fraction: Option<f64>,
    pub width_fraction: Option<f64>,
    pub epsilon: f64,

    pub show_std_bar: bool,
    pub show_std_band: bool,
    pub show_individual: bool,
    pub show_h_range_bar: bool,
    pub show_v_range_bar: bool,
    pub show_h_std_bar: bool,
    pub show_v_std_bar: bool,
    pub combine_groups: bool,

    pub progress_report_period_ms: u64,
    pub render: RenderOptions,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            selected_modes: None,
            show_global: true,
            show_count: true,
            plot_title: None,
            bin_count: 50,
            bin_width: None,
            bar_width_fraction: 1.0,
            common_group_scale: true,
            main_alpha: 0.5,
            secondary_alpha: 0.5,
            main_marker_size: 5.0,
            main_line_width: 2.0,
            secondary_line_width: 2.0,
            semilog_y_min_bound: 1e-5,
            x_min: None,
            x_max: None,
            y_min: None,
            y_max: None,
            combine_keys: None,
            mass_fraction: None,
            width_fraction: None,
            epsilon: 1e-4,
            show_std_bar: true,
            show_std_band: false,
            show_individual: true,
            show_h_range_bar: false,
            show_v_range_bar: false,
            show_h_std_bar: false,
            show_v_std_bar: false,
            combine_groups: false,
            progress_report_period_ms: 1000,
            render: RenderOptions::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))
    }

    pub fn with_modes(mut self, modes: &[&str]) -> Self {
        self.selected_modes = Some(modes.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Modes to run, in selection order.
    pub fn resolve_modes(&self, valid_modes: &[&str]) -> Result<Vec<String>> {
        match &self.selected_modes {
            None => Ok(valid_modes.iter().map(|m| m.to_string()).collect()),
            Some(selected) => {
                let mut modes: Vec<String> = Vec::with_capacity(selected.len());
                for mode in selected {
                    if !valid_modes.contains(&mode.as_str()) {
                        return Err(AnalysisError::configuration(format!(
                            "selected mode {:?} not in the list of available modes {:?}",
                            mode, valid_modes
                        )));
                    }
                    if !modes.contains(mode) {
                        modes.push(mode.clone());
                    }
                }
                Ok(modes)
            }
        }
    }

    pub fn key_combination(&self) -> Result<KeyCombination> {
        match &self.combine_keys {
            None => Ok(KeyCombination::None),
            Some(spec) => parse_key_combination(spec),
        }
    }

    pub fn progress_period(&self) -> Duration {
        Duration::from_millis(self.progress_report_period_ms.max(1))
    }

    /// Effective mass and width fractions. Setting both to a value other than 1 is rejected.
    pub fn fractions(&self) -> Result<(f64, f64)> {
        let mass = self.mass_fraction.unwrap_or(1.0);
        let width = self.width_fraction.unwrap_or(1.0);
        for (name, value) in [("mass_fraction", mass), ("width_fraction", width)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(AnalysisError::configuration(format!(
                    "invalid {} {}: must lie in (0, 1]",
                    name, value
                )));
            }
        }
        if mass != 1.0 && width != 1.0 {
            return Err(AnalysisError::configuration(
                "cannot set mass_fraction and width_fraction at the same time",
            ));
        }
        Ok((mass, width))
    }

    /// Check every parameter against the analyzer's valid modes.
    pub fn validate(&self, valid_modes: &[&str]) -> Result<()> {
        self.resolve_modes(valid_modes)?;

        if self.bin_count == 0 {
            return Err(AnalysisError::configuration("bin_count must be positive"));
        }
        if let Some(w) = self.bin_width {
            if !(w.is_finite() && w > 0.0) {
                return Err(AnalysisError::configuration(format!(
                    "bin_width must be a positive number, found {}",
                    w
                )));
            }
        }
        if !(self.bar_width_fraction > 0.0 && self.bar_width_fraction <= 1.0) {
            return Err(AnalysisError::configuration(format!(
                "bar_width_fraction must lie in (0, 1], found {}",
                self.bar_width_fraction
            )));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(AnalysisError::configuration(format!(
                "epsilon must lie in (0, 1), found {}",
                self.epsilon
            )));
        }
        if let (Some(lo), Some(hi)) = (self.x_min, self.x_max) {
            if lo > hi {
                return Err(AnalysisError::configuration(format!(
                    "x_min ({}) is larger than x_max ({})",
                    lo, hi
                )));
            }
        }
        self.fractions()?;
        self.key_combination()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_all_modes() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.resolve_modes(&["histogram"]).unwrap(), vec!["histogram"]);
        assert!(config.validate(&["histogram"]).is_ok());
    }

    #[test]
    fn test_unknown_mode_is_configuration_error() {
        let config = AnalyzerConfig::default().with_modes(&["violin"]);
        let err = config.validate(&["histogram"]).unwrap_err();
        assert!(matches!(err, AnalysisError::Configuration(_)));
        assert!(err.to_string().contains("violin"));
    }

    #[test]
    fn test_zero_bins_rejected() {
        let config = AnalyzerConfig { bin_count: 0, ..Default::default() };
        assert!(matches!(
            config.validate(&["histogram"]),
            Err(AnalysisError::Configuration(_))
        ));
    }

    #[test]
    fn test_fractions_mutually_exclusive() {
        let config = AnalyzerConfig {
            mass_fraction: Some(0.5),
            width_fraction: Some(0.5),
            ..Default::default()
        };
        let err = config.fractions().unwrap_err();
        assert!(err.to_string().contains("same time"));

        let config = AnalyzerConfig {
            mass_fraction: Some(0.5),
            width_fraction: Some(1.0),
            ..Default::default()
        };
        assert_eq!(config.fractions().unwrap(), (0.5, 1.0));
    }

    #[test]
    fn test_fraction_out_of_range() {
        let config = AnalyzerConfig { width_fraction: Some(1.5), ..Default::default() };
        assert!(config.fractions().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"bin_count": 10, "show_global": false, "render": {"type": "svg"}}"#)
                .unwrap();
        assert_eq!(config.bin_count, 10);
        assert!(!config.show_global);
        assert!(config.show_count);
        assert_eq!(config.render.width, 800);
        assert_eq!(config.render.format.extension(), "svg");
    }
}
