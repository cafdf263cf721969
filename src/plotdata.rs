use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::palette;

/// Shape-specific payload of a plot descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlotKind {
    Bar {
        width: Option<f64>,
    },
    Line,
    Scatter,
    Step,
    ErrorLines {
        err_neg: Vec<f64>,
        err_pos: Vec<f64>,
        vertical: bool,
        cap_size: f64,
    },
    HorizontalBand {
        pos_height: Vec<f64>,
        neg_height: Vec<f64>,
        add_x_margin: bool,
    },
}

/// Optional style fields. Unset fields take the renderer's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotStyle {
    pub alpha: Option<f64>,
    pub color: Option<String>,
    pub label: Option<String>,
    pub marker: Option<String>,
    pub marker_size: Option<f64>,
    pub line_width: Option<f64>,
}

/// Renderer-agnostic plot shape: parallel x/y arrays plus style.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlottableData {
    pub kind: PlotKind,
    pub x_values: Vec<f64>,
    pub y_values: Vec<f64>,
    pub x_label: Option<String>,
    pub style: PlotStyle,
}

impl PlottableData {
    fn new(kind: PlotKind, x_values: Vec<f64>, y_values: Vec<f64>) -> Self {
        Self {
            kind,
            x_values,
            y_values,
            x_label: None,
            style: PlotStyle::default(),
        }
    }

    pub fn bar(x_values: Vec<f64>, y_values: Vec<f64>) -> Self {
        Self::new(PlotKind::Bar { width: None }, x_values, y_values)
    }

    pub fn line(x_values: Vec<f64>, y_values: Vec<f64>) -> Self {
        Self::new(PlotKind::Line, x_values, y_values)
    }

    pub fn scatter(x_values: Vec<f64>, y_values: Vec<f64>) -> Self {
        Self::new(PlotKind::Scatter, x_values, y_values)
    }

    pub fn step(x_values: Vec<f64>, y_values: Vec<f64>) -> Self {
        Self::new(PlotKind::Step, x_values, y_values)
    }

    pub fn error_lines(
        x_values: Vec<f64>,
        y_values: Vec<f64>,
        err_neg: Vec<f64>,
        err_pos: Vec<f64>,
        vertical: bool,
    ) -> Self {
        Self::new(
            PlotKind::ErrorLines {
                err_neg,
                err_pos,
                vertical,
                cap_size: 3.0,
            },
            x_values,
            y_values,
        )
    }

    pub fn horizontal_band(
        x_values: Vec<f64>,
        y_values: Vec<f64>,
        pos_height: Vec<f64>,
        neg_height: Vec<f64>,
        add_x_margin: bool,
    ) -> Self {
        Self::new(
            PlotKind::HorizontalBand {
                pos_height,
                neg_height,
                add_x_margin,
            },
            x_values,
            y_values,
        )
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.style.alpha = Some(alpha);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.style.label = Some(label.to_string());
        self
    }

    pub fn with_marker(mut self, marker: String) -> Self {
        self.style.marker = Some(marker);
        self
    }

    pub fn with_marker_size(mut self, size: f64) -> Self {
        self.style.marker_size = Some(size);
        self
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.style.line_width = Some(width);
        self
    }

    pub fn with_x_label(mut self, label: &str) -> Self {
        self.x_label = Some(label.to_string());
        self
    }

    /// Bar width in x units. Ignored by other kinds.
    pub fn with_bar_width(mut self, bar_width: f64) -> Self {
        if let PlotKind::Bar { width } = &mut self.kind {
            *width = Some(bar_width);
        }
        self
    }

    /// Error bar cap size. Ignored by other kinds.
    pub fn with_cap_size(mut self, size: f64) -> Self {
        if let PlotKind::ErrorLines { cap_size, .. } = &mut self.kind {
            *cap_size = size;
        }
        self
    }

    pub fn is_bar(&self) -> bool {
        matches!(self.kind, PlotKind::Bar { .. })
    }

    pub fn is_line(&self) -> bool {
        matches!(self.kind, PlotKind::Line)
    }

    pub fn len(&self) -> usize {
        self.x_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_values.is_empty()
    }

    /// Check that every coordinate array has the same length.
    pub fn validate(&self) -> Result<()> {
        let n = self.x_values.len();
        let mut lengths = vec![("y_values", self.y_values.len())];
        match &self.kind {
            PlotKind::ErrorLines { err_neg, err_pos, .. } => {
                lengths.push(("err_neg", err_neg.len()));
                lengths.push(("err_pos", err_pos.len()));
            }
            PlotKind::HorizontalBand { pos_height, neg_height, .. } => {
                lengths.push(("pos_height", pos_height.len()));
                lengths.push(("neg_height", neg_height.len()));
            }
            _ => {}
        }
        for (name, len) in lengths {
            if len != n {
                return Err(AnalysisError::contract(format!(
                    "plot descriptor has {} x values but {} {}",
                    n, len, name
                )));
            }
        }
        Ok(())
    }

    /// Finite x extent.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        let spans: Vec<(f64, f64)> = match &self.kind {
            PlotKind::ErrorLines { err_neg, err_pos, vertical: false, .. } => self
                .x_values
                .iter()
                .zip(err_neg.iter().zip(err_pos))
                .map(|(x, (n, p))| (x - n, x + p))
                .collect(),
            _ => self.x_values.iter().map(|&x| (x, x)).collect(),
        };
        finite_extent(spans)
    }

    /// Finite y extent, including error bars and bands.
    pub fn y_range(&self) -> Option<(f64, f64)> {
        let spans: Vec<(f64, f64)> = match &self.kind {
            PlotKind::ErrorLines { err_neg, err_pos, vertical: true, .. } => self
                .y_values
                .iter()
                .zip(err_neg.iter().zip(err_pos))
                .map(|(y, (n, p))| (y - n, y + p))
                .collect(),
            PlotKind::HorizontalBand { pos_height, neg_height, .. } => self
                .y_values
                .iter()
                .zip(neg_height.iter().zip(pos_height))
                .map(|(y, (n, p))| (y - n, y + p))
                .collect(),
            _ => self.y_values.iter().map(|&y| (y, y)).collect(),
        };
        finite_extent(spans)
    }
}

fn finite_extent(spans: Vec<(f64, f64)>) -> Option<(f64, f64)> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (a, b) in spans {
        if a.is_finite() {
            lo = lo.min(a);
        }
        if b.is_finite() {
            hi = hi.max(b);
        }
    }
    if lo.is_finite() && hi.is_finite() {
        Some((lo, hi))
    } else {
        None
    }
}

/// Union of the extents of all descriptors.
pub fn merge_ranges<I>(ranges: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = Option<(f64, f64)>>,
{
    ranges
        .into_iter()
        .flatten()
        .fold(None, |acc, (lo, hi)| match acc {
            None => Some((lo, hi)),
            Some((a, b)) => Some((a.min(lo), b.max(hi))),
        })
}

/// Late styling pass, run once before dispatch: every descriptor of a group gets
/// that group's color, and labels are dropped except on line descriptors when
/// groups share one panel.
pub fn assign_group_styles(plots_by_group: &mut IndexMap<String, Vec<PlottableData>>, combine_groups: bool) {
    let mut names: Vec<String> = plots_by_group.keys().cloned().collect();
    names.sort();
    for (group, plots) in plots_by_group.iter_mut() {
        let index = names.iter().position(|n| n == group).unwrap_or(0);
        let color = palette::color_for(index);
        for pld in plots.iter_mut() {
            pld.style.color = Some(color.clone());
            if !combine_groups || !pld.is_line() {
                pld.style.label = None;
            }
        }
    }
}
