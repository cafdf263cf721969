use tracing::info;

use crate::error::{AnalysisError, Result};
use crate::plotdata::PlottableData;
use crate::stats::{self, Description};

/// Absolute-count histogram over a fixed analysis range.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    /// `counts.len() + 1` evenly spaced edges starting at `range.0`. With a
    /// fixed bin width the last edge may lie past `range.1`.
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
    pub range: (f64, f64),
    /// Length of the input, non-finite samples included.
    pub input_len: usize,
}

impl Histogram {
    pub fn bin_count(&self) -> usize {
        self.counts.len()
    }

    pub fn bin_width(&self) -> f64 {
        match (self.edges.first(), self.edges.last()) {
            (Some(first), Some(last)) => (last - first) / self.counts.len() as f64,
            _ => 0.0,
        }
    }

    pub fn counted_mass(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    /// Counts divided by the counted mass. An empty histogram stays all zeros.
    pub fn relative_frequencies(&self) -> Vec<f64> {
        let total = self.counted_mass();
        if total == 0 {
            return vec![0.0; self.counts.len()];
        }
        self.counts.iter().map(|&c| c as f64 / total as f64).collect()
    }
}

/// Upper bound on the number of bins a histogram may allocate.
pub const MAX_BIN_COUNT: usize = 1_000_000;

/// Builds relative-frequency histograms and guards mass conservation.
#[derive(Debug, Clone, Copy)]
pub struct HistogramEngine {
    bin_count: usize,
    bin_width: Option<f64>,
}

impl HistogramEngine {
    pub fn new(bin_count: usize) -> Result<Self> {
        if bin_count == 0 {
            return Err(AnalysisError::configuration("histogram bin count must be positive"));
        }
        Ok(Self {
            bin_count,
            bin_width: None,
        })
    }

    /// Use bins of this width instead of a fixed count.
    pub fn with_bin_width(mut self, bin_width: Option<f64>) -> Result<Self> {
        if let Some(w) = bin_width {
            if !(w.is_finite() && w > 0.0) {
                return Err(AnalysisError::configuration(format!(
                    "histogram bin width must be positive, found {}",
                    w
                )));
            }
        }
        self.bin_width = bin_width;
        Ok(self)
    }

    /// Bin count and width covering `range`.
    fn layout(&self, column: &str, range: (f64, f64)) -> Result<(usize, f64)> {
        let w = match self.bin_width {
            Some(w) => w,
            None => return Ok((self.bin_count, (range.1 - range.0) / self.bin_count as f64)),
        };
        let bins = ((range.1 - range.0) / w).ceil().max(1.0);
        if !bins.is_finite() || bins > MAX_BIN_COUNT as f64 {
            return Err(AnalysisError::configuration(format!(
                "bin width {} over [{}, {}] for {} needs more than {} bins",
                w, range.0, range.1, column, MAX_BIN_COUNT
            )));
        }
        Ok((bins as usize, w))
    }

    /// Count `samples` into bins over `range`.
    ///
    /// Non-finite samples are dropped before binning and a degenerate range
    /// `[v, v]` is widened to `[v, v + 1]`. A fixed bin width is kept as given,
    /// so the last bin may extend past the range. Afterwards the counted mass must
    /// equal the input length unless the input holds non-finite values or the
    /// range is narrower than the finite data; any other discrepancy is a
    /// [`AnalysisError::DataRange`].
    pub fn compute(&self, column: &str, samples: &[f64], range: (f64, f64)) -> Result<Histogram> {
        let (lo, mut hi) = range;
        if !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(AnalysisError::DataRange(format!(
                "invalid analysis range [{}, {}] for {}",
                lo, hi, column
            )));
        }
        if lo == hi {
            hi = lo + 1.0;
        }

        let (bin_count, width) = self.layout(column, (lo, hi))?;
        let edges: Vec<f64> = (0..=bin_count)
            .map(|i| {
                if i == bin_count && self.bin_width.is_none() {
                    hi
                } else {
                    lo + i as f64 * width
                }
            })
            .collect();

        let mut counts = vec![0u64; bin_count];
        for &v in samples.iter().filter(|v| v.is_finite()) {
            if v < lo || v > hi {
                continue;
            }
            let idx = ((v - lo) / width).floor() as usize;
            counts[idx.min(bin_count - 1)] += 1;
        }

        let histogram = Histogram {
            edges,
            counts,
            range: (lo, hi),
            input_len: samples.len(),
        };
        check_mass(column, &stats::describe(samples), &histogram)?;
        Ok(histogram)
    }
}

fn check_mass(column: &str, description: &Description, histogram: &Histogram) -> Result<()> {
    let counted = histogram.counted_mass();
    if counted == histogram.input_len as u64 {
        return Ok(());
    }

    let mut msg = format!(
        "Not all samples are included in the histogram for {} ({} used out of {}).",
        column, counted, histogram.input_len
    );
    let mut justified = false;

    if description.has_non_finite() {
        msg.push_str(" Non-finite values were found in the column and are not included in the analysis.");
        justified = true;
    }
    if description.count > 0 && (histogram.range.0 > description.min || histogram.range.1 < description.max) {
        msg.push_str(" The analysis range is narrower than the data range (plot_min/plot_max or x_min/x_max).");
        justified = true;
    }

    if justified {
        info!("{}", msg);
        Ok(())
    } else {
        Err(AnalysisError::DataRange(msg))
    }
}

/// Display options for [`histogram_plottables`].
#[derive(Debug, Clone)]
pub struct HistogramStyle {
    pub x_label: String,
    pub bar_alpha: f64,
    pub bar_width_fraction: f64,
    pub marker_size: f64,
    pub error_alpha: f64,
    pub error_line_width: f64,
    /// Lower y bound of a logarithmic axis, if one is used.
    pub semilog_y_min: Option<f64>,
}

/// Bar descriptor with relative frequencies plus a horizontal mean ± std error line,
/// vertically centered between the lowest and highest bar.
pub fn histogram_plottables(
    histogram: &Histogram,
    mean: f64,
    std: f64,
    style: &HistogramStyle,
) -> Vec<PlottableData> {
    let y_values = histogram.relative_frequencies();
    let (y_lo, y_hi) = stats::finite_min_max(&y_values).unwrap_or((0.0, 0.0));

    let error_y = match style.semilog_y_min {
        Some(min_y) if min_y > 0.0 => 10f64.powf(0.5 * (min_y.log10() + y_hi.max(min_y).log10())),
        _ => 0.5 * (y_lo + y_hi),
    };

    vec![
        PlottableData::bar(histogram.centers(), y_values)
            .with_x_label(&style.x_label)
            .with_alpha(style.bar_alpha)
            .with_bar_width(style.bar_width_fraction * histogram.bin_width()),
        PlottableData::error_lines(vec![mean], vec![error_y], vec![std], vec![std], false)
            .with_marker_size(style.marker_size)
            .with_alpha(style.error_alpha)
            .with_line_width(style.error_line_width),
    ]
}
