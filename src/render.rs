use anyhow::{Context, Result};
use image::ImageEncoder;
use plotters::chart::SeriesAnno;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::fs;
use std::ops::Range;

use crate::dispatch::{RenderJob, Renderer};
use crate::palette;
use crate::plotdata::{merge_ranges, PlotKind, PlottableData};
use crate::OutputFormat;

type Chart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

/// Lower y limit of a logarithmic panel without positive data.
const SEMILOG_FALLBACK_MIN: f64 = 1e-5;

/// Draws jobs with plotters: one stacked panel per group, or a single shared
/// panel when groups are combined.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlottersRenderer;

impl Renderer for PlottersRenderer {
    fn render(&self, job: &RenderJob) -> Result<()> {
        if let Some(parent) = job.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }

        let (width, height) = canvas_size(job.options.width, job.options.height, panel_count(job))?;
        let bytes = match job.options.format {
            OutputFormat::Png => render_png(job, width, height)?,
            OutputFormat::Svg => render_svg(job, width, height)?.into_bytes(),
        };
        fs::write(&job.output_path, bytes)
            .with_context(|| format!("Failed to write {}", job.output_path.display()))
    }
}

/// Number of stacked panels in the artifact.
pub fn panel_count(job: &RenderJob) -> usize {
    if job.combine_groups {
        1
    } else {
        job.plots_by_group.len().max(1)
    }
}

/// Canvas of `panels` stacked panels of `panel_height` each.
fn canvas_size(width: u32, panel_height: u32, panels: usize) -> Result<(u32, u32)> {
    let height = (panel_height as usize)
        .checked_mul(panels)
        .and_then(|h| u32::try_from(h).ok())
        .with_context(|| format!("Canvas of {} panels of height {} is too large", panels, panel_height))?;
    Ok((width, height))
}

/// Byte length of an RGB buffer.
fn rgb_buffer_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .with_context(|| format!("Canvas {}x{} is too large", width, height))
}

fn render_png(job: &RenderJob, width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; rgb_buffer_len(width, height)?];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        draw_job(&root, job)?;
        root.present().context("Failed to present drawing")?;
    }

    let mut png_bytes = Vec::new();
    {
        let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
        encoder
            .write_image(&buffer, width, height, image::ColorType::Rgb8)
            .context("Failed to encode PNG")?;
    }
    Ok(png_bytes)
}

fn render_svg(job: &RenderJob, width: u32, height: u32) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
        draw_job(&root, job)?;
        root.present().context("Failed to present drawing")?;
    }
    Ok(svg)
}

fn draw_job<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, job: &RenderJob) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).context("Failed to fill background")?;
    let area = match &job.title {
        Some(title) => root.titled(title, ("sans-serif", 20)).context("Failed to draw title")?,
        None => root.clone(),
    };

    if panel_count(job) == 1 {
        let plots: Vec<&PlottableData> = job.plots_by_group.values().flatten().collect();
        let caption = match job.plots_by_group.keys().next() {
            Some(group) if !job.combine_groups => job.group_label(group),
            _ => "",
        };
        return draw_panel(&area, job, caption, &plots);
    }

    let panels = area.split_evenly((job.plots_by_group.len(), 1));
    for (panel, (group, plots)) in panels.iter().zip(&job.plots_by_group) {
        let plots: Vec<&PlottableData> = plots.iter().collect();
        draw_panel(panel, job, job.group_label(group), &plots)?;
    }
    Ok(())
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    job: &RenderJob,
    caption: &str,
    plots: &[&PlottableData],
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let x_range = axis_range(job.x_bounds.or_else(|| merge_ranges(plots.iter().map(|p| p.x_range()))));
    let y_bounds = job.y_bounds.or_else(|| merge_ranges(plots.iter().map(|p| p.y_range())));
    let y_range = if job.semilog_y {
        axis_range(y_bounds.map(|(lo, hi)| {
            let lo = if lo > 0.0 { lo } else { smallest_positive_y(plots) };
            (lo.log10(), hi.max(lo).log10())
        }))
    } else {
        axis_range(y_bounds)
    };
    let y_floor = y_range.start;

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(caption, ("sans-serif", 16))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)
        .context("Failed to build chart")?;

    let x_formatter = |x: &f64| match &job.x_ticks {
        Some(ticks) => tick_label(ticks, *x),
        None => format_number(*x),
    };
    let y_formatter = |y: &f64| {
        if job.semilog_y {
            format!("{:.0e}", 10f64.powf(*y))
        } else {
            format_number(*y)
        }
    };
    {
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(job.x_label.as_str())
            .x_label_formatter(&x_formatter)
            .y_label_formatter(&y_formatter);
        if let Some(y_label) = &job.y_label {
            mesh.y_desc(y_label.as_str());
        }
        if let Some(ticks) = &job.x_ticks {
            mesh.x_labels(ticks.len().max(1));
        }
        mesh.draw().context("Failed to draw mesh")?;
    }

    let mut has_legend = false;
    for pld in plots {
        has_legend |= draw_plottable(&mut chart, pld, job.semilog_y, y_floor)?;
    }
    if has_legend {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .context("Failed to draw legend")?;
    }
    Ok(())
}

/// Draw one descriptor. Returns whether it added a legend entry.
fn draw_plottable<DB: DrawingBackend>(
    chart: &mut Chart<'_, DB>,
    pld: &PlottableData,
    semilog_y: bool,
    y_floor: f64,
) -> Result<bool>
where
    DB::ErrorType: 'static,
{
    let color = parse_color(pld.style.color.as_deref());
    let style = color.mix(pld.style.alpha.unwrap_or(1.0));
    let line_width = pld.style.line_width.unwrap_or(1.0).max(0.0).round() as u32;
    let marker_size = pld.style.marker_size.unwrap_or(3.0).max(1.0).round() as i32;
    let to_y = |v: f64| axis_y(v, semilog_y, y_floor);
    let points: Vec<(f64, f64)> = pld
        .x_values
        .iter()
        .zip(&pld.y_values)
        .map(|(&x, &y)| (x, to_y(y)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();

    let anno = match &pld.kind {
        PlotKind::Bar { width } => {
            let w = width.unwrap_or_else(|| default_bar_width(&pld.x_values));
            chart
                .draw_series(points.iter().map(|&(x, top)| {
                    Rectangle::new([(x - w / 2.0, y_floor.max(to_y(0.0))), (x + w / 2.0, top)], style.filled())
                }))
                .context("Failed to draw bars")?
        }
        PlotKind::Line => {
            if let Some(marker) = &pld.style.marker {
                draw_markers(chart, &points, marker, marker_size, style)?;
            }
            chart
                .draw_series(LineSeries::new(points, style.stroke_width(line_width.max(1))))
                .context("Failed to draw line series")?
        }
        PlotKind::Step => chart
            .draw_series(LineSeries::new(step_points(&points), style.stroke_width(line_width.max(1))))
            .context("Failed to draw step series")?,
        PlotKind::Scatter => {
            let marker = pld.style.marker.as_deref().unwrap_or("circle");
            draw_markers(chart, &points, marker, marker_size, style)?
        }
        PlotKind::ErrorLines {
            err_neg,
            err_pos,
            vertical,
            cap_size,
        } => {
            let bar_style = style.stroke_width(line_width.max(1));
            let cap = cap_size.max(0.0).round() as u32;
            let mut v_bars = Vec::new();
            let mut h_bars = Vec::new();
            let mut centers = Vec::new();
            for i in 0..pld.len() {
                let (x, y, neg, pos) = (pld.x_values[i], pld.y_values[i], err_neg[i], err_pos[i]);
                if !(x.is_finite() && y.is_finite() && neg.is_finite() && pos.is_finite()) {
                    continue;
                }
                if *vertical {
                    v_bars.push(ErrorBar::new_vertical(x, to_y(y - neg), to_y(y), to_y(y + pos), bar_style, cap));
                } else {
                    h_bars.push(ErrorBar::new_horizontal(to_y(y), x - neg, x, x + pos, bar_style, cap));
                }
                centers.push((x, to_y(y)));
            }
            if *vertical {
                chart.draw_series(v_bars).context("Failed to draw error bars")?
            } else {
                if pld.style.marker_size.is_some() {
                    draw_markers(chart, &centers, "circle", marker_size, style)?;
                }
                chart.draw_series(h_bars).context("Failed to draw error bars")?
            }
        }
        PlotKind::HorizontalBand {
            pos_height,
            neg_height,
            add_x_margin,
        } => {
            let upper: Vec<f64> = pld.y_values.iter().zip(pos_height).map(|(y, p)| to_y(y + p)).collect();
            let lower: Vec<f64> = pld.y_values.iter().zip(neg_height).map(|(y, n)| to_y(y - n)).collect();
            let polygon = band_polygon(&pld.x_values, &upper, &lower, *add_x_margin);
            chart
                .draw_series(std::iter::once(Polygon::new(polygon, style.filled())))
                .context("Failed to draw band")?
        }
    };

    match &pld.style.label {
        Some(label) => {
            anno.label(label.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 4), (x + 16, y + 4)], color.filled()));
            Ok(true)
        }
        None => Ok(false),
    }
}

fn draw_markers<'c, 'a, DB: DrawingBackend>(
    chart: &'c mut Chart<'a, DB>,
    points: &[(f64, f64)],
    marker: &str,
    size: i32,
    style: RGBAColor,
) -> Result<&'c mut SeriesAnno<'a, DB>>
where
    DB::ErrorType: 'static,
{
    let anno = match marker {
        "cross" | "plus" => chart.draw_series(points.iter().map(|&p| Cross::new(p, size, style.stroke_width(1)))),
        "triangle" => chart.draw_series(points.iter().map(|&p| TriangleMarker::new(p, size, style.filled()))),
        "square" | "diamond" => chart.draw_series(
            points
                .iter()
                .map(|&p| EmptyElement::at(p) + Rectangle::new([(-size, -size), (size, size)], style.filled())),
        ),
        _ => chart.draw_series(points.iter().map(|&p| Circle::new(p, size, style.filled()))),
    };
    anno.context("Failed to draw markers")
}

fn axis_y(v: f64, semilog_y: bool, floor: f64) -> f64 {
    if !semilog_y {
        v
    } else if v > 0.0 {
        v.log10()
    } else {
        floor
    }
}

fn smallest_positive_y(plots: &[&PlottableData]) -> f64 {
    plots
        .iter()
        .flat_map(|p| p.y_values.iter().copied())
        .filter(|y| y.is_finite() && *y > 0.0)
        .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.min(y))))
        .unwrap_or(SEMILOG_FALLBACK_MIN)
}

/// Drawable range for optional bounds. A point or missing range still gets a
/// non-empty axis.
pub fn axis_range(bounds: Option<(f64, f64)>) -> Range<f64> {
    match bounds {
        Some((lo, hi)) if lo.is_finite() && hi.is_finite() && lo < hi => lo..hi,
        Some((v, _)) if v.is_finite() => (v - 1.0)..(v + 1.0),
        _ => 0.0..1.0,
    }
}

/// Smallest spacing between consecutive x values, 0.8 for a single bar.
fn default_bar_width(x_values: &[f64]) -> f64 {
    x_values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .filter(|d| *d > 0.0)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))))
        .unwrap_or(0.8)
}

/// Staircase through `points`: each value holds until the next x.
pub fn step_points(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(points.len() * 2);
    for (i, &(x, y)) in points.iter().enumerate() {
        out.push((x, y));
        if let Some(&(next_x, _)) = points.get(i + 1) {
            out.push((next_x, y));
        }
    }
    out
}

/// Closed outline of a band: the upper edge left to right, then the lower edge back.
pub fn band_polygon(x_values: &[f64], upper: &[f64], lower: &[f64], add_x_margin: bool) -> Vec<(f64, f64)> {
    let mut top: Vec<(f64, f64)> = Vec::new();
    let mut bottom: Vec<(f64, f64)> = Vec::new();
    for ((&x, &u), &l) in x_values.iter().zip(upper).zip(lower) {
        if x.is_finite() && u.is_finite() && l.is_finite() {
            top.push((x, u));
            bottom.push((x, l));
        }
    }
    if add_x_margin {
        if let (Some(&first_top), Some(&first_bottom)) = (top.first(), bottom.first()) {
            top.insert(0, (first_top.0 - 0.5, first_top.1));
            bottom.insert(0, (first_bottom.0 - 0.5, first_bottom.1));
        }
        if let (Some(&last_top), Some(&last_bottom)) = (top.last(), bottom.last()) {
            top.push((last_top.0 + 0.5, last_top.1));
            bottom.push((last_bottom.0 + 0.5, last_bottom.1));
        }
    }
    top.extend(bottom.into_iter().rev());
    top
}

/// Label of the tick closest to `x`, empty when none is near.
pub fn tick_label(ticks: &[(f64, String)], x: f64) -> String {
    ticks
        .iter()
        .filter(|(t, _)| (t - x).abs() < 0.25)
        .min_by(|a, b| (a.0 - x).abs().total_cmp(&(b.0 - x).abs()))
        .map(|(_, label)| label.clone())
        .unwrap_or_default()
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else if v.abs() < 0.01 {
        format!("{:.1e}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// Parse `#rrggbb` or a basic color name.
fn parse_color(color: Option<&str>) -> RGBColor {
    if let Some((r, g, b)) = color.and_then(palette::hex_to_rgb) {
        return RGBColor(r, g, b);
    }
    match color {
        Some("red") => RED,
        Some("green") => GREEN,
        Some("blue") => BLUE,
        Some("black") => BLACK,
        Some("yellow") => YELLOW,
        Some("cyan") => CYAN,
        Some("magenta") => MAGENTA,
        Some("white") => WHITE,
        _ => BLUE,
    }
}
