use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::dispatch::RenderJob;
use crate::plotdata::PlottableData;
use crate::summary::{Cell, SummaryTable};

/// Records of the summary report.
///
/// The first block has one field per group and one record per scalar column.
/// Every keyed plot (weight-map keys or key bins) adds a block with one field
/// per key and one record per group, holding the group's line values.
pub fn report_records(summary: &SummaryTable, jobs: &[RenderJob]) -> Vec<Vec<String>> {
    let mut records = Vec::new();

    let mut header = vec!["column".to_string()];
    header.extend(summary.group_labels().map(str::to_string));
    records.push(header);
    for column in summary.columns.iter().filter(|c| summary.render_columns().all(|r| r != c.as_str())) {
        let mut record = vec![column.clone()];
        record.extend(summary.rows.values().map(|row| match row.get(column) {
            Some(Cell::Scalar(v)) => format_value(*v),
            _ => String::new(),
        }));
        records.push(record);
    }

    for job in jobs {
        let ticks = match &job.x_ticks {
            Some(ticks) => ticks,
            None => continue,
        };
        let mut header = vec![job.target.clone()];
        header.extend(ticks.iter().map(|(_, label)| label.clone()));
        records.push(header);

        for (group, plots) in &job.plots_by_group {
            let line = match plots.iter().find(|p| p.is_line()) {
                Some(line) => line,
                None => continue,
            };
            let mut record = vec![group.clone()];
            record.extend(ticks.iter().map(|(x, _)| value_at(line, *x)));
            records.push(record);
        }
    }
    records
}

fn value_at(line: &PlottableData, x: f64) -> String {
    line.x_values
        .iter()
        .position(|v| (v - x).abs() < 1e-9)
        .map(|i| format_value(line.y_values[i]))
        .unwrap_or_default()
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Write [`report_records`] as CSV. Blocks have different widths.
pub fn write_report<W: Write>(writer: W, summary: &SummaryTable, jobs: &[RenderJob]) -> Result<()> {
    let mut csv_writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    for record in report_records(summary, jobs) {
        csv_writer.write_record(&record).context("Failed to write report record")?;
    }
    csv_writer.flush().context("Failed to flush report")?;
    Ok(())
}

pub fn write_report_file(path: &Path, summary: &SummaryTable, jobs: &[RenderJob]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    write_report(file, summary, jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalysisRequest, Analyzer, ScalarDictAnalyzer, Target};
    use crate::config::AnalyzerConfig;
    use crate::data::{Row, Table, Value};
    use crate::partition::GroupBy;
    use crate::properties::ColumnPropertiesMap;

    fn summarize() -> (SummaryTable, Vec<RenderJob>) {
        let cell = |pairs: &[(&str, f64)]| Value::Weights(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect());
        let table = Table::from_rows(vec![
            Row::new().with("g", Value::Text("x".into())).with("h", cell(&[("1", 2.0), ("2", 4.0)])),
            Row::new().with("g", Value::Text("y".into())).with("h", cell(&[("1", 6.0)])),
        ]);
        let analyzer = ScalarDictAnalyzer::new(AnalyzerConfig::default(), ColumnPropertiesMap::new()).unwrap();
        let request = AnalysisRequest::new(vec![Target::column("h")]).with_group_by(GroupBy::column("g"));
        analyzer.summarize(&table, &request).unwrap()
    }

    #[test]
    fn test_report_blocks() {
        let (summary, jobs) = summarize();
        let records = report_records(&summary, &jobs);
        assert_eq!(records[0], vec!["column", "x", "y", "all"]);
        assert_eq!(records[1][0], "h_min");
        assert_eq!(records.len(), 1 + 5 + 1 + 3);
        assert_eq!(records[6], vec!["h", "1", "2"]);
        assert_eq!(records[7], vec!["x", "2", "4"]);
        assert_eq!(records[8], vec!["y", "6", ""]);
        assert_eq!(records[9], vec!["all", "4", "4"]);
    }

    #[test]
    fn test_write_report_is_flexible() {
        let (summary, jobs) = summarize();
        let mut out = Vec::new();
        write_report(&mut out, &summary, &jobs).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "column,x,y,all");
        assert_eq!(lines[6], "h,1,2");
    }
}
