use std::ops::Range;

use common::{config::Settings, results::ResultSet, util::capitalize};
use eyre::{ContextCompat, Result, bail};
use itertools::Itertools;

/// Padding added around an otherwise degenerate x range, one minute in days
const MIN_X_PAD: f64 = 1.0 / 1440.0;
const MARGIN: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub platform: String,
    /// Palette index, the position of the platform in [`Settings::platforms`]
    pub color: usize,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub metric: String,
    pub machine_type: String,
    /// Only set on the top row
    pub title: Option<String>,
    pub lines: Vec<GridLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub platform: String,
    pub color: usize,
}

/// Everything needed to draw the grid, one row per metric and one column per machine type
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    /// Shared by every cell
    pub x_range: Range<f64>,
    /// Shared along each row
    pub y_ranges: Vec<Range<f64>>,
    /// Row major
    pub cells: Vec<GridCell>,
    pub legend: Vec<LegendEntry>,
}

impl GridLayout {
    pub fn build(results: &ResultSet, settings: &Settings, metrics: &[String]) -> Result<Self> {
        if results.is_empty() {
            bail!(
                "No results found in {:?}, expected files named {{machine_type}}-{{platform}}-results.csv",
                settings.input_dir
            );
        }
        if metrics.is_empty() {
            bail!("No metrics to plot");
        }

        let x_range = results.x_range().context("No x values")?;
        let x_range = pad(x_range, MIN_X_PAD);
        let y_ranges = metrics
            .iter()
            .map(|m| {
                results
                    .value_range(m)
                    .map(|r| {
                        let fallback = (r.start.abs() * MARGIN).max(1.0);
                        pad(r, fallback)
                    })
                    .with_context(|| format!("No values for metric {m}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cells = Vec::with_capacity(metrics.len() * settings.machine_types.len());
        let mut legend = Vec::new();
        for (row, metric) in metrics.iter().enumerate() {
            for machine_type in &settings.machine_types {
                let lines = results
                    .for_machine_type(machine_type)
                    .map(|r| r.platform.as_str())
                    .unique()
                    .map(|platform| GridLine {
                        platform: platform.to_owned(),
                        color: settings
                            .platform_index(platform)
                            .unwrap_or(settings.platforms.len()),
                        points: average_duplicates(results.series(machine_type, platform, metric)),
                    })
                    .collect::<Vec<_>>();

                if !lines.is_empty() {
                    legend = lines
                        .iter()
                        .map(|l| LegendEntry {
                            platform: l.platform.clone(),
                            color: l.color,
                        })
                        .unique_by(|e| e.platform.clone())
                        .collect();
                }

                cells.push(GridCell {
                    metric: metric.clone(),
                    machine_type: machine_type.clone(),
                    title: (row == 0).then(|| format!("Machine Type: {}", capitalize(machine_type))),
                    lines,
                });
            }
        }

        Ok(Self {
            rows: metrics.len(),
            cols: settings.machine_types.len(),
            x_range,
            y_ranges,
            cells,
            legend,
        })
    }

    pub fn cell(&self, row: usize, col: usize) -> &GridCell {
        &self.cells[row * self.cols + col]
    }
}

/// Widens a range by a small margin, or by `fallback` when it is a single value
fn pad(range: Range<f64>, fallback: f64) -> Range<f64> {
    let span = range.end - range.start;
    let pad = if span > 0.0 { span * MARGIN } else { fallback };
    (range.start - pad)..(range.end + pad)
}

/// Sorts points by x and averages y over points sharing the same x
fn average_duplicates(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let chunks = points.into_iter().chunk_by(|(x, _)| *x);
    chunks
        .into_iter()
        .map(|(x, group)| {
            let (sum, count) = group.fold((0.0, 0usize), |(s, c), (_, y)| (s + y, c + 1));
            (x, sum / count as f64)
        })
        .collect()
}
