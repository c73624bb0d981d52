use std::{fs::create_dir_all, path::PathBuf};

use common::{
    config::Settings,
    plot::Plot,
    results::ResultSet,
    util::{format_date_num, is_valid_date_format},
};
use eyre::{Context, Result, ensure};
use plotters::{
    coord::Shift,
    prelude::*,
    style::text_anchor::{HPos, Pos, VPos},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod layout;

use layout::{GridLayout, LegendEntry};

/// Matplotlib's tab10 cycle
pub const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

/// Largest image side accepted, in pixels
const MAX_PIXELS: f64 = 32_768.0;
const FONT: &str = "sans-serif";

pub fn palette(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

/// Grid of line charts, one row per metric and one column per machine type,
/// with one line per platform and a single legend above the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsGrid {
    /// Rows to draw, all configured metrics if unset
    pub metrics: Option<Vec<String>>,
    /// Width and height in inches
    pub figure_size: [f64; 2],
    pub dpi: u32,
    pub date_format: String,
    /// Draw x tick labels vertically, long date labels overlap otherwise
    pub vertical_x_labels: bool,
    pub x_ticks: usize,
    pub y_ticks: usize,
    /// Font sizes are in points
    pub title_font_size: f64,
    pub legend_font_size: f64,
    pub tick_font_size: f64,
    pub line_width: f64,
    pub legend_columns: usize,
}

impl Default for ResultsGrid {
    fn default() -> Self {
        Self {
            metrics: None,
            figure_size: [12.0, 8.0],
            dpi: 300,
            date_format: "%d.%m.%Y %H:%M:%S".to_owned(),
            vertical_x_labels: true,
            x_ticks: 5,
            y_ticks: 5,
            title_font_size: 14.0,
            legend_font_size: 12.0,
            tick_font_size: 10.0,
            line_width: 1.5,
            legend_columns: 4,
        }
    }
}

#[typetag::serde]
impl Plot for ResultsGrid {
    fn name(&self) -> &'static str {
        "ResultsGrid"
    }

    fn required_metrics(&self) -> Vec<String> {
        self.metrics.clone().unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        let [width, height] = self.figure_size;
        ensure!(
            width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0,
            "figure_size must be positive, got {:?}",
            self.figure_size
        );
        ensure!(self.dpi > 0, "dpi must be > 0");
        ensure!(
            width * self.dpi as f64 <= MAX_PIXELS && height * self.dpi as f64 <= MAX_PIXELS,
            "figure_size at {} dpi exceeds {MAX_PIXELS} pixels",
            self.dpi
        );
        ensure!(
            is_valid_date_format(&self.date_format),
            "date_format {:?} is not a valid strftime format",
            self.date_format
        );
        ensure!(self.legend_columns > 0, "legend_columns must be > 0");
        ensure!(self.x_ticks > 0 && self.y_ticks > 0, "tick counts must be > 0");
        for (name, size) in [
            ("title_font_size", self.title_font_size),
            ("legend_font_size", self.legend_font_size),
            ("tick_font_size", self.tick_font_size),
            ("line_width", self.line_width),
        ] {
            ensure!(size.is_finite() && size > 0.0, "{name} must be > 0, got {size}");
        }
        if let Some(metrics) = &self.metrics {
            ensure!(!metrics.is_empty(), "metrics must be non-empty when set");
        }
        Ok(())
    }

    fn plot(&self, results: &ResultSet, settings: &Settings) -> Result<PathBuf> {
        let metrics = self.metrics.as_ref().unwrap_or(&settings.metrics);
        let layout = GridLayout::build(results, settings, metrics)?;
        debug!(
            "Grid of {}x{} cells, {} legend entries",
            layout.rows,
            layout.cols,
            layout.legend.len()
        );

        let path = &settings.output_path;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            create_dir_all(parent)?;
        }

        let root = BitMapBackend::new(path, self.pixel_size()).into_drawing_area();
        draw_grid(&root, &layout, self).wrap_err("Draw results grid")?;
        root.present()
            .wrap_err_with(|| format!("Write {path:?}"))?;
        Ok(path.clone())
    }
}

impl ResultsGrid {
    /// Converts a size in points to pixels at the configured dpi
    pub fn px(&self, points: f64) -> f64 {
        points * self.dpi as f64 / 72.0
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        let [width, height] = self.figure_size;
        (
            (width * self.dpi as f64).round() as u32,
            (height * self.dpi as f64).round() as u32,
        )
    }

    fn legend_height(&self, entries: usize) -> u32 {
        let rows = entries.div_ceil(self.legend_columns).max(1);
        (self.px(self.legend_font_size) * (1.6 * rows as f64 + 1.6)).round() as u32
    }

    fn margin(&self) -> u32 {
        self.px(4.0).round() as u32
    }
}

/// Largest share of the grid a tick label band may take
const MAX_LABEL_SHARE: f64 = 0.3;

/// Pixel split of the image: legend band on top, the cells, and a footer
/// holding the x axis description.
///
/// Title, x label and y label bands are added to the first row, the last row
/// and the first column, so every cell keeps the same plot size.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub legend_height: u32,
    pub footer_height: u32,
    pub title_band: i32,
    pub x_label_band: i32,
    pub y_label_band: i32,
    /// Plot size shared by every cell, margins included
    pub cell_size: (i32, i32),
    /// Breakpoints between columns and rows, relative to the grid area
    pub col_breaks: Vec<i32>,
    pub row_breaks: Vec<i32>,
}

impl GridGeometry {
    pub fn new(layout: &GridLayout, style: &ResultsGrid, (width, height): (u32, u32)) -> Self {
        let tick_px = style.px(style.tick_font_size);
        let legend_height = style.legend_height(layout.legend.len());
        let footer_height = (tick_px * 2.0).round() as u32;
        let grid_height = height.saturating_sub(legend_height + footer_height) as i32;
        let grid_width = width as i32;

        let title_band = if layout.cells.iter().any(|c| c.title.is_some()) {
            (style.px(style.title_font_size) * 1.6).round() as i32
        } else {
            0
        };
        let x_label = if style.vertical_x_labels {
            let chars = format_date_num(layout.x_range.start, &style.date_format)
                .chars()
                .count() as f64;
            tick_px * (0.6 * chars + 1.5)
        } else {
            tick_px * 2.0
        };
        let x_label_band = (x_label.round() as i32).min(share(grid_height));
        let y_label_band = ((tick_px * 7.0).round() as i32).min(share(grid_width));

        let rows = layout.rows.max(1) as i32;
        let cols = layout.cols.max(1) as i32;
        let cell_size = (
            ((grid_width - y_label_band) / cols).max(0),
            ((grid_height - title_band - x_label_band) / rows).max(0),
        );
        let col_breaks = (1..cols).map(|c| y_label_band + c * cell_size.0).collect();
        let row_breaks = (1..rows).map(|r| title_band + r * cell_size.1).collect();

        Self {
            legend_height,
            footer_height,
            title_band,
            x_label_band,
            y_label_band,
            cell_size,
            col_breaks,
            row_breaks,
        }
    }

    /// Top and bottom pixel of `row`, in image coordinates
    pub fn row_span(&self, row: usize, image_height: u32) -> (i32, i32) {
        let grid_top = self.legend_height as i32;
        let grid_bottom = image_height.saturating_sub(self.footer_height) as i32;
        let top = match row {
            0 => grid_top,
            r => grid_top + self.row_breaks[r - 1],
        };
        let bottom = self
            .row_breaks
            .get(row)
            .map_or(grid_bottom, |b| grid_top + b);
        (top, bottom)
    }
}

fn share(size: i32) -> i32 {
    (size as f64 * MAX_LABEL_SHARE).round() as i32
}

/// Draws the legend band, every cell of the grid and the x description onto `root`
pub fn draw_grid<DB>(
    root: &DrawingArea<DB, Shift>,
    layout: &GridLayout,
    style: &ResultsGrid,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let geometry = GridGeometry::new(layout, style, root.dim_in_pixel());

    let (legend_area, rest) = root.split_vertically(geometry.legend_height);
    draw_legend(&legend_area, &layout.legend, style)?;

    let grid_height = rest.dim_in_pixel().1.saturating_sub(geometry.footer_height);
    let (grid_area, footer) = rest.split_vertically(grid_height);
    let areas = grid_area.split_by_breakpoints(
        geometry.col_breaks.as_slice(),
        geometry.row_breaks.as_slice(),
    );
    for (idx, area) in areas.iter().enumerate() {
        draw_cell(area, layout, &geometry, idx / layout.cols, idx % layout.cols, style)?;
    }

    // One axis description for the whole grid, centered under the plots
    let (footer_width, footer_height) = footer.dim_in_pixel();
    let desc_x = geometry.y_label_band + (footer_width as i32 - geometry.y_label_band) / 2;
    footer.draw(&Text::new(
        "time",
        (desc_x, footer_height as i32 / 2),
        (FONT, style.px(style.tick_font_size))
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center)),
    ))?;
    Ok(())
}

fn draw_cell<DB>(
    area: &DrawingArea<DB, Shift>,
    layout: &GridLayout,
    geometry: &GridGeometry,
    row: usize,
    col: usize,
    style: &ResultsGrid,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let cell = layout.cell(row, col);
    let tick_px = style.px(style.tick_font_size);
    let bottom = row + 1 == layout.rows;
    let left = col == 0;

    let x_formatter = |x: &f64| format_date_num(*x, &style.date_format);
    let y_formatter = |y: &f64| format_value(*y);

    // Shared axes only get tick labels on the outer cells
    let x_label_area = if bottom { geometry.x_label_band } else { 0 };
    let y_label_area = if left { geometry.y_label_band } else { 0 };

    let mut builder = ChartBuilder::on(area);
    builder
        .margin(style.margin())
        .x_label_area_size(x_label_area.max(0) as u32)
        .y_label_area_size(y_label_area.max(0) as u32);
    if let Some(title) = &cell.title {
        builder.caption(title, (FONT, style.px(style.title_font_size)).into_font());
    }
    let mut chart =
        builder.build_cartesian_2d(layout.x_range.clone(), layout.y_ranges[row].clone())?;

    let x_label_style = if style.vertical_x_labels {
        (FONT, tick_px).into_font().transform(FontTransform::Rotate270)
    } else {
        (FONT, tick_px).into_font()
    };
    let mut mesh = chart.configure_mesh();
    mesh.x_labels(style.x_ticks)
        .y_labels(style.y_ticks)
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&y_formatter)
        .x_label_style(x_label_style)
        .y_label_style((FONT, tick_px).into_font())
        .axis_desc_style((FONT, tick_px).into_font())
        .light_line_style(WHITE);
    if left {
        mesh.y_desc(cell.metric.as_str());
    }
    mesh.draw()?;

    let line_px = style.px(style.line_width).round().max(1.0) as u32;
    for line in &cell.lines {
        chart.draw_series(LineSeries::new(
            line.points.iter().copied(),
            palette(line.color).stroke_width(line_px),
        ))?;
    }
    Ok(())
}

/// Framed, horizontally laid out legend centered in `area`
fn draw_legend<DB>(
    area: &DrawingArea<DB, Shift>,
    entries: &[LegendEntry],
    style: &ResultsGrid,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    if entries.is_empty() {
        return Ok(());
    }

    let font_px = style.px(style.legend_font_size);
    let text_style = (FONT, font_px)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    let swatch = (font_px * 2.0).round() as i32;
    let gap = (font_px * 0.8).round() as i32;
    let row_height = (font_px * 1.6).round() as i32;
    let pad = (font_px * 0.5).round() as i32;
    let shadow = (font_px * 0.2).round() as i32;
    let line_px = style.px(style.line_width).round().max(1.0) as u32;

    let mut col_width = 0;
    for entry in entries {
        let (width, _) = area.estimate_text_size(&entry.platform, &text_style)?;
        col_width = col_width.max(gap + swatch + gap + width as i32 + gap);
    }
    let cols = style.legend_columns.min(entries.len());
    let rows = entries.len().div_ceil(cols);

    let (area_width, area_height) = area.dim_in_pixel();
    let box_width = cols as i32 * col_width + 2 * pad;
    let box_height = rows as i32 * row_height + 2 * pad;
    let left = (area_width as i32 - box_width) / 2;
    let top = (area_height as i32 - box_height) / 2;
    let corners = [(left, top), (left + box_width, top + box_height)];

    area.draw(&Rectangle::new(
        corners.map(|(x, y)| (x + shadow, y + shadow)),
        BLACK.mix(0.3).filled(),
    ))?;
    area.draw(&Rectangle::new(corners, WHITE.filled()))?;
    area.draw(&Rectangle::new(corners, RGBColor(204, 204, 204).stroke_width(2)))?;

    for (i, entry) in entries.iter().enumerate() {
        let x = left + pad + (i % cols) as i32 * col_width + gap;
        let y = top + pad + (i / cols) as i32 * row_height + row_height / 2;
        area.draw(&PathElement::new(
            vec![(x, y), (x + swatch, y)],
            palette(entry.color).stroke_width(line_px),
        ))?;
        area.draw(&Text::new(
            entry.platform.clone(),
            (x + swatch + gap, y),
            text_style.clone(),
        ))?;
    }
    Ok(())
}

fn format_value(value: f64) -> String {
    if value.abs() >= 100.0 || value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{read, write};

    use common::{config::Config, results::load_results};
    use tempfile::TempDir;

    use super::*;

    /// n1-native rises steeply, n1-docker stays low, three rows each
    fn scenario(dir: &TempDir) -> (ResultSet, Settings) {
        let settings = Settings {
            input_dir: dir.path().to_path_buf(),
            output_path: dir.path().join("plots").join("out.png"),
            ..Default::default()
        };
        for (platform, values) in [("native", [10, 20, 30]), ("docker", [12, 13, 14])] {
            let mut data = "time,cpu,mem,diskRand,diskSeq\n".to_owned();
            for (i, v) in values.iter().enumerate() {
                data.push_str(&format!("{},{v},{v},{v},{v}\n", 1_700_000_000 + i * 60));
            }
            write(dir.path().join(Settings::result_file_name("n1", platform)), data).unwrap();
        }
        (load_results(&settings).unwrap(), settings)
    }

    fn scenario_layout(dir: &TempDir) -> GridLayout {
        let (results, settings) = scenario(dir);
        GridLayout::build(&results, &settings, &settings.metrics).unwrap()
    }

    #[test]
    fn defaults_match_figure() {
        let grid = ResultsGrid::default();
        assert_eq!(grid.pixel_size(), (3600, 2400));
        assert_eq!(grid.px(12.0), 50.0);
        assert!(grid.validate().is_ok());
    }

    #[test]
    fn parses_from_config() {
        let config = Config::load_from_str(
            "plots:\n  - type: ResultsGrid\n    dpi: 100\n    metrics: [cpu]\n",
        )
        .unwrap();
        let plots = config.plots.unwrap();
        assert_eq!(plots[0].name(), "ResultsGrid");
        assert_eq!(plots[0].required_metrics(), ["cpu"]);

        let grid = plots[0].downcast_ref::<ResultsGrid>().unwrap();
        assert_eq!(grid.pixel_size(), (1200, 800));
        assert_eq!(grid.date_format, "%d.%m.%Y %H:%M:%S");
    }

    #[test]
    fn rejects_bad_options() {
        for yaml in [
            "dpi: 0",
            "figure_size: [0.0, 8.0]",
            "legend_columns: 0",
            "date_format: \"%Q\"",
            "tick_font_size: -1.0",
            "metrics: []",
            "dpi: 100000",
        ] {
            let grid: ResultsGrid = serde_yml::from_str(yaml).unwrap();
            assert!(grid.validate().is_err(), "{yaml} should be rejected");
        }
    }

    #[test]
    fn empty_results_write_nothing() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            input_dir: dir.path().to_path_buf(),
            output_path: dir.path().join("out.png"),
            ..Default::default()
        };
        let err = ResultsGrid::default()
            .plot(&ResultSet::default(), &settings)
            .unwrap_err();
        assert!(err.to_string().contains("No results found"));
        assert!(!settings.output_path.exists());
    }

    #[test]
    fn palette_cycles() {
        assert_eq!(palette(0), RGBColor(31, 119, 180));
        assert_eq!(palette(10), palette(0));
    }

    #[test]
    fn formats_values() {
        assert_eq!(format_value(2048.4), "2048");
        assert_eq!(format_value(12.34), "12.3");
        assert_eq!(format_value(3.0), "3");
    }

    #[test]
    fn every_row_keeps_its_plot_height() {
        let dir = TempDir::new().unwrap();
        let layout = scenario_layout(&dir);

        for grid in [
            ResultsGrid::default(),
            ResultsGrid {
                tick_font_size: 40.0,
                ..Default::default()
            },
        ] {
            let (_, height) = grid.pixel_size();
            let geometry = GridGeometry::new(&layout, &grid, grid.pixel_size());
            let (_, cell_height) = geometry.cell_size;
            assert!(cell_height as f64 > 0.1 * height as f64, "{geometry:?}");
            assert_eq!(geometry.row_breaks.len(), layout.rows - 1);
            assert_eq!(geometry.col_breaks.len(), layout.cols - 1);

            for row in 0..layout.rows {
                let (top, bottom) = geometry.row_span(row, height);
                let mut plot_height = bottom - top - 2 * grid.margin() as i32;
                if row == 0 {
                    plot_height -= geometry.title_band;
                }
                if row + 1 == layout.rows {
                    plot_height -= geometry.x_label_band;
                }
                assert!(
                    plot_height >= cell_height - 2 * grid.margin() as i32,
                    "row {row} is {plot_height}px high, cells are {cell_height}px"
                );
            }
        }
    }

    #[test]
    fn draws_a_line_across_every_row() {
        let dir = TempDir::new().unwrap();
        let layout = scenario_layout(&dir);
        let grid = ResultsGrid {
            dpi: 72,
            ..Default::default()
        };
        let (width, height) = grid.pixel_size();
        let mut buf = vec![0u8; (width * height * 3) as usize];
        {
            let root = BitMapBackend::with_buffer(&mut buf, (width, height)).into_drawing_area();
            draw_grid(&root, &layout, &grid).unwrap();
            root.present().unwrap();
        }

        // The native line is the only blue ink inside the n1 column
        let is_native = |x: i32, y: i32| {
            let i = (y as usize * width as usize + x as usize) * 3;
            buf[i + 2] as i32 - buf[i] as i32 > 60
        };
        let geometry = GridGeometry::new(&layout, &grid, (width, height));
        let first_col_end = geometry.col_breaks[0];
        for row in 0..layout.rows {
            let (top, bottom) = geometry.row_span(row, height);
            let ys = (top..bottom)
                .filter(|&y| (0..first_col_end).any(|x| is_native(x, y)))
                .collect::<Vec<_>>();
            assert!(!ys.is_empty(), "no line in row {row}");
            let extent = ys[ys.len() - 1] - ys[0];
            assert!(
                extent as f64 > 0.5 * geometry.cell_size.1 as f64,
                "line in row {row} spans only {extent}px"
            );
        }
    }

    #[test]
    fn plot_writes_png() {
        let dir = TempDir::new().unwrap();
        let (results, settings) = scenario(&dir);
        let grid = ResultsGrid {
            dpi: 72,
            ..Default::default()
        };
        let path = grid.plot(&results, &settings).unwrap();
        assert_eq!(path, settings.output_path);
        let bytes = read(&path).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
    }
}
