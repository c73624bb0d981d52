use std::{
    collections::BTreeMap,
    ops::Range,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use csv::ReaderBuilder;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::Settings,
    util::{date_to_num, timestamp_to_local},
};

pub const TIME_COLUMN: &str = "time";

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("Could not read {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Missing column {column} in {path:?}")]
    MissingColumn { path: PathBuf, column: String },
    #[error("Invalid timestamp {value:?} in {path:?} row {row}")]
    InvalidTimestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("Invalid {column} value {value:?} in {path:?} row {row}")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },
}

/// One timestamped measurement row tagged with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub time: DateTime<Local>,
    /// Days since the epoch of the local wall-clock time, used as the x coordinate
    pub x: f64,
    pub machine_type: String,
    pub platform: String,
    pub values: BTreeMap<String, f64>,
}

impl ResultRecord {
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// The combined dataset of every result file found, in load order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    records: Vec<ResultRecord>,
}

impl ResultSet {
    pub fn new(records: Vec<ResultRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn extend(&mut self, records: Vec<ResultRecord>) {
        self.records.extend(records);
    }

    pub fn for_machine_type<'a>(
        &'a self,
        machine_type: &'a str,
    ) -> impl Iterator<Item = &'a ResultRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.machine_type == machine_type)
    }

    /// Distinct platforms in order of first appearance
    pub fn platforms(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.platform.as_str())
            .unique()
            .collect()
    }

    /// `(x, value)` points of one metric for a machine type and platform, in row order
    pub fn series(&self, machine_type: &str, platform: &str, metric: &str) -> Vec<(f64, f64)> {
        self.for_machine_type(machine_type)
            .filter(|r| r.platform == platform)
            .filter_map(|r| r.value(metric).map(|v| (r.x, v)))
            .collect()
    }

    /// Range of the x coordinates over the whole dataset
    pub fn x_range(&self) -> Option<Range<f64>> {
        min_max(self.records.iter().map(|r| r.x))
    }

    /// Range of a metric over the whole dataset
    pub fn value_range(&self, metric: &str) -> Option<Range<f64>> {
        min_max(self.records.iter().filter_map(|r| r.value(metric)))
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> Option<Range<f64>> {
    values.fold(None, |acc, v| match acc {
        None => Some(v..v),
        Some(r) => Some(r.start.min(v)..r.end.max(v)),
    })
}

/// An expected result file for a machine type and platform
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFile {
    pub machine_type: String,
    pub platform: String,
    pub path: PathBuf,
    pub exists: bool,
}

/// Every machine type and platform combination, machine types outermost
pub fn discover_result_files(settings: &Settings) -> Vec<ResultFile> {
    settings
        .machine_types
        .iter()
        .cartesian_product(settings.platforms.iter())
        .map(|(machine_type, platform)| {
            let path = settings.result_path(machine_type, platform);
            ResultFile {
                machine_type: machine_type.clone(),
                platform: platform.clone(),
                exists: path.is_file(),
                path,
            }
        })
        .collect()
}

/// Loads and concatenates every result file that exists, skipping missing ones
pub fn load_results(settings: &Settings) -> Result<ResultSet, ResultError> {
    let mut results = ResultSet::default();
    for file in discover_result_files(settings) {
        if !file.exists {
            debug!("No results at {:?}, skipping", file.path);
            continue;
        }
        let records = read_result_file(
            &file.path,
            &file.machine_type,
            &file.platform,
            &settings.metrics,
        )?;
        debug!("Read {} rows from {:?}", records.len(), file.path);
        results.extend(records);
    }
    info!("Loaded {} result rows", results.len());
    Ok(results)
}

/// Reads one result csv, tagging every row with its machine type and platform
pub fn read_result_file(
    path: &Path,
    machine_type: &str,
    platform: &str,
    metrics: &[String],
) -> Result<Vec<ResultRecord>, ResultError> {
    let csv_err = |source| ResultError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ResultError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_owned(),
            })
    };
    let time_idx = column(TIME_COLUMN)?;
    let metric_idx = metrics
        .iter()
        .map(|m| column(m.as_str()).map(|idx| (m, idx)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.map_err(csv_err)?;
        let line = i + 1;

        let raw_time = row.get(time_idx).unwrap_or_default();
        let time = raw_time
            .parse::<f64>()
            .ok()
            .and_then(timestamp_to_local)
            .ok_or_else(|| ResultError::InvalidTimestamp {
                path: path.to_path_buf(),
                row: line,
                value: raw_time.to_owned(),
            })?;

        let mut values = BTreeMap::new();
        for (metric, idx) in &metric_idx {
            let raw = row.get(*idx).unwrap_or_default();
            // Empty and non-finite fields are rejected, the plot has no gaps
            let value = raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ResultError::InvalidValue {
                    path: path.to_path_buf(),
                    row: line,
                    column: metric.to_string(),
                    value: raw.to_owned(),
                })?;
            values.insert(metric.to_string(), value);
        }

        records.push(ResultRecord {
            x: date_to_num(&time.naive_local()),
            time,
            machine_type: machine_type.to_owned(),
            platform: platform.to_owned(),
            values,
        });
    }
    Ok(records)
}
