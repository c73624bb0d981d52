use std::{
    collections::HashSet,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use eyre::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{plot::Plot, results::TIME_COLUMN};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    /// Plots to render, a [`crate::plot::Plot`] implementation picked by its `type` tag
    pub plots: Option<Vec<Box<dyn Plot>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub machine_types: Vec<String>,
    pub platforms: Vec<String>,
    pub metrics: Vec<String>,
    /// Directory containing the `{machine_type}-{platform}-results.csv` files
    pub input_dir: PathBuf,
    pub output_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            machine_types: to_strings(&["n1", "n2", "c3"]),
            platforms: to_strings(&["native", "docker", "kvm", "qemu"]),
            metrics: to_strings(&["cpu", "mem", "diskRand", "diskSeq"]),
            input_dir: PathBuf::from("."),
            output_path: PathBuf::from("all-results-plot.png"),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|x| x.to_string()).collect()
}

impl Settings {
    pub fn result_file_name(machine_type: &str, platform: &str) -> String {
        format!("{machine_type}-{platform}-results.csv")
    }

    pub fn result_path(&self, machine_type: &str, platform: &str) -> PathBuf {
        self.input_dir
            .join(Self::result_file_name(machine_type, platform))
    }

    /// Index of a platform in the configured order, used for stable coloring
    pub fn platform_index(&self, platform: &str) -> Option<usize> {
        self.platforms.iter().position(|p| p == platform)
    }

    pub fn validate(&self) -> Result<()> {
        validate_list("settings.machine_types", &self.machine_types)?;
        validate_list("settings.platforms", &self.platforms)?;
        validate_list("settings.metrics", &self.metrics)?;
        ensure!(
            !self.metrics.iter().any(|m| m == TIME_COLUMN),
            "settings.metrics must not contain the {TIME_COLUMN} column"
        );
        ensure!(
            !self.output_path.as_os_str().is_empty(),
            "settings.output_path must be non-empty"
        );
        Ok(())
    }
}

fn validate_list(name: &str, items: &[String]) -> Result<()> {
    ensure!(!items.is_empty(), "{name} must be non-empty");
    let mut seen = HashSet::new();
    for item in items {
        ensure!(!item.trim().is_empty(), "{name} must not contain empty entries");
        ensure!(seen.insert(item), "{name} contains {item} more than once");
    }
    Ok(())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = read_to_string(path).wrap_err_with(|| format!("Read config {path:?}"))?;
        Self::load_from_str(&data).wrap_err_with(|| format!("Load config {path:?}"))
    }

    /// Parse and validate config from a yaml string
    pub fn load_from_str(s: &str) -> Result<Self> {
        let config: Config = serde_yml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        if let Some(plots) = &self.plots {
            for plot in plots {
                plot.validate()
                    .wrap_err_with(|| format!("Invalid {} plot", plot.name()))?;
            }
        }
        Ok(())
    }
}
