use core::fmt::Debug;
use std::path::PathBuf;

use downcast_rs::{Downcast, impl_downcast};
use dyn_clone::{DynClone, clone_trait_object};
use eyre::{Result, bail};
use tracing::{debug, info};

use crate::{config::Settings, results::ResultSet};

#[typetag::serde(tag = "type")]
pub trait Plot: Debug + DynClone + Downcast + Send + Sync {
    /// Name of the plot, for identification
    fn name(&self) -> &'static str;
    /// The metric columns this plot reads, must all be configured in [`Settings::metrics`]
    fn required_metrics(&self) -> Vec<String>;
    /// Checks plot specific options after the config is parsed
    fn validate(&self) -> Result<()> {
        Ok(())
    }
    /// Plots the data
    ///
    /// Arguments:
    /// * `results` - The combined dataset of every result file found
    /// * `settings` - The settings from the config, ie. machine types, platforms and output path
    ///
    /// Returns the path of the written image
    fn plot(&self, results: &ResultSet, settings: &Settings) -> Result<PathBuf>;
}
clone_trait_object!(Plot);
impl_downcast!(Plot);

/// Runs every plot in order, returning the written files
pub fn run_plots(
    plots: &[Box<dyn Plot>],
    results: &ResultSet,
    settings: &Settings,
) -> Result<Vec<PathBuf>> {
    if plots.is_empty() {
        debug!("No plots");
        return Ok(Vec::new());
    }

    let mut written = Vec::with_capacity(plots.len());
    for plot in plots {
        let missing = plot
            .required_metrics()
            .into_iter()
            .filter(|m| !settings.metrics.contains(m))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            bail!(
                "Plot {} requires metrics {missing:?} which are not configured",
                plot.name()
            );
        }

        debug!("Running plot {}", plot.name());
        let path = plot.plot(results, settings)?;
        info!("{} plot written to {path:?}", plot.name());
        written.push(path);
    }
    Ok(written)
}
