use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use common::{
    config::Config,
    plot::{Plot, run_plots},
    results::{discover_result_files, load_results, read_result_file},
};
use eyre::{Context, Result};
use results_grid::ResultsGrid;
use tracing::{debug, error};
use tracing_subscriber::{
    EnvFilter,
    fmt::{layer, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_CONFIG: &str = "config.yaml";
const MODULES: &[&str] = &["common", "results_grid"];

#[derive(Parser)]
#[command(about = "Plot benchmark results per machine type and platform")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Config file, defaults to config.yaml when present
    #[arg(short, long)]
    config_file: Option<PathBuf>,
    /// Directory containing the result csv files
    #[arg(short, long)]
    input_dir: Option<PathBuf>,
    /// Output image
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long)]
    log: Vec<String>,
}

#[derive(Subcommand, Default)]
enum Commands {
    /// Render the configured plots (default)
    #[default]
    Plot,
    /// List the expected result files and whether they were found
    Ls,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let _guard = init_logging(&args.log)?;

    let config = load_config(&args)?;
    debug!("Settings: {:?}", config.settings);

    let res = match args.command.unwrap_or_default() {
        Commands::Plot => plot(config),
        Commands::Ls => list_results(&config),
    };
    if let Err(err) = &res {
        error!("{err:#?}");
    }
    res
}

fn init_logging(directives: &[String]) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = std::env::var("RUST_LOG").unwrap_or("warn".to_owned());
    let file_appender = tracing_appender::rolling::never(".", "log.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let mut env_filter = EnvFilter::new(format!("bench_plot={log_level}"));
    for log in directives {
        env_filter = env_filter.add_directive(log.parse()?);
    }
    for module in MODULES {
        if !directives.iter().any(|x| x.starts_with(module)) {
            env_filter = env_filter.add_directive(format!("{module}={log_level}").parse()?);
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            layer()
                .with_timer(ChronoLocal::new("%v %k:%M:%S %z".to_owned()))
                .compact(),
        )
        .with(layer().with_writer(non_blocking))
        .init();
    Ok(guard)
}

fn load_config(args: &Cli) -> Result<Config> {
    let mut config = match &args.config_file {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => Config::load(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, args.input_dir.clone(), args.output.clone());
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, input_dir: Option<PathBuf>, output: Option<PathBuf>) {
    if let Some(input_dir) = input_dir {
        config.settings.input_dir = input_dir;
    }
    if let Some(output) = output {
        config.settings.output_path = output;
    }
}

fn default_plots() -> Vec<Box<dyn Plot>> {
    vec![Box::new(ResultsGrid::default())]
}

fn plot(config: Config) -> Result<()> {
    let results = load_results(&config.settings).wrap_err("Load results")?;
    let plots = config.plots.unwrap_or_else(default_plots);
    for path in run_plots(&plots, &results, &config.settings)? {
        println!("Plot written to {}", path.display());
    }
    Ok(())
}

fn list_results(config: &Config) -> Result<()> {
    for file in discover_result_files(&config.settings) {
        let status = if file.exists {
            match read_result_file(
                &file.path,
                &file.machine_type,
                &file.platform,
                &config.settings.metrics,
            ) {
                Ok(records) => format!("{} rows", records.len()),
                Err(err) => format!("invalid: {err}"),
            }
        } else {
            "missing".to_owned()
        };
        println!(
            "{}-{} -> {} ({status})",
            file.machine_type,
            file.platform,
            file.path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::write;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn overrides_replace_settings() {
        let mut config = Config::default();
        apply_overrides(&mut config, Some(PathBuf::from("data")), None);
        assert_eq!(config.settings.input_dir, PathBuf::from("data"));
        assert_eq!(
            config.settings.output_path,
            PathBuf::from("all-results-plot.png")
        );

        apply_overrides(&mut config, None, Some(PathBuf::from("out/grid.png")));
        assert_eq!(config.settings.output_path, PathBuf::from("out/grid.png"));
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plot.yaml");
        write(
            &path,
            "settings:\n  machine_types: [e2]\nplots:\n  - type: ResultsGrid\n    dpi: 72\n",
        )
        .unwrap();
        let args = Cli::parse_from([
            "bench-plot",
            "-c",
            path.to_str().unwrap(),
            "--output",
            "grid.png",
            "ls",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.settings.machine_types, ["e2"]);
        assert_eq!(config.settings.output_path, PathBuf::from("grid.png"));
        assert_eq!(config.plots.unwrap().len(), 1);
        assert!(matches!(args.command, Some(Commands::Ls)));
    }

    #[test]
    fn missing_results_fail_before_writing() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            Some(dir.path().to_path_buf()),
            Some(dir.path().join("plot.png")),
        );
        let err = plot(config).unwrap_err();
        assert!(format!("{err:#}").contains("No results found"));
        assert!(!dir.path().join("plot.png").exists());
    }

    #[test]
    fn default_plot_is_results_grid() {
        let plots = default_plots();
        assert_eq!(plots.len(), 1);
        assert_eq!(plots[0].name(), "ResultsGrid");
    }
}
