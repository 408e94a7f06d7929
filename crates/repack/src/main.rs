use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use repack::{
    InputModule, MergeOptions, Merger,
    config::{Config, read_pattern_file},
    loader::{ModuleLoader, TomlModuleLoader},
};

/// Merge compiled modules into a single module
#[derive(Parser, Debug)]
#[command(name = "repack", version, about, long_about = None)]
struct Cli {
    /// Primary module; the merged module takes its identity
    primary: PathBuf,

    /// Modules merged into the primary, in order
    secondaries: Vec<PathBuf>,

    /// Output path of the merged module
    #[arg(short, long)]
    out: PathBuf,

    /// Configuration file (defaults to repack.toml discovery)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Internalize the public types of every secondary module
    #[arg(long)]
    internalize: bool,

    /// Keep types matching this pattern public; may be repeated
    #[arg(long = "exclude-pattern", value_name = "REGEX")]
    exclude_patterns: Vec<String>,

    /// Read additional exclude patterns from a file, one per line
    #[arg(long, value_name = "PATH")]
    exclude_file: Option<PathBuf>,

    /// Keep serializable and contract types public
    #[arg(long)]
    exclude_serializable: bool,

    /// Name of the merged module
    #[arg(long)]
    target_name: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::discover(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;

    let loader = TomlModuleLoader;
    let mut inputs = vec![InputModule::primary(loader.load(&cli.primary)?)];
    for path in &cli.secondaries {
        inputs.push(InputModule::secondary(loader.load(path)?));
    }

    let output = Merger::new(MergeOptions::from_config(&config))
        .run(inputs)
        .context("Merge failed")?;

    for conflict in &output.report.conflicts {
        warn!(
            "Public type {} of {} was merged into the definition from {}",
            conflict.name, conflict.merged_from, conflict.kept_from
        );
    }
    for renamed in &output.report.renamed {
        info!(
            "Renamed {} from {} to {}",
            renamed.original, renamed.module, renamed.renamed
        );
    }

    loader.store(&output.module, &cli.out)?;
    info!(
        "Wrote {} ({} symbols mapped, {} warnings)",
        cli.out.display(),
        output.report.stats.types + output.report.stats.methods + output.report.stats.fields,
        output.report.warnings.len()
    );
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if cli.internalize {
        config.internalize.enabled = true;
    }
    if cli.exclude_serializable {
        config.internalize.exclude_serializable = true;
    }
    if let Some(name) = &cli.target_name {
        config.target_name = Some(name.clone());
    }
    config
        .internalize
        .exclude_patterns
        .extend(cli.exclude_patterns.iter().cloned());
    if let Some(path) = &cli.exclude_file {
        config
            .internalize
            .exclude_patterns
            .extend(read_pattern_file(path)?);
    }
    Ok(())
}
