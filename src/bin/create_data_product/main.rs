use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use wue_dp_rs::logging::init_logging;

use crate::config::Config;
use crate::groups::GroupDataset;

mod config;
mod constants;
mod groups;
mod indices;
mod partition;
mod time_axis;
mod transfer;

fn main() -> ExitCode {
    let clargs = Cli::parse();

    init_logging(clargs.verbosity.log_level_filter());

    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("create_data_product did not complete successfully:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let config = Config::from_toml_file(&clargs.config).change_context(CliError::ReadingConfig)?;
    run(
        &config,
        &clargs.out,
        clargs.force,
        clargs.split_years.as_deref(),
    )
}

/// Run the assembly pipeline with an already-loaded configuration.
fn run(
    config: &Config,
    out_path: &Path,
    force: bool,
    split_dir: Option<&Path>,
) -> error_stack::Result<(), CliError> {
    if out_path.exists() && !force {
        log::info!(
            "Output file {} already exists, skipping regeneration (use --force to rebuild)",
            out_path.display()
        );
    } else {
        build_product(config, out_path)?;
        log::info!("Finished writing {}", out_path.display());
    }

    if let Some(dir) = split_dir {
        std::fs::create_dir_all(dir).change_context(CliError::Partitioning)?;
        partition::partition_by_year(out_path, dir).change_context(CliError::Partitioning)?;
    }

    Ok(())
}

/// Assemble the product: time axis first, then each group in order,
/// then the derived indices. The output file is owned here for the
/// whole run and closed exactly once, when it goes out of scope.
fn build_product(config: &Config, out_path: &Path) -> error_stack::Result<(), CliError> {
    let time_spec = config.time_spec().change_context(CliError::ReadingConfig)?;

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).change_context(CliError::CreatingOutput)?;
        }
    }
    let mut ds = netcdf::create_with(
        out_path,
        netcdf::Options::NETCDF4 | netcdf::Options::CLASSIC,
    )
    .change_context(CliError::CreatingOutput)?;

    time_axis::write_dimensions(&mut ds, config).change_context(CliError::WritingTimeAxis)?;
    let ntime = time_axis::write_time_axis(&mut ds, &time_spec, config)
        .change_context(CliError::WritingTimeAxis)?;
    log::info!("Time axis written with {ntime} steps");

    write_global_attributes(&mut ds, config)?;

    for group in config.group_order() {
        let path = config
            .group_path(group)
            .change_context_lazy(|| CliError::ResolvingGroup(group.to_string()))?;
        let src = GroupDataset::resolve(group, path)
            .change_context_lazy(|| CliError::ResolvingGroup(group.to_string()))?;
        transfer::transfer_group(&src, &mut ds, config)
            .change_context_lazy(|| CliError::CopyingGroup(group.to_string()))?;
        log::info!("Saved selected variables for group '{group}'");
    }

    indices::compute_indices(&mut ds, config).change_context(CliError::ComputingIndices)?;

    Ok(())
}

fn write_global_attributes(
    ds: &mut netcdf::FileMut,
    config: &Config,
) -> error_stack::Result<(), CliError> {
    for (name, value) in config.global_attributes.iter() {
        ds.add_attribute(name, netcdf::AttributeValue::from(value))
            .change_context(CliError::WritingGlobalAttrs)?;
    }

    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    ds.add_attribute("history", format!("{stamp}: created by create_data_product"))
        .change_context(CliError::WritingGlobalAttrs)?;
    Ok(())
}

#[derive(Debug, clap::Parser)]
struct Cli {
    /// The TOML configuration describing the product schema.
    config: PathBuf,

    /// Path of the assembled product file.
    #[clap(long, default_value = "out.nc")]
    out: PathBuf,

    /// Regenerate the product even if the output file already exists.
    /// Without this flag an existing product is left untouched and the
    /// run proceeds straight to partitioning (if requested).
    #[clap(long)]
    force: bool,

    /// Split the finished product into one file per calendar year
    /// inside this directory.
    #[clap(long)]
    split_years: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("An error occurred while reading the configuration")]
    ReadingConfig,
    #[error("An error occurred while creating the output file")]
    CreatingOutput,
    #[error("An error occurred while writing dimensions and the time axis")]
    WritingTimeAxis,
    #[error("An error occurred while writing the global attributes")]
    WritingGlobalAttrs,
    #[error("An error occurred while resolving input files for group '{0}'")]
    ResolvingGroup(String),
    #[error("An error occurred while copying variables from group '{0}'")]
    CopyingGroup(String),
    #[error("An error occurred while computing the derived efficiency indices")]
    ComputingIndices,
    #[error("An error occurred while splitting the product into yearly files")]
    Partitioning,
}
