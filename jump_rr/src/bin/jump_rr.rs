//! jump_rr
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use jump_rr::config::RunConfig;
use jump_rr::enrich::{CsvLookup, MetadataLookup, NoLookup};
use jump_rr::pipeline::Pipeline;
use jump_rr::similarity::CpuBackend;
use log::warn;
use std::path::PathBuf;

/// Compute ranked perturbation matches and write one parquet table per dataset.
#[derive(Debug, Parser)]
struct Args {
    /// TOML run configuration; built-in defaults when omitted.
    #[clap(long)]
    config: Option<PathBuf>,

    /// CSV metadata table for gene/compound names (overrides the config).
    #[clap(long)]
    metadata_table: Option<PathBuf>,

    /// Only process these datasets.
    #[clap(long)]
    dataset: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RunConfig::load(args.config.as_deref())?;
    if args.metadata_table.is_some() {
        config.metadata_table = args.metadata_table;
    }
    let datasets = config.select_datasets(&args.dataset)?;

    // Fail before reading anything if there is nothing to compute on.
    let backend = CpuBackend::new(config.num_threads)?;

    let lookup: Box<dyn MetadataLookup> = match &config.metadata_table {
        Some(path) => Box::new(CsvLookup::from_path(path)?),
        None => {
            warn!("no metadata table configured, identifiers will not be translated");
            Box::new(NoLookup)
        }
    };

    Pipeline::new(&config, &backend, lookup.as_ref()).run(&datasets)?;
    Ok(())
}
