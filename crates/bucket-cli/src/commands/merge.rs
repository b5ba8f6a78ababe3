//! `bucket merge`: fold many coverage stores into one.
//!
//! Three drivers:
//! - `sql`: attaches SQLite stores to the output and merges in SQL
//! - `archive`: parses archive bucket hits on a worker pool
//! - `memory`: reads every record of any store kind and merges in memory

use std::path::PathBuf;

use anyhow::Result;
use bucket_archive::{ArchiveMergeOptions, merge_archives};
use bucket_core::{BucketConfig, InputKind, MergeReadout, StagedOutput, resolve_inputs};
use bucket_sql::{SqlMergeOptions, merge_sql_direct};
use clap::Args;
use tracing::info;

use super::{StoreLocation, read_store, write_store};

/// Flags shared by every merge driver.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// Input stores, or directories to scan for them
    #[arg(short, long, num_args = 1.., required = true)]
    pub input: Vec<PathBuf>,
    /// Output store; replaced if it exists
    #[arg(short, long)]
    pub output: PathBuf,
    /// Parallel merge units (default: CPU count, at most 8)
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Provenance recorded on the merged record (default: Merged_<timestamp>)
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub source_key: Option<String>,
}

impl MergeArgs {
    /// Apply command-line overrides on top of the config file.
    fn apply(&self, config: &BucketConfig) -> BucketConfig {
        let mut config = config.clone();
        let merge = &mut config.merge;
        if self.workers.is_some() {
            merge.workers = self.workers;
        }
        if self.source.is_some() {
            merge.source = self.source.clone();
        }
        if self.source_key.is_some() {
            merge.source_key = self.source_key.clone();
        }
        config
    }
}

pub async fn sql(config: &BucketConfig, args: &MergeArgs, max_attach: Option<usize>) -> Result<()> {
    let mut config = args.apply(config);
    if max_attach.is_some() {
        config.merge.max_attach = max_attach;
    }
    config.validate()?;
    let inputs = resolve_inputs(&args.input, InputKind::Sql)?;
    info!(inputs = inputs.len(), output = ?args.output, "merging sql stores");
    let run = merge_sql_direct(&args.output, &inputs, &SqlMergeOptions::from_config(&config)).await?;
    println!(
        "✓ Merged {} stores into {} (run {run})",
        inputs.len(),
        args.output.display()
    );
    Ok(())
}

pub async fn archive(
    config: &BucketConfig,
    args: &MergeArgs,
    batch_size: Option<usize>,
    batch_threshold: Option<usize>,
) -> Result<()> {
    let mut config = args.apply(config);
    if batch_size.is_some() {
        config.merge.batch_size = batch_size;
    }
    if batch_threshold.is_some() {
        config.merge.batch_threshold = batch_threshold;
    }
    config.validate()?;
    let inputs = resolve_inputs(&args.input, InputKind::Archive)?;
    info!(inputs = inputs.len(), output = ?args.output, "merging archives");
    let reference =
        merge_archives(&args.output, &inputs, &ArchiveMergeOptions::from_config(&config)).await?;
    println!(
        "✓ Merged {} archives into {} (record {reference})",
        inputs.len(),
        args.output.display()
    );
    Ok(())
}

pub fn memory(
    config: &BucketConfig,
    args: &MergeArgs,
    kind: InputKind,
    output_kind: Option<InputKind>,
) -> Result<()> {
    let config = args.apply(config);
    config.validate()?;
    let inputs = resolve_inputs(&args.input, kind)?;
    info!(inputs = inputs.len(), %kind, "merging in memory");

    let mut merged: Option<MergeReadout> = None;
    for path in &inputs {
        let location = StoreLocation { kind, path: path.clone() };
        let readouts = read_store(&location)?;
        if readouts.is_empty() {
            anyhow::bail!("{location} holds no records");
        }
        for readout in &readouts {
            match merged.as_mut() {
                Some(m) => m.merge(readout.as_ref())?,
                None => merged = Some(MergeReadout::new(readout.as_ref())?),
            }
        }
    }
    let Some(mut merged) = merged else {
        anyhow::bail!("no records to merge");
    };
    if let Some(source) = &config.merge.source {
        merged = merged.with_source(source.clone());
    }
    if let Some(key) = &config.merge.source_key {
        merged = merged.with_source_key(key.clone());
    }
    let count = merged.merged();
    let table = merged.finish()?;

    let staged = StagedOutput::new(&args.output)?;
    let out = StoreLocation {
        kind: output_kind.unwrap_or(kind),
        path: staged.path().to_path_buf(),
    };
    let reference = write_store(&out, &table)?;
    let output = staged.commit()?;
    println!(
        "✓ Merged {count} records into {}:{} (record {reference})",
        out.kind,
        output.display()
    );
    Ok(())
}
