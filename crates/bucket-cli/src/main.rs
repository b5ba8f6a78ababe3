use std::path::{Path, PathBuf};

use anyhow::Context;
use bucket_core::{BucketConfig, InputKind};
use clap::{Parser, Subcommand};
use tracing::debug;

mod commands;

use commands::StoreLocation;
use commands::merge::MergeArgs;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG: &str = "bucket.toml";

#[derive(Parser)]
#[command(
    name = "bucket",
    about = "Bucket: functional coverage merging and conversion",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to bucket.toml (default: ./bucket.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge many coverage stores into one
    Merge {
        #[command(subcommand)]
        driver: MergeDriver,
    },
    /// Copy every record of one store into another.
    ///
    /// Stores are given as <kind>:<path>, where kind is sql, archive or json.
    Convert {
        #[arg(long)]
        from: StoreLocation,
        #[arg(long)]
        to: StoreLocation,
    },
    /// Print fingerprints, provenance and roll-ups of every record
    Info {
        /// Store to inspect, as <kind>:<path>
        store: StoreLocation,
        /// List every point instead of only the top two levels
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum MergeDriver {
    /// Merge SQLite stores by attaching them to the output database
    Sql {
        #[command(flatten)]
        args: MergeArgs,
        /// Most inputs attached at once (default: SQLite's limit)
        #[arg(long)]
        max_attach: Option<usize>,
    },
    /// Merge archive directories on a worker pool
    Archive {
        #[command(flatten)]
        args: MergeArgs,
        /// Inputs per batch (default: square root of the input count)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Input count above which batching starts (default: 100)
        #[arg(long)]
        batch_threshold: Option<usize>,
    },
    /// Read every record into memory and merge
    Memory {
        #[command(flatten)]
        args: MergeArgs,
        /// Kind of the input stores
        #[arg(short, long, default_value = "sql")]
        kind: InputKind,
        /// Kind of the output store (default: same as the inputs)
        #[arg(long)]
        output_kind: Option<InputKind>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BucketConfig> {
    match path {
        Some(path) => BucketConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).is_file() => BucketConfig::from_file(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("failed to load {DEFAULT_CONFIG}")),
        None => Ok(BucketConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(config.log_filter()))?,
        )
        .with_writer(std::io::stderr)
        .init();
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Merge { driver } => match driver {
            MergeDriver::Sql { args, max_attach } => {
                commands::merge::sql(&config, &args, max_attach).await
            }
            MergeDriver::Archive {
                args,
                batch_size,
                batch_threshold,
            } => commands::merge::archive(&config, &args, batch_size, batch_threshold).await,
            MergeDriver::Memory {
                args,
                kind,
                output_kind,
            } => commands::merge::memory(&config, &args, kind, output_kind),
        },
        Commands::Convert { from, to } => commands::convert::convert(&from, &to),
        Commands::Info { store, all } => commands::info::info(&store, all),
    }
}
