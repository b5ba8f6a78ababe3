//! Archive merge driver.
//!
//! Each input archive is one unit of work: its records' bucket hits are
//! parsed on the fast path and folded into a single running merge as units
//! complete. The definition is loaded once, from the first input; every
//! other record is checked against it by fingerprint only.
//!
//! Above the batch threshold, inputs are first merged batch by batch into
//! temporary archives, level by level, until few enough remain.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bucket_core::batch::{auto_batch_size, levels, partition};
use bucket_core::config::DEFAULT_BATCH_THRESHOLD;
use bucket_core::staging::remove_path;
use bucket_core::{
    BucketConfig, CoverageError, MergeReadout, Reader, Readout, StagedOutput, WorkerPool, Writer,
};
use tracing::{debug, info};

use crate::error::{ArchiveError, ArchiveResult};
use crate::store::ArchiveAccessor;

/// Options for [`merge_archives`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveMergeOptions {
    pub workers: Option<usize>,
    /// Input count above which inputs are merged in batches first.
    pub batch_threshold: Option<usize>,
    /// Inputs per batch; `ceil(sqrt(n))` when unset.
    pub batch_size: Option<usize>,
    pub source: Option<String>,
    pub source_key: Option<String>,
}

impl ArchiveMergeOptions {
    pub fn from_config(config: &BucketConfig) -> Self {
        Self {
            workers: Some(config.workers()),
            batch_threshold: Some(config.batch_threshold()),
            batch_size: config.merge.batch_size,
            source: config.merge.source.clone(),
            source_key: config.merge.source_key.clone(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_batch_threshold(mut self, threshold: usize) -> Self {
        self.batch_threshold = Some(threshold);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_source_key(mut self, source_key: impl Into<String>) -> Self {
        self.source_key = Some(source_key.into());
        self
    }
}

/// Raw hits of one archived record.
struct RecordHits {
    def_sha: String,
    rec_sha: String,
    hits: Vec<u64>,
}

/// Merge every record of every input archive into a new archive at
/// `output`, returning the merged record's reference.
pub async fn merge_archives(
    output: &Path,
    inputs: &[PathBuf],
    options: &ArchiveMergeOptions,
) -> ArchiveResult<u64> {
    if inputs.is_empty() {
        return Err(CoverageError::NoInputs.into());
    }
    let pool = options.workers.map_or_else(WorkerPool::available, WorkerPool::new);
    let threshold = options.batch_threshold.unwrap_or(DEFAULT_BATCH_THRESHOLD).max(1);
    let batch_size = |n: usize| options.batch_size.unwrap_or_else(|| auto_batch_size(n)).max(2);
    let planned = levels(inputs.len(), threshold, batch_size);
    info!(
        inputs = inputs.len(),
        threshold,
        levels = planned,
        workers = pool.workers(),
        "starting archive merge"
    );

    let workspace = tempfile::tempdir()?;
    let mut current = inputs.to_vec();
    let mut previous_level: Option<PathBuf> = None;
    let mut level = 0;
    while current.len() > threshold {
        let size = batch_size(current.len());
        let level_dir = workspace.path().join(format!("level-{level}"));
        fs::create_dir(&level_dir)?;
        let jobs: Vec<(PathBuf, Vec<PathBuf>)> = partition(current, size)
            .into_iter()
            .enumerate()
            .map(|(i, batch)| (level_dir.join(format!("batch-{i:05}")), batch))
            .collect();
        debug!(level, batches = jobs.len(), size, "archive batches planned");
        current = pool
            .map(jobs, |(out, batch)| {
                let merged = merge_sequential(&batch)?.with_source("").finish()?;
                ArchiveAccessor::new(&out).write(&merged)?;
                Ok::<_, ArchiveError>(out)
            })
            .await?;
        current.sort();
        if let Some(dir) = previous_level.replace(level_dir) {
            remove_path(&dir)?;
        }
        info!(level, intermediates = current.len(), "archive batch level merged");
        level += 1;
    }
    debug_assert_eq!(level, planned);

    let first = current[0].clone();
    let initial = tokio::task::spawn_blocking(move || seed(&first))
        .await
        .map_err(|e| CoverageError::Worker(e.to_string()))??;
    let merged = pool
        .fold(
            current,
            initial,
            |path: PathBuf| input_hits(&path),
            |mut acc, records: Vec<RecordHits>| {
                for record in &records {
                    acc.merge_hits(&record.def_sha, &record.rec_sha, &record.hits)?;
                }
                Ok(acc)
            },
        )
        .await?;
    let merged = match &options.source {
        Some(source) => merged.with_source(source.clone()),
        None => merged,
    };
    let merged = merged.with_source_key(options.source_key.clone().unwrap_or_default());
    let records = merged.merged();
    let table = merged.finish()?;

    let staged = StagedOutput::new(output)?;
    let staging = staged.path().to_path_buf();
    let reference = tokio::task::spawn_blocking(move || ArchiveAccessor::new(staging).write(&table))
        .await
        .map_err(|e| CoverageError::Worker(e.to_string()))??;
    let output = staged.commit()?;
    info!(?output, records, levels = level, "archive merge complete");
    Ok(reference)
}

/// An empty merge over the definition of the first record in `path`.
fn seed(path: &Path) -> ArchiveResult<MergeReadout> {
    let readouts = ArchiveAccessor::new(path).read_all()?;
    let first = readouts
        .first()
        .ok_or_else(|| CoverageError::Malformed(format!("{} holds no records", path.display())))?;
    let definition = Arc::new(first.definition()?);
    debug!(?path, def_sha = %definition.sha, "definition loaded");
    Ok(MergeReadout::from_definition(definition, first.rec_sha()))
}

/// Raw hits of every record in one archive.
fn input_hits(path: &Path) -> ArchiveResult<Vec<RecordHits>> {
    let readouts = ArchiveAccessor::new(path).read_all()?;
    if readouts.is_empty() {
        return Err(CoverageError::Malformed(format!("{} holds no records", path.display())).into());
    }
    let records = readouts
        .iter()
        .map(|r| {
            Ok(RecordHits {
                def_sha: r.def_sha().to_string(),
                rec_sha: r.rec_sha().to_string(),
                hits: r.raw_bucket_hits()?,
            })
        })
        .collect::<ArchiveResult<Vec<_>>>()?;
    debug!(?path, records = records.len(), "archive hits parsed");
    Ok(records)
}

/// Merge a batch of archives on the current thread.
fn merge_sequential(paths: &[PathBuf]) -> ArchiveResult<MergeReadout> {
    let first = paths.first().ok_or(CoverageError::NoInputs)?;
    let mut merged = seed(first)?;
    for path in paths {
        for record in input_hits(path)? {
            merged.merge_hits(&record.def_sha, &record.rec_sha, &record.hits)?;
        }
    }
    Ok(merged)
}
