//! bucket.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoverageError, CoverageResult};

/// Upper bound on default worker count.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Input count above which archive merges switch to batches.
pub const DEFAULT_BATCH_THRESHOLD: usize = 100;

/// Smallest usable attach limit: one batch must merge at least two inputs
/// while leaving a slot for the intermediate of the next batch.
pub const MIN_MAX_ATTACH: usize = 3;

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "bucket=info";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub merge: MergeSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSection {
    /// Parallel merge units; defaults to the CPU count, at most 8.
    pub workers: Option<usize>,
    /// Attach limit for direct SQL merges; discovered from SQLite when unset.
    pub max_attach: Option<usize>,
    pub batch_threshold: Option<usize>,
    /// Inputs per batch; chosen from the input count when unset.
    pub batch_size: Option<usize>,
    pub source: Option<String>,
    pub source_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub filter: Option<String>,
}

impl BucketConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BucketConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> CoverageResult<()> {
        let m = &self.merge;
        if m.workers == Some(0) {
            return Err(CoverageError::Config("merge.workers must be at least 1".into()));
        }
        if m.max_attach.is_some_and(|n| n < MIN_MAX_ATTACH) {
            return Err(CoverageError::Config(format!(
                "merge.max_attach must be at least {MIN_MAX_ATTACH}"
            )));
        }
        if m.batch_size.is_some_and(|n| n < 2) {
            return Err(CoverageError::Config("merge.batch_size must be at least 2".into()));
        }
        Ok(())
    }

    pub fn workers(&self) -> usize {
        self.merge.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map_or(1, |n| n.get())
                .min(DEFAULT_MAX_WORKERS)
        })
    }

    pub fn batch_threshold(&self) -> usize {
        self.merge.batch_threshold.unwrap_or(DEFAULT_BATCH_THRESHOLD)
    }

    pub fn log_filter(&self) -> &str {
        self.log.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
