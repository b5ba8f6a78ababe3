//! Direct-attach merge driver.
//!
//! Inputs are ATTACHed to the output database and merged entirely in SQL:
//! definition rows are copied from the first input, bucket hits are summed
//! with one grouped `UNION ALL`, and point hits are recomputed from the
//! merged bucket hits. SQLite caps how many databases can be attached at
//! once, so larger input sets are first merged in batches into temporary
//! stores, level by level, until one attach suffices.

use std::fs;
use std::path::{Path, PathBuf};

use bucket_core::batch::{levels, partition};
use bucket_core::config::MIN_MAX_ATTACH;
use bucket_core::merge::default_source;
use bucket_core::staging::remove_path;
use bucket_core::{
    BucketConfig, CoverageError, MergeReadout, Reader, StagedOutput, WorkerPool,
};
use rusqlite::limits::Limit;
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{SqlError, SqlResult, map_err};
use crate::store::{SqlAccessor, insert_run};
use crate::tables::{DEFINITION_TABLES, SCHEMA};

/// Attach limit assumed when SQLite cannot report one.
pub const FALLBACK_MAX_ATTACH: usize = 10;

/// Options for [`merge_sql_direct`].
#[derive(Debug, Clone, Default)]
pub struct SqlMergeOptions {
    pub workers: Option<usize>,
    /// Cap on simultaneously attached inputs; never above SQLite's own limit
    /// and never below [`MIN_MAX_ATTACH`].
    pub max_attach: Option<usize>,
    pub source: Option<String>,
    pub source_key: Option<String>,
}

impl SqlMergeOptions {
    pub fn from_config(config: &BucketConfig) -> Self {
        Self {
            workers: Some(config.workers()),
            max_attach: config.merge.max_attach,
            source: config.merge.source.clone(),
            source_key: config.merge.source_key.clone(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_max_attach(mut self, max_attach: usize) -> Self {
        self.max_attach = Some(max_attach);
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

/// How many databases SQLite lets one connection attach.
pub fn discover_max_attach() -> usize {
    match Connection::open_in_memory() {
        Ok(conn) => {
            let limit = conn.limit(Limit::SQLITE_LIMIT_ATTACHED);
            if limit >= MIN_MAX_ATTACH as i32 {
                limit as usize
            } else {
                FALLBACK_MAX_ATTACH
            }
        }
        Err(_) => FALLBACK_MAX_ATTACH,
    }
}

/// Merge every run of every input database into a fresh database at
/// `output`, returning the id of the merged run.
///
/// The output is built beside its final path and only swapped in once the
/// merge succeeds; any failure leaves no output behind.
pub async fn merge_sql_direct(
    output: &Path,
    inputs: &[PathBuf],
    options: &SqlMergeOptions,
) -> SqlResult<i64> {
    if inputs.is_empty() {
        return Err(CoverageError::NoInputs.into());
    }
    let discovered = discover_max_attach();
    let max_attach = options
        .max_attach
        .map_or(discovered, |n| n.min(discovered))
        .max(MIN_MAX_ATTACH);
    let batch_size = max_attach - 1;
    let planned = levels(inputs.len(), max_attach, |_| batch_size);
    let pool = options.workers.map_or_else(WorkerPool::available, WorkerPool::new);
    info!(
        inputs = inputs.len(),
        max_attach,
        levels = planned,
        workers = pool.workers(),
        "starting direct sql merge"
    );

    let workspace = tempfile::tempdir()?;
    let mut current = inputs.to_vec();
    let mut previous_level: Option<PathBuf> = None;
    let mut level = 0;
    while current.len() > max_attach {
        let level_dir = workspace.path().join(format!("level-{level}"));
        fs::create_dir(&level_dir)?;
        let jobs: Vec<(PathBuf, Vec<PathBuf>)> = partition(current, batch_size)
            .into_iter()
            .enumerate()
            .map(|(i, batch)| (level_dir.join(format!("batch-{i:05}.db")), batch))
            .collect();
        debug!(level, batches = jobs.len(), "sql batches planned");
        current = pool
            .map(jobs, |(out, batch)| {
                merge_attached(&out, &batch, "", "")?;
                Ok::<_, SqlError>(out)
            })
            .await?;
        current.sort();
        if let Some(dir) = previous_level.replace(level_dir) {
            remove_path(&dir)?;
        }
        info!(level, intermediates = current.len(), "sql batch level merged");
        level += 1;
    }
    debug_assert_eq!(level, planned);

    let staged = StagedOutput::new(output)?;
    let staging = staged.path().to_path_buf();
    let source = options.source.clone().unwrap_or_else(default_source);
    let source_key = options.source_key.clone().unwrap_or_default();
    let run = tokio::task::spawn_blocking(move || {
        merge_attached(&staging, &current, &source, &source_key)
    })
    .await
    .map_err(|e| CoverageError::Worker(e.to_string()))??;
    let output = staged.commit()?;
    info!(?output, run, levels = level, "direct sql merge complete");
    Ok(run)
}

/// Merge `inputs` into a new database at `out` in one attach. Blocking.
fn merge_attached(out: &Path, inputs: &[PathBuf], source: &str, source_key: &str) -> SqlResult<i64> {
    let mut conn = Connection::open(out).map_err(map_err!(Open))?;
    conn.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF;")
        .map_err(map_err!(Open))?;
    conn.execute_batch(SCHEMA).map_err(map_err!(Schema))?;

    for (i, input) in inputs.iter().enumerate() {
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS in{i}"),
            params![input.to_string_lossy()],
        )
        .map_err(|e| SqlError::Attach(format!("{}: {e}", input.display())))?;
    }

    let (def_sha, rec_sha) = validate_attached(&conn, inputs)?;

    let tx = conn.transaction().map_err(map_err!(Write))?;
    tx.execute("INSERT INTO main.definition (sha) VALUES (?1)", params![def_sha])
        .map_err(map_err!(Write))?;
    let definition = tx.last_insert_rowid();
    let source_definition: i64 = tx
        .query_row(
            "SELECT definition FROM in0.definition WHERE sha = ?1",
            params![def_sha],
            |row| row.get(0),
        )
        .map_err(map_err!(Query))?;
    for (table, columns) in DEFINITION_TABLES {
        tx.execute(
            &format!(
                "INSERT INTO main.{table} (definition, {columns})
                 SELECT ?1, {columns} FROM in0.{table} WHERE definition = ?2"
            ),
            params![definition, source_definition],
        )
        .map_err(map_err!(Write))?;
    }

    let run = insert_run(&tx, definition, &rec_sha, source, source_key)?;

    let union = (0..inputs.len())
        .map(|i| format!("SELECT start, hits FROM in{i}.bucket_hit"))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    tx.execute(
        &format!(
            "INSERT INTO main.bucket_hit (run, start, hits)
             SELECT ?1, start, SUM(hits) FROM ({union}) GROUP BY start"
        ),
        params![run],
    )
    .map_err(map_err!(Write))?;

    tx.execute(
        "INSERT INTO main.point_hit (run, position, start, depth, hits, hit_buckets, full_buckets)
         SELECT ?1, p.position, p.start, p.depth,
             COALESCE(SUM(CASE WHEN g.target > 0 AND bh.hits > 0
                 THEN MIN(bh.hits, g.target) ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN g.target > 0 AND bh.hits > 0 THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN g.target > 0 AND bh.hits >= g.target THEN 1 ELSE 0 END), 0)
         FROM main.point p
         LEFT JOIN main.bucket_goal bg
             ON bg.definition = p.definition
             AND bg.start >= p.bucket_start AND bg.start < p.bucket_end
         LEFT JOIN main.goal g ON g.definition = p.definition AND g.start = bg.goal
         LEFT JOIN main.bucket_hit bh ON bh.run = ?1 AND bh.start = bg.start
         WHERE p.definition = ?2
         GROUP BY p.position, p.start, p.depth",
        params![run, definition],
    )
    .map_err(map_err!(Write))?;

    tx.commit().map_err(map_err!(Write))?;
    debug!(?out, inputs = inputs.len(), run, "attached inputs merged");
    Ok(run)
}

/// Check that every run of every attached input shares one definition and
/// context fingerprint, returning that pair.
fn validate_attached(conn: &Connection, inputs: &[PathBuf]) -> SqlResult<(String, String)> {
    let mut expected: Option<(String, String)> = None;
    for (i, input) in inputs.iter().enumerate() {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT d.sha, r.sha FROM in{i}.run r
                 JOIN in{i}.definition d ON d.definition = r.definition
                 ORDER BY r.run"
            ))
            .map_err(|e| CoverageError::Malformed(format!("{}: {e}", input.display())))?;
        let shas = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(map_err!(Query))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err!(Query))?;
        if shas.is_empty() {
            return Err(CoverageError::Malformed(format!("{} holds no runs", input.display())).into());
        }
        for (def_sha, rec_sha) in shas {
            let Some((want_def, want_rec)) = &expected else {
                expected = Some((def_sha, rec_sha));
                continue;
            };
            if *want_def != def_sha {
                return Err(CoverageError::IncompatibleDefinition {
                    expected: want_def.clone(),
                    found: def_sha,
                }
                .into());
            }
            if *want_rec != rec_sha {
                return Err(CoverageError::IncompatibleContext {
                    expected: want_rec.clone(),
                    found: rec_sha,
                }
                .into());
            }
        }
    }
    expected.ok_or_else(|| CoverageError::NoInputs.into())
}

/// Read every run of every file and fold them with the in-memory merge engine.
pub fn merge_sql_files(paths: &[PathBuf]) -> SqlResult<MergeReadout> {
    let mut merged: Option<MergeReadout> = None;
    for path in paths {
        let store = SqlAccessor::open(path)?;
        let readouts = store.read_all()?;
        if readouts.is_empty() {
            return Err(CoverageError::Malformed(format!("{} holds no runs", path.display())).into());
        }
        for readout in &readouts {
            match merged.as_mut() {
                Some(m) => m.merge(readout)?,
                None => merged = Some(MergeReadout::new(readout)?),
            }
        }
        debug!(?path, runs = readouts.len(), "sql file folded");
    }
    merged.ok_or_else(|| CoverageError::NoInputs.into())
}
