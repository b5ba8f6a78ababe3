//! SQLite-backed coverage store.
//!
//! Definitions are stored once per database and shared by every run that
//! references them. Runs are addressed by their integer id; readouts query
//! the database lazily, one table slice at a time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bucket_core::{
    Accessor, AxisRow, AxisValueRow, BucketGoalRow, BucketHitRow, CoverageError, CoverageResult,
    GoalRow, PointHitRow, PointRow, Reader, Readout, Writer,
};
use rusqlite::{Connection, OptionalExtension, Params, Row, Transaction, params};
use tracing::debug;

use crate::error::{SqlError, SqlResult, map_err};
use crate::tables::SCHEMA;

/// Thread-safe handle on one SQLite coverage database.
#[derive(Clone)]
pub struct SqlAccessor {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqlAccessor {
    /// Open (or create) a coverage database at the given path.
    pub fn open(path: &Path) -> SqlResult<Self> {
        let conn = Connection::open(path).map_err(map_err!(Open))?;
        let store = Self::with_connection(conn, Some(path.to_path_buf()))?;
        debug!(?path, "sql store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory database (for testing).
    pub fn open_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_err!(Open))?;
        let store = Self::with_connection(conn, None)?;
        debug!("in-memory sql store opened");
        Ok(store)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> SqlResult<Self> {
        conn.execute_batch(SCHEMA).map_err(map_err!(Schema))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> SqlResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(map_err!(Poisoned))
    }

    /// Ids of every run, in insertion order.
    pub fn run_ids(&self) -> SqlResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT run FROM run ORDER BY run")
            .map_err(map_err!(Query))?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(map_err!(Query))?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(map_err!(Query))?;
        Ok(ids)
    }
}

impl Reader for SqlAccessor {
    type Ref = i64;
    type Readout = SqlReadout;
    type Error = SqlError;

    fn read(&self, run: &i64) -> SqlResult<SqlReadout> {
        let header = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT d.definition, d.sha, r.sha, r.source, r.source_key
                 FROM run r JOIN definition d ON d.definition = r.definition
                 WHERE r.run = ?1",
                params![run],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(map_err!(Query))?
        };
        let (definition, def_sha, rec_sha, source, source_key) =
            header.ok_or_else(|| SqlError::NotFound(format!("run {run}")))?;
        Ok(SqlReadout {
            conn: Arc::clone(&self.conn),
            run: *run,
            definition,
            def_sha,
            rec_sha,
            source,
            source_key,
        })
    }

    fn read_all(&self) -> SqlResult<Vec<SqlReadout>> {
        self.run_ids()?.iter().map(|id| self.read(id)).collect()
    }
}

impl Writer for SqlAccessor {
    type Ref = i64;
    type Error = SqlError;

    fn write(&self, readout: &dyn Readout) -> SqlResult<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_err!(Write))?;
        let run = insert_readout(&tx, readout)?;
        tx.commit().map_err(map_err!(Write))?;
        debug!(run, def_sha = %readout.def_sha(), "readout stored");
        Ok(run)
    }
}

impl Accessor for SqlAccessor {
    type Reader = Self;
    type Writer = Self;

    fn reader(&self) -> &Self {
        self
    }

    fn writer(&self) -> &Self {
        self
    }
}

/// Id of the stored definition with this sha, inserting it if needed.
pub(crate) fn ensure_definition(
    tx: &Transaction<'_>,
    readout: &dyn Readout,
) -> SqlResult<(i64, bool)> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT definition FROM definition WHERE sha = ?1",
            params![readout.def_sha()],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_err!(Query))?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    tx.execute(
        "INSERT INTO definition (sha) VALUES (?1)",
        params![readout.def_sha()],
    )
    .map_err(map_err!(Write))?;
    Ok((tx.last_insert_rowid(), true))
}

/// Insert a run row and return its id.
pub(crate) fn insert_run(
    tx: &Transaction<'_>,
    definition: i64,
    rec_sha: &str,
    source: &str,
    source_key: &str,
) -> SqlResult<i64> {
    tx.execute(
        "INSERT INTO run (definition, sha, source, source_key) VALUES (?1, ?2, ?3, ?4)",
        params![definition, rec_sha, source, source_key],
    )
    .map_err(map_err!(Write))?;
    Ok(tx.last_insert_rowid())
}

fn insert_readout(tx: &Transaction<'_>, readout: &dyn Readout) -> SqlResult<i64> {
    let (definition, fresh) = ensure_definition(tx, readout)?;
    if fresh {
        insert_definition_rows(tx, definition, readout)?;
    }
    let run = insert_run(
        tx,
        definition,
        readout.rec_sha(),
        readout.source(),
        readout.source_key(),
    )?;

    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO point_hit (run, position, start, depth, hits, hit_buckets, full_buckets)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(map_err!(Write))?;
    for (position, ph) in readout.point_hits(0, None)?.iter().enumerate() {
        stmt.execute(params![
            run,
            position as i64,
            ph.start as i64,
            ph.depth as i64,
            stored_count(ph.hits)?,
            ph.hit_buckets as i64,
            ph.full_buckets as i64,
        ])
        .map_err(map_err!(Write))?;
    }

    let mut stmt = tx
        .prepare_cached("INSERT INTO bucket_hit (run, start, hits) VALUES (?1, ?2, ?3)")
        .map_err(map_err!(Write))?;
    for bh in readout.bucket_hits(0, None)? {
        stmt.execute(params![run, bh.start as i64, stored_count(bh.hits)?])
            .map_err(map_err!(Write))?;
    }
    Ok(run)
}

fn insert_definition_rows(
    tx: &Transaction<'_>,
    definition: i64,
    readout: &dyn Readout,
) -> SqlResult<()> {
    let mut stmt = tx
        .prepare_cached(
            r#"INSERT INTO point (definition, position, start, depth, "end", axis_start, axis_end,
                axis_value_start, axis_value_end, goal_start, goal_end, bucket_start, bucket_end,
                target, target_buckets, name, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"#,
        )
        .map_err(map_err!(Write))?;
    for (position, p) in readout.points(0, None)?.iter().enumerate() {
        stmt.execute(params![
            definition,
            position as i64,
            p.start as i64,
            p.depth as i64,
            p.end as i64,
            p.axis_start as i64,
            p.axis_end as i64,
            p.axis_value_start as i64,
            p.axis_value_end as i64,
            p.goal_start as i64,
            p.goal_end as i64,
            p.bucket_start as i64,
            p.bucket_end as i64,
            p.target as i64,
            p.target_buckets as i64,
            p.name,
            p.description,
        ])
        .map_err(map_err!(Write))?;
    }

    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO axis (definition, start, value_start, value_end, name, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(map_err!(Write))?;
    for a in readout.axes(0, None)? {
        stmt.execute(params![
            definition,
            a.start as i64,
            a.value_start as i64,
            a.value_end as i64,
            a.name,
            a.description,
        ])
        .map_err(map_err!(Write))?;
    }

    let mut stmt = tx
        .prepare_cached("INSERT INTO axis_value (definition, start, value) VALUES (?1, ?2, ?3)")
        .map_err(map_err!(Write))?;
    for av in readout.axis_values(0, None)? {
        stmt.execute(params![definition, av.start as i64, av.value])
            .map_err(map_err!(Write))?;
    }

    let mut stmt = tx
        .prepare_cached(
            "INSERT INTO goal (definition, start, target, name, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(map_err!(Write))?;
    for g in readout.goals(0, None)? {
        stmt.execute(params![definition, g.start as i64, g.target, g.name, g.description])
            .map_err(map_err!(Write))?;
    }

    let mut stmt = tx
        .prepare_cached("INSERT INTO bucket_goal (definition, start, goal) VALUES (?1, ?2, ?3)")
        .map_err(map_err!(Write))?;
    for bg in readout.bucket_goals(0, None)? {
        stmt.execute(params![definition, bg.start as i64, bg.goal as i64])
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

// ── Readout ────────────────────────────────────────────────────────

/// One run of a SQLite store, read lazily.
pub struct SqlReadout {
    conn: Arc<Mutex<Connection>>,
    run: i64,
    definition: i64,
    def_sha: String,
    rec_sha: String,
    source: String,
    source_key: String,
}

impl SqlReadout {
    pub fn run(&self) -> i64 {
        self.run
    }

    fn query<T, P, F>(&self, sql: &str, params: P, map: F) -> CoverageResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let backend = |e: rusqlite::Error| CoverageError::Backend(e.to_string());
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoverageError::Backend(e.to_string()))?;
        let mut stmt = conn.prepare_cached(sql).map_err(backend)?;
        let rows = stmt
            .query_map(params, map)
            .map_err(backend)?
            .collect::<Result<Vec<T>, _>>()
            .map_err(backend)?;
        Ok(rows)
    }
}

fn bounds(start: usize, end: Option<usize>) -> (i64, i64) {
    (start as i64, end.map_or(i64::MAX, |e| e as i64))
}

fn col(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    Ok(row.get::<_, i64>(idx)? as usize)
}

fn col_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value = row.get::<_, i64>(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// SQLite integers are signed; counts past `i64::MAX` cannot be stored.
fn stored_count(hits: u64) -> SqlResult<i64> {
    i64::try_from(hits)
        .map_err(|_| SqlError::Write(format!("hit count {hits} exceeds the SQLite integer range")))
}

impl Readout for SqlReadout {
    fn def_sha(&self) -> &str {
        &self.def_sha
    }

    fn rec_sha(&self) -> &str {
        &self.rec_sha
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn source_key(&self) -> &str {
        &self.source_key
    }

    fn points(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            r#"SELECT start, depth, "end", axis_start, axis_end, axis_value_start, axis_value_end,
                goal_start, goal_end, bucket_start, bucket_end, target, target_buckets, name, description
             FROM point WHERE definition = ?1 AND position >= ?2 AND position < ?3
             ORDER BY position"#,
            params![self.definition, start, end],
            |row| {
                Ok(PointRow {
                    start: col(row, 0)?,
                    depth: col(row, 1)?,
                    end: col(row, 2)?,
                    axis_start: col(row, 3)?,
                    axis_end: col(row, 4)?,
                    axis_value_start: col(row, 5)?,
                    axis_value_end: col(row, 6)?,
                    goal_start: col(row, 7)?,
                    goal_end: col(row, 8)?,
                    bucket_start: col(row, 9)?,
                    bucket_end: col(row, 10)?,
                    target: col_u64(row, 11)?,
                    target_buckets: col_u64(row, 12)?,
                    name: row.get(13)?,
                    description: row.get(14)?,
                })
            },
        )
    }

    fn axes(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, value_start, value_end, name, description FROM axis
             WHERE definition = ?1 AND start >= ?2 AND start < ?3 ORDER BY start",
            params![self.definition, start, end],
            |row| {
                Ok(AxisRow {
                    start: col(row, 0)?,
                    value_start: col(row, 1)?,
                    value_end: col(row, 2)?,
                    name: row.get(3)?,
                    description: row.get(4)?,
                })
            },
        )
    }

    fn axis_values(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisValueRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, value FROM axis_value
             WHERE definition = ?1 AND start >= ?2 AND start < ?3 ORDER BY start",
            params![self.definition, start, end],
            |row| {
                Ok(AxisValueRow {
                    start: col(row, 0)?,
                    value: row.get(1)?,
                })
            },
        )
    }

    fn goals(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<GoalRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, target, name, description FROM goal
             WHERE definition = ?1 AND start >= ?2 AND start < ?3 ORDER BY start",
            params![self.definition, start, end],
            |row| {
                Ok(GoalRow {
                    start: col(row, 0)?,
                    target: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                })
            },
        )
    }

    fn bucket_goals(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> CoverageResult<Vec<BucketGoalRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, goal FROM bucket_goal
             WHERE definition = ?1 AND start >= ?2 AND start < ?3 ORDER BY start",
            params![self.definition, start, end],
            |row| {
                Ok(BucketGoalRow {
                    start: col(row, 0)?,
                    goal: col(row, 1)?,
                })
            },
        )
    }

    fn point_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointHitRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, depth, hits, hit_buckets, full_buckets FROM point_hit
             WHERE run = ?1 AND position >= ?2 AND position < ?3 ORDER BY position",
            params![self.run, start, end],
            |row| {
                Ok(PointHitRow {
                    start: col(row, 0)?,
                    depth: col(row, 1)?,
                    hits: col_u64(row, 2)?,
                    hit_buckets: col_u64(row, 3)?,
                    full_buckets: col_u64(row, 4)?,
                })
            },
        )
    }

    fn bucket_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<BucketHitRow>> {
        let (start, end) = bounds(start, end);
        self.query(
            "SELECT start, hits FROM bucket_hit
             WHERE run = ?1 AND start >= ?2 AND start < ?3 ORDER BY start",
            params![self.run, start, end],
            |row| {
                Ok(BucketHitRow {
                    start: col(row, 0)?,
                    hits: col_u64(row, 1)?,
                })
            },
        )
    }
}
