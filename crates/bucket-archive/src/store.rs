//! Directory-of-line-files coverage store.
//!
//! Layout of one archive directory:
//!
//! - `point`, `axis`, `axis_value`, `goal`, `bucket_goal`, `point_hit`:
//!   one JSON row per line
//! - `bucket_hit`: one decimal count per line
//! - `definition`: one line per distinct definition, holding its sha and the
//!   spans of its rows in each definition table
//! - `record`: one line per record, holding its context sha, provenance, the
//!   byte offset of its definition line and the spans of its hit rows
//!
//! A record is referenced by the byte offset of its line in `record`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bucket_core::inputs::ARCHIVE_MARKER;
use bucket_core::{
    Accessor, AxisRow, AxisValueRow, BucketGoalRow, BucketHitRow, CoverageResult, GoalRow,
    PointHitRow, PointRow, Reader, Readout, Writer, page_bounds,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult, map_err};
use crate::format::{self, Span};

pub const DEFINITION_FILE: &str = "definition";
pub const RECORD_FILE: &str = ARCHIVE_MARKER;
pub const POINT_FILE: &str = "point";
pub const AXIS_FILE: &str = "axis";
pub const AXIS_VALUE_FILE: &str = "axis_value";
pub const GOAL_FILE: &str = "goal";
pub const BUCKET_GOAL_FILE: &str = "bucket_goal";
pub const POINT_HIT_FILE: &str = "point_hit";
pub const BUCKET_HIT_FILE: &str = "bucket_hit";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DefinitionEntry {
    pub sha: String,
    pub point: Span,
    pub axis: Span,
    pub axis_value: Span,
    pub goal: Span,
    pub bucket_goal: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordEntry {
    pub sha: String,
    pub definition: u64,
    pub source: String,
    pub source_key: String,
    pub point_hit: Span,
    pub bucket_hit: Span,
}

/// Reader and writer over one archive directory.
#[derive(Debug)]
pub struct ArchiveAccessor {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ArchiveAccessor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offsets of every record, in write order.
    pub fn record_refs(&self) -> ArchiveResult<Vec<u64>> {
        let rows: Vec<(u64, RecordEntry)> =
            format::read_json_indexed(&self.path.join(RECORD_FILE))?;
        Ok(rows.into_iter().map(|(offset, _)| offset).collect())
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn find_definition(&self, sha: &str) -> ArchiveResult<Option<u64>> {
        let rows: Vec<(u64, DefinitionEntry)> =
            format::read_json_indexed(&self.file(DEFINITION_FILE))?;
        Ok(rows
            .into_iter()
            .find(|(_, entry)| entry.sha == sha)
            .map(|(offset, _)| offset))
    }

    fn write_definition(&self, readout: &dyn Readout) -> ArchiveResult<u64> {
        let cov = ArchiveError::Coverage;
        let entry = DefinitionEntry {
            sha: readout.def_sha().to_string(),
            point: format::append_json(&self.file(POINT_FILE), &readout.points(0, None).map_err(cov)?)?,
            axis: format::append_json(&self.file(AXIS_FILE), &readout.axes(0, None).map_err(cov)?)?,
            axis_value: format::append_json(
                &self.file(AXIS_VALUE_FILE),
                &readout.axis_values(0, None).map_err(cov)?,
            )?,
            goal: format::append_json(&self.file(GOAL_FILE), &readout.goals(0, None).map_err(cov)?)?,
            bucket_goal: format::append_json(
                &self.file(BUCKET_GOAL_FILE),
                &readout.bucket_goals(0, None).map_err(cov)?,
            )?,
        };
        let span = format::append_json(&self.file(DEFINITION_FILE), &[entry])?;
        debug!(path = ?self.path, def_sha = %readout.def_sha(), "definition archived");
        Ok(span.offset)
    }
}

impl Reader for ArchiveAccessor {
    type Ref = u64;
    type Readout = ArchiveReadout;
    type Error = ArchiveError;

    fn read(&self, reference: &u64) -> ArchiveResult<ArchiveReadout> {
        let record: RecordEntry = format::read_json_at(&self.file(RECORD_FILE), *reference)?;
        let definition: DefinitionEntry =
            format::read_json_at(&self.file(DEFINITION_FILE), record.definition)?;
        Ok(ArchiveReadout {
            path: self.path.clone(),
            reference: *reference,
            record,
            definition,
        })
    }

    fn read_all(&self) -> ArchiveResult<Vec<ArchiveReadout>> {
        self.record_refs()?.iter().map(|r| self.read(r)).collect()
    }
}

impl Writer for ArchiveAccessor {
    type Ref = u64;
    type Error = ArchiveError;

    fn write(&self, readout: &dyn Readout) -> ArchiveResult<u64> {
        let _guard = self.lock.lock().map_err(map_err!(Poisoned))?;
        std::fs::create_dir_all(&self.path)?;
        let definition = match self.find_definition(readout.def_sha())? {
            Some(offset) => offset,
            None => self.write_definition(readout)?,
        };
        let point_hit = format::append_json(
            &self.file(POINT_HIT_FILE),
            &readout.point_hits(0, None).map_err(ArchiveError::Coverage)?,
        )?;
        let bucket_hit = format::append_counts(
            &self.file(BUCKET_HIT_FILE),
            readout
                .bucket_hits(0, None)
                .map_err(ArchiveError::Coverage)?
                .into_iter()
                .map(|h| h.hits),
        )?;
        let entry = RecordEntry {
            sha: readout.rec_sha().to_string(),
            definition,
            source: readout.source().to_string(),
            source_key: readout.source_key().to_string(),
            point_hit,
            bucket_hit,
        };
        let reference = format::append_json(&self.file(RECORD_FILE), &[entry])?.offset;
        debug!(path = ?self.path, reference, "record archived");
        Ok(reference)
    }
}

impl Accessor for ArchiveAccessor {
    type Reader = Self;
    type Writer = Self;

    fn reader(&self) -> &Self {
        self
    }

    fn writer(&self) -> &Self {
        self
    }
}

// ── Readout ────────────────────────────────────────────────────────

/// One archived record; table slices are read from disk on demand.
#[derive(Debug, Clone)]
pub struct ArchiveReadout {
    path: PathBuf,
    reference: u64,
    record: RecordEntry,
    definition: DefinitionEntry,
}

impl ArchiveReadout {
    pub fn reference(&self) -> u64 {
        self.reference
    }

    /// Raw bucket hits in bucket order.
    pub fn raw_bucket_hits(&self) -> ArchiveResult<Vec<u64>> {
        let path = self.path.join(BUCKET_HIT_FILE);
        let bytes = format::read_span(&path, self.record.bucket_hit)?;
        format::parse_counts(&path, &bytes)
    }

    fn rows<T: DeserializeOwned>(
        &self,
        file: &str,
        span: Span,
        start: usize,
        end: Option<usize>,
    ) -> CoverageResult<Vec<T>> {
        format::read_json(&self.path.join(file), span, start, end)
            .map_err(ArchiveError::into_coverage)
    }
}

impl Readout for ArchiveReadout {
    fn def_sha(&self) -> &str {
        &self.definition.sha
    }

    fn rec_sha(&self) -> &str {
        &self.record.sha
    }

    fn source(&self) -> &str {
        &self.record.source
    }

    fn source_key(&self) -> &str {
        &self.record.source_key
    }

    fn points(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointRow>> {
        self.rows(POINT_FILE, self.definition.point, start, end)
    }

    fn axes(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisRow>> {
        self.rows(AXIS_FILE, self.definition.axis, start, end)
    }

    fn axis_values(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisValueRow>> {
        self.rows(AXIS_VALUE_FILE, self.definition.axis_value, start, end)
    }

    fn goals(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<GoalRow>> {
        self.rows(GOAL_FILE, self.definition.goal, start, end)
    }

    fn bucket_goals(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> CoverageResult<Vec<BucketGoalRow>> {
        self.rows(BUCKET_GOAL_FILE, self.definition.bucket_goal, start, end)
    }

    fn point_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointHitRow>> {
        self.rows(POINT_HIT_FILE, self.record.point_hit, start, end)
    }

    fn bucket_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<BucketHitRow>> {
        let hits = self.raw_bucket_hits().map_err(ArchiveError::into_coverage)?;
        let (start, end) = page_bounds(hits.len(), start, end);
        Ok(hits[start..end]
            .iter()
            .enumerate()
            .map(|(i, &hits)| BucketHitRow {
                start: start + i,
                hits,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket_core::{Axis, CoverGroup, CoverNode, CoverPoint, Goal, Recorder, TableReadout};

    fn tree(values: &[&str]) -> CoverNode {
        CoverGroup::new("top", "the top")
            .with(
                CoverPoint::new("p", "")
                    .with_axis(Axis::new("x", "an axis").with_values(values.iter().copied()).unwrap())
                    .unwrap()
                    .with_goal(Goal::illegal("never", ""))
                    .unwrap()
                    .with_classifier(|b| (b.get("x") == Some("z")).then(|| "never".into())),
            )
            .unwrap()
            .with(CoverPoint::new("q", ""))
            .unwrap()
            .into()
    }

    fn recorded(values: &[&str], hits: &[u64], source: &str) -> TableReadout {
        let mut rec = Recorder::new(tree(values)).unwrap().with_source(source, "k");
        rec.set_hits(hits).unwrap();
        rec.readout("ctx").unwrap()
    }

    #[test]
    fn write_then_read_preserves_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveAccessor::new(dir.path().join("run"));
        let original = recorded(&["a", "z"], &[4, 0, 2], "nightly");
        let reference = archive.write(&original).unwrap();
        assert_eq!(reference, 0);
        let back = TableReadout::snapshot(&archive.read(&reference).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn definitions_are_written_once_per_sha() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveAccessor::new(dir.path());
        archive.write(&recorded(&["a", "z"], &[1, 0, 0], "one")).unwrap();
        archive.write(&recorded(&["a", "z"], &[2, 0, 0], "two")).unwrap();
        archive.write(&recorded(&["a", "b", "z"], &[0, 0, 0, 1], "three")).unwrap();

        let defs: Vec<(u64, DefinitionEntry)> =
            format::read_json_indexed(&dir.path().join(DEFINITION_FILE)).unwrap();
        assert_eq!(defs.len(), 2);

        let readouts = archive.read_all().unwrap();
        let sources: Vec<_> = readouts.iter().map(|r| r.source()).collect();
        assert_eq!(sources, vec!["one", "two", "three"]);
        assert_eq!(readouts[0].def_sha(), readouts[1].def_sha());
        assert_ne!(readouts[0].def_sha(), readouts[2].def_sha());
        assert_eq!(readouts[2].raw_bucket_hits().unwrap(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn slices_are_paged() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveAccessor::new(dir.path());
        let reference = archive.write(&recorded(&["a", "z"], &[5, 0, 7], "s")).unwrap();
        let readout = archive.read(&reference).unwrap();
        let points = readout.points(1, None).unwrap();
        assert_eq!(points.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["p", "q"]);
        let hits = readout.bucket_hits(1, Some(3)).unwrap();
        assert_eq!(hits, vec![BucketHitRow { start: 1, hits: 0 }, BucketHitRow { start: 2, hits: 7 }]);
    }

    #[test]
    fn bad_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArchiveAccessor::new(dir.path());
        archive.write(&recorded(&["a", "z"], &[0, 0, 0], "s")).unwrap();
        let len = std::fs::metadata(dir.path().join(RECORD_FILE)).unwrap().len();
        assert!(archive.read(&len).is_err());
    }
}
