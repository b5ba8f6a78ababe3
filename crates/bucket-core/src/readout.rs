//! The readout boundary between the core and storage backends.
//!
//! A [`Readout`] is a read-only view of one definition plus one record.
//! Every table is fetched by row range so callers can pull only the slice
//! they need (for example the points under one group).

use std::sync::Arc;

use crate::definition::Definition;
use crate::error::CoverageResult;
use crate::types::*;

pub trait Readout {
    fn def_sha(&self) -> &str;
    fn rec_sha(&self) -> &str;
    fn source(&self) -> &str;
    fn source_key(&self) -> &str;

    fn points(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointRow>>;
    fn axes(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisRow>>;
    fn axis_values(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisValueRow>>;
    fn goals(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<GoalRow>>;
    fn bucket_goals(&self, start: usize, end: Option<usize>)
    -> CoverageResult<Vec<BucketGoalRow>>;
    fn point_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointHitRow>>;
    fn bucket_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<BucketHitRow>>;

    /// Load every definition table.
    fn definition(&self) -> CoverageResult<Definition> {
        Ok(Definition {
            sha: self.def_sha().to_string(),
            points: self.points(0, None)?,
            axes: self.axes(0, None)?,
            axis_values: self.axis_values(0, None)?,
            goals: self.goals(0, None)?,
            bucket_goals: self.bucket_goals(0, None)?,
        })
    }
}

impl<R: Readout + ?Sized> Readout for Box<R> {
    fn def_sha(&self) -> &str {
        (**self).def_sha()
    }
    fn rec_sha(&self) -> &str {
        (**self).rec_sha()
    }
    fn source(&self) -> &str {
        (**self).source()
    }
    fn source_key(&self) -> &str {
        (**self).source_key()
    }
    fn points(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointRow>> {
        (**self).points(start, end)
    }
    fn axes(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisRow>> {
        (**self).axes(start, end)
    }
    fn axis_values(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisValueRow>> {
        (**self).axis_values(start, end)
    }
    fn goals(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<GoalRow>> {
        (**self).goals(start, end)
    }
    fn bucket_goals(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> CoverageResult<Vec<BucketGoalRow>> {
        (**self).bucket_goals(start, end)
    }
    fn point_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointHitRow>> {
        (**self).point_hits(start, end)
    }
    fn bucket_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<BucketHitRow>> {
        (**self).bucket_hits(start, end)
    }
}

/// Reads readouts from one storage location.
pub trait Reader {
    /// Backend-defined handle for one stored record.
    type Ref;
    type Readout: Readout;
    type Error: From<crate::error::CoverageError>;

    fn read(&self, reference: &Self::Ref) -> Result<Self::Readout, Self::Error>;
    fn read_all(&self) -> Result<Vec<Self::Readout>, Self::Error>;
}

/// Persists readouts to one storage location.
pub trait Writer {
    type Ref;
    type Error: From<crate::error::CoverageError>;

    fn write(&self, readout: &dyn Readout) -> Result<Self::Ref, Self::Error>;
}

/// A reader and writer over the same backend location.
pub trait Accessor {
    type Reader: Reader;
    type Writer: Writer;

    fn reader(&self) -> &Self::Reader;
    fn writer(&self) -> &Self::Writer;
}

// ── In-memory readout ──────────────────────────────────────────────

/// A fully materialised readout; definitions are shared between copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReadout {
    pub definition: Arc<Definition>,
    pub rec_sha: String,
    pub source: String,
    pub source_key: String,
    pub point_hits: Vec<PointHitRow>,
    pub bucket_hits: Vec<BucketHitRow>,
}

impl TableReadout {
    /// Copy every table of another readout into memory.
    pub fn snapshot(readout: &dyn Readout) -> CoverageResult<Self> {
        Ok(Self {
            definition: Arc::new(readout.definition()?),
            rec_sha: readout.rec_sha().to_string(),
            source: readout.source().to_string(),
            source_key: readout.source_key().to_string(),
            point_hits: readout.point_hits(0, None)?,
            bucket_hits: readout.bucket_hits(0, None)?,
        })
    }
}

fn page<T: Clone>(rows: &[T], start: usize, end: Option<usize>) -> Vec<T> {
    let (start, end) = page_bounds(rows.len(), start, end);
    rows[start..end].to_vec()
}

impl Readout for TableReadout {
    fn def_sha(&self) -> &str {
        &self.definition.sha
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
        Ok(page(&self.definition.points, start, end))
    }
    fn axes(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisRow>> {
        Ok(page(&self.definition.axes, start, end))
    }
    fn axis_values(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<AxisValueRow>> {
        Ok(page(&self.definition.axis_values, start, end))
    }
    fn goals(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<GoalRow>> {
        Ok(page(&self.definition.goals, start, end))
    }
    fn bucket_goals(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> CoverageResult<Vec<BucketGoalRow>> {
        Ok(page(&self.definition.bucket_goals, start, end))
    }
    fn point_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<PointHitRow>> {
        Ok(page(&self.point_hits, start, end))
    }
    fn bucket_hits(&self, start: usize, end: Option<usize>) -> CoverageResult<Vec<BucketHitRow>> {
        Ok(page(&self.bucket_hits, start, end))
    }

    fn definition(&self) -> CoverageResult<Definition> {
        Ok((*self.definition).clone())
    }
}
