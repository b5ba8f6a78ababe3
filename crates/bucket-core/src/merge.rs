//! Merge engine: folds structurally identical records into one.
//!
//! Raw bucket hits are summed without any capping. Point roll-ups are then
//! recomputed from the merged hits, never summed from input roll-ups, since
//! capping at the goal target is not linear.

use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::definition::Definition;
use crate::error::{CoverageError, CoverageResult};
use crate::readout::{Readout, TableReadout};
use crate::types::*;

/// Default provenance for a merged record: `Merged_YYYYmmdd_HHMMSS`.
pub fn default_source() -> String {
    format!("Merged_{}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Roll up raw bucket hits into one row per point.
///
/// For every bucket with a positive target the hit count is capped at that
/// target. Buckets whose target is zero (ignored) or negative (illegal) do
/// not contribute.
pub fn roll_up(
    points: &[PointRow],
    bucket_targets: &[i64],
    bucket_hits: &[u64],
) -> CoverageResult<Vec<PointHitRow>> {
    points
        .iter()
        .map(|point| {
            let range = point.bucket_start..point.bucket_end;
            let (Some(targets), Some(hits)) = (
                bucket_targets.get(range.clone()),
                bucket_hits.get(range),
            ) else {
                return Err(CoverageError::Malformed(format!(
                    "point '{}' spans buckets {}..{} beyond the bucket table",
                    point.name, point.bucket_start, point.bucket_end
                )));
            };
            let mut row = PointHitRow {
                start: point.start,
                depth: point.depth,
                hits: 0,
                hit_buckets: 0,
                full_buckets: 0,
            };
            for (i, (&target, &hits)) in targets.iter().zip(hits).enumerate() {
                if target <= 0 {
                    continue;
                }
                let target = target as u64;
                let capped = hits.min(target);
                if hits > 0 {
                    row.hit_buckets += 1;
                    row.hits = row.hits.checked_add(capped).ok_or(CoverageError::HitOverflow {
                        bucket: point.bucket_start + i,
                    })?;
                }
                if capped == target {
                    row.full_buckets += 1;
                }
            }
            Ok(row)
        })
        .collect()
}

/// Incremental merge of compatible readouts.
///
/// The first readout fixes the definition and context fingerprints that every
/// later input must match.
#[derive(Debug, Clone)]
pub struct MergeReadout {
    definition: Arc<Definition>,
    rec_sha: String,
    source: Option<String>,
    source_key: String,
    hits: Vec<u64>,
    merged: usize,
}

impl MergeReadout {
    pub fn new(first: &dyn Readout) -> CoverageResult<Self> {
        let definition = Arc::new(first.definition()?);
        Self::with_definition(definition, first)
    }

    /// Start from a definition that is already loaded, validating `first` against it.
    pub fn with_definition(definition: Arc<Definition>, first: &dyn Readout) -> CoverageResult<Self> {
        check_sha(&definition.sha, first.def_sha(), true)?;
        let mut merge = Self::from_definition(definition, first.rec_sha());
        merge.add_hits(first)?;
        Ok(merge)
    }

    /// Start an empty merge for records of `definition` taken in context `rec_sha`.
    pub fn from_definition(definition: Arc<Definition>, rec_sha: impl Into<String>) -> Self {
        Self {
            hits: vec![0; definition.bucket_count()],
            definition,
            rec_sha: rec_sha.into(),
            source: None,
            source_key: String::new(),
            merged: 0,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_source_key(mut self, source_key: impl Into<String>) -> Self {
        self.source_key = source_key.into();
        self
    }

    pub fn def_sha(&self) -> &str {
        &self.definition.sha
    }

    pub fn rec_sha(&self) -> &str {
        &self.rec_sha
    }

    /// Number of readouts folded in so far.
    pub fn merged(&self) -> usize {
        self.merged
    }

    pub fn merge(&mut self, other: &dyn Readout) -> CoverageResult<()> {
        self.check(other.def_sha(), other.rec_sha())?;
        self.add_hits(other)
    }

    /// Fold raw bucket hits that were aggregated elsewhere.
    pub fn merge_hits(&mut self, def_sha: &str, rec_sha: &str, hits: &[u64]) -> CoverageResult<()> {
        self.check(def_sha, rec_sha)?;
        self.add_raw(hits)
    }

    pub fn check(&self, def_sha: &str, rec_sha: &str) -> CoverageResult<()> {
        check_sha(&self.definition.sha, def_sha, true)?;
        check_sha(&self.rec_sha, rec_sha, false)
    }

    fn add_hits(&mut self, readout: &dyn Readout) -> CoverageResult<()> {
        let rows = readout.bucket_hits(0, None)?;
        let hits: Vec<u64> = rows.iter().map(|r| r.hits).collect();
        self.add_raw(&hits)
    }

    fn add_raw(&mut self, hits: &[u64]) -> CoverageResult<()> {
        if hits.len() != self.hits.len() {
            return Err(CoverageError::Malformed(format!(
                "expected {} bucket hits, found {}",
                self.hits.len(),
                hits.len()
            )));
        }
        // Leave the running totals untouched when any bucket would overflow.
        if let Some(bucket) = self
            .hits
            .iter()
            .zip(hits)
            .position(|(total, &h)| total.checked_add(h).is_none())
        {
            return Err(CoverageError::HitOverflow { bucket });
        }
        for (total, &h) in self.hits.iter_mut().zip(hits) {
            *total += h;
        }
        self.merged += 1;
        Ok(())
    }

    /// Recompute point roll-ups and produce the merged readout.
    pub fn finish(self) -> CoverageResult<TableReadout> {
        let targets = self.definition.bucket_targets()?;
        let point_hits = roll_up(&self.definition.points, &targets, &self.hits)?;
        debug!(
            def_sha = %self.definition.sha,
            inputs = self.merged,
            "merge finished"
        );
        Ok(TableReadout {
            definition: self.definition,
            rec_sha: self.rec_sha,
            source: self.source.unwrap_or_else(default_source),
            source_key: self.source_key,
            point_hits,
            bucket_hits: self
                .hits
                .into_iter()
                .enumerate()
                .map(|(start, hits)| BucketHitRow { start, hits })
                .collect(),
        })
    }
}

fn check_sha(expected: &str, found: &str, definition: bool) -> CoverageResult<()> {
    if expected == found {
        return Ok(());
    }
    let (expected, found) = (expected.to_string(), found.to_string());
    Err(if definition {
        CoverageError::IncompatibleDefinition { expected, found }
    } else {
        CoverageError::IncompatibleContext { expected, found }
    })
}

/// Merge any number of readouts in one call.
pub fn merge_readouts<'a, I>(readouts: I) -> CoverageResult<TableReadout>
where
    I: IntoIterator<Item = &'a dyn Readout>,
{
    let mut iter = readouts.into_iter();
    let first = iter.next().ok_or(CoverageError::NoInputs)?;
    let mut merge = MergeReadout::new(first)?;
    for readout in iter {
        merge.merge(readout)?;
    }
    merge.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::goal::Goal;
    use crate::recorder::Recorder;
    use crate::tree::{CoverGroup, CoverPoint};
    use proptest::prelude::*;

    fn quota_tree() -> crate::tree::CoverNode {
        CoverPoint::new("p", "")
            .with_axis(Axis::new("x", "").with_values(["a"]).unwrap())
            .unwrap()
            .with_goal(Goal::target("four", 4, "").unwrap())
            .unwrap()
            .with_classifier(|_| Some("four".into()))
            .into()
    }

    fn readout_with(hits: &[u64]) -> TableReadout {
        let mut recorder = Recorder::new(quota_tree()).unwrap();
        recorder.set_hits(hits).unwrap();
        recorder.readout("ctx").unwrap()
    }

    #[test]
    fn three_plus_three_fills_a_quota_of_four() {
        let a = readout_with(&[3]);
        let b = readout_with(&[3]);
        let merged = merge_readouts([&a as &dyn Readout, &b]).unwrap();
        assert_eq!(merged.bucket_hits, vec![BucketHitRow { start: 0, hits: 6 }]);
        let point = merged.point_hits[0];
        assert_eq!((point.hits, point.hit_buckets, point.full_buckets), (4, 1, 1));
    }

    #[test]
    fn capping_keeps_raw_hits() {
        let a = readout_with(&[7]);
        let merged = merge_readouts([&a as &dyn Readout]).unwrap();
        assert_eq!(merged.bucket_hits[0].hits, 7);
        assert_eq!(merged.point_hits[0].hits, 4);
        assert_eq!(merged.point_hits[0].full_buckets, 1);
    }

    #[test]
    fn ignored_and_illegal_buckets_are_excluded_from_roll_up() {
        let points = vec![PointRow {
            start: 0,
            depth: 0,
            end: 1,
            axis_start: 0,
            axis_end: 1,
            axis_value_start: 0,
            axis_value_end: 3,
            goal_start: 0,
            goal_end: 3,
            bucket_start: 0,
            bucket_end: 3,
            target: 10,
            target_buckets: 1,
            name: "p".into(),
            description: String::new(),
        }];
        let rows = roll_up(&points, &[0, -1, 10], &[5, 9, 0]).unwrap();
        assert_eq!((rows[0].hits, rows[0].hit_buckets, rows[0].full_buckets), (0, 0, 0));
    }

    #[test]
    fn mismatched_definitions_are_rejected() {
        let a = readout_with(&[1]);
        let other: crate::tree::CoverNode = CoverGroup::new("g", "").into();
        let b = Recorder::new(other).unwrap().readout("ctx").unwrap();
        let err = merge_readouts([&a as &dyn Readout, &b]).unwrap_err();
        assert!(matches!(err, CoverageError::IncompatibleDefinition { .. }));
    }

    #[test]
    fn mismatched_contexts_are_rejected() {
        let a = readout_with(&[1]);
        let mut recorder = Recorder::new(quota_tree()).unwrap();
        recorder.set_hits(&[1]).unwrap();
        let b = recorder.readout("other").unwrap();
        let err = merge_readouts([&a as &dyn Readout, &b]).unwrap_err();
        assert!(matches!(err, CoverageError::IncompatibleContext { .. }));
    }

    #[test]
    fn raw_hits_fold_into_an_empty_merge() {
        let a = readout_with(&[2]);
        let mut merge = MergeReadout::from_definition(Arc::clone(&a.definition), "ctx");
        merge.merge_hits(a.def_sha(), "ctx", &[2]).unwrap();
        merge.merge_hits(a.def_sha(), "ctx", &[3]).unwrap();
        assert!(matches!(
            merge.merge_hits(a.def_sha(), "ctx", &[1, 1]),
            Err(CoverageError::Malformed(_))
        ));
        assert_eq!(merge.merged(), 2);
        let out = merge.finish().unwrap();
        assert_eq!(out.bucket_hits[0].hits, 5);
        assert_eq!(out.point_hits[0].hits, 4);
    }

    #[test]
    fn overflowing_hit_totals_are_rejected() {
        let a = readout_with(&[u64::MAX]);
        let b = readout_with(&[u64::MAX]);
        let err = merge_readouts([&a as &dyn Readout, &b]).unwrap_err();
        assert!(matches!(err, CoverageError::HitOverflow { bucket: 0 }));

        let mut merge = MergeReadout::new(&a).unwrap();
        assert!(merge.merge_hits(a.def_sha(), "ctx", &[1]).is_err());
        assert_eq!(merge.merged(), 1);
        let out = merge.finish().unwrap();
        assert_eq!(out.bucket_hits[0].hits, u64::MAX);
        assert_eq!(out.point_hits[0].hits, 4);
    }

    #[test]
    fn no_inputs_is_an_error() {
        let none: Vec<&dyn Readout> = Vec::new();
        assert!(matches!(merge_readouts(none), Err(CoverageError::NoInputs)));
    }

    #[test]
    fn provenance_defaults() {
        let a = readout_with(&[1]);
        let merged = merge_readouts([&a as &dyn Readout]).unwrap();
        assert!(merged.source.starts_with("Merged_"));
        assert_eq!(merged.source.len(), "Merged_YYYYmmdd_HHMMSS".len());
        assert_eq!(merged.source_key, "");

        let named = MergeReadout::new(&a)
            .unwrap()
            .with_source("nightly")
            .with_source_key("42")
            .finish()
            .unwrap();
        assert_eq!((named.source.as_str(), named.source_key.as_str()), ("nightly", "42"));
    }

    fn wide_tree() -> crate::tree::CoverNode {
        CoverGroup::new("top", "")
            .with(
                CoverPoint::new("p", "")
                    .with_axis(Axis::new("x", "").with_values([0, 1, 2]).unwrap())
                    .unwrap()
                    .with_goal(Goal::target("two", 2, "").unwrap())
                    .unwrap()
                    .with_goal(Goal::illegal("bad", ""))
                    .unwrap()
                    .with_classifier(|b| match b.get("x") {
                        Some("0") => Some("two".into()),
                        Some("2") => Some("bad".into()),
                        _ => None,
                    }),
            )
            .unwrap()
            .with(
                CoverPoint::new("q", "")
                    .with_axis(Axis::new("y", "").with_values(["l", "r"]).unwrap())
                    .unwrap(),
            )
            .unwrap()
            .into()
    }

    proptest! {
        #[test]
        fn merge_is_commutative_and_associative(
            a in prop::collection::vec(0u64..15, 5),
            b in prop::collection::vec(0u64..15, 5),
            c in prop::collection::vec(0u64..15, 5),
        ) {
            let make = |hits: &[u64]| {
                let mut recorder = Recorder::new(wide_tree()).unwrap();
                recorder.set_hits(hits).unwrap();
                recorder.readout("ctx").unwrap()
            };
            let (ra, rb, rc) = (make(&a), make(&b), make(&c));

            let all = merge_readouts([&ra as &dyn Readout, &rb, &rc]).unwrap();
            let left_ab = merge_readouts([&ra as &dyn Readout, &rb]).unwrap();
            let left = merge_readouts([&left_ab as &dyn Readout, &rc]).unwrap();
            let right_bc = merge_readouts([&rb as &dyn Readout, &rc]).unwrap();
            let right = merge_readouts([&ra as &dyn Readout, &right_bc]).unwrap();
            let reversed = merge_readouts([&rc as &dyn Readout, &rb, &ra]).unwrap();

            for other in [&left, &right, &reversed] {
                prop_assert_eq!(&all.bucket_hits, &other.bucket_hits);
                prop_assert_eq!(&all.point_hits, &other.point_hits);
            }
        }
    }
}
