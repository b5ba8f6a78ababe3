//! Human-friendly views over a readout's flat tables.

use crate::codec::BucketCodec;
use crate::definition::Definition;
use crate::error::{CoverageError, CoverageResult};
use crate::readout::Readout;
use crate::types::*;

/// Every table of one readout, loaded for inspection.
#[derive(Debug, Clone)]
pub struct CoverageView {
    definition: Definition,
    point_hits: Vec<PointHitRow>,
    bucket_hits: Vec<BucketHitRow>,
}

impl CoverageView {
    pub fn load(readout: &dyn Readout) -> CoverageResult<Self> {
        let definition = readout.definition()?;
        let point_hits = readout.point_hits(0, None)?;
        let bucket_hits = readout.bucket_hits(0, None)?;
        if point_hits.len() != definition.points.len()
            || bucket_hits.len() != definition.bucket_count()
        {
            return Err(CoverageError::Malformed(format!(
                "record for {} does not match its definition",
                definition.sha
            )));
        }
        Ok(Self {
            definition,
            point_hits,
            bucket_hits,
        })
    }

    pub fn points(&self) -> impl Iterator<Item = PointView<'_>> {
        (0..self.definition.points.len()).map(|index| PointView { view: self, index })
    }

    /// Top-level node of the tree, if any.
    pub fn root(&self) -> Option<PointView<'_>> {
        self.points().next()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointView<'a> {
    view: &'a CoverageView,
    index: usize,
}

impl<'a> PointView<'a> {
    pub fn row(&self) -> &'a PointRow {
        &self.view.definition.points[self.index]
    }

    pub fn hits(&self) -> &'a PointHitRow {
        &self.view.point_hits[self.index]
    }

    pub fn name(&self) -> &'a str {
        &self.row().name
    }

    pub fn is_leaf(&self) -> bool {
        self.row().is_leaf(self.view.definition.points.get(self.index + 1))
    }

    /// Direct children, in preorder.
    pub fn children(&self) -> Vec<PointView<'a>> {
        let depth = self.row().depth;
        self.view.definition.points[self.index + 1..]
            .iter()
            .take_while(|p| p.depth > depth)
            .enumerate()
            .filter(|(_, p)| p.depth == depth + 1)
            .map(|(offset, _)| PointView {
                view: self.view,
                index: self.index + 1 + offset,
            })
            .collect()
    }

    /// Share of the target hits achieved, `1.0` when nothing is targeted.
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits().hits, self.row().target)
    }

    /// Share of targeted buckets that are full.
    pub fn bucket_ratio(&self) -> f64 {
        ratio(self.hits().full_buckets, self.row().target_buckets)
    }

    pub fn buckets(&self) -> CoverageResult<Vec<BucketView<'a>>> {
        if !self.is_leaf() {
            return Err(CoverageError::Tree(format!(
                "'{}' is a group and has no buckets of its own",
                self.name()
            )));
        }
        let def = &self.view.definition;
        let row = self.row();
        let codec = BucketCodec::for_point(row, &def.axes)?;
        let axes = &def.axes[row.axis_start..row.axis_end];
        (0..codec.bucket_count())
            .map(|offset| {
                let indices = codec.decode(offset)?;
                let values = axes
                    .iter()
                    .zip(indices)
                    .map(|(axis, i)| {
                        def.axis_values
                            .get(axis.value_start + i)
                            .map(|v| (axis.name.as_str(), v.value.as_str()))
                            .ok_or_else(|| {
                                CoverageError::Malformed(format!(
                                    "axis '{}' is missing value {i}",
                                    axis.name
                                ))
                            })
                    })
                    .collect::<CoverageResult<Vec<_>>>()?;
                let bucket = row.bucket_start + offset;
                let goal = def
                    .bucket_goals
                    .get(bucket)
                    .and_then(|bg| def.goals.get(bg.goal))
                    .ok_or_else(|| CoverageError::Malformed(format!("bucket {bucket} has no goal")))?;
                Ok(BucketView {
                    offset,
                    values,
                    goal,
                    hits: self.view.bucket_hits[bucket].hits,
                })
            })
            .collect()
    }
}

/// One bucket with its decoded axis values.
#[derive(Debug, Clone)]
pub struct BucketView<'a> {
    pub offset: usize,
    pub values: Vec<(&'a str, &'a str)>,
    pub goal: &'a GoalRow,
    pub hits: u64,
}

impl BucketView<'_> {
    pub fn is_full(&self) -> bool {
        self.goal.target > 0 && self.hits >= self.goal.target as u64
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 1.0 } else { num as f64 / den as f64 }
}
