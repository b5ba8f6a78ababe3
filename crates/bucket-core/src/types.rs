//! Flat table rows shared by every reader, writer and merge driver.
//!
//! Field order matches the persisted column order. `start` is the row's own
//! offset for every table except points and point hits, where it is the
//! first leaf-point identifier the row spans.

use serde::{Deserialize, Serialize};

/// Name of the goal every point owns implicitly.
pub const DEFAULT_GOAL: &str = "DEFAULT";

/// Target of the implicit `DEFAULT` goal.
pub const DEFAULT_TARGET: i64 = 10;

// ── Definition rows ────────────────────────────────────────────────

/// One coverage point or group of points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRow {
    pub start: usize,
    pub depth: usize,
    pub end: usize,
    pub axis_start: usize,
    pub axis_end: usize,
    pub axis_value_start: usize,
    pub axis_value_end: usize,
    pub goal_start: usize,
    pub goal_end: usize,
    pub bucket_start: usize,
    pub bucket_end: usize,
    /// Sum of positive goal targets over every bucket in range.
    pub target: u64,
    /// Number of buckets in range whose goal has a positive target.
    pub target_buckets: u64,
    pub name: String,
    pub description: String,
}

impl PointRow {
    /// Whether this row is a leaf point, given the row that follows it in
    /// preorder. A group holding a single leaf spans the same `[k, k+1)`
    /// range as that leaf, so the range alone cannot tell them apart.
    pub fn is_leaf(&self, next: Option<&PointRow>) -> bool {
        self.end == self.start + 1 && next.is_none_or(|n| n.depth <= self.depth)
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_end - self.bucket_start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRow {
    pub start: usize,
    pub value_start: usize,
    pub value_end: usize,
    pub name: String,
    pub description: String,
}

impl AxisRow {
    pub fn size(&self) -> usize {
        self.value_end - self.value_start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisValueRow {
    pub start: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalRow {
    pub start: usize,
    /// `> 0` hit quota, `0` ignored, `< 0` illegal.
    pub target: i64,
    pub name: String,
    pub description: String,
}

/// Goal assignment for one bucket; `goal` is a global goal-table offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketGoalRow {
    pub start: usize,
    pub goal: usize,
}

// ── Record rows ────────────────────────────────────────────────────

/// Roll-up of one point's buckets, recomputed from raw bucket hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointHitRow {
    pub start: usize,
    pub depth: usize,
    pub hits: u64,
    pub hit_buckets: u64,
    pub full_buckets: u64,
}

/// Raw, uncapped hit count for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketHitRow {
    pub start: usize,
    pub hits: u64,
}

/// Clamp a `[start, end)` request to `len` rows.
pub fn page_bounds(len: usize, start: usize, end: Option<usize>) -> (usize, usize) {
    let end = end.map_or(len, |e| e.min(len));
    (start.min(end), end)
}
