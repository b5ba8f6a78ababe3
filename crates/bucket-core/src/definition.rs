//! Flattens a coverage tree into offset-indexed definition tables.
//!
//! The tree is walked depth first. Every node gets a point row placed before
//! its descendants; a group's row is patched once its children are encoded
//! so that its ranges span all of them. A single running SHA-256 is fed in
//! the same order, with each field terminated by a zero byte:
//!
//! - point / group: kind tag, depth, name, description
//! - axis: name, description, value count, each value-name
//! - goal: name, description, target
//! - bucket: digest of its assigned goal (`sha256(name, description, target)`)

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::codec::BucketCodec;
use crate::error::{CoverageError, CoverageResult};
use crate::tree::{CoverGroup, CoverNode, CoverPoint};
use crate::types::*;

/// Flattened structure of one coverage tree plus its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub sha: String,
    pub points: Vec<PointRow>,
    pub axes: Vec<AxisRow>,
    pub axis_values: Vec<AxisValueRow>,
    pub goals: Vec<GoalRow>,
    pub bucket_goals: Vec<BucketGoalRow>,
}

impl Definition {
    pub fn encode(root: &CoverNode) -> CoverageResult<Self> {
        let mut encoder = Encoder::default();
        encoder.node(root, 0)?;
        let sha = hex::encode(encoder.sha.finalize());
        debug!(
            %sha,
            points = encoder.points.len(),
            buckets = encoder.bucket_goals.len(),
            "definition encoded"
        );
        Ok(Self {
            sha,
            points: encoder.points,
            axes: encoder.axes,
            axis_values: encoder.axis_values,
            goals: encoder.goals,
            bucket_goals: encoder.bucket_goals,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_goals.len()
    }

    /// Goal target of every bucket, in bucket order.
    pub fn bucket_targets(&self) -> CoverageResult<Vec<i64>> {
        bucket_targets(&self.goals, &self.bucket_goals)
    }
}

/// Resolve each bucket's goal offset to that goal's target.
pub fn bucket_targets(goals: &[GoalRow], bucket_goals: &[BucketGoalRow]) -> CoverageResult<Vec<i64>> {
    bucket_goals
        .iter()
        .map(|bg| {
            goals.get(bg.goal).map(|g| g.target).ok_or_else(|| {
                CoverageError::Malformed(format!(
                    "bucket {} refers to missing goal {}",
                    bg.start, bg.goal
                ))
            })
        })
        .collect()
}

#[derive(Default)]
struct Encoder {
    sha: Sha256,
    leaves: usize,
    points: Vec<PointRow>,
    axes: Vec<AxisRow>,
    axis_values: Vec<AxisValueRow>,
    goals: Vec<GoalRow>,
    bucket_goals: Vec<BucketGoalRow>,
}

impl Encoder {
    fn field(&mut self, bytes: &[u8]) {
        self.sha.update(bytes);
        self.sha.update([0]);
    }

    fn node(&mut self, node: &CoverNode, depth: usize) -> CoverageResult<()> {
        let position = self.points.len();
        let (name, description) = (node.name().to_string(), match node {
            CoverNode::Point(p) => p.description().to_string(),
            CoverNode::Group(g) => g.description().to_string(),
        });
        self.field(if matches!(node, CoverNode::Point(_)) { b"point" } else { b"group" });
        self.field(&(depth as u64).to_le_bytes());
        self.field(name.as_bytes());
        self.field(description.as_bytes());

        self.points.push(PointRow {
            start: self.leaves,
            depth,
            end: self.leaves,
            axis_start: self.axes.len(),
            axis_end: self.axes.len(),
            axis_value_start: self.axis_values.len(),
            axis_value_end: self.axis_values.len(),
            goal_start: self.goals.len(),
            goal_end: self.goals.len(),
            bucket_start: self.bucket_goals.len(),
            bucket_end: self.bucket_goals.len(),
            target: 0,
            target_buckets: 0,
            name,
            description,
        });

        match node {
            CoverNode::Point(point) => self.point(point)?,
            CoverNode::Group(group) => self.group(group, depth)?,
        }

        let targets = bucket_targets(
            &self.goals,
            &self.bucket_goals[self.points[position].bucket_start..],
        )?;
        let row = &mut self.points[position];
        row.end = self.leaves;
        row.axis_end = self.axes.len();
        row.axis_value_end = self.axis_values.len();
        row.goal_end = self.goals.len();
        row.bucket_end = self.bucket_goals.len();
        for target in targets.into_iter().filter(|&t| t > 0) {
            row.target += target as u64;
            row.target_buckets += 1;
        }
        Ok(())
    }

    fn group(&mut self, group: &CoverGroup, depth: usize) -> CoverageResult<()> {
        for child in group.children() {
            self.node(child, depth + 1)?;
        }
        Ok(())
    }

    fn point(&mut self, point: &CoverPoint) -> CoverageResult<()> {
        for axis in point.axes() {
            self.field(axis.name().as_bytes());
            self.field(axis.description().as_bytes());
            self.field(&(axis.size() as u64).to_le_bytes());
            let value_start = self.axis_values.len();
            for value in axis.value_names() {
                self.field(value.as_bytes());
                self.axis_values.push(AxisValueRow {
                    start: self.axis_values.len(),
                    value: value.to_string(),
                });
            }
            self.axes.push(AxisRow {
                start: self.axes.len(),
                value_start,
                value_end: self.axis_values.len(),
                name: axis.name().to_string(),
                description: axis.description().to_string(),
            });
        }

        let goal_base = self.goals.len();
        let mut digests = Vec::with_capacity(point.goals().len());
        for goal in point.goals().iter() {
            self.field(goal.name().as_bytes());
            self.field(goal.description().as_bytes());
            self.field(&goal.target_hits().to_le_bytes());
            digests.push(goal.digest());
            self.goals.push(GoalRow {
                start: self.goals.len(),
                target: goal.target_hits(),
                name: goal.name().to_string(),
                description: goal.description().to_string(),
            });
        }

        let codec = BucketCodec::new(point.axes().iter().map(|a| a.size()).collect());
        for indices in codec.iter() {
            let local = point.classify(&indices)?;
            self.sha.update(digests[local]);
            self.bucket_goals.push(BucketGoalRow {
                start: self.bucket_goals.len(),
                goal: goal_base + local,
            });
        }

        self.leaves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::goal::Goal;

    fn point(name: &str, values: &[&str]) -> CoverPoint {
        CoverPoint::new(name, "a point")
            .with_axis(Axis::new("x", "").with_values(values.iter().copied()).unwrap())
            .unwrap()
    }

    fn tree() -> CoverNode {
        let inner = CoverGroup::new("inner", "")
            .with(point("b", &["1", "2", "3"]))
            .unwrap()
            .with(point("c", &["q"]))
            .unwrap();
        CoverGroup::new("top", "")
            .with(point("a", &["y", "z"]))
            .unwrap()
            .with(inner)
            .unwrap()
            .into()
    }

    #[test]
    fn points_are_preorder_with_leaf_ranges() {
        let def = Definition::encode(&tree()).unwrap();
        let spans: Vec<_> = def
            .points
            .iter()
            .map(|p| (p.name.as_str(), p.start, p.end, p.depth))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("top", 0, 3, 0),
                ("a", 0, 1, 1),
                ("inner", 1, 3, 1),
                ("b", 1, 2, 2),
                ("c", 2, 3, 2),
            ]
        );
        let mut sorted = def.points.clone();
        sorted.sort_by_key(|p| (p.start, p.depth));
        assert_eq!(sorted, def.points);
    }

    #[test]
    fn group_ranges_span_descendants() {
        let def = Definition::encode(&tree()).unwrap();
        let top = &def.points[0];
        assert_eq!((top.bucket_start, top.bucket_end), (0, 6));
        assert_eq!((top.axis_start, top.axis_end), (0, 3));
        assert_eq!((top.goal_start, top.goal_end), (0, 3));
        assert_eq!(top.target, 60);
        assert_eq!(top.target_buckets, 6);
        let inner = &def.points[2];
        assert_eq!((inner.bucket_start, inner.bucket_end), (2, 6));
        assert_eq!((inner.axis_value_start, inner.axis_value_end), (2, 6));
    }

    #[test]
    fn leaves_are_distinguished_from_single_child_groups() {
        let def = Definition::encode(
            &CoverGroup::new("g", "").with(point("only", &["v"])).unwrap().into(),
        )
        .unwrap();
        assert_eq!((def.points[0].start, def.points[0].end), (0, 1));
        assert!(!def.points[0].is_leaf(def.points.get(1)));
        assert!(def.points[1].is_leaf(None));
    }

    #[test]
    fn goals_are_baked_into_bucket_table() {
        let p = CoverPoint::new("p", "")
            .with_axis(Axis::new("n", "").with_values([0, 1, 2, 3]).unwrap())
            .unwrap()
            .with_goal(Goal::illegal("bad", ""))
            .unwrap()
            .with_goal(Goal::target("few", 4, "").unwrap())
            .unwrap()
            .with_classifier(|b| match b.get("n") {
                Some("0") => Some("bad".into()),
                Some("3") => Some("few".into()),
                _ => None,
            });
        let def = Definition::encode(&p.into()).unwrap();
        let goals: Vec<_> = def.bucket_goals.iter().map(|b| b.goal).collect();
        assert_eq!(goals, vec![1, 0, 0, 2]);
        assert_eq!(def.points[0].target, 24);
        assert_eq!(def.points[0].target_buckets, 3);
        assert_eq!(def.bucket_targets().unwrap(), vec![-1, 10, 10, 4]);
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_insensitive() {
        let a = Definition::encode(&point("p", &["b", "a", "c"]).into()).unwrap();
        let b = Definition::encode(&point("p", &["c", "b", "a"]).into()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.sha.len(), 64);
    }

    #[test]
    fn fingerprint_tracks_structure() {
        let base = Definition::encode(&tree()).unwrap().sha;

        let renamed_axis = CoverPoint::new("a", "a point")
            .with_axis(Axis::new("w", "").with_values(["y", "z"]).unwrap())
            .unwrap();
        let other = CoverGroup::new("top", "").with(renamed_axis).unwrap();
        assert_ne!(Definition::encode(&other.into()).unwrap().sha, base);

        let retargeted = point("a", &["y", "z"])
            .with_goal(Goal::target("t", 2, "").unwrap())
            .unwrap()
            .with_classifier(|_| Some("t".into()));
        let plain = Definition::encode(&point("a", &["y", "z"]).into()).unwrap().sha;
        assert_ne!(Definition::encode(&retargeted.into()).unwrap().sha, plain);

        let flattened = CoverGroup::new("top", "")
            .with(point("a", &["y", "z"]))
            .unwrap()
            .with(point("b", &["1", "2", "3"]))
            .unwrap()
            .with(point("c", &["q"]))
            .unwrap();
        assert_ne!(Definition::encode(&flattened.into()).unwrap().sha, base);
    }

    #[test]
    fn empty_group_has_empty_range() {
        let def = Definition::encode(
            &CoverGroup::new("top", "")
                .with(CoverGroup::new("empty", ""))
                .unwrap()
                .with(point("p", &["v"]))
                .unwrap()
                .into(),
        )
        .unwrap();
        assert_eq!((def.points[1].start, def.points[1].end), (0, 0));
        assert_eq!((def.points[2].start, def.points[2].end), (0, 1));
        assert_eq!(def.points[0].end, 1);
    }
}
