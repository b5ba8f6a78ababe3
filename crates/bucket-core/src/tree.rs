//! Coverage trees: points owning axes and goals, grouped into hierarchies.

use std::fmt;

use crate::axis::{Axis, AxisValue};
use crate::error::{CoverageError, CoverageResult};
use crate::goal::{Goal, GoalSet};

/// Axis values of one bucket, handed to a point's classifier.
#[derive(Debug, Clone, Copy)]
pub struct BucketValues<'a> {
    axes: &'a [Axis],
    indices: &'a [usize],
}

impl<'a> BucketValues<'a> {
    pub(crate) fn new(axes: &'a [Axis], indices: &'a [usize]) -> Self {
        Self { axes, indices }
    }

    /// Value-name selected on the named axis.
    pub fn get(&self, axis: &str) -> Option<&'a str> {
        self.entry(axis).map(|(name, _)| name)
    }

    /// What the selected value-name stands for on the named axis.
    pub fn value(&self, axis: &str) -> Option<&'a AxisValue> {
        self.entry(axis).map(|(_, value)| value)
    }

    /// `(axis, value-name)` pairs in axis declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.axes
            .iter()
            .zip(self.indices)
            .filter_map(|(axis, &i)| axis.values().nth(i).map(|(name, _)| (axis.name(), name)))
    }

    fn entry(&self, axis: &str) -> Option<(&'a str, &'a AxisValue)> {
        let position = self.axes.iter().position(|a| a.name() == axis)?;
        let index = *self.indices.get(position)?;
        self.axes[position].values().nth(index)
    }
}

impl fmt::Display for BucketValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (axis, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{axis}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Picks a goal name for a bucket; `None` falls back to `DEFAULT`.
pub type Classifier = Box<dyn Fn(&BucketValues<'_>) -> Option<String> + Send + Sync>;

/// A leaf coverage point.
pub struct CoverPoint {
    name: String,
    description: String,
    axes: Vec<Axis>,
    goals: GoalSet,
    classifier: Option<Classifier>,
}

impl fmt::Debug for CoverPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverPoint")
            .field("name", &self.name)
            .field("axes", &self.axes)
            .field("goals", &self.goals)
            .field("classifier", &self.classifier.is_some())
            .finish()
    }
}

impl CoverPoint {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            axes: Vec::new(),
            goals: GoalSet::default(),
            classifier: None,
        }
    }

    pub fn with_axis(mut self, axis: Axis) -> CoverageResult<Self> {
        if self.axes.iter().any(|a| a.name() == axis.name()) {
            return Err(CoverageError::Tree(format!(
                "axis '{}' declared twice on point '{}'",
                axis.name(),
                self.name
            )));
        }
        self.axes.push(axis);
        Ok(self)
    }

    pub fn with_goal(mut self, goal: Goal) -> CoverageResult<Self> {
        self.goals.add(goal)?;
        Ok(self)
    }

    pub fn with_classifier<F>(mut self, classify: F) -> Self
    where
        F: Fn(&BucketValues<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.classifier = Some(Box::new(classify));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }

    /// Resolve the goal index (within this point) of one bucket.
    pub fn classify(&self, indices: &[usize]) -> CoverageResult<usize> {
        let Some(classify) = &self.classifier else {
            return Ok(0);
        };
        let bucket = BucketValues::new(&self.axes, indices);
        match classify(&bucket) {
            None => Ok(0),
            Some(name) => self.goals.index_of(&name).ok_or_else(|| CoverageError::Goal {
                goal: name,
                reason: format!("not declared on point '{}' ({bucket})", self.name),
            }),
        }
    }
}

/// A named group of points and nested groups.
#[derive(Debug)]
pub struct CoverGroup {
    name: String,
    description: String,
    children: Vec<CoverNode>,
}

impl CoverGroup {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: impl Into<CoverNode>) -> CoverageResult<Self> {
        let child = child.into();
        if self.children.iter().any(|c| c.name() == child.name()) {
            return Err(CoverageError::Tree(format!(
                "'{}' appears twice in group '{}'",
                child.name(),
                self.name
            )));
        }
        self.children.push(child);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn children(&self) -> &[CoverNode] {
        &self.children
    }
}

#[derive(Debug)]
pub enum CoverNode {
    Point(CoverPoint),
    Group(CoverGroup),
}

impl CoverNode {
    pub fn name(&self) -> &str {
        match self {
            CoverNode::Point(p) => p.name(),
            CoverNode::Group(g) => g.name(),
        }
    }

    /// Leaf points in preorder, paired with their dotted path from this node.
    pub fn leaves(&self) -> Vec<(String, &CoverPoint)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a CoverPoint)>) {
        let path = if prefix.is_empty() {
            self.name().to_string()
        } else {
            format!("{prefix}.{}", self.name())
        };
        match self {
            CoverNode::Point(p) => out.push((path, p)),
            CoverNode::Group(g) => {
                for child in &g.children {
                    child.collect_leaves(&path, out);
                }
            }
        }
    }
}

impl From<CoverPoint> for CoverNode {
    fn from(point: CoverPoint) -> Self {
        CoverNode::Point(point)
    }
}

impl From<CoverGroup> for CoverNode {
    fn from(group: CoverGroup) -> Self {
        CoverNode::Group(group)
    }
}
