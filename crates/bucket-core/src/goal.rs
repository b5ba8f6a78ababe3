//! Hit-target policies assignable to buckets.

use sha2::{Digest, Sha256};

use crate::error::{CoverageError, CoverageResult};
use crate::types::{DEFAULT_GOAL, DEFAULT_TARGET};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    name: String,
    description: String,
    target: i64,
}

impl Goal {
    /// A goal asking for `target` hits per bucket.
    pub fn target(name: &str, target: i64, description: &str) -> CoverageResult<Self> {
        if target < 1 {
            return Err(CoverageError::Goal {
                goal: name.to_string(),
                reason: format!("target must be at least 1, got {target}"),
            });
        }
        Ok(Self::raw(name, target, description))
    }

    /// Buckets with this goal never count towards coverage.
    pub fn ignore(name: &str, description: &str) -> Self {
        Self::raw(name, 0, description)
    }

    /// Buckets with this goal must never be hit.
    pub fn illegal(name: &str, description: &str) -> Self {
        Self::raw(name, -1, description)
    }

    pub(crate) fn default_goal() -> Self {
        Self::raw(DEFAULT_GOAL, DEFAULT_TARGET, "")
    }

    fn raw(name: &str, target: i64, description: &str) -> Self {
        Self {
            name: name.to_uppercase(),
            description: description.to_string(),
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target_hits(&self) -> i64 {
        self.target
    }

    pub fn is_illegal(&self) -> bool {
        self.target < 0
    }

    pub fn is_ignored(&self) -> bool {
        self.target == 0
    }

    /// Digest of this goal alone, fed once per bucket into the definition sha.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.description.as_bytes());
        hasher.update([0]);
        hasher.update(self.target.to_le_bytes());
        hasher.finalize().into()
    }
}

/// Goals owned by one point, `DEFAULT` always first.
#[derive(Debug, Clone)]
pub struct GoalSet {
    goals: Vec<Goal>,
}

impl Default for GoalSet {
    fn default() -> Self {
        Self {
            goals: vec![Goal::default_goal()],
        }
    }
}

impl GoalSet {
    pub fn add(&mut self, goal: Goal) -> CoverageResult<()> {
        if self.index_of(goal.name()).is_some() {
            return Err(CoverageError::Goal {
                goal: goal.name.clone(),
                reason: "goal names must be unique per point".into(),
            });
        }
        self.goals.push(goal);
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let upper = name.to_uppercase();
        self.goals.iter().position(|g| g.name == upper)
    }

    pub fn get(&self, index: usize) -> Option<&Goal> {
        self.goals.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Goal> {
        self.goals.iter()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}
