//! Accumulates hits for one coverage tree during a run.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::axis::{Axis, Sample};
use crate::codec::BucketCodec;
use crate::definition::Definition;
use crate::error::{CoverageError, CoverageResult};
use crate::merge::roll_up;
use crate::readout::TableReadout;
use crate::tree::{BucketValues, CoverNode};
use crate::types::BucketHitRow;

struct Leaf {
    axes: Vec<Axis>,
    codec: BucketCodec,
    bucket_start: usize,
}

pub struct Recorder {
    definition: Arc<Definition>,
    leaves: HashMap<String, Leaf>,
    targets: Vec<i64>,
    hits: Vec<u64>,
    except_on_illegal: bool,
    source: String,
    source_key: String,
}

impl Recorder {
    pub fn new(root: CoverNode) -> CoverageResult<Self> {
        let definition = Definition::encode(&root)?;
        let leaf_rows = definition
            .points
            .iter()
            .enumerate()
            .filter(|(i, p)| p.is_leaf(definition.points.get(i + 1)));
        let mut leaves = HashMap::new();
        for ((path, point), (_, row)) in root.leaves().into_iter().zip(leaf_rows) {
            let codec = BucketCodec::new(point.axes().iter().map(Axis::size).collect());
            leaves.insert(
                path,
                Leaf {
                    axes: point.axes().to_vec(),
                    codec,
                    bucket_start: row.bucket_start,
                },
            );
        }
        let targets = definition.bucket_targets()?;
        Ok(Self {
            hits: vec![0; definition.bucket_count()],
            definition: Arc::new(definition),
            leaves,
            targets,
            except_on_illegal: false,
            source: String::new(),
            source_key: String::new(),
        })
    }

    /// Fail instead of warning when an illegal bucket is hit.
    pub fn with_except_on_illegal(mut self, except: bool) -> Self {
        self.except_on_illegal = except;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>, source_key: impl Into<String>) -> Self {
        self.source = source.into();
        self.source_key = source_key.into();
        self
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Record one hit against the point at `path` (dotted from the root),
    /// with one sample per axis in declaration order.
    pub fn hit(&mut self, path: &str, samples: &[Sample]) -> CoverageResult<()> {
        self.hit_n(path, samples, 1)
    }

    pub fn hit_n(&mut self, path: &str, samples: &[Sample], count: u64) -> CoverageResult<()> {
        let leaf = self
            .leaves
            .get(path)
            .ok_or_else(|| CoverageError::Tree(format!("no coverage point at '{path}'")))?;
        if samples.len() != leaf.axes.len() {
            return Err(CoverageError::Codec(format!(
                "point '{path}' has {} axes, got {} samples",
                leaf.axes.len(),
                samples.len()
            )));
        }
        let mut indices = Vec::with_capacity(samples.len());
        for (axis, sample) in leaf.axes.iter().zip(samples) {
            let name = axis.lookup(sample)?;
            let index = axis.index_of(name).ok_or_else(|| {
                CoverageError::Codec(format!("value '{name}' missing from axis '{}'", axis.name()))
            })?;
            indices.push(index);
        }
        let bucket = leaf.bucket_start + leaf.codec.encode(&indices)?;

        match self.targets[bucket] {
            0 => Ok(()),
            t if t < 0 => {
                let goal = &self.definition.goals[self.definition.bucket_goals[bucket].goal];
                let values = BucketValues::new(&leaf.axes, &indices).to_string();
                if self.except_on_illegal {
                    return Err(CoverageError::IllegalBucket {
                        point: path.to_string(),
                        goal: goal.name.clone(),
                        values,
                    });
                }
                warn!(point = %path, goal = %goal.name, %values, "illegal bucket hit");
                Ok(())
            }
            _ => {
                let total = &mut self.hits[bucket];
                *total = total
                    .checked_add(count)
                    .ok_or(CoverageError::HitOverflow { bucket })?;
                Ok(())
            }
        }
    }

    /// Overwrite the whole hit array, e.g. when replaying generated data.
    pub fn set_hits(&mut self, hits: &[u64]) -> CoverageResult<()> {
        if hits.len() != self.hits.len() {
            return Err(CoverageError::Malformed(format!(
                "expected {} bucket hits, found {}",
                self.hits.len(),
                hits.len()
            )));
        }
        self.hits.copy_from_slice(hits);
        Ok(())
    }

    pub fn hits(&self) -> &[u64] {
        &self.hits
    }

    /// Snapshot the current hits as a readout tagged with `rec_sha`.
    pub fn readout(&self, rec_sha: &str) -> CoverageResult<TableReadout> {
        Ok(TableReadout {
            definition: Arc::clone(&self.definition),
            rec_sha: rec_sha.to_string(),
            source: self.source.clone(),
            source_key: self.source_key.clone(),
            point_hits: roll_up(&self.definition.points, &self.targets, &self.hits)?,
            bucket_hits: self
                .hits
                .iter()
                .enumerate()
                .map(|(start, &hits)| BucketHitRow { start, hits })
                .collect(),
        })
    }
}
