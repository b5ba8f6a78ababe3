//! Mixed-radix bucket index codec.
//!
//! A bucket's offset within its point is the odometer index of its axis
//! value indices, with the last axis varying fastest:
//!
//! ```text
//! axes   [a: 2] [b: 3]
//! offset  0  1  2  3  4  5
//! (a,b)  00 01 02 10 11 12
//! ```

use crate::error::{CoverageError, CoverageResult};
use crate::types::{AxisRow, PointRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketCodec {
    sizes: Vec<usize>,
}

impl BucketCodec {
    /// Codec over axes of the given sizes, in declaration order.
    pub fn new(sizes: Vec<usize>) -> Self {
        Self { sizes }
    }

    /// Codec for a leaf point, sizing axes from its slice of the axis table.
    pub fn for_point(point: &PointRow, axes: &[AxisRow]) -> CoverageResult<Self> {
        let owned = axes
            .get(point.axis_start..point.axis_end)
            .ok_or_else(|| {
                CoverageError::Codec(format!(
                    "axis range {}..{} of point '{}' out of bounds",
                    point.axis_start, point.axis_end, point.name
                ))
            })?;
        Ok(Self::new(owned.iter().map(AxisRow::size).collect()))
    }

    pub fn axis_count(&self) -> usize {
        self.sizes.len()
    }

    /// Product of axis sizes; a point without axes has one bucket.
    pub fn bucket_count(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn encode(&self, indices: &[usize]) -> CoverageResult<usize> {
        if indices.len() != self.sizes.len() {
            return Err(CoverageError::Codec(format!(
                "expected {} axis indices, got {}",
                self.sizes.len(),
                indices.len()
            )));
        }
        let mut offset = 0;
        for (axis, (&index, &size)) in indices.iter().zip(&self.sizes).enumerate() {
            if index >= size {
                return Err(CoverageError::Codec(format!(
                    "index {index} out of range for axis {axis} of size {size}"
                )));
            }
            offset = offset * size + index;
        }
        Ok(offset)
    }

    pub fn decode(&self, offset: usize) -> CoverageResult<Vec<usize>> {
        if offset >= self.bucket_count() {
            return Err(CoverageError::Codec(format!(
                "offset {offset} out of range for {} buckets",
                self.bucket_count()
            )));
        }
        let mut rest = offset;
        let mut indices = vec![0; self.sizes.len()];
        for (slot, &size) in indices.iter_mut().zip(&self.sizes).rev() {
            *slot = rest % size;
            rest /= size;
        }
        Ok(indices)
    }

    /// Every value-index combination in offset order.
    pub fn iter(&self) -> CodecIter<'_> {
        CodecIter {
            sizes: &self.sizes,
            next: if self.bucket_count() == 0 {
                None
            } else {
                Some(vec![0; self.sizes.len()])
            },
        }
    }
}

pub struct CodecIter<'a> {
    sizes: &'a [usize],
    next: Option<Vec<usize>>,
}

impl Iterator for CodecIter<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut following = current.clone();
        for (slot, &size) in following.iter_mut().zip(self.sizes).rev() {
            *slot += 1;
            if *slot < size {
                self.next = Some(following);
                return Some(current);
            }
            *slot = 0;
        }
        Some(current)
    }
}
