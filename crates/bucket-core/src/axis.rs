//! Axes: the named dimensions of a coverage point.
//!
//! Values are keyed by their value-name and held in a `BTreeMap`, so
//! positional indices always follow lexicographic name order no matter
//! how the values were supplied.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoverageError, CoverageResult};

/// Default name of the catch-all value.
pub const OTHER: &str = "Other";

/// What a value-name stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisValue {
    Int(i64),
    Str(String),
    /// Inclusive integer range.
    Range(i64, i64),
    /// Matches anything no other value claims.
    Other,
}

/// A sampled value presented to [`Axis::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sample {
    Int(i64),
    Str(String),
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Int(v) => write!(f, "{v}"),
            Sample::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Sample {
    fn from(v: i64) -> Self {
        Sample::Int(v)
    }
}

impl From<i32> for Sample {
    fn from(v: i32) -> Self {
        Sample::Int(v.into())
    }
}

impl From<u32> for Sample {
    fn from(v: u32) -> Self {
        Sample::Int(v.into())
    }
}

impl From<&str> for Sample {
    fn from(v: &str) -> Self {
        Sample::Str(v.to_string())
    }
}

impl From<String> for Sample {
    fn from(v: String) -> Self {
        Sample::Str(v)
    }
}

impl From<bool> for Sample {
    fn from(v: bool) -> Self {
        Sample::Str(if v { "True" } else { "False" }.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axis {
    name: String,
    description: String,
    values: BTreeMap<String, AxisValue>,
    other: Option<String>,
}

impl Axis {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            values: BTreeMap::new(),
            other: None,
        }
    }

    /// Add one value per sample, named by its string form.
    pub fn with_values<I, S>(mut self, values: I) -> CoverageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Sample>,
    {
        for value in values {
            let (key, value) = match value.into() {
                Sample::Int(v) => (v.to_string(), AxisValue::Int(v)),
                Sample::Str(v) => (v.clone(), AxisValue::Str(v)),
            };
            self.insert(key, value)?;
        }
        Ok(self)
    }

    /// Add an inclusive range named `"low -> high"`; bounds may be given in any order.
    pub fn with_range(mut self, a: i64, b: i64) -> CoverageResult<Self> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        self.insert(format!("{low} -> {high}"), AxisValue::Range(low, high))?;
        Ok(self)
    }

    /// Add a value under an explicit name.
    pub fn with_named(mut self, name: impl Into<String>, value: AxisValue) -> CoverageResult<Self> {
        if let AxisValue::Range(a, b) = value {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            self.insert(name.into(), AxisValue::Range(low, high))?;
        } else {
            self.insert(name.into(), value)?;
        }
        Ok(self)
    }

    /// Enable the catch-all bucket, named `Other` unless a name is given.
    pub fn with_other(mut self, name: Option<&str>) -> CoverageResult<Self> {
        let name = name.unwrap_or(OTHER).to_string();
        if self.values.contains_key(&name) {
            return Err(CoverageError::Axis {
                axis: self.name.clone(),
                reason: format!("values already contain \"{name}\""),
            });
        }
        self.values.insert(name.clone(), AxisValue::Other);
        self.other = Some(name);
        Ok(self)
    }

    fn insert(&mut self, key: String, value: AxisValue) -> CoverageResult<()> {
        if self.values.contains_key(&key) {
            let reason = if self.other.as_deref() == Some(key.as_str()) {
                format!("\"{key}\" is already used by the catch-all value")
            } else {
                format!("duplicate value name \"{key}\"")
            };
            return Err(CoverageError::Axis {
                axis: self.name.clone(),
                reason,
            });
        }
        self.values.insert(key, value);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Value-names in positional (lexicographic) order.
    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &AxisValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Positional index of a value-name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.values.keys().position(|k| k == name)
    }

    /// Resolve a sampled value to the name of the value (or range) holding it.
    pub fn lookup(&self, sample: &Sample) -> CoverageResult<&str> {
        let as_name = sample.to_string();
        if let Some((key, _)) = self.values.get_key_value(&as_name) {
            return Ok(key);
        }
        for (key, value) in &self.values {
            let matched = match (value, sample) {
                (AxisValue::Int(v), Sample::Int(s)) => v == s,
                (AxisValue::Str(v), Sample::Str(s)) => v == s,
                (AxisValue::Range(low, high), Sample::Int(s)) => low <= s && s <= high,
                _ => false,
            };
            if matched {
                return Ok(key);
            }
        }
        self.other.as_deref().ok_or_else(|| CoverageError::UnrecognisedValue {
            axis: self.name.clone(),
            value: as_name,
        })
    }
}
