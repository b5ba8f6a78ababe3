pub mod convert;
pub mod info;
pub mod merge;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use bucket_archive::ArchiveAccessor;
use bucket_core::{InputKind, JsonAccessor, Reader, Readout, Writer};
use bucket_sql::SqlAccessor;

/// A store named on the command line as `kind:path`.
#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub kind: InputKind,
    pub path: PathBuf,
}

impl FromStr for StoreLocation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, path) = s
            .split_once(':')
            .with_context(|| format!("expected <kind>:<path>, got '{s}'"))?;
        if path.is_empty() {
            anyhow::bail!("missing path in '{s}'");
        }
        Ok(Self {
            kind: kind.parse()?,
            path: PathBuf::from(path),
        })
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.path.display())
    }
}

/// Every record held by a store.
pub fn read_store(location: &StoreLocation) -> Result<Vec<Box<dyn Readout>>> {
    let readouts: Vec<Box<dyn Readout>> = match location.kind {
        InputKind::Sql => SqlAccessor::open(&location.path)?
            .read_all()?
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn Readout>)
            .collect(),
        InputKind::Archive => ArchiveAccessor::new(&location.path)
            .read_all()?
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn Readout>)
            .collect(),
        InputKind::Json => JsonAccessor::new(&location.path)
            .read_all()?
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn Readout>)
            .collect(),
    };
    Ok(readouts)
}

/// Append one record to a store, returning its reference for display.
pub fn write_store(location: &StoreLocation, readout: &dyn Readout) -> Result<String> {
    let reference = match location.kind {
        InputKind::Sql => SqlAccessor::open(&location.path)?.write(readout)?.to_string(),
        InputKind::Archive => ArchiveAccessor::new(&location.path).write(readout)?.to_string(),
        InputKind::Json => JsonAccessor::new(&location.path).write(readout)?.to_string(),
    };
    Ok(reference)
}
