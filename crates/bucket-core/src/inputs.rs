//! Input discovery for merges and conversions.
//!
//! Paths naming a store directly are required: they must exist and hold
//! data. Directories that are not themselves a store are scanned one level
//! deep for stores of the requested kind; empty or unreadable entries found
//! that way are skipped with a warning.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CoverageError, CoverageResult};

/// File inside an archive directory listing its records.
pub const ARCHIVE_MARKER: &str = "record";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Sql,
    Archive,
    Json,
}

impl InputKind {
    /// Whether `path` itself is a store of this kind.
    pub fn is_store(&self, path: &Path) -> bool {
        match self {
            InputKind::Sql => path.is_file() && has_extension(path, &["db", "sqlite", "sqlite3"]),
            InputKind::Json => path.is_file() && has_extension(path, &["json"]),
            InputKind::Archive => path.join(ARCHIVE_MARKER).is_file(),
        }
    }

    /// Size of the data held by a store; zero means empty.
    fn payload_len(&self, path: &Path) -> std::io::Result<u64> {
        let file = match self {
            InputKind::Archive => path.join(ARCHIVE_MARKER),
            _ => path.to_path_buf(),
        };
        Ok(fs::metadata(file)?.len())
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputKind::Sql => "sql",
            InputKind::Archive => "archive",
            InputKind::Json => "json",
        })
    }
}

impl FromStr for InputKind {
    type Err = CoverageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" | "sqlite" | "db" => Ok(InputKind::Sql),
            "archive" => Ok(InputKind::Archive),
            "json" => Ok(InputKind::Json),
            other => Err(CoverageError::Config(format!("unknown store kind '{other}'"))),
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Expand `paths` into the list of stores to read, in a stable order.
pub fn resolve_inputs(paths: &[PathBuf], kind: InputKind) -> CoverageResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if !path.exists() {
            return Err(CoverageError::MissingInput(path.display().to_string()));
        }
        if kind.is_store(path) {
            if kind.payload_len(path)? == 0 {
                return Err(CoverageError::MissingInput(format!(
                    "{} is empty",
                    path.display()
                )));
            }
            found.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(CoverageError::Malformed(format!(
                "{} is not a {kind} store",
                path.display()
            )));
        }
        scan(path, kind, &mut found);
    }
    if found.is_empty() {
        return Err(CoverageError::NoInputs);
    }
    debug!(inputs = found.len(), %kind, "inputs resolved");
    Ok(found)
}

fn scan(dir: &Path, kind: InputKind, found: &mut Vec<PathBuf>) {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if !kind.is_store(path) {
            continue;
        }
        match kind.payload_len(path) {
            Ok(0) => warn!(?path, "skipping empty input"),
            Ok(_) => found.push(path.to_path_buf()),
            Err(e) => warn!(?path, error = %e, "skipping unreadable input"),
        }
    }
}
