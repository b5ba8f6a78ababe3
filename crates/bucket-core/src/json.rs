//! JSON accessor: one document holding deduplicated definitions and records.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::definition::Definition;
use crate::error::{CoverageError, CoverageResult};
use crate::readout::{Accessor, Reader, Readout, TableReadout, Writer};
use crate::types::*;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    definitions: Vec<Definition>,
    records: Vec<RecordEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordEntry {
    def_sha: String,
    rec_sha: String,
    source: String,
    source_key: String,
    point_hits: Vec<PointHitRow>,
    bucket_hits: Vec<BucketHitRow>,
}

/// Reader and writer over a single JSON file. Record references are indices.
#[derive(Debug)]
pub struct JsonAccessor {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonAccessor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> CoverageResult<Document> {
        if !self.path.exists() {
            return Ok(Document::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Document::default());
        }
        serde_json::from_str(&content).map_err(|e| CoverageError::Serialize(e.to_string()))
    }

    fn store(&self, doc: &Document) -> CoverageResult<()> {
        let content =
            serde_json::to_string(doc).map_err(|e| CoverageError::Serialize(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn to_readout(doc: &Document, index: usize) -> CoverageResult<TableReadout> {
        let record = doc
            .records
            .get(index)
            .ok_or_else(|| CoverageError::MissingInput(format!("record {index}")))?;
        let definition = doc
            .definitions
            .iter()
            .find(|d| d.sha == record.def_sha)
            .ok_or_else(|| {
                CoverageError::Malformed(format!("no definition {} for record {index}", record.def_sha))
            })?;
        Ok(TableReadout {
            definition: Arc::new(definition.clone()),
            rec_sha: record.rec_sha.clone(),
            source: record.source.clone(),
            source_key: record.source_key.clone(),
            point_hits: record.point_hits.clone(),
            bucket_hits: record.bucket_hits.clone(),
        })
    }
}

impl Reader for JsonAccessor {
    type Ref = usize;
    type Readout = TableReadout;
    type Error = CoverageError;

    fn read(&self, reference: &usize) -> CoverageResult<TableReadout> {
        Self::to_readout(&self.load()?, *reference)
    }

    fn read_all(&self) -> CoverageResult<Vec<TableReadout>> {
        let doc = self.load()?;
        (0..doc.records.len()).map(|i| Self::to_readout(&doc, i)).collect()
    }
}

impl Writer for JsonAccessor {
    type Ref = usize;
    type Error = CoverageError;

    fn write(&self, readout: &dyn Readout) -> CoverageResult<usize> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| CoverageError::Backend(e.to_string()))?;
        let mut doc = self.load()?;
        if !doc.definitions.iter().any(|d| d.sha == readout.def_sha()) {
            doc.definitions.push(readout.definition()?);
        }
        doc.records.push(RecordEntry {
            def_sha: readout.def_sha().to_string(),
            rec_sha: readout.rec_sha().to_string(),
            source: readout.source().to_string(),
            source_key: readout.source_key().to_string(),
            point_hits: readout.point_hits(0, None)?,
            bucket_hits: readout.bucket_hits(0, None)?,
        });
        self.store(&doc)?;
        let index = doc.records.len() - 1;
        debug!(path = ?self.path, index, "json record written");
        Ok(index)
    }
}

impl Accessor for JsonAccessor {
    type Reader = Self;
    type Writer = Self;

    fn reader(&self) -> &Self {
        self
    }

    fn writer(&self) -> &Self {
        self
    }
}
