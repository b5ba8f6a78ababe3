//! Line-file primitives.
//!
//! Every archive table is an append-only file of newline-terminated rows.
//! A table slice belonging to one definition or record is addressed by the
//! byte span it was appended at, so readers seek straight to it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult, map_err};

/// Byte range `[offset, end)` of one slice of a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub offset: u64,
    pub end: u64,
}

impl Span {
    pub fn is_empty(&self) -> bool {
        self.end <= self.offset
    }
}

/// Append rows produced by `write` to `path`, returning the span they occupy.
pub fn append<F>(path: &Path, write: F) -> ArchiveResult<Span>
where
    F: FnOnce(&mut BufWriter<File>) -> ArchiveResult<()>,
{
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let offset = file.metadata()?.len();
    let mut out = BufWriter::new(file);
    write(&mut out)?;
    let file = out.into_inner().map_err(|e| ArchiveError::Io(e.into_error()))?;
    file.sync_data()?;
    let end = file.metadata()?.len();
    Ok(Span { offset, end })
}

/// Append one JSON row per item.
pub fn append_json<T: Serialize>(path: &Path, rows: &[T]) -> ArchiveResult<Span> {
    append(path, |out| {
        for row in rows {
            serde_json::to_writer(&mut *out, row).map_err(map_err!(Encode))?;
            out.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Append one decimal integer per item.
pub fn append_counts(path: &Path, counts: impl IntoIterator<Item = u64>) -> ArchiveResult<Span> {
    append(path, |out| {
        for count in counts {
            writeln!(out, "{count}")?;
        }
        Ok(())
    })
}

/// Raw bytes of one span.
pub fn read_span(path: &Path, span: Span) -> ArchiveResult<Vec<u8>> {
    if span.is_empty() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(span.offset))?;
    let mut buf = vec![0; (span.end - span.offset) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty())
}

/// Decode rows `[start, end)` of a JSON span.
pub fn read_json<T: DeserializeOwned>(
    path: &Path,
    span: Span,
    start: usize,
    end: Option<usize>,
) -> ArchiveResult<Vec<T>> {
    let bytes = read_span(path, span)?;
    let take = end.map_or(usize::MAX, |e| e.saturating_sub(start));
    lines(&bytes)
        .skip(start)
        .take(take)
        .map(|line| serde_json::from_slice(line).map_err(|e| parse_error(path, e)))
        .collect()
}

/// Parse a span of decimal counts, one per line.
///
/// Bucket-hit slices dominate archive volume, so this skips the JSON
/// decoder and accumulates digits directly.
pub fn parse_counts(path: &Path, bytes: &[u8]) -> ArchiveResult<Vec<u64>> {
    let mut counts = Vec::with_capacity(bytes.len() / 2);
    for line in lines(bytes) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut value: u64 = 0;
        for &b in line {
            if !b.is_ascii_digit() {
                return Err(parse_error(
                    path,
                    format!("unexpected byte {:?} in count", b as char),
                ));
            }
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(b - b'0')))
                .ok_or_else(|| parse_error(path, "count overflows u64"))?;
        }
        counts.push(value);
    }
    Ok(counts)
}

/// Read and decode the single JSON line starting at `offset`.
pub fn read_json_at<T: DeserializeOwned>(path: &Path, offset: u64) -> ArchiveResult<T> {
    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(offset))?;
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line)?;
    if line.iter().all(u8::is_ascii_whitespace) {
        return Err(ArchiveError::NotFound(format!(
            "no row at byte {offset} of {}",
            path.display()
        )));
    }
    serde_json::from_slice(&line).map_err(|e| parse_error(path, e))
}

/// Every JSON line of a file with the byte offset it starts at.
pub fn read_json_indexed<T: DeserializeOwned>(path: &Path) -> ArchiveResult<Vec<(u64, T)>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut rows = Vec::new();
    let mut offset = 0u64;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let start = offset;
        offset += line.len() as u64;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        rows.push((start, serde_json::from_slice(line).map_err(|e| parse_error(path, e))?));
    }
    Ok(rows)
}

fn parse_error(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::Parse {
        table: path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        reason: reason.to_string(),
    }
}
