//! bucket-archive: flat-file coverage archives.
//!
//! An archive is a directory of append-only line files, one per table.
//! Definitions are written once per fingerprint and shared by every record
//! that uses them; records are addressed by byte offset.
//!
//! [`merge_archives`] merges any number of archives into a new one,
//! parsing bucket hits on a fast path and spreading inputs over a bounded
//! worker pool.

pub mod error;
pub mod format;
pub mod merge;
pub mod store;

pub use error::{ArchiveError, ArchiveResult};
pub use merge::{ArchiveMergeOptions, merge_archives};
pub use store::{ArchiveAccessor, ArchiveReadout};
