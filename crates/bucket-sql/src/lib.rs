//! bucket-sql: SQLite coverage store for Bucket.
//!
//! Backed by [rusqlite](https://docs.rs/rusqlite), stores coverage
//! definitions once per database and any number of runs against them.
//!
//! # Merging
//!
//! Two drivers are provided. [`merge_sql_files`] reads every run through the
//! in-memory merge engine. [`merge_sql_direct`] ATTACHes the input databases
//! to the output and merges in SQL, batching through temporary stores when
//! there are more inputs than SQLite can attach at once.

pub mod error;
pub mod merge;
pub mod store;
pub mod tables;

pub use error::{SqlError, SqlResult};
pub use merge::{SqlMergeOptions, discover_max_attach, merge_sql_direct, merge_sql_files};
pub use store::{SqlAccessor, SqlReadout};
