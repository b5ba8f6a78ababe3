//! bucket-core: functional coverage encoding and merging.
//!
//! A coverage tree (groups of points, each point owning axes and goals) is
//! flattened once per distinct shape into offset-indexed tables identified
//! by a SHA-256 fingerprint. Hits accumulate in a flat array addressed by the
//! mixed-radix [`BucketCodec`]. Any number of structurally identical records
//! can then be folded together with the [`merge`] engine.
//!
//! # Architecture
//!
//! ```text
//! CoverGroup / CoverPoint ──encode──▶ Definition (flat rows + sha)
//!                                        │
//!                          Recorder ─────┤ hits[bucket]
//!                                        ▼
//!                                    Readout ◀──▶ Reader / Writer (backends)
//!                                        │
//!                                  MergeReadout ──▶ merged Readout
//! ```
//!
//! Storage backends live in `bucket-sql` and `bucket-archive`; both reuse
//! the [`pool`], [`batch`] and [`staging`] modules to run scalable merges.

pub mod axis;
pub mod batch;
pub mod codec;
pub mod config;
pub mod definition;
pub mod error;
pub mod goal;
pub mod inputs;
pub mod json;
pub mod merge;
pub mod pool;
pub mod readout;
pub mod recorder;
pub mod staging;
pub mod tree;
pub mod types;
pub mod view;

pub use axis::{Axis, AxisValue, Sample};
pub use codec::BucketCodec;
pub use config::BucketConfig;
pub use definition::Definition;
pub use error::{CoverageError, CoverageResult};
pub use goal::Goal;
pub use inputs::{InputKind, resolve_inputs};
pub use json::JsonAccessor;
pub use merge::{MergeReadout, merge_readouts, roll_up};
pub use pool::WorkerPool;
pub use readout::{Accessor, Reader, Readout, TableReadout, Writer};
pub use recorder::Recorder;
pub use staging::StagedOutput;
pub use tree::{BucketValues, CoverGroup, CoverNode, CoverPoint};
pub use types::*;
pub use view::{BucketView, CoverageView, PointView};
