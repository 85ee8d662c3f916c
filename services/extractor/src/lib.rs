//! Image Extractor
//!
//! Batch extraction of camera frames from tabular recordings. Every row of a
//! dataset carries an encoded image and a split capture stamp; the extractor
//! decodes the image, uploads the original payload to S3, mirrors a lossless
//! PNG copy to a local directory, and appends a time-series entry linking the
//! capture time to both copies.
//!
//! ## Features
//!
//! - **Tolerant payload parsing**: raw bytes, or byte literals as written by
//!   recorders that export to CSV
//! - **Per-row failure isolation**: a malformed row is logged and skipped, the
//!   batch carries on
//! - **Scoped storage**: one blob namespace, mirror directory and time-series
//!   collection per dataset suffix
//! - **Time-partitioned index**: PostgreSQL range-partitioned table per dataset
//!
//! ## Architecture
//!
//! ```text
//!  CSV / Dataset               S3 Bucket                  PostgreSQL
//! ┌──────────────┐           ┌──────────────────┐       ┌──────────────────┐
//! │ data         │           │ ros_images_{sfx}/│       │ ros_images_{sfx} │
//! │ stamp.secs   │           │   {run}/{file}   │       │  image_timeseries│
//! │ stamp.nsecs  │           └──────────────────┘       └──────────────────┘
//! └──────────────┘                    ▲                          ▲
//!        │                            │                          │
//!        ▼                            │                          │
//! ┌──────────────┐  bytes   ┌──────────────┐   entry     ┌──────────────┐
//! │ Payload      │─────────▶│ Batch        │────────────▶│ TimeSeries   │
//! │ Decoder      │          │ Processor    │             │ Sink         │
//! └──────────────┘          └──────────────┘             └──────────────┘
//!                                  │
//!                                  ▼
//!                          ┌──────────────────────┐
//!                          │ extracted_images_{sfx}│
//!                          └──────────────────────┘
//! ```

pub mod batch;
pub mod blob_store;
pub mod config;
pub mod dataset;
pub mod error;
pub mod file_mirror;
pub mod memory;
pub mod naming;
pub mod payload;
pub mod timeseries;
pub mod timestamp;

pub use batch::{BatchProcessor, BatchReport, RowFailure, RowStage, StoredArtifact};
pub use blob_store::{BlobMetadata, BlobReference, BlobStore, S3BlobStore};
pub use config::Config;
pub use dataset::{Cell, Dataset, Row};
pub use error::{BatchError, RowError, StoreError};
pub use file_mirror::FileMirror;
pub use memory::{MemoryBlobStore, MemoryTimeSeriesSink};
pub use naming::{DatasetScope, SuffixError};
pub use payload::{decode_image, DecodedFrame, RawPayload};
pub use timeseries::{EntryMetadata, PgTimeSeriesSink, TimeSeriesEntry, TimeSeriesSink};
