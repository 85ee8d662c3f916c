use crate::naming::SuffixError;
use crate::payload::{DecodeError, ImageDecodeError};
use crate::timestamp::TimestampError;
use thiserror::Error;

/// Errors from the blob store, file mirror and time-series sink.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("S3 request failed: {0}")]
    S3(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collection {0} has not been provisioned")]
    MissingCollection(String),
}

/// Why a single row was skipped.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("Row has no data payload")]
    MissingPayload,

    #[error("Record has {extra} field(s) more than the header")]
    MalformedRecord { extra: usize },

    #[error("Failed to parse payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to decode image: {0}")]
    Image(#[from] ImageDecodeError),

    #[error("Blob store write failed: {0}")]
    Blob(#[source] StoreError),

    #[error("Local mirror write failed: {0}")]
    Mirror(#[source] StoreError),

    #[error("Invalid capture timestamp: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Time-series append failed: {0}")]
    TimeSeries(#[source] StoreError),
}

impl RowError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RowError::MissingPayload
            | RowError::MalformedRecord { .. }
            | RowError::Decode(_)
            | RowError::Image(_) => "decode",
            RowError::Timestamp(_) => "timestamp",
            RowError::Blob(_) => "blob",
            RowError::Mirror(_) => "mirror",
            RowError::TimeSeries(_) => "timeseries",
        }
    }
}

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid dataset suffix: {0}")]
    InvalidSuffix(#[from] SuffixError),

    #[error("[{suffix}] Missing required column '{column}'")]
    MissingColumn { suffix: String, column: String },

    #[error("[{suffix}] Failed to prepare output directory: {source}")]
    MirrorSetup {
        suffix: String,
        #[source]
        source: StoreError,
    },

    #[error("[{suffix}] Failed to provision time-series collection: {source}")]
    CollectionSetup {
        suffix: String,
        #[source]
        source: StoreError,
    },
}
