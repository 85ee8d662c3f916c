//! Per-dataset orchestration.
//!
//! Each row moves through
//! `Pending -> Decoded -> Named -> BlobWritten -> Mirrored -> TimestampResolved -> Recorded`
//! and stops at the first failing stage. Nothing is retried and nothing
//! already written for a failed row is removed: a row that fails on its
//! timestamp keeps its blob and its mirrored file, but never gets a
//! time-series entry.

use crate::blob_store::{BlobMetadata, BlobReference, BlobStore};
use crate::dataset::{Dataset, Row, DATA_COLUMN, NSECS_COLUMN, SECS_COLUMN};
use crate::error::{BatchError, RowError};
use crate::file_mirror::FileMirror;
use crate::naming::DatasetScope;
use crate::payload::decode_image;
use crate::timeseries::{EntryMetadata, TimeSeriesEntry, TimeSeriesSink};
use crate::timestamp;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Last stage a row reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStage {
    Pending,
    Decoded,
    Named,
    BlobWritten,
    Mirrored,
    TimestampResolved,
    Recorded,
}

impl fmt::Display for RowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowStage::Pending => "pending",
            RowStage::Decoded => "decoded",
            RowStage::Named => "named",
            RowStage::BlobWritten => "blob_written",
            RowStage::Mirrored => "mirrored",
            RowStage::TimestampResolved => "timestamp_resolved",
            RowStage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// Immutable record of one persisted frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub dataset_suffix: String,
    pub filename: String,
    pub local_path: PathBuf,
    pub blob_reference: BlobReference,
    pub row_index: u64,
}

/// A skipped row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub index: u64,
    /// Last stage completed before the error
    pub stage: RowStage,
    pub kind: &'static str,
    pub reason: String,
}

/// Outcome of one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub suffix: String,
    pub run_id: Uuid,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    /// Set when the run stopped early on cancellation
    pub cancelled: bool,
    pub failures: Vec<RowFailure>,
    pub artifacts: Vec<StoredArtifact>,
}

/// Runs the extraction pipeline over datasets, one at a time.
///
/// The store handles are opened once by the caller and shared by every row and
/// every dataset this processor handles.
pub struct BatchProcessor {
    blob_store: Arc<dyn BlobStore>,
    timeseries: Arc<dyn TimeSeriesSink>,
    output_base: PathBuf,
    progress_every: u64,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        timeseries: Arc<dyn TimeSeriesSink>,
        output_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            blob_store,
            timeseries,
            output_base: output_base.into(),
            progress_every: 50,
            cancel: CancellationToken::new(),
        }
    }

    /// Log progress every `every` rows (clamped to at least 1)
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    /// Stop between rows once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Extract every row of `dataset` into the storage scoped by `suffix`.
    ///
    /// Fails only if the suffix cannot name storage or the dataset lacks a
    /// `data` column (both checked before any storage is touched), or if the
    /// mirror directory / time-series collection cannot be set up. Row
    /// failures are logged and counted.
    #[instrument(skip(self, dataset), fields(suffix = %suffix, rows = dataset.len()))]
    pub async fn process(&self, dataset: &Dataset, suffix: &str) -> Result<BatchReport, BatchError> {
        let scope = DatasetScope::new(suffix)?;

        if !dataset.has_column(DATA_COLUMN) {
            return Err(BatchError::MissingColumn {
                suffix: suffix.to_string(),
                column: DATA_COLUMN.to_string(),
            });
        }
        for column in [SECS_COLUMN, NSECS_COLUMN] {
            if !dataset.has_column(column) {
                warn!(column, "Stamp column missing, every row will fail its timestamp");
            }
        }

        let run_id = Uuid::new_v4();

        let mirror = FileMirror::prepare(scope.local_dir(&self.output_base))
            .await
            .map_err(|source| BatchError::MirrorSetup {
                suffix: suffix.to_string(),
                source,
            })?;

        self.timeseries
            .ensure_collection(&scope)
            .await
            .map_err(|source| BatchError::CollectionSetup {
                suffix: suffix.to_string(),
                source,
            })?;

        info!(
            run_id = %run_id,
            namespace = %scope.namespace(),
            dir = %mirror.dir().display(),
            "Processing dataset"
        );

        let mut report = BatchReport {
            suffix: suffix.to_string(),
            run_id,
            total: dataset.len(),
            ..Default::default()
        };

        for row in dataset.rows() {
            if self.cancel.is_cancelled() {
                warn!(index = row.index, "Batch cancelled, remaining rows skipped");
                report.cancelled = true;
                break;
            }

            let started = Instant::now();
            let mut stage = RowStage::Pending;

            match self.process_row(&row, &scope, run_id, &mirror, &mut stage).await {
                Ok(artifact) => {
                    report.processed += 1;
                    metrics::counter!("extractor.rows.processed").increment(1);
                    report.artifacts.push(artifact);
                }
                Err(e) => {
                    warn!(
                        suffix = %suffix,
                        index = row.index,
                        stage = %stage,
                        kind = e.kind(),
                        error = %e,
                        "Row skipped"
                    );
                    metrics::counter!("extractor.rows.failed", "kind" => e.kind()).increment(1);
                    report.failed += 1;
                    report.failures.push(RowFailure {
                        index: row.index,
                        stage,
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }

            metrics::histogram!("extractor.row.duration_seconds")
                .record(started.elapsed().as_secs_f64());

            if row.index % self.progress_every == 0 {
                info!(
                    suffix = %suffix,
                    row = row.index + 1,
                    total = report.total,
                    processed = report.processed,
                    failed = report.failed,
                    "Progress"
                );
            }
        }

        info!(
            suffix = %suffix,
            run_id = %run_id,
            processed = report.processed,
            failed = report.failed,
            total = report.total,
            cancelled = report.cancelled,
            "Dataset finished"
        );

        Ok(report)
    }

    /// Run one row through every stage, updating `stage` as each completes.
    async fn process_row(
        &self,
        row: &Row<'_>,
        scope: &DatasetScope,
        run_id: Uuid,
        mirror: &FileMirror,
        stage: &mut RowStage,
    ) -> Result<StoredArtifact, RowError> {
        if row.extra_fields() > 0 {
            return Err(RowError::MalformedRecord {
                extra: row.extra_fields(),
            });
        }

        let bytes = row.payload().ok_or(RowError::MissingPayload)?.into_bytes()?;
        let frame = decode_image(&bytes)?;
        *stage = RowStage::Decoded;

        let filename = scope.artifact_name(row.index);
        *stage = RowStage::Named;

        let metadata = BlobMetadata {
            index: row.index,
            scope: scope.clone(),
            run_id,
            format: Some(frame.source_format),
        };
        let blob_reference = self
            .blob_store
            .put(&bytes, &filename, &metadata)
            .await
            .map_err(RowError::Blob)?;
        metrics::counter!("extractor.bytes.stored").increment(bytes.len() as u64);
        *stage = RowStage::BlobWritten;

        let local_path = mirror
            .write(&filename, &frame)
            .await
            .map_err(RowError::Mirror)?;
        *stage = RowStage::Mirrored;

        let secs = timestamp::stamp_field(SECS_COLUMN, row.secs())?;
        let nsecs = timestamp::stamp_field(NSECS_COLUMN, row.nsecs())?;
        let captured_at = timestamp::resolve(secs, nsecs)?;
        *stage = RowStage::TimestampResolved;

        let entry = TimeSeriesEntry {
            timestamp: captured_at,
            metadata: EntryMetadata {
                blob_reference: blob_reference.clone(),
                filename: filename.clone(),
                local_path: local_path.display().to_string(),
                row_index: row.index,
            },
        };
        self.timeseries
            .append(scope, &entry)
            .await
            .map_err(RowError::TimeSeries)?;
        *stage = RowStage::Recorded;

        debug!(index = row.index, filename = %filename, "Row recorded");

        Ok(StoredArtifact {
            dataset_suffix: scope.suffix().to_string(),
            filename,
            local_path,
            blob_reference,
            row_index: row.index,
        })
    }
}
