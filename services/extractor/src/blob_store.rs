use crate::config::S3Config;
use crate::error::StoreError;
use crate::naming::{sanitize_path_component, DatasetScope};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Opaque handle to a stored payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobReference(String);

impl BlobReference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptive fields stored alongside a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Row index within the dataset
    pub index: u64,
    /// Dataset the payload belongs to
    pub scope: DatasetScope,
    /// Batch run that wrote the payload
    pub run_id: Uuid,
    /// Detected container format, if known
    pub format: Option<ImageFormat>,
}

/// Durable store for raw payload bytes.
///
/// Writing the same `(filename, metadata)` twice must leave a single object,
/// so callers may retry a failed put.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        bytes: &[u8],
        filename: &str,
        metadata: &BlobMetadata,
    ) -> Result<BlobReference, StoreError>;
}

/// Object key: `ros_images_{suffix}/{run_id}/{filename}`
///
/// The run id keeps re-runs of a dataset apart while keeping retries within a
/// run on the same key.
pub fn object_key(filename: &str, metadata: &BlobMetadata) -> String {
    format!(
        "{namespace}/{run_id}/{filename}",
        namespace = metadata.scope.namespace(),
        run_id = metadata.run_id,
        filename = sanitize_object_name(filename)
    )
}

fn sanitize_object_name(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!(
            "{}.{}",
            sanitize_path_component(stem),
            sanitize_path_component(ext)
        ),
        None => sanitize_path_component(filename),
    }
}

/// Get content type for a detected image format
fn content_type(format: Option<ImageFormat>) -> &'static str {
    match format {
        Some(ImageFormat::Jpeg) => "image/jpeg",
        Some(ImageFormat::Png) => "image/png",
        Some(ImageFormat::WebP) => "image/webp",
        Some(ImageFormat::Bmp) => "image/bmp",
        Some(ImageFormat::Gif) => "image/gif",
        Some(ImageFormat::Tiff) => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// S3-backed blob store; one client shared by every dataset of a run
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        }
    }

    /// Simple single-part upload for small payloads
    async fn simple_upload(
        &self,
        bytes: &[u8],
        key: &str,
        metadata: &BlobMetadata,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type(metadata.format))
            .metadata("index", metadata.index.to_string())
            .metadata("set", metadata.scope.suffix())
            .metadata("run-id", metadata.run_id.to_string())
            .send()
            .await
            .map_err(|e| StoreError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    /// Multipart upload for large payloads
    async fn multipart_upload(
        &self,
        bytes: &[u8],
        key: &str,
        metadata: &BlobMetadata,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(metadata.format))
            .metadata("index", metadata.index.to_string())
            .metadata("set", metadata.scope.suffix())
            .metadata("run-id", metadata.run_id.to_string())
            .send()
            .await
            .map_err(|e| StoreError::S3(DisplayErrorContext(&e).to_string()))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::S3("No upload ID in response".to_string()))?;

        abort_on_error(self.upload_parts(bytes, key, upload_id), move || {
            self.abort_multipart_upload(key, upload_id)
        })
        .await
    }

    /// Upload every part of an open multipart upload, then complete it
    async fn upload_parts(&self, bytes: &[u8], key: &str, upload_id: &str) -> Result<(), StoreError> {
        let mut completed_parts = Vec::new();

        for (i, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = i as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| StoreError::S3(DisplayErrorContext(&e).to_string()))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| StoreError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    /// Discard the parts of an upload that will never complete
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StoreError::S3(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

/// Await `upload`; when it fails, run `abort` before returning the upload error.
///
/// A failed abort is only logged, the caller sees the original failure.
async fn abort_on_error<U, A, F>(upload: U, abort: A) -> Result<(), StoreError>
where
    U: Future<Output = Result<(), StoreError>>,
    A: FnOnce() -> F,
    F: Future<Output = Result<(), StoreError>>,
{
    let err = match upload.await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    match abort().await {
        Ok(()) => debug!(error = %err, "Multipart upload aborted"),
        Err(abort_err) => warn!(
            error = %err,
            abort_error = %abort_err,
            "Failed to abort multipart upload, parts may linger"
        ),
    }

    Err(err)
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, bytes, metadata), fields(suffix = %metadata.scope.suffix(), index = metadata.index))]
    async fn put(
        &self,
        bytes: &[u8],
        filename: &str,
        metadata: &BlobMetadata,
    ) -> Result<BlobReference, StoreError> {
        let key = object_key(filename, metadata);

        debug!(key = %key, size_bytes = bytes.len(), "Uploading payload to S3");

        if bytes.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(bytes, &key, metadata).await?;
        } else {
            self.simple_upload(bytes, &key, metadata).await?;
        }

        debug!(key = %key, size_bytes = bytes.len(), "Payload uploaded");

        Ok(BlobReference::new(format!("s3://{}/{}", self.bucket, key)))
    }
}
