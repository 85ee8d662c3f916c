//! In-process stand-ins for the blob store and time-series sink.
//!
//! Used for dry runs, where frames are decoded and mirrored locally but
//! nothing leaves the machine, and as fixtures in tests.

use crate::blob_store::{object_key, BlobMetadata, BlobReference, BlobStore};
use crate::error::StoreError;
use crate::naming::DatasetScope;
use crate::timeseries::{Provisioned, TimeSeriesEntry, TimeSeriesSink};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A payload held by [`MemoryBlobStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub metadata: BlobMetadata,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn get(&self, reference: &BlobReference) -> Option<StoredBlob> {
        self.objects.read().get(reference.as_str()).cloned()
    }

    /// Stored blobs whose metadata belongs to `suffix`, in key order
    pub fn blobs_for(&self, suffix: &str) -> Vec<StoredBlob> {
        self.objects
            .read()
            .values()
            .filter(|blob| blob.metadata.scope.suffix() == suffix)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bytes: &[u8],
        filename: &str,
        metadata: &BlobMetadata,
    ) -> Result<BlobReference, StoreError> {
        let key = format!("memory://{}", object_key(filename, metadata));

        self.objects.write().insert(
            key.clone(),
            StoredBlob {
                filename: filename.to_string(),
                bytes: bytes.to_vec(),
                metadata: metadata.clone(),
            },
        );

        Ok(BlobReference::new(key))
    }
}

#[derive(Debug, Default)]
pub struct MemoryTimeSeriesSink {
    collections: RwLock<BTreeMap<String, Vec<TimeSeriesEntry>>>,
}

impl MemoryTimeSeriesSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of provisioned collections
    pub fn collection_count(&self) -> usize {
        self.collections.read().len()
    }

    pub fn has_collection(&self, scope: &DatasetScope) -> bool {
        self.collections.read().contains_key(&scope.namespace())
    }

    /// Entries of a scope in insertion order; empty if never provisioned
    pub fn entries(&self, scope: &DatasetScope) -> Vec<TimeSeriesEntry> {
        self.collections
            .read()
            .get(&scope.namespace())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TimeSeriesSink for MemoryTimeSeriesSink {
    async fn ensure_collection(&self, scope: &DatasetScope) -> Result<Provisioned, StoreError> {
        let mut collections = self.collections.write();
        if collections.contains_key(&scope.namespace()) {
            return Ok(Provisioned::AlreadyExists);
        }
        collections.insert(scope.namespace(), Vec::new());
        Ok(Provisioned::Created)
    }

    async fn append(&self, scope: &DatasetScope, entry: &TimeSeriesEntry) -> Result<(), StoreError> {
        let namespace = scope.namespace();
        let mut collections = self.collections.write();
        let entries = collections
            .get_mut(&namespace)
            .ok_or(StoreError::MissingCollection(namespace.clone()))?;
        entries.push(entry.clone());
        Ok(())
    }
}
