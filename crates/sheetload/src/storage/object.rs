//! Remote object store abstraction and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::BlobError;

type BucketStorage = Arc<Mutex<HashMap<String, HashMap<String, Vec<u8>>>>>;

/// Minimal bucket/key object store used for remote import sources.
pub trait ObjectStore: Send + Sync {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError>;

    fn object_size(&self, bucket: &str, key: &str) -> Result<u64, BlobError>;

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), BlobError>;
}

/// Object store kept entirely in memory. Cloning shares the contents.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    buckets: BucketStorage,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_object<T>(
        &self,
        bucket: &str,
        key: &str,
        f: impl FnOnce(&Vec<u8>) -> T,
    ) -> Result<T, BlobError> {
        let buckets = self.buckets.lock().map_err(|_| BlobError::LockPoisoned)?;
        buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(f)
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.with_object(bucket, key, Clone::clone)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        let buckets = self.buckets.lock().map_err(|_| BlobError::LockPoisoned)?;
        Ok(buckets.get(bucket).is_some_and(|b| b.contains_key(key)))
    }

    fn object_size(&self, bucket: &str, key: &str) -> Result<u64, BlobError> {
        self.with_object(bucket, key, |data| data.len() as u64)
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let mut buckets = self.buckets.lock().map_err(|_| BlobError::LockPoisoned)?;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
