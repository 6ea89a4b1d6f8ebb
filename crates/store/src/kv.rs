// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The KV facade.

use crate::config::StoreConfig;
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl BatchOp {
    pub fn put_json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        Ok(BatchOp::Put { key: key.into(), value: serde_json::to_vec(value)? })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    fn payload_len(&self) -> usize {
        match self {
            BatchOp::Put { key, value } => key.len() + value.len(),
            BatchOp::Delete { key } => key.len(),
        }
    }
}

/// Ordered key-value store with prefix iteration and atomic batches.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    max_batch_ops: usize,
    max_batch_bytes: usize,
}

impl Store {
    /// Open (or create) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let db = config.sled_config().open()?;
        tracing::info!(path = %config.path.display(), "store opened");
        Ok(Self {
            db,
            max_batch_ops: config.max_batch_ops,
            max_batch_bytes: config.max_batch_bytes,
        })
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Fetch a value; missing keys are a [`StoreError::NotFound`].
    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Fetch a value, `None` when missing.
    pub fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Delete is idempotent; deleting a missing key succeeds.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    pub fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(key.as_bytes())?)
    }

    /// Visit every key under `prefix` in lexicographic order.
    ///
    /// The visitor returns `false` to stop early. Keys that are not valid
    /// UTF-8 cannot occur through this facade and are skipped.
    pub fn iterate(
        &self,
        prefix: &str,
        mut visit: impl FnMut(&str, &[u8]) -> bool,
    ) -> Result<(), StoreError> {
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            if !visit(key_str, &value) {
                break;
            }
        }
        Ok(())
    }

    /// Apply a list of operations atomically. No partial batch is ever
    /// visible to readers; oversized batches are rejected up front.
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if ops.len() > self.max_batch_ops {
            return Err(StoreError::BatchTooLarge(format!(
                "{} operations exceeds limit of {}",
                ops.len(),
                self.max_batch_ops
            )));
        }
        let total_bytes: usize = ops.iter().map(BatchOp::payload_len).sum();
        if total_bytes > self.max_batch_bytes {
            return Err(StoreError::BatchTooLarge(format!(
                "{} bytes exceeds limit of {}",
                total_bytes, self.max_batch_bytes
            )));
        }

        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key.into_bytes(), value),
                BatchOp::Delete { key } => batch.remove(key.into_bytes()),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Serialise and store an entity snapshot.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes)
    }

    /// Load and deserialise an entity snapshot.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let bytes = self.get(key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load an entity snapshot, `None` when missing.
    pub fn try_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.try_get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Collect every entity under a prefix.
    ///
    /// Items that no longer deserialise (schema drift) are skipped with a
    /// warning rather than failing the whole scan.
    pub fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let mut items = Vec::new();
        self.iterate(prefix, |key, value| {
            match serde_json::from_slice(value) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(key, error = %e, "skipping undecodable record"),
            }
            true
        })?;
        Ok(items)
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
