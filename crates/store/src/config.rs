// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store tuning knobs.

use std::path::{Path, PathBuf};

/// Default maximum number of operations in one batch.
pub const DEFAULT_MAX_BATCH_OPS: usize = 128;

/// Default maximum total payload bytes in one batch (16 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Configuration for opening a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// On-disk database directory.
    pub path: PathBuf,
    /// In-memory page cache budget in bytes.
    pub cache_capacity_bytes: u64,
    /// Background flush interval; `None` flushes synchronously on every
    /// write (durable but slow; tests and single-writer setups).
    pub flush_every_ms: Option<u64>,
    /// Trade disk space for write throughput in the backing LSM log.
    pub high_throughput: bool,
    /// Maximum operations accepted per batch.
    pub max_batch_ops: usize,
    /// Maximum total value bytes accepted per batch.
    pub max_batch_bytes: usize,
}

impl StoreConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache_capacity_bytes: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
            high_throughput: true,
            max_batch_ops: DEFAULT_MAX_BATCH_OPS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }

    pub(crate) fn sled_config(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.path)
            .cache_capacity(self.cache_capacity_bytes)
            .flush_every_ms(self.flush_every_ms)
            .mode(if self.high_throughput {
                sled::Mode::HighThroughput
            } else {
                sled::Mode::LowSpace
            })
    }
}
