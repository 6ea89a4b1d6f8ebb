// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel configuration.

use flow_store::StoreConfig;
use std::path::Path;
use std::time::Duration;

/// Configuration for booting a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Instance name determining the node ID prefix (e.g.
    /// `"atom-engine-dev"` → prefix `atom`).
    pub instance_name: String,
    pub store: StoreConfig,
    /// Capacity of every request/response channel.
    pub channel_capacity: usize,
    /// How often expired buffered messages are swept.
    pub buffer_sweep_interval: Duration,
    /// How often old correlation results are swept.
    pub result_sweep_interval: Duration,
    /// Correlation results older than this are deleted.
    pub result_retention: Duration,
    /// Per-invocation budget for background sweeps.
    pub sweep_timeout: Duration,
}

impl KernelConfig {
    pub fn new(instance_name: impl Into<String>, data_dir: impl AsRef<Path>) -> Self {
        Self {
            instance_name: instance_name.into(),
            store: StoreConfig::new(data_dir),
            channel_capacity: 256,
            buffer_sweep_interval: Duration::from_secs(600),
            result_sweep_interval: Duration::from_secs(3_600),
            result_retention: Duration::from_secs(30 * 86_400),
            sweep_timeout: Duration::from_secs(30),
        }
    }
}
