// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployed process definitions.
//!
//! Definitions are immutable once deployed; versions increase
//! monotonically per process key. An in-process cache sits in front of
//! the persisted records (they never change, so entries are cached
//! forever).

use crate::error::EngineError;
use flow_core::ProcessDefinition;
use flow_store::{keys, BatchOp, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Latest-version pointer stored under `bpmn:file:<process_key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DefinitionPointer {
    latest_version: u32,
}

#[derive(Clone)]
pub struct DefinitionStore {
    store: Store,
    cache: Arc<Mutex<HashMap<String, Arc<ProcessDefinition>>>>,
}

impl DefinitionStore {
    pub fn new(store: Store) -> Self {
        Self { store, cache: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Deploy a definition, assigning the next version for its process
    /// key. Returns the assigned version.
    pub fn deploy(&self, mut definition: ProcessDefinition) -> Result<u32, EngineError> {
        let pointer_key = keys::process_file(&definition.process_key);
        let current: Option<DefinitionPointer> = self.store.try_get_json(&pointer_key)?;
        let version = current.map(|p| p.latest_version).unwrap_or(0) + 1;
        definition.version = version;

        let storage_key = keys::process(&definition.storage_key());
        self.store.batch(vec![
            BatchOp::put_json(storage_key.clone(), &definition)?,
            BatchOp::put_json(pointer_key, &DefinitionPointer { latest_version: version })?,
        ])?;

        tracing::info!(
            process_key = %definition.process_key,
            version,
            elements = definition.elements.len(),
            "process definition deployed"
        );
        self.cache.lock().insert(definition.storage_key(), Arc::new(definition));
        Ok(version)
    }

    /// The latest deployed version for a process key.
    pub fn latest(&self, process_key: &str) -> Result<Arc<ProcessDefinition>, EngineError> {
        let pointer: DefinitionPointer = self
            .store
            .try_get_json(&keys::process_file(process_key))?
            .ok_or_else(|| EngineError::NotFound(format!("process: {process_key}")))?;
        self.by_version(process_key, pointer.latest_version)
    }

    /// A specific deployed version.
    pub fn by_version(
        &self,
        process_key: &str,
        version: u32,
    ) -> Result<Arc<ProcessDefinition>, EngineError> {
        let storage_key = format!("{process_key}:{version}");
        if let Some(cached) = self.cache.lock().get(&storage_key) {
            return Ok(Arc::clone(cached));
        }

        let definition: ProcessDefinition = self
            .store
            .try_get_json(&keys::process(&storage_key))?
            .ok_or_else(|| EngineError::NotFound(format!("process: {storage_key}")))?;
        let definition = Arc::new(definition);
        self.cache.lock().insert(storage_key, Arc::clone(&definition));
        Ok(definition)
    }
}

#[cfg(test)]
#[path = "definitions_tests.rs"]
mod tests;
