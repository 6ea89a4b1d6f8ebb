// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process variables: string keys mapping to arbitrary JSON values.

use serde_json::Value;
use std::collections::HashMap;

/// Variable map carried by instances, tokens, jobs, and messages.
pub type Variables = HashMap<String, Value>;

/// Merge `from` into `into`, last write wins.
pub fn merge_variables(into: &mut Variables, from: &Variables) {
    for (key, value) in from {
        into.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
#[path = "vars_tests.rs"]
mod tests;
