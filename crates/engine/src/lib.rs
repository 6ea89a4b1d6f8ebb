// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flow-engine: Token engine, job registry, and message correlator.
//!
//! The token engine drives tokens through deployed process graphs one
//! element at a time. Jobs are the integration point with external
//! workers; messages correlate asynchronously with waiting tokens or
//! start new instances. All three share the durable KV store and talk to
//! the timing wheel and to each other only through capability ports and
//! the kernel's response routing.

mod definitions;
mod engine;
mod error;
mod expression;
mod jobs;
mod locks;
mod messages;
mod ports;

#[cfg(test)]
pub(crate) mod test_support;

pub mod executors;

pub use definitions::DefinitionStore;
pub use engine::{ErrorBoundarySubscription, TokenEngine};
pub use error::EngineError;
pub use executors::ExecutionResult;
pub use expression::{strip_feel, ExpressionEval, SimpleEval};
pub use jobs::{JobFailureOutcome, JobRegistry};
pub use messages::{
    CorrelationEvent, CorrelationTarget, CorrelatorRequest, MessageCorrelator, PublishOutcome,
};
pub use ports::{
    JobCallback, MessageCallback, MessagePort, ProcessLifecycle, TimerCallback, TimerPort,
};
