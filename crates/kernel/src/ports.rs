// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel-backed implementations of the engine's capability ports.
//!
//! The engine holds these instead of references to the wheel or the
//! correlator; every call becomes a request-channel message, keeping the
//! component graph acyclic.

use async_trait::async_trait;
use flow_core::{ProcessMessageSubscription, SubscriptionId, TimerId, Variables};
use flow_engine::{CorrelatorRequest, EngineError, MessagePort, TimerPort};
use flow_wheel::{TimerRequest, WheelRequest};
use tokio::sync::{mpsc, oneshot};

pub(crate) struct ChannelTimerPort {
    tx: mpsc::Sender<WheelRequest>,
}

impl ChannelTimerPort {
    pub fn new(tx: mpsc::Sender<WheelRequest>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TimerPort for ChannelTimerPort {
    async fn schedule(&self, request: TimerRequest) -> Result<TimerId, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WheelRequest::Schedule { request: Box::new(request), reply: Some(reply_tx) })
            .await
            .map_err(|_| EngineError::Timer("timer service unavailable".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Timer("timer service dropped the request".into()))?
            .map_err(EngineError::from)
    }

    async fn cancel(&self, timer_id: TimerId) -> Result<(), EngineError> {
        self.tx
            .send(WheelRequest::Cancel { timer_id, reply: None })
            .await
            .map_err(|_| EngineError::Timer("timer service unavailable".into()))
    }
}

pub(crate) struct ChannelMessagePort {
    tx: mpsc::Sender<CorrelatorRequest>,
}

impl ChannelMessagePort {
    pub fn new(tx: mpsc::Sender<CorrelatorRequest>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessagePort for ChannelMessagePort {
    async fn create_subscription(
        &self,
        subscription: ProcessMessageSubscription,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CorrelatorRequest::CreateSubscription {
                subscription: Box::new(subscription),
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| EngineError::InvalidRequest("correlator unavailable".into()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::InvalidRequest("correlator dropped the request".into()))?
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<(), EngineError> {
        self.tx
            .send(CorrelatorRequest::DeleteSubscription { id, reply: None })
            .await
            .map_err(|_| EngineError::InvalidRequest("correlator unavailable".into()))
    }

    async fn publish(
        &self,
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
    ) -> Result<(), EngineError> {
        self.tx
            .send(CorrelatorRequest::Publish {
                name,
                correlation_key,
                variables,
                ttl: None,
                reply: None,
            })
            .await
            .map_err(|_| EngineError::InvalidRequest("correlator unavailable".into()))
    }
}
