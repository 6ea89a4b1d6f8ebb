// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message correlation: subscription registry, buffering, dispatch.
//!
//! Published messages are matched against active subscriptions. A match
//! against a message start event begets a new instance; a match against an
//! intermediate catch resumes the waiting token. Messages with no match
//! are buffered with a TTL and re-examined whenever a subscription is
//! created. The correlator never calls the token engine: it emits
//! [`CorrelationEvent`]s on its response channel and the kernel routes
//! them to the engine's message callback.

use crate::definitions::DefinitionStore;
use crate::error::EngineError;
use crate::expression::strip_feel;
use flow_core::{
    BufferedMessage, Clock, CorrelationId, CorrelationOutcome, Element, InstanceId,
    MessageCorrelationResult, MessageId, ProcessMessageSubscription, SubscriptionId, Token,
    TokenId, TokenState, Variables,
};
use flow_store::{keys, BatchOp, Store};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Commands accepted on the correlator's request channel.
pub enum CorrelatorRequest {
    Publish {
        name: String,
        correlation_key: Option<String>,
        variables: Variables,
        ttl: Option<Duration>,
        reply: Option<oneshot::Sender<Result<PublishOutcome, EngineError>>>,
    },
    Correlate {
        name: String,
        correlation_key: Option<String>,
        instance_id: InstanceId,
        variables: Variables,
        reply: Option<oneshot::Sender<Result<PublishOutcome, EngineError>>>,
    },
    CreateSubscription {
        subscription: Box<ProcessMessageSubscription>,
        reply: Option<oneshot::Sender<Result<(), EngineError>>>,
    },
    DeleteSubscription {
        id: SubscriptionId,
        reply: Option<oneshot::Sender<Result<(), EngineError>>>,
    },
    CleanupExpired {
        reply: Option<oneshot::Sender<Result<usize, EngineError>>>,
    },
}

/// What a publication did.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Dispatched to a subscription; the kernel routes the event onward.
    Correlated(CorrelationOutcome),
    /// No match; buffered until a subscription appears or the TTL lapses.
    Buffered(MessageId),
}

/// Event emitted on the response channel for the engine's callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEvent {
    pub message_name: String,
    pub correlation_key: Option<String>,
    pub variables: Variables,
    pub target: CorrelationTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationTarget {
    /// Start a fresh instance. The instance ID is minted here so the
    /// audit record and the engine agree on it.
    StartEvent {
        process_key: String,
        start_event_id: String,
        instance_id: InstanceId,
    },
    /// Resume the waiting token.
    IntermediateCatch {
        instance_id: InstanceId,
        token_id: TokenId,
        /// The catch element the subscription was registered for; when a
        /// token races at an event-based gateway this names the winning
        /// arm.
        element_id: String,
    },
}

/// Normalise a correlation key for comparison: FEEL string literals
/// (`="VIP"`) compare by their content.
fn normalize_key(key: &str) -> &str {
    let stripped = strip_feel(key);
    stripped
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(stripped)
}

fn keys_compatible(subscription: Option<&str>, published: Option<&str>) -> bool {
    match (subscription, published) {
        (Some(s), Some(p)) => normalize_key(s) == normalize_key(p),
        _ => true,
    }
}

pub struct MessageCorrelator<C: Clock> {
    store: Store,
    definitions: DefinitionStore,
    clock: C,
    response_tx: mpsc::Sender<CorrelationEvent>,
    // Serialises the candidate-scan + subscription-delete window so
    // correlation stays linearisable per (name, key).
    dispatch: Mutex<()>,
}

impl<C: Clock> MessageCorrelator<C> {
    pub fn new(
        store: Store,
        definitions: DefinitionStore,
        clock: C,
        response_tx: mpsc::Sender<CorrelationEvent>,
    ) -> Self {
        Self { store, definitions, clock, response_tx, dispatch: Mutex::new(()) }
    }

    /// Publish a message: match, dispatch or buffer, always audit.
    pub fn publish(
        &self,
        name: &str,
        correlation_key: Option<&str>,
        variables: &Variables,
        ttl: Option<Duration>,
    ) -> Result<PublishOutcome, EngineError> {
        let _window = self.dispatch.lock();
        let subscriptions: Vec<ProcessMessageSubscription> =
            self.store.scan_json(keys::SUBSCRIPTION_PREFIX)?;
        let candidate = subscriptions.into_iter().find(|sub| {
            sub.message_name == name
                && keys_compatible(sub.correlation_key.as_deref(), correlation_key)
        });

        match candidate {
            Some(subscription) => {
                self.dispatch_to(&subscription, name, correlation_key, variables)
            }
            None => self.buffer(name, correlation_key, variables, ttl, "No active subscription found"),
        }
    }

    /// Targeted correlation against a known instance.
    pub fn correlate(
        &self,
        name: &str,
        correlation_key: Option<&str>,
        instance_id: InstanceId,
        variables: &Variables,
    ) -> Result<PublishOutcome, EngineError> {
        let _window = self.dispatch.lock();
        let token = self
            .waiting_tokens(name)?
            .into_iter()
            .find(|t| t.process_instance_id == instance_id);

        match token {
            Some(token) => {
                // Drop the matching ephemeral subscription, if any.
                let subscriptions: Vec<ProcessMessageSubscription> =
                    self.store.scan_json(keys::SUBSCRIPTION_PREFIX)?;
                for sub in subscriptions {
                    if sub.message_name == name
                        && !sub.permanent
                        && sub.start_event_id == token.current_element_id
                    {
                        self.store.delete(&keys::subscription(sub.id.as_str()))?;
                    }
                }
                let element_id = token.current_element_id.clone();
                self.finish_token_dispatch(name, correlation_key, variables, token, element_id)
            }
            None => self.buffer(
                name,
                correlation_key,
                variables,
                None,
                "No waiting token in target instance",
            ),
        }
    }

    /// Register a subscription, then drain any buffered messages it can
    /// now consume.
    pub fn create_subscription(
        &self,
        subscription: ProcessMessageSubscription,
    ) -> Result<(), EngineError> {
        self.store
            .put_json(&keys::subscription(subscription.id.as_str()), &subscription)?;
        tracing::debug!(
            message = %subscription.message_name,
            element = %subscription.start_event_id,
            permanent = subscription.permanent,
            "subscription created"
        );
        self.consume_buffered(&subscription)
    }

    pub fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), EngineError> {
        self.store.delete(&keys::subscription(id.as_str()))?;
        Ok(())
    }

    /// Delete expired buffered messages. Returns the number removed.
    pub fn cleanup_expired(&self) -> Result<usize, EngineError> {
        let now = self.clock.now_utc();
        let messages: Vec<BufferedMessage> =
            self.store.scan_json(keys::BUFFERED_MESSAGE_PREFIX)?;
        let mut removed = 0;
        for message in messages {
            if message.is_expired(now) {
                if let Err(e) = self.store.delete(&keys::buffered_message(message.id.as_str())) {
                    tracing::warn!(message_id = %message.id, error = %e, "failed to delete expired message");
                    continue;
                }
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "expired buffered messages deleted");
        }
        Ok(removed)
    }

    /// Delete correlation audit records older than `retention`.
    pub fn cleanup_old_results(&self, retention: Duration) -> Result<usize, EngineError> {
        let cutoff = self.clock.now_utc()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(30));
        let results: Vec<MessageCorrelationResult> =
            self.store.scan_json(keys::CORRELATION_PREFIX)?;
        let mut removed = 0;
        for result in results {
            if result.created_at < cutoff {
                if let Err(e) = self.store.delete(&keys::correlation(result.id.as_str())) {
                    tracing::warn!(result_id = %result.id, error = %e, "failed to delete old correlation result");
                    continue;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    // --- dispatch internals ---

    fn dispatch_to(
        &self,
        subscription: &ProcessMessageSubscription,
        name: &str,
        correlation_key: Option<&str>,
        variables: &Variables,
    ) -> Result<PublishOutcome, EngineError> {
        if self.is_intermediate(subscription)? {
            // Locate the token parked on this message at the subscribed
            // element (directly, or racing at an event-based gateway).
            let token = self
                .waiting_tokens(name)?
                .into_iter()
                .find(|t| self.token_matches_element(t, &subscription.start_event_id));
            match token {
                Some(token) => {
                    self.delete_subscription(&subscription.id)?;
                    self.finish_token_dispatch(
                        name,
                        correlation_key,
                        variables,
                        token,
                        subscription.start_event_id.clone(),
                    )
                }
                None => self.buffer(
                    name,
                    correlation_key,
                    variables,
                    None,
                    "Subscription has no waiting token",
                ),
            }
        } else {
            let instance_id = InstanceId::fresh();
            let outcome = CorrelationOutcome::InstanceStarted { instance_id };
            self.record_result(name, correlation_key, outcome.clone())?;
            self.emit(CorrelationEvent {
                message_name: name.to_string(),
                correlation_key: correlation_key.map(str::to_string),
                variables: variables.clone(),
                target: CorrelationTarget::StartEvent {
                    process_key: subscription.process_key.clone(),
                    start_event_id: subscription.start_event_id.clone(),
                    instance_id,
                },
            });
            Ok(PublishOutcome::Correlated(outcome))
        }
    }

    fn finish_token_dispatch(
        &self,
        name: &str,
        correlation_key: Option<&str>,
        variables: &Variables,
        token: Token,
        element_id: String,
    ) -> Result<PublishOutcome, EngineError> {
        let outcome = CorrelationOutcome::TokenAdvanced {
            instance_id: token.process_instance_id,
            token_id: token.id,
        };
        self.record_result(name, correlation_key, outcome.clone())?;
        self.emit(CorrelationEvent {
            message_name: name.to_string(),
            correlation_key: correlation_key.map(str::to_string),
            variables: variables.clone(),
            target: CorrelationTarget::IntermediateCatch {
                instance_id: token.process_instance_id,
                token_id: token.id,
                element_id,
            },
        });
        Ok(PublishOutcome::Correlated(outcome))
    }

    /// Classification per the deployed element type, falling back to the
    /// waiting-token heuristic when no definition is deployed for the
    /// subscription's process key.
    fn is_intermediate(
        &self,
        subscription: &ProcessMessageSubscription,
    ) -> Result<bool, EngineError> {
        match self.definitions.latest(&subscription.process_key) {
            Ok(definition) => Ok(match definition.element(&subscription.start_event_id) {
                Some(Element::StartEvent { .. }) => false,
                Some(_) => true,
                // Unknown element: trust the subscription's own flag.
                None => !subscription.permanent,
            }),
            Err(EngineError::NotFound(_)) => {
                let waiting = self
                    .waiting_tokens(&subscription.message_name)?
                    .into_iter()
                    .any(|t| self.token_matches_element(&t, &subscription.start_event_id));
                Ok(waiting)
            }
            Err(e) => Err(e),
        }
    }

    /// Tokens currently waiting on `message:<name>` or racing at an
    /// event-based gateway.
    fn waiting_tokens(&self, name: &str) -> Result<Vec<Token>, EngineError> {
        let tag = format!("message:{name}");
        Ok(self
            .store
            .scan_json::<Token>(keys::TOKEN_PREFIX)?
            .into_iter()
            .filter(|t| {
                t.state == TokenState::Waiting
                    && match t.waiting_for.as_deref() {
                        Some(w) if w == tag => true,
                        Some(w) => w.starts_with("gateway:"),
                        None => false,
                    }
            })
            .collect())
    }

    fn token_matches_element(&self, token: &Token, element_id: &str) -> bool {
        if token.current_element_id == element_id {
            return true;
        }
        // Event-based gateway: the token sits on the gateway while its
        // arms (the catch events) carry the subscriptions.
        let Ok(instance) = self
            .store
            .try_get_json::<flow_core::ProcessInstance>(&keys::instance(
                token.process_instance_id.as_str(),
            ))
        else {
            return false;
        };
        let Some(instance) = instance else {
            return false;
        };
        let Ok(definition) = self.definitions.by_version(&instance.process_key, instance.version)
        else {
            return false;
        };
        matches!(
            definition.element(&token.current_element_id),
            Some(Element::EventBasedGateway { .. })
        ) && definition
            .outgoing(&token.current_element_id)
            .iter()
            .any(|flow| flow.target_ref == element_id)
    }

    fn buffer(
        &self,
        name: &str,
        correlation_key: Option<&str>,
        variables: &Variables,
        ttl: Option<Duration>,
        reason: &str,
    ) -> Result<PublishOutcome, EngineError> {
        let now = self.clock.now_utc();
        let message = BufferedMessage {
            id: MessageId::fresh(),
            name: name.to_string(),
            correlation_key: correlation_key.map(str::to_string),
            variables: variables.clone(),
            published_at: now,
            expires_at: ttl.map(|t| {
                now + chrono::Duration::from_std(t).unwrap_or_else(|_| chrono::Duration::hours(1))
            }),
            reason: reason.to_string(),
        };
        let result = MessageCorrelationResult {
            id: CorrelationId::fresh(),
            message_name: name.to_string(),
            correlation_key: correlation_key.map(str::to_string),
            outcome: CorrelationOutcome::Buffered { message_id: message.id },
            created_at: now,
        };
        self.store.batch(vec![
            BatchOp::put_json(keys::buffered_message(message.id.as_str()), &message)?,
            BatchOp::put_json(keys::correlation(result.id.as_str()), &result)?,
        ])?;
        tracing::debug!(message_name = name, reason, "message buffered");
        Ok(PublishOutcome::Buffered(message.id))
    }

    fn record_result(
        &self,
        name: &str,
        correlation_key: Option<&str>,
        outcome: CorrelationOutcome,
    ) -> Result<(), EngineError> {
        let result = MessageCorrelationResult {
            id: CorrelationId::fresh(),
            message_name: name.to_string(),
            correlation_key: correlation_key.map(str::to_string),
            outcome,
            created_at: self.clock.now_utc(),
        };
        self.store.put_json(&keys::correlation(result.id.as_str()), &result)?;
        Ok(())
    }

    fn emit(&self, event: CorrelationEvent) {
        match self.response_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(message = %ev.message_name, "correlation response channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("correlation response channel closed, dropping event");
            }
        }
    }

    /// Re-run the pipeline for buffered messages a new subscription can
    /// consume; successful dispatches delete the buffered message.
    fn consume_buffered(
        &self,
        subscription: &ProcessMessageSubscription,
    ) -> Result<(), EngineError> {
        let now = self.clock.now_utc();
        let messages: Vec<BufferedMessage> =
            self.store.scan_json(keys::BUFFERED_MESSAGE_PREFIX)?;
        for message in messages {
            if message.is_expired(now)
                || message.name != subscription.message_name
                || !keys_compatible(
                    subscription.correlation_key.as_deref(),
                    message.correlation_key.as_deref(),
                )
            {
                continue;
            }
            let outcome = self.dispatch_to(
                subscription,
                &message.name,
                message.correlation_key.as_deref(),
                &message.variables,
            )?;
            if matches!(outcome, PublishOutcome::Correlated(_)) {
                self.store.delete(&keys::buffered_message(message.id.as_str()))?;
                tracing::debug!(message_id = %message.id, "buffered message consumed");
                if !subscription.permanent {
                    // An ephemeral subscription is spent after one match.
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_request(&self, request: CorrelatorRequest) {
        match request {
            CorrelatorRequest::Publish { name, correlation_key, variables, ttl, reply } => {
                let result = self.publish(&name, correlation_key.as_deref(), &variables, ttl);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CorrelatorRequest::Correlate {
                name,
                correlation_key,
                instance_id,
                variables,
                reply,
            } => {
                let result =
                    self.correlate(&name, correlation_key.as_deref(), instance_id, &variables);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CorrelatorRequest::CreateSubscription { subscription, reply } => {
                let result = self.create_subscription(*subscription);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CorrelatorRequest::DeleteSubscription { id, reply } => {
                let result = self.delete_subscription(&id);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            CorrelatorRequest::CleanupExpired { reply } => {
                let result = self.cleanup_expired();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Request loop; drains the channel before exiting on shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<CorrelatorRequest>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }
        requests.close();
        while let Ok(request) = requests.try_recv() {
            self.handle_request(request);
        }
        tracing::info!("message correlator stopped");
    }

    /// Background sweeper for expired buffered messages.
    pub async fn run_buffer_sweeper(
        self: Arc<Self>,
        every: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) {
        sweep_loop(every, timeout, shutdown, move || {
            self.cleanup_expired().map(|n| ("buffered messages", n))
        })
        .await;
    }

    /// Background sweeper for old correlation audit records.
    pub async fn run_result_sweeper(
        self: Arc<Self>,
        every: Duration,
        retention: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) {
        sweep_loop(every, timeout, shutdown, move || {
            self.cleanup_old_results(retention).map(|n| ("correlation results", n))
        })
        .await;
    }
}

/// Shared sweeper shape: run `sweep` every `every`, bounded by `timeout`,
/// until cancelled. Per-invocation errors are logged, never fatal.
async fn sweep_loop(
    every: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
    sweep: impl Fn() -> Result<(&'static str, usize), EngineError>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let started = std::time::Instant::now();
                match sweep() {
                    Ok((what, n)) if n > 0 => tracing::debug!(what, removed = n, "sweep complete"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "sweep failed"),
                }
                if started.elapsed() > timeout {
                    tracing::warn!(elapsed_ms = started.elapsed().as_millis() as u64, "sweep exceeded timeout budget");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
