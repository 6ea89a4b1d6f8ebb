// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message subscriptions, buffering, and correlation audit records.

use crate::instance::InstanceId;
use crate::token::TokenId;
use crate::vars::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a message subscription.
    pub struct SubscriptionId;
}

crate::define_id! {
    /// Unique identifier for a buffered message.
    pub struct MessageId;
}

crate::define_id! {
    /// Unique identifier for a correlation audit record.
    pub struct CorrelationId;
}

/// A registered interest in an inbound message.
///
/// Start-event subscriptions are permanent; intermediate-catch
/// subscriptions are ephemeral and deleted on successful correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMessageSubscription {
    pub id: SubscriptionId,
    pub message_name: String,
    /// May be a FEEL literal (`="VIP"`); stripped before comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    pub process_key: String,
    /// The catching element this subscription feeds: a message start event
    /// for permanent subscriptions, an intermediate catch element otherwise.
    pub start_event_id: String,
    #[serde(default)]
    pub permanent: bool,
    pub created_at: DateTime<Utc>,
}

/// A message that arrived with no matching subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: MessageId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
}

impl BufferedMessage {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// What a correlation attempt did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    /// A start-event subscription matched; a new instance was created.
    InstanceStarted { instance_id: InstanceId },
    /// An intermediate-catch subscription matched; a waiting token resumed.
    TokenAdvanced {
        instance_id: InstanceId,
        token_id: TokenId,
    },
    /// No subscription matched; the message was buffered.
    Buffered { message_id: MessageId },
}

/// Audit record of a correlation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCorrelationResult {
    pub id: CorrelationId,
    pub message_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    pub outcome: CorrelationOutcome,
    pub created_at: DateTime<Utc>,
}

crate::builder! {
    pub struct BufferedMessageBuilder => BufferedMessage {
        into {
            name: String = "order.created",
            reason: String = "No active subscription found",
        }
        set {
            id: MessageId = MessageId::from_string("msg-test"),
            variables: Variables = Variables::new(),
        }
        option {
            correlation_key: String = None,
            expires_at: chrono::DateTime<chrono::Utc> = None,
        }
        computed {
            published_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

crate::builder! {
    pub struct SubscriptionBuilder => ProcessMessageSubscription {
        into {
            message_name: String = "order.created",
            process_key: String = "order",
            start_event_id: String = "msg_start",
        }
        set {
            id: SubscriptionId = SubscriptionId::from_string("sub-test"),
            permanent: bool = true,
        }
        option {
            correlation_key: String = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
