// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token identifier, state machine, and wait-reason tags.

use crate::instance::InstanceId;
use crate::timer::TimerId;
use crate::vars::Variables;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a token.
    ///
    /// A token is the unit of execution advancing through a process graph.
    /// Parallel gateways fork new tokens; joins terminate them.
    pub struct TokenId;
}

/// Lifecycle state of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Active,
    Waiting,
    Completed,
    Canceled,
    Failed,
}

impl TokenState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenState::Completed | TokenState::Canceled | TokenState::Failed)
    }
}

crate::simple_display! {
    TokenState {
        Active => "active",
        Waiting => "waiting",
        Completed => "completed",
        Canceled => "canceled",
        Failed => "failed",
    }
}

/// What kind of execution a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Execution,
    Event,
    Timer,
}

crate::simple_display! {
    TokenType {
        Execution => "execution",
        Event => "event",
        Timer => "timer",
    }
}

/// Parsed representation of a `waiting_for` tag for type-safe routing.
///
/// The persisted form is an opaque string (`job:<id>`, `message:<name>`,
/// `timer:<id>`, `child:<instance_id>`); this enum is the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason<'a> {
    Job(&'a str),
    Message(&'a str),
    Timer(&'a str),
    Child(&'a str),
    /// Parked at an event-based gateway racing several catch events.
    Gateway(&'a str),
}

impl<'a> WaitReason<'a> {
    /// Parse a `waiting_for` tag. Returns `None` for unrecognized formats.
    pub fn parse(tag: &'a str) -> Option<WaitReason<'a>> {
        if let Some(rest) = tag.strip_prefix("job:") {
            return Some(WaitReason::Job(rest));
        }
        if let Some(rest) = tag.strip_prefix("message:") {
            return Some(WaitReason::Message(rest));
        }
        if let Some(rest) = tag.strip_prefix("timer:") {
            return Some(WaitReason::Timer(rest));
        }
        if let Some(rest) = tag.strip_prefix("child:") {
            return Some(WaitReason::Child(rest));
        }
        if let Some(rest) = tag.strip_prefix("gateway:") {
            return Some(WaitReason::Gateway(rest));
        }
        None
    }

    /// Format this reason back into the canonical tag.
    pub fn to_tag(&self) -> String {
        match self {
            WaitReason::Job(id) => format!("job:{id}"),
            WaitReason::Message(name) => format!("message:{name}"),
            WaitReason::Timer(id) => format!("timer:{id}"),
            WaitReason::Child(id) => format!("child:{id}"),
            WaitReason::Gateway(id) => format!("gateway:{id}"),
        }
    }
}

/// A unit of execution within a process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub process_instance_id: InstanceId,
    pub current_element_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_element_id: Option<String>,
    pub state: TokenState,
    pub token_type: TokenType,
    /// Opaque wait tag; non-empty iff `state` is `Waiting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
    /// Token-local variables shadowing the instance variables.
    #[serde(default)]
    pub variables: Variables,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TokenId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<TokenId>,
    /// Timers scheduled for boundary events attached to the current activity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundary_timer_ids: Vec<TimerId>,
    /// Set while executing inside an embedded subprocess scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprocess_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Create a new active execution token at the given element.
    pub fn new(
        id: TokenId,
        process_instance_id: InstanceId,
        element_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            process_instance_id,
            current_element_id: element_id.into(),
            previous_element_id: None,
            state: TokenState::Active,
            token_type: TokenType::Execution,
            waiting_for: None,
            variables: Variables::new(),
            parent_id: None,
            child_ids: Vec::new(),
            boundary_timer_ids: Vec::new(),
            subprocess_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_waiting(&self) -> bool {
        self.state == TokenState::Waiting
    }

    /// Typed view of the `waiting_for` tag.
    pub fn wait_reason(&self) -> Option<WaitReason<'_>> {
        self.waiting_for.as_deref().and_then(WaitReason::parse)
    }

    /// Park the token. Maintains the WAITING ⇔ non-empty tag invariant.
    pub fn set_waiting(&mut self, reason: &WaitReason<'_>, now: DateTime<Utc>) {
        self.state = TokenState::Waiting;
        self.waiting_for = Some(reason.to_tag());
        self.updated_at = now;
    }

    /// Resume the token after the awaited event arrived.
    pub fn clear_waiting(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Active;
        self.waiting_for = None;
        self.updated_at = now;
    }

    /// Move the token to the next element.
    pub fn advance_to(&mut self, element_id: impl Into<String>, now: DateTime<Utc>) {
        self.previous_element_id = Some(std::mem::replace(
            &mut self.current_element_id,
            element_id.into(),
        ));
        self.updated_at = now;
    }

    /// Clone this token for a parallel branch: fresh ID, this token as
    /// parent, copied variables, empty child list.
    pub fn clone_for_branch(
        &self,
        new_id: TokenId,
        element_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Token {
        Token {
            id: new_id,
            process_instance_id: self.process_instance_id,
            current_element_id: element_id.into(),
            previous_element_id: Some(self.current_element_id.clone()),
            state: TokenState::Active,
            token_type: self.token_type,
            waiting_for: None,
            variables: self.variables.clone(),
            parent_id: Some(self.id),
            child_ids: Vec::new(),
            boundary_timer_ids: Vec::new(),
            subprocess_id: self.subprocess_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Completed;
        self.waiting_for = None;
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Canceled;
        self.waiting_for = None;
        self.updated_at = now;
    }

    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Failed;
        self.waiting_for = None;
        self.updated_at = now;
    }
}

crate::builder! {
    pub struct TokenBuilder => Token {
        into {
            current_element_id: String = "start",
        }
        set {
            id: TokenId = TokenId::from_string("tok-test"),
            process_instance_id: InstanceId = InstanceId::from_string("inst-test"),
            state: TokenState = TokenState::Active,
            token_type: TokenType = TokenType::Execution,
            variables: Variables = Variables::new(),
            child_ids: Vec<TokenId> = Vec::new(),
            boundary_timer_ids: Vec<TimerId> = Vec::new(),
        }
        option {
            previous_element_id: String = None,
            waiting_for: String = None,
            parent_id: TokenId = None,
            subprocess_id: String = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
            updated_at: chrono::DateTime<chrono::Utc> = chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
