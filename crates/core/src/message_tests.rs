// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn buffered_message_without_ttl_never_expires() {
    let msg = BufferedMessage::builder().build();
    assert!(!msg.is_expired(Utc::now() + chrono::Duration::days(365)));
}

#[test]
fn buffered_message_expires_at_deadline() {
    let now = Utc::now();
    let msg = BufferedMessage::builder().expires_at(now + chrono::Duration::minutes(5)).build();

    assert!(!msg.is_expired(now));
    assert!(!msg.is_expired(now + chrono::Duration::minutes(4)));
    assert!(msg.is_expired(now + chrono::Duration::minutes(5)));
    assert!(msg.is_expired(now + chrono::Duration::minutes(6)));
}

#[test]
fn buffered_message_serde_round_trip() {
    let mut msg = BufferedMessage::builder()
        .correlation_key("VIP")
        .expires_at(Utc::now() + chrono::Duration::minutes(5))
        .build();
    msg.variables.insert("orderId".into(), serde_json::json!("x"));

    let json = serde_json::to_string(&msg).unwrap();
    let back: BufferedMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(msg, back);
}

#[test]
fn subscription_serde_round_trip() {
    let sub = ProcessMessageSubscription::builder()
        .correlation_key(r#"="VIP""#)
        .permanent(false)
        .build();
    let json = serde_json::to_string(&sub).unwrap();
    let back: ProcessMessageSubscription = serde_json::from_str(&json).unwrap();
    assert_eq!(sub, back);
}

#[test]
fn correlation_result_serde_round_trip() {
    let result = MessageCorrelationResult {
        id: CorrelationId::from_string("corr-1"),
        message_name: "order.created".into(),
        correlation_key: Some("VIP".into()),
        outcome: CorrelationOutcome::TokenAdvanced {
            instance_id: InstanceId::from_string("inst-1"),
            token_id: TokenId::from_string("tok-1"),
        },
        created_at: Utc::now(),
    };
    let json = serde_json::to_string(&result).unwrap();
    let back: MessageCorrelationResult = serde_json::from_str(&json).unwrap();
    assert_eq!(result, back);
}
