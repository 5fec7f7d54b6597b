// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::ContainerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Closed set of message kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Command,
    Query,
    Event,
    Heartbeat,
    Response,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

pub const DEFAULT_MESSAGE_TTL_SECONDS: u64 = 300;

/// Envelope for inter-container traffic on the communication hub.
///
/// Ephemeral: a TTL-bound copy is stored for replay and diagnostics, but the
/// bus itself is at-most-once. An absent `target_container` means broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMessage {
    pub message_id: MessageId,
    pub message_type: MessageType,
    pub source_container: ContainerId,
    pub target_container: Option<ContainerId>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: MessagePriority,
    pub timestamp: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub encrypted: bool,
}

impl ContainerMessage {
    fn new(
        message_type: MessageType,
        source: ContainerId,
        target: Option<ContainerId>,
        payload: serde_json::Value,
        priority: MessagePriority,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            message_type,
            source_container: source,
            target_container: target,
            payload,
            priority,
            timestamp: Utc::now(),
            ttl_seconds: DEFAULT_MESSAGE_TTL_SECONDS,
            encrypted: false,
        }
    }

    /// Commands carry elevated priority.
    pub fn command(source: ContainerId, target: ContainerId, payload: serde_json::Value) -> Self {
        Self::new(
            MessageType::Command,
            source,
            Some(target),
            payload,
            MessagePriority::High,
        )
    }

    pub fn query(source: ContainerId, target: ContainerId, payload: serde_json::Value) -> Self {
        Self::new(
            MessageType::Query,
            source,
            Some(target),
            payload,
            MessagePriority::Normal,
        )
    }

    pub fn event(
        source: ContainerId,
        target: Option<ContainerId>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(MessageType::Event, source, target, payload, MessagePriority::Normal)
    }

    pub fn heartbeat(source: ContainerId, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Heartbeat, source, None, payload, MessagePriority::Low)
    }

    pub fn broadcast(source: ContainerId, payload: serde_json::Value) -> Self {
        Self::new(MessageType::Broadcast, source, None, payload, MessagePriority::Normal)
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_container.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_has_elevated_priority_and_target() {
        let msg = ContainerMessage::command(
            ContainerId::new("src"),
            ContainerId::new("dst"),
            json!({"op": "restart"}),
        );
        assert_eq!(msg.message_type, MessageType::Command);
        assert_eq!(msg.priority, MessagePriority::High);
        assert!(!msg.is_broadcast());
    }

    #[test]
    fn event_without_target_is_broadcast() {
        let msg = ContainerMessage::event(ContainerId::new("src"), None, json!({}));
        assert!(msg.is_broadcast());
    }

    #[test]
    fn priority_ordering() {
        assert!(MessagePriority::Critical > MessagePriority::High);
        assert!(MessagePriority::High > MessagePriority::Normal);
        assert!(MessagePriority::Normal > MessagePriority::Low);
    }
}
