//! Inbox item model for message routing between agents and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the message reached the recipient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboxSource {
    /// Sent directly to the agent.
    Direct,
    /// The agent was mentioned in a channel.
    Mention,
}

/// Read state of an inbox item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    /// Awaiting delivery or pickup.
    Unread,
    /// Delivered or intentionally dropped.
    Read,
    /// Archived by an explicit user action.
    Archived,
}

/// Routing class of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Task-dispatch notification; handled by the availability poll.
    Dispatch,
    /// Ordinary conversational message.
    Chat,
}

/// A message queued for one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InboxItem {
    /// Unique record identifier.
    pub id: String,
    /// Recipient agent id.
    pub agent_id: String,
    /// Identifier of the underlying channel message.
    pub message_id: String,
    /// Channel the message was posted in.
    pub channel_id: String,
    /// Routing class.
    pub kind: MessageKind,
    /// Ingestion path.
    pub source: InboxSource,
    /// Read state.
    pub status: InboxStatus,
    /// Message text forwarded into sessions.
    pub body: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl InboxItem {
    /// Construct an unread inbox item with generated identifiers.
    #[must_use]
    pub fn new(
        agent_id: String,
        channel_id: String,
        kind: MessageKind,
        source: InboxSource,
        body: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            message_id: Uuid::new_v4().to_string(),
            channel_id,
            kind,
            source,
            status: InboxStatus::Unread,
            body,
            created_at: Utc::now(),
        }
    }
}
