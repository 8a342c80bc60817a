//! Messages exchanged between agents
//!
//! A [`Message`] is immutable once built. Replies are new messages whose
//! `in_reply_to` points at the original id, which gives the transcript its
//! causal chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::agents::AgentId;
use crate::error::{Error, ErrorKind, ToolError};
use crate::plan::SubtaskId;

/// Unique identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Task,
    Result,
    Error,
    Status,
}

/// Addressee of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(AgentId),
    /// Every peer in the sender's declared edge set
    Broadcast,
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => f.write_str(id.as_str()),
            Self::Broadcast => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    in_reply_to: Option<MessageId>,
    sender: AgentId,
    recipient: Recipient,
    kind: MessageKind,
    payload: JsonValue,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        sender: AgentId,
        recipient: AgentId,
        kind: MessageKind,
        payload: JsonValue,
    ) -> Self {
        Self {
            id: MessageId::default(),
            in_reply_to: None,
            sender,
            recipient: Recipient::Agent(recipient),
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Task message carrying a [`TaskPayload`]
    pub fn task(sender: AgentId, recipient: AgentId, payload: &TaskPayload) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or(JsonValue::Null);
        Self::new(sender, recipient, MessageKind::Task, payload)
    }

    pub fn broadcast(sender: AgentId, kind: MessageKind, payload: JsonValue) -> Self {
        Self {
            id: MessageId::default(),
            in_reply_to: None,
            sender,
            recipient: Recipient::Broadcast,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Build a reply addressed back to this message's sender
    pub fn reply(&self, from: AgentId, kind: MessageKind, payload: JsonValue) -> Self {
        Self {
            id: MessageId::default(),
            in_reply_to: Some(self.id.clone()),
            sender: from,
            recipient: Recipient::Agent(self.sender.clone()),
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn in_reply_to(&self) -> Option<&MessageId> {
        self.in_reply_to.as_ref()
    }

    pub fn sender(&self) -> &AgentId {
        &self.sender
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Decode an `error` message payload
    pub fn error_payload(&self) -> Option<ErrorPayload> {
        if self.kind != MessageKind::Error {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Body of a `task` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub subtask: SubtaskId,
    pub capability: String,
    #[serde(default)]
    pub params: JsonValue,
    /// Outputs of upstream subtasks, in plan order
    #[serde(default)]
    pub inputs: Vec<JsonValue>,
}

/// Body of an `error` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_kind: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            tool_kind: None,
        }
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        match err {
            Error::Tool(ToolError { kind, message }) => Self {
                kind: err.kind(),
                message: message.clone(),
                tool_kind: Some(kind.clone()),
            },
            other => Self::new(other.kind(), other.to_string()),
        }
    }
}
