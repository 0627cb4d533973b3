use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Realtime event name.
///
/// Known events map to dedicated variants; anything else the server
/// pushes is preserved verbatim in [`MessageType::Custom`] so handlers
/// can still subscribe to it by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    // Connection
    Connect,
    Disconnect,
    Ping,
    Pong,

    // Authentication
    AuthRequest,
    AuthSuccess,
    AuthFailure,

    // Subscriptions
    Subscribe,
    Unsubscribe,
    SubscriptionUpdate,

    // Collaboration
    CursorUpdate,
    SelectionUpdate,
    ContentUpdate,
    PresenceUpdate,

    // Notifications
    Notification,
    Alert,

    // AI
    AiGenerationStart,
    AiGenerationProgress,
    AiGenerationComplete,
    AiGenerationError,

    // System
    SystemMessage,
    Error,

    Custom(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::AuthRequest => "auth_request",
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::SubscriptionUpdate => "subscription_update",
            Self::CursorUpdate => "cursor_update",
            Self::SelectionUpdate => "selection_update",
            Self::ContentUpdate => "content_update",
            Self::PresenceUpdate => "presence_update",
            Self::Notification => "notification",
            Self::Alert => "alert",
            Self::AiGenerationStart => "ai_generation_start",
            Self::AiGenerationProgress => "ai_generation_progress",
            Self::AiGenerationComplete => "ai_generation_complete",
            Self::AiGenerationError => "ai_generation_error",
            Self::SystemMessage => "system_message",
            Self::Error => "error",
            Self::Custom(name) => name,
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "auth_request" => Self::AuthRequest,
            "auth_success" => Self::AuthSuccess,
            "auth_failure" => Self::AuthFailure,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "subscription_update" => Self::SubscriptionUpdate,
            "cursor_update" => Self::CursorUpdate,
            "selection_update" => Self::SelectionUpdate,
            "content_update" => Self::ContentUpdate,
            "presence_update" => Self::PresenceUpdate,
            "notification" => Self::Notification,
            "alert" => Self::Alert,
            "ai_generation_start" => Self::AiGenerationStart,
            "ai_generation_progress" => Self::AiGenerationProgress,
            "ai_generation_complete" => Self::AiGenerationComplete,
            "ai_generation_error" => Self::AiGenerationError,
            "system_message" => Self::SystemMessage,
            "error" => Self::Error,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match Self::from(s.as_str()) {
            Self::Custom(_) => Self::Custom(s),
            known => known,
        }
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for all realtime traffic in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Stamped on receipt when the sender omitted it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WebSocketMessage {
    /// Creates a message stamped with the current time.
    pub fn new(msg_type: impl Into<MessageType>, payload: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload,
            timestamp: Utc::now(),
            sequence: None,
            correlation_id: None,
        }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
