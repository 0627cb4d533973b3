//! Payloads of the collaborative editing and presence events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditKind {
    Insert,
    Delete,
    Format,
}

/// Payload of `content_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationUpdate {
    pub project_id: String,
    pub document_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: EditKind,
    pub position: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Editing,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUserInfo {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub document_id: String,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub document_id: String,
    pub start: u64,
    pub end: u64,
}

/// Payload of `presence_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub project_id: String,
    pub user_id: String,
    pub user_info: PresenceUserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRange>,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}
