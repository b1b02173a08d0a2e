//! Relay request and response bodies (camelCase on the wire).

use crate::agent::ActivityInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /SendMessage`. Fields are optional here so that absence is reported as a
/// validation failure rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// When true, only activities of type "message" are returned. Absent or null means true.
    #[serde(default)]
    pub only_return_messages: Option<bool>,
}

/// A validated conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub message: String,
    pub conversation_id: String,
    pub only_return_messages: bool,
}

impl SendMessageRequest {
    /// `None` when the message or conversation id is missing or blank.
    pub fn into_turn(self) -> Option<ConversationTurn> {
        let message = self.message.filter(|m| !m.trim().is_empty())?;
        let conversation_id = self.conversation_id.filter(|c| !c.trim().is_empty())?;
        Some(ConversationTurn {
            message,
            conversation_id,
            only_return_messages: self.only_return_messages.unwrap_or(true),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub conversation_id: Option<String>,
    pub activities: Vec<ActivityInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub activities: Vec<ActivityInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResponse {
    pub fn healthy() -> Self {
        Self {
            status: "Healthy".to_string(),
            timestamp: Utc::now(),
        }
    }
}
