//! Agent activities: the wire shape received from the agent service and the normalized
//! shape returned to relay clients.

use serde::{Deserialize, Serialize};

/// Activity type of a conversational message.
pub const MESSAGE_ACTIVITY: &str = "message";

/// Activity as emitted by the agent service (only the fields the relay reads).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_format: Option<String>,
    #[serde(default)]
    pub conversation: Option<ConversationAccount>,
    #[serde(default)]
    pub suggested_actions: Option<SuggestedActions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConversationAccount {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SuggestedActions {
    #[serde(default)]
    pub actions: Option<Vec<CardAction>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CardAction {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl Activity {
    /// Conversation id carried by this activity, if non-empty.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn is_message(&self) -> bool {
        self.typ.as_deref() == Some(MESSAGE_ACTIVITY)
    }

    /// Project onto the fields relay clients see.
    pub fn to_info(&self) -> ActivityInfo {
        ActivityInfo {
            typ: self.typ.clone(),
            text: self.text.clone(),
            text_format: self.text_format.clone(),
            suggested_actions: self
                .suggested_actions
                .as_ref()
                .and_then(|s| s.actions.as_ref())
                .map(|actions| {
                    actions
                        .iter()
                        .map(|a| SuggestedActionInfo {
                            text: a.text.clone(),
                            value: a.value.clone(),
                        })
                        .collect()
                }),
        }
    }
}

/// Normalized activity returned to relay clients. Absent fields serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    #[serde(rename = "type")]
    pub typ: Option<String>,
    pub text: Option<String>,
    pub text_format: Option<String>,
    pub suggested_actions: Option<Vec<SuggestedActionInfo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedActionInfo {
    pub text: Option<String>,
    /// Opaque value handed back to the agent when the action is chosen.
    pub value: Option<serde_json::Value>,
}
