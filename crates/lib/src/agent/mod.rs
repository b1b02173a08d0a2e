//! Downstream conversational-agent client.
//!
//! Calls go through a [`Transport`]; relay handlers wrap the shared HTTP transport in a
//! [`CredentialInjector`] bound to the request's token carrier.

mod activity;
mod client;
mod sse;
mod transport;

pub use activity::{
    Activity, ActivityInfo, CardAction, ConversationAccount, SuggestedActionInfo,
    SuggestedActions, MESSAGE_ACTIVITY,
};
pub use client::{ActivityStream, AgentError, CopilotClient, CONVERSATION_ID_HEADER};
pub use sse::{SseDecoder, SseError, SseEvent, DEFAULT_MAX_LINE_BYTES};
pub use transport::{CredentialInjector, HttpTransport, Transport};
