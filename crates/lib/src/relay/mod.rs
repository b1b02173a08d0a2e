//! Relay HTTP surface: start conversation, send message, health check.
//!
//! Every response is a [`ResponseEnvelope`]. Routes are served at the root and under `/api`.

mod envelope;
mod handlers;
mod protocol;
mod server;

pub use envelope::{ApiError, ResponseEnvelope, JSON_CONTENT_TYPE};
pub use handlers::{health_check, send_message, start_conversation};
pub use protocol::{
    ConversationResponse, ConversationTurn, HealthCheckResponse, MessageResponse,
    SendMessageRequest,
};
pub use server::{router, run_relay, RelayState};
