//! Conversation relay handlers.
//!
//! Auth-requiring handlers share one sequence: extract the bearer token, exchange it, hold the
//! exchanged token in a request-scoped carrier, call the agent, and let the carrier scope clear
//! the token when the handler future finishes or is dropped.

use super::envelope::{success, ApiError};
use super::protocol::{
    ConversationResponse, ConversationTurn, HealthCheckResponse, MessageResponse,
    SendMessageRequest,
};
use super::server::RelayState;
use crate::agent::{Activity, ActivityInfo, ActivityStream, AgentError};
use crate::auth::{extract_bearer_token, CarrierScope, TokenCarrier, TokenExchanger};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const START_FAILED: &str = "Error starting conversation";
const SEND_FAILED: &str = "Error processing message";

/// Short id tying together the log lines of one request.
fn request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Extract and exchange the inbound token, then set it on `carrier`. The returned scope clears
/// the carrier when dropped; on error the carrier is never set.
pub(crate) async fn authorize(
    headers: &HeaderMap,
    exchanger: &dyn TokenExchanger,
    carrier: &Arc<TokenCarrier>,
) -> Result<CarrierScope, ApiError> {
    let inbound = extract_bearer_token(headers).ok_or(ApiError::AuthMissing)?;
    let exchanged = exchanger
        .exchange(&inbound)
        .await
        .map_err(|_| ApiError::AuthExchangeFailed)?;
    Ok(carrier.scope(exchanged))
}

/// Conversation id of the first activity that carries one, else the response header value.
fn conversation_id_of(activities: &[Activity], header: Option<&str>) -> Option<String> {
    activities
        .iter()
        .find_map(Activity::conversation_id)
        .or(header)
        .map(str::to_string)
}

/// Drain a turn's activities in order, keeping only messages when `only_messages` is set.
pub(crate) async fn collect_turn(
    stream: ActivityStream,
    only_messages: bool,
) -> Result<Vec<ActivityInfo>, AgentError> {
    let activities = stream.collect_all().await?;
    Ok(activities
        .iter()
        .filter(|a| !only_messages || a.is_message())
        .map(Activity::to_info)
        .collect())
}

/// Run `op` under the request deadline. On expiry the future is dropped, which cancels the
/// downstream call and clears the request's carrier.
async fn within<T>(
    deadline: Duration,
    op: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    tokio::time::timeout(deadline, op)
        .await
        .unwrap_or(Err(ApiError::Timeout))
}

fn finish<T: serde::Serialize>(
    id: &str,
    op: &str,
    ok_message: &str,
    result: Result<T, ApiError>,
) -> Response {
    match result {
        Ok(data) => success(ok_message, data),
        Err(e) => {
            match &e {
                ApiError::UpstreamFailure { detail, .. } => {
                    log::error!("[{}] {} failed: {}", id, op, detail)
                }
                other => log::warn!("[{}] {} rejected: {}", id, op, other),
            }
            e.into_response()
        }
    }
}

/// POST /StartConversation
pub async fn start_conversation(State(state): State<RelayState>, headers: HeaderMap) -> Response {
    let id = request_id();
    log::info!("[{}] starting conversation", id);
    let result = within(
        state.request_timeout(),
        run_start_conversation(&state, &headers),
    )
    .await;
    if let Ok(ref r) = result {
        log::info!(
            "[{}] conversation {} started with {} activities",
            id,
            r.conversation_id.as_deref().unwrap_or("(none)"),
            r.activities.len()
        );
    }
    finish(&id, "start conversation", "Conversation started successfully", result)
}

async fn run_start_conversation(
    state: &RelayState,
    headers: &HeaderMap,
) -> Result<ConversationResponse, ApiError> {
    let carrier = Arc::new(TokenCarrier::new());
    let _scope = authorize(headers, state.exchanger(), &carrier).await?;
    let client = state.agent_client(Arc::clone(&carrier));
    let stream = client
        .start_conversation(true)
        .await
        .map_err(ApiError::upstream(START_FAILED))?;
    let header_id = stream.conversation_id().map(str::to_string);
    let activities = stream
        .collect_all()
        .await
        .map_err(ApiError::upstream(START_FAILED))?;
    Ok(ConversationResponse {
        conversation_id: conversation_id_of(&activities, header_id.as_deref()),
        activities: activities.iter().map(Activity::to_info).collect(),
    })
}

/// POST /SendMessage
pub async fn send_message(
    State(state): State<RelayState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let id = request_id();
    log::info!("[{}] processing message", id);
    let result = within(
        state.request_timeout(),
        run_send_message(&state, &headers, body),
    )
    .await;
    if let Ok(ref r) = result {
        log::info!("[{}] message relayed, {} activities", id, r.activities.len());
    }
    finish(&id, "send message", "Message processed successfully", result)
}

/// Body extraction failures become envelopes; checked only after the caller is authorized.
fn body_of(body: Result<Bytes, BytesRejection>) -> Result<Bytes, ApiError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::ValidationFailed(format!("Invalid request body: {}", rejection.body_text()))
        }
    })
}

fn parse_turn(body: &[u8]) -> Result<ConversationTurn, ApiError> {
    let required = || ApiError::ValidationFailed("Message and ConversationId are required".into());
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(required());
    }
    let req: SendMessageRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::ValidationFailed(format!("Invalid request body: {}", e)))?;
    req.into_turn().ok_or_else(required)
}

async fn run_send_message(
    state: &RelayState,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<MessageResponse, ApiError> {
    let carrier = Arc::new(TokenCarrier::new());
    let _scope = authorize(headers, state.exchanger(), &carrier).await?;
    let turn = parse_turn(&body_of(body)?)?;
    let client = state.agent_client(Arc::clone(&carrier));
    let stream = client
        .ask_question(&turn.message, &turn.conversation_id)
        .await
        .map_err(ApiError::upstream(SEND_FAILED))?;
    let activities = collect_turn(stream, turn.only_return_messages)
        .await
        .map_err(ApiError::upstream(SEND_FAILED))?;
    Ok(MessageResponse { activities })
}

/// GET /HealthCheck
pub async fn health_check() -> Response {
    log::debug!("health check requested");
    success("Health check completed", HealthCheckResponse::healthy())
}
