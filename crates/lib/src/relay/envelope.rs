//! Uniform response envelope and the handler-boundary error taxonomy.

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// `{ success, message, data, error }`, used for every relay response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Serialize `body` with the relay's JSON content type.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut res = Response::new(Body::from(bytes));
            *res.status_mut() = status;
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            res
        }
        Err(e) => {
            log::error!("serializing response failed: {}", e);
            let mut res = Response::new(Body::from(
                r#"{"success":false,"message":"Internal error","data":null,"error":"InternalServerError"}"#,
            ));
            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            res
        }
    }
}

/// 200 with a success envelope.
pub fn success<T: Serialize>(message: &str, data: T) -> Response {
    json_response(StatusCode::OK, &ResponseEnvelope::ok(message, data))
}

/// Failures surfaced to relay clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No `Authorization: Bearer` header.
    #[error("Authorization header with Bearer token is required")]
    AuthMissing,
    /// The identity provider rejected or failed the exchange.
    #[error("Token exchange failed. Access denied.")]
    AuthExchangeFailed,
    #[error("{0}")]
    ValidationFailed(String),
    #[error("Request body is too large")]
    PayloadTooLarge,
    /// The request deadline passed before the agent finished answering.
    #[error("Request timed out")]
    Timeout,
    /// Anything that went wrong talking to the agent service, including mid-stream.
    #[error("{context}")]
    UpstreamFailure { context: &'static str, detail: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthExchangeFailed => StatusCode::UNAUTHORIZED,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::UpstreamFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the envelope's `error` field.
    pub fn code(&self) -> String {
        match self {
            Self::AuthMissing | Self::AuthExchangeFailed => "Unauthorized".to_string(),
            Self::ValidationFailed(_) => "BadRequest".to_string(),
            Self::PayloadTooLarge => "PayloadTooLarge".to_string(),
            Self::Timeout => "RequestTimeout".to_string(),
            Self::UpstreamFailure { detail, .. } => detail.clone(),
        }
    }

    pub fn upstream(context: &'static str) -> impl FnOnce(crate::agent::AgentError) -> ApiError {
        move |e| ApiError::UpstreamFailure {
            context,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ResponseEnvelope::<()>::failure(self.to_string(), self.code());
        json_response(self.status(), &envelope)
    }
}
