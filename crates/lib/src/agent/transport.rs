//! Outbound transports for agent-service calls.
//!
//! [`HttpTransport`] sends requests with a shared `reqwest::Client`. [`CredentialInjector`]
//! wraps any transport and attaches the request's carried token as a bearer credential.

use crate::auth::TokenCarrier;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;

/// Sends one outbound request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error>;
}

/// Plain HTTP transport over a pooled client.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        self.client.execute(request).await
    }
}

/// Attaches `Authorization: Bearer <token>` from the carrier when the request has no
/// `Authorization` header. An empty carrier leaves the request unauthenticated.
pub struct CredentialInjector<T> {
    inner: T,
    carrier: Arc<TokenCarrier>,
}

impl<T> CredentialInjector<T> {
    pub fn new(inner: T, carrier: Arc<TokenCarrier>) -> Self {
        Self { inner, carrier }
    }

    fn apply(&self, request: &mut reqwest::Request) {
        if request.headers().contains_key(AUTHORIZATION) {
            return;
        }
        let Some(token) = self.carrier.get() else {
            log::debug!("no carried token for outbound {} {}", request.method(), request.url().path());
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {}", token.secret())) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => log::warn!("carried token is not a valid header value; sending unauthenticated"),
        }
    }
}

#[async_trait]
impl<T: Transport> Transport for CredentialInjector<T> {
    async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        self.apply(&mut request);
        self.inner.execute(request).await
    }
}
