//! Relay HTTP server.

use super::handlers::{health_check, send_message, start_conversation};
use crate::agent::{CopilotClient, CredentialInjector, HttpTransport};
use crate::auth::{OboTokenExchanger, TokenCarrier, TokenExchanger};
use crate::config::{AgentSettings, RelaySettings, ServerConfig};
use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared, immutable state for all requests. Per-request credentials never live here.
#[derive(Clone)]
pub struct RelayState {
    server: Arc<ServerConfig>,
    agent: Arc<AgentSettings>,
    exchanger: Arc<dyn TokenExchanger>,
    transport: HttpTransport,
}

impl RelayState {
    /// Production state: OBO exchanger and agent transport sharing one pooled HTTP client.
    pub fn new(settings: &RelaySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building http client")?;
        let exchanger = OboTokenExchanger::new(&settings.identity, client.clone());
        Ok(Self::with_exchanger(settings, Arc::new(exchanger), client))
    }

    /// State with a caller-supplied exchanger.
    pub fn with_exchanger(
        settings: &RelaySettings,
        exchanger: Arc<dyn TokenExchanger>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            server: Arc::new(settings.server.clone()),
            agent: Arc::new(settings.agent.clone()),
            exchanger,
            transport: HttpTransport::new(client),
        }
    }

    /// Deadline for one relayed request, covering exchange and the downstream stream.
    pub fn request_timeout(&self) -> Duration {
        self.server.request_timeout()
    }

    pub fn exchanger(&self) -> &dyn TokenExchanger {
        self.exchanger.as_ref()
    }

    /// Agent client whose outbound calls carry the token held by `carrier`.
    pub fn agent_client(
        &self,
        carrier: Arc<TokenCarrier>,
    ) -> CopilotClient<CredentialInjector<HttpTransport>> {
        CopilotClient::new(
            Arc::clone(&self.agent),
            CredentialInjector::new(self.transport.clone(), carrier),
        )
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    if server.allows_any_origin() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring invalid allowed origin {:?}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Routes at the root and under `/api`, with CORS applied. Handlers enforce the request deadline.
pub fn router(state: RelayState) -> Router {
    let routes = Router::new()
        .route("/StartConversation", post(start_conversation))
        .route("/SendMessage", post(send_message))
        .route("/HealthCheck", get(health_check));
    let cors = cors_layer(&state.server);
    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(cors)
        .with_state(state)
}

/// Run the relay; binds to server.bind:server.port and blocks until shutdown (e.g. Ctrl+C).
/// In-flight requests are allowed to finish.
pub async fn run_relay(settings: RelaySettings) -> Result<()> {
    let state = RelayState::new(&settings)?;
    log::info!(
        "relaying to agent {} at {}",
        settings.agent.schema_name,
        settings.agent.base_url
    );
    log::info!("exchanging tokens at {}", settings.identity.token_endpoint());
    let app = router(state);

    let bind_addr = format!("{}:{}", settings.server.bind.trim(), settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

