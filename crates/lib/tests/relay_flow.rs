//! Integration tests: the relay router in front of a mock identity provider and a mock agent
//! service, both served on ephemeral ports. The agent echoes the Authorization header it
//! receives so each test can see which downstream token reached it.

use axum::{
    body::Body,
    extract::{Form, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use relay::config::Config;
use relay::relay::{router, RelayState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Token endpoint: `downstream-{assertion}`, or `invalid_grant` for the assertion "bad".
async fn token_endpoint(
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    assert_eq!(tenant, "tenant-1");
    assert_eq!(
        form.get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    );
    assert_eq!(
        form.get("requested_token_use").map(String::as_str),
        Some("on_behalf_of")
    );
    assert_eq!(form.get("client_id").map(String::as_str), Some("relay-app"));
    let assertion = form.get("assertion").cloned().unwrap_or_default();
    if assertion == "bad" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant", "error_description": "AADSTS50013" })),
        )
            .into_response();
    }
    Json(json!({
        "token_type": "Bearer",
        "expires_in": 3600,
        "access_token": format!("downstream-{}", assertion)
    }))
    .into_response()
}

#[derive(Clone, Default)]
struct AgentCalls(Arc<AtomicUsize>);

impl AgentCalls {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn sse(frames: &[Value]) -> String {
    let mut out = String::new();
    for frame in frames {
        out.push_str(&format!("event: activity\ndata: {}\n\n", frame));
    }
    out.push_str("event: end\ndata: end\n\n");
    out
}

fn auth_of(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Greeting stream. The inbound user "cutoff" gets one activity and then a broken body;
/// "refused" gets a 503.
async fn agent_start(State(calls): State<AgentCalls>, headers: HeaderMap) -> Response {
    calls.0.fetch_add(1, Ordering::SeqCst);
    match auth_of(&headers).as_str() {
        "Bearer downstream-refused" => {
            return (StatusCode::SERVICE_UNAVAILABLE, "agent unavailable").into_response();
        }
        "Bearer downstream-cutoff" => {
            let first = format!(
                "event: activity\ndata: {}\n\n",
                json!({ "type": "message", "text": "partial", "conversation": { "id": "conv-7" } })
            );
            let chunks: Vec<Result<String, std::io::Error>> = vec![
                Ok(first),
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "cut off")),
            ];
            return (
                [("content-type", "text/event-stream")],
                Body::from_stream(futures_util::stream::iter(chunks)),
            )
                .into_response();
        }
        _ => {}
    }
    let body = sse(&[
        json!({ "type": "typing" }),
        json!({
            "type": "message",
            "text": auth_of(&headers),
            "textFormat": "markdown",
            "conversation": { "id": "conv-42" },
            "suggestedActions": { "actions": [{ "type": "imBack", "text": "Help", "value": "help" }] }
        }),
    ]);
    (
        [
            ("content-type", "text/event-stream".to_string()),
            ("x-ms-conversationid", "conv-42".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn agent_ask(
    State(calls): State<AgentCalls>,
    Path((_, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    calls.0.fetch_add(1, Ordering::SeqCst);
    if conversation_id == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "agent exploded").into_response();
    }
    if conversation_id == "slow" {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    let text = body["activity"]["text"].as_str().unwrap_or_default();
    let frames = sse(&[
        json!({ "type": "typing" }),
        json!({ "type": "message", "text": format!("{} | {}", auth_of(&headers), text) }),
        json!({ "type": "event", "name": "trace" }),
        json!({ "type": "message", "text": "anything else?" }),
    ]);
    ([("content-type", "text/event-stream")], frames).into_response()
}

struct Harness {
    relay: String,
    agent_calls: AgentCalls,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with_timeout(120).await
    }

    async fn start_with_timeout(request_timeout_secs: u64) -> Self {
        let idp = spawn(Router::new().route("/:tenant/oauth2/v2.0/token", post(token_endpoint))).await;
        let agent_calls = AgentCalls::default();
        let agent = spawn(
            Router::new()
                .route(
                    "/copilotstudio/dataverse-backed/authenticated/bots/:schema/conversations",
                    post(agent_start),
                )
                .route(
                    "/copilotstudio/dataverse-backed/authenticated/bots/:schema/conversations/:id",
                    post(agent_ask),
                )
                .with_state(agent_calls.clone()),
        )
        .await;

        let env = HashMap::from([
            ("AGENT_RELAY_CLIENT_ID", "relay-app".to_string()),
            ("AGENT_RELAY_CLIENT_SECRET", "not-a-real-secret".to_string()),
            ("AGENT_RELAY_TENANT_ID", "tenant-1".to_string()),
            ("AGENT_RELAY_AUTHORITY", idp),
            ("AGENT_RELAY_SCHEMA_NAME", "cr123_helpdesk".to_string()),
            ("AGENT_RELAY_AGENT_ENDPOINT", agent),
        ]);
        let mut config = Config::default();
        config.server.request_timeout_secs = request_timeout_secs;
        let settings = config
            .resolve_with(&|name: &str| env.get(name).cloned())
            .expect("resolve settings");
        let state = RelayState::new(&settings).expect("relay state");
        let relay = spawn(router(state)).await;

        Self {
            relay,
            agent_calls,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, path: &str, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let req = self.client.post(format!("{}{}", self.relay, path));
        match bearer {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post(&self, path: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.request(path, bearer);
        if let Some(body) = body {
            req = req.json(&body);
        }
        Self::envelope(req).await
    }

    async fn post_raw(&self, path: &str, bearer: Option<&str>, body: Vec<u8>) -> (StatusCode, Value) {
        let req = self
            .request(path, bearer)
            .header("content-type", "application/json")
            .body(body);
        Self::envelope(req).await
    }

    async fn envelope(req: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let res = req.send().await.expect("relay request");
        let status = StatusCode::from_u16(res.status().as_u16()).expect("status");
        assert_eq!(
            res.headers()["content-type"],
            "application/json; charset=utf-8"
        );
        (status, res.json().await.expect("envelope json"))
    }
}

#[tokio::test]
async fn start_conversation_returns_id_and_greeting() {
    let h = Harness::start().await;
    let (status, body) = h.post("/StartConversation", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Conversation started successfully");
    assert!(body["error"].is_null());

    let data = &body["data"];
    assert_eq!(data["conversationId"], "conv-42");
    let activities = data["activities"].as_array().expect("activities");
    assert_eq!(activities.len(), 2);
    assert_eq!(activities[0]["type"], "typing");
    assert_eq!(activities[1]["text"], "Bearer downstream-alice");
    assert_eq!(activities[1]["textFormat"], "markdown");
    assert_eq!(
        activities[1]["suggestedActions"],
        json!([{ "text": "Help", "value": "help" }])
    );
}

#[tokio::test]
async fn send_message_filters_to_messages_by_default() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/api/SendMessage",
            Some("alice"),
            Some(json!({ "message": "reset my password", "conversationId": "conv-42" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Message processed successfully");
    let texts: Vec<&str> = body["data"]["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .map(|a| a["text"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(
        texts,
        vec!["Bearer downstream-alice | reset my password", "anything else?"]
    );
}

#[tokio::test]
async fn send_message_can_return_every_activity() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/SendMessage",
            Some("alice"),
            Some(json!({ "message": "hi", "conversationId": "conv-42", "onlyReturnMessages": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let types: Vec<&str> = body["data"]["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .map(|a| a["type"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(types, vec!["typing", "message", "event", "message"]);
}

#[tokio::test]
async fn missing_bearer_is_401_without_downstream_call() {
    let h = Harness::start().await;
    let (status, body) = h.post("/StartConversation", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        json!({
            "success": false,
            "message": "Authorization header with Bearer token is required",
            "data": null,
            "error": "Unauthorized"
        })
    );
    assert_eq!(h.agent_calls.count(), 0);
}

#[tokio::test]
async fn rejected_exchange_is_401_without_downstream_call() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/SendMessage",
            Some("bad"),
            Some(json!({ "message": "hi", "conversationId": "conv-42" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token exchange failed. Access denied.");
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(h.agent_calls.count(), 0);
}

#[tokio::test]
async fn missing_fields_are_400() {
    let h = Harness::start().await;
    for payload in [
        json!({ "message": "hi" }),
        json!({ "conversationId": "conv-42" }),
        json!({ "message": "", "conversationId": "conv-42" }),
    ] {
        let (status, body) = h.post("/SendMessage", Some("alice"), Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Message and ConversationId are required");
        assert_eq!(body["error"], "BadRequest");
    }
    assert_eq!(h.agent_calls.count(), 0);
}

#[tokio::test]
async fn agent_failure_is_500_envelope() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/SendMessage",
            Some("alice"),
            Some(json!({ "message": "hi", "conversationId": "broken" })),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Error processing message");
    let error = body["error"].as_str().expect("error text");
    assert!(error.contains("500"), "{}", error);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn start_conversation_cut_off_mid_stream_is_500_without_partial_data() {
    let h = Harness::start().await;
    let (status, body) = h.post("/StartConversation", Some("cutoff"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Error starting conversation");
    assert!(body["data"].is_null());
    assert!(body["error"].is_string());
    assert_eq!(h.agent_calls.count(), 1);
}

#[tokio::test]
async fn start_conversation_refused_downstream_is_500() {
    let h = Harness::start().await;
    let (status, body) = h.post("/api/StartConversation", Some("refused"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Error starting conversation");
    let error = body["error"].as_str().expect("error text");
    assert!(error.contains("503"), "{}", error);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn slow_agent_hits_the_deadline_with_an_envelope() {
    let h = Harness::start_with_timeout(1).await;
    let (status, body) = h
        .post(
            "/SendMessage",
            Some("alice"),
            Some(json!({ "message": "hi", "conversationId": "slow" })),
        )
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(
        body,
        json!({
            "success": false,
            "message": "Request timed out",
            "data": null,
            "error": "RequestTimeout"
        })
    );
}

#[tokio::test]
async fn oversized_body_is_401_before_auth_and_413_after() {
    let h = Harness::start().await;
    let big = vec![b' '; 3 * 1024 * 1024];

    let (status, body) = h.post_raw("/SendMessage", None, big.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, body) = h.post_raw("/SendMessage", Some("alice"), big).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "PayloadTooLarge");
    assert_eq!(h.agent_calls.count(), 0);
}

#[tokio::test]
async fn null_only_return_messages_filters_like_the_default() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/SendMessage",
            Some("alice"),
            Some(json!({ "message": "hi", "conversationId": "conv-42", "onlyReturnMessages": null })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let activities = body["data"]["activities"].as_array().expect("activities");
    assert_eq!(activities.len(), 2);
    assert!(activities.iter().all(|a| a["type"] == "message"));
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_credentials() {
    let h = Arc::new(Harness::start().await);
    let mut tasks = Vec::new();
    for i in 0..16 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let user = format!("user-{}", i);
            let (status, body) = h
                .post(
                    "/SendMessage",
                    Some(user.as_str()),
                    Some(json!({ "message": format!("from {}", user), "conversationId": "conv-42" })),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            let first = body["data"]["activities"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            (user, first)
        }));
    }
    for task in tasks {
        let (user, text) = task.await.expect("task");
        assert_eq!(
            text,
            format!("Bearer downstream-{} | from {}", user, user)
        );
    }
    assert_eq!(h.agent_calls.count(), 16);
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let h = Harness::start().await;
    let res = h
        .client
        .request(reqwest::Method::OPTIONS, format!("{}/SendMessage", h.relay))
        .header("origin", "https://portal.example.com")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization,content-type")
        .send()
        .await
        .expect("preflight");
    assert!(res.status().is_success());
    assert_eq!(res.headers()["access-control-allow-origin"], "*");
}
