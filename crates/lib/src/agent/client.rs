//! Agent service client: start a conversation and ask a question, each answered with a
//! stream of activities over server-sent events.

use super::activity::Activity;
use super::sse::{SseDecoder, SseError, SseEvent};
use bytes::Bytes;
use super::transport::Transport;
use crate::config::AgentSettings;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::json;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Response header carrying the id of a newly started conversation.
pub const CONVERSATION_ID_HEADER: &str = "x-ms-conversationid";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent api error: {0}")]
    Api(String),
    #[error("invalid agent url: {0}")]
    Url(String),
    #[error("agent stream error: {0}")]
    Stream(#[from] SseError),
}

/// Ordered, finite stream of activities for one conversation turn. Dropping it cancels the
/// underlying response body.
pub struct ActivityStream {
    conversation_id: Option<String>,
    inner: BoxStream<'static, Result<Activity, AgentError>>,
}

impl ActivityStream {
    pub fn new(
        conversation_id: Option<String>,
        inner: BoxStream<'static, Result<Activity, AgentError>>,
    ) -> Self {
        Self {
            conversation_id,
            inner,
        }
    }

    /// Conversation id reported in the response headers, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Drain the stream. The first error aborts the collection and nothing is returned.
    pub async fn collect_all(self) -> Result<Vec<Activity>, AgentError> {
        self.inner.try_collect().await
    }
}

impl Stream for ActivityStream {
    type Item = Result<Activity, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Client for one agent, sending through `T`. Construct one per inbound request with that
/// request's transport so its credentials are used.
pub struct CopilotClient<T> {
    settings: Arc<AgentSettings>,
    transport: T,
}

impl<T: Transport> CopilotClient<T> {
    pub fn new(settings: Arc<AgentSettings>, transport: T) -> Self {
        Self {
            settings,
            transport,
        }
    }

    /// Conversations endpoint, or the endpoint of one conversation when `conversation_id` is set.
    pub fn conversations_url(&self, conversation_id: Option<&str>) -> Result<reqwest::Url, AgentError> {
        let s = &self.settings;
        let base = format!(
            "{}/copilotstudio/dataverse-backed/authenticated/bots/{}/conversations",
            s.base_url, s.schema_name
        );
        let mut url = reqwest::Url::parse(&base).map_err(|e| AgentError::Url(format!("{}: {}", base, e)))?;
        if let Some(id) = conversation_id {
            url.path_segments_mut()
                .map_err(|_| AgentError::Url(base.clone()))?
                .push(id);
        }
        url.query_pairs_mut().append_pair("api-version", &s.api_version);
        Ok(url)
    }

    /// Begin a conversation. With `emit_start_event`, the agent runs its greeting topic and the
    /// stream carries the greeting activities.
    pub async fn start_conversation(&self, emit_start_event: bool) -> Result<ActivityStream, AgentError> {
        let url = self.conversations_url(None)?;
        let body = json!({ "emitStartConversationEvent": emit_start_event });
        self.post_stream(url, &body).await
    }

    /// Send a user message into an existing conversation.
    pub async fn ask_question(&self, text: &str, conversation_id: &str) -> Result<ActivityStream, AgentError> {
        let url = self.conversations_url(Some(conversation_id))?;
        let body = json!({
            "activity": {
                "type": "message",
                "text": text,
                "conversation": { "id": conversation_id }
            }
        });
        self.post_stream(url, &body).await
    }

    async fn post_stream(&self, url: reqwest::Url, body: &serde_json::Value) -> Result<ActivityStream, AgentError> {
        let mut request = reqwest::Request::new(reqwest::Method::POST, url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *request.body_mut() = Some(reqwest::Body::from(body.to_string()));

        let res = self.transport.execute(request).await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Api(format!("{} {}", status, body)));
        }
        let conversation_id = res
            .headers()
            .get(CONVERSATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty());
        Ok(ActivityStream::new(conversation_id, activity_stream(res)))
    }
}

struct StreamState {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<Activity>,
    finished: bool,
}

impl StreamState {
    /// End the stream with `err`, dropping anything decoded but not yet yielded.
    fn fail(&mut self, err: AgentError) -> AgentError {
        self.finished = true;
        self.pending.clear();
        err
    }

    fn accept(&mut self, event: SseEvent) {
        if self.finished {
            return;
        }
        match event.event.as_deref() {
            Some("end") => self.finished = true,
            Some("activity") | None => {
                match serde_json::from_str::<Option<Activity>>(&event.data) {
                    Ok(Some(activity)) => self.pending.push_back(activity),
                    Ok(None) => {}
                    Err(e) => log::debug!("skipping undecodable activity: {}", e),
                }
            }
            Some(other) => log::debug!("ignoring agent event {:?}", other),
        }
    }
}

/// Turn an SSE response body into activities. Null or undecodable activity frames are skipped;
/// a body error or an oversized line ends the stream with that error.
fn activity_stream(res: reqwest::Response) -> BoxStream<'static, Result<Activity, AgentError>> {
    let state = StreamState {
        body: res.bytes_stream().boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(activity) = state.pending.pop_front() {
                return Some((Ok(activity), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                    Ok(events) => {
                        for event in events {
                            state.accept(event);
                        }
                    }
                    Err(e) => return Some((Err(state.fail(e.into())), state)),
                },
                Some(Err(e)) => return Some((Err(state.fail(AgentError::Request(e))), state)),
                None => {
                    if let Some(event) = state.decoder.finish() {
                        state.accept(event);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
