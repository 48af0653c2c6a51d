//! Anthropic Messages API provider

use crate::{
    error::{Error, Result},
    providers::{CompletionProvider, get_api_key},
    stream::{CompletionEventStream, StreamEvent},
    types::{CacheFlag, CacheTtl, ContentPart, StreamRequest, SystemBlock, Turn, TurnContent, UsageReport},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Extra output room required on top of the thinking budget
const THINKING_HEADROOM: u32 = 4096;

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from a provided key or the ANTHROPIC_API_KEY environment variable
    pub fn from_env_or(api_key: Option<&str>) -> Result<Self> {
        Ok(Self::new(get_api_key(api_key, API_KEY_ENV)?))
    }

    /// Point the provider at another endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_headers(&self, request: &StreamRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| Error::InvalidApiKey)?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        if let Some(compaction) = &request.compaction {
            let beta = HeaderValue::from_str(&compaction.beta)
                .map_err(|e| Error::InvalidConfig(format!("invalid beta flag: {}", e)))?;
            headers.insert("anthropic-beta", beta);
        }

        Ok(headers)
    }

    fn build_request(&self, request: &StreamRequest) -> AnthropicRequest {
        let system: Vec<AnthropicSystemBlock> = request
            .system
            .iter()
            .filter(|block| !block.text.is_empty())
            .map(convert_system_block)
            .collect();

        let mut body = AnthropicRequest {
            model: request.model_id.clone(),
            messages: request.messages.iter().map(convert_turn).collect(),
            max_tokens: request.max_output_tokens,
            stream: true,
            system: if system.is_empty() { None } else { Some(system) },
            thinking: None,
            context_management: None,
        };

        if let Some(budget) = request.thinking_budget {
            body.thinking = Some(ThinkingConfig {
                thinking_type: "enabled".to_string(),
                budget_tokens: budget,
            });
            body.max_tokens = body.max_tokens.max(budget.saturating_add(THINKING_HEADROOM));
        }

        if let Some(compaction) = &request.compaction {
            body.context_management = Some(ContextManagement {
                edits: vec![ContextEdit {
                    edit_type: "compact_20260112".to_string(),
                    trigger: EditTrigger {
                        trigger_type: "input_tokens".to_string(),
                        value: compaction.trigger_tokens,
                    },
                }],
            });
        }

        body
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    /// Open the event stream.
    ///
    /// Failures before the first event (bad status, transport) are returned as
    /// typed errors; failures after it arrive as a final `StreamEvent::Error`.
    async fn stream(&self, request: &StreamRequest) -> Result<CompletionEventStream> {
        let headers = self.build_headers(request)?;
        let body = self.build_request(request);
        let url = format!("{}/v1/messages", self.base_url);

        tracing::debug!(
            "API call: model={}, messages={}, max_tokens={}, thinking={}, system_blocks={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.thinking.is_some(),
            body.system.as_ref().map_or(0, Vec::len)
        );

        let request_builder = self.client.post(&url).headers(headers).json(&body);
        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        let first = match event_source.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(event)) => Some(event),
            Some(Err(e)) => {
                event_source.close();
                let err = connection_error(e).await;
                tracing::error!("Anthropic request failed: {}", err);
                return Err(err);
            }
            None => return Err(Error::Sse("stream closed before opening".to_string())),
        };

        Ok(Box::pin(create_stream(event_source, first)))
    }
}

/// What one SSE message means for the completion stream
#[derive(Debug, Clone, PartialEq)]
enum SseStep {
    Emit(StreamEvent),
    Continue,
    Stop,
    Fail(String),
}

/// Usage and stop reason folded across the SSE messages of one response
#[derive(Debug, Default)]
struct StreamState {
    usage: UsageReport,
    stop_reason: Option<String>,
}

impl StreamState {
    fn handle(&mut self, event: &str, data: &str) -> SseStep {
        match event {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<MessageStartEvent>(data) {
                    start.message.usage.apply_to(&mut self.usage);
                }
                SseStep::Continue
            }
            "content_block_delta" => {
                let Ok(block) = serde_json::from_str::<ContentBlockDeltaEvent>(data) else {
                    return SseStep::Continue;
                };
                match block.delta.delta_type.as_str() {
                    "text_delta" => SseStep::Emit(StreamEvent::TextDelta {
                        text: block.delta.text.unwrap_or_default(),
                    }),
                    "thinking_delta" => SseStep::Emit(StreamEvent::ThinkingDelta {
                        thinking: block.delta.thinking.unwrap_or_default(),
                    }),
                    _ => SseStep::Continue,
                }
            }
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if delta.delta.stop_reason.is_some() {
                        self.stop_reason = delta.delta.stop_reason;
                    }
                    delta.usage.apply_to(&mut self.usage);
                }
                SseStep::Continue
            }
            "message_stop" => SseStep::Stop,
            "error" => SseStep::Fail(
                serde_json::from_str::<ErrorEvent>(data)
                    .map(|e| describe_api_error(&e.error))
                    .unwrap_or_else(|_| data.to_string()),
            ),
            _ => SseStep::Continue,
        }
    }

    /// Closing events of a stream that ended cleanly
    fn finish(self) -> [StreamEvent; 2] {
        tracing::debug!(
            "API response: {} input, {} output, {} cache_write, {} cache_read, stop={:?}",
            self.usage.input_tokens,
            self.usage.output_tokens,
            self.usage.cache_creation_tokens,
            self.usage.cache_read_tokens,
            self.stop_reason
        );
        [
            StreamEvent::Usage { usage: self.usage },
            StreamEvent::Done {
                stop_reason: self.stop_reason,
            },
        ]
    }
}

/// Turn SSE events into completion events
fn create_stream(
    mut event_source: EventSource,
    first: Option<Event>,
) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        let mut state = StreamState::default();
        let mut failure: Option<String> = None;
        let mut pending = first.map(Ok);

        loop {
            let event_result = match pending.take() {
                Some(event) => event,
                None => match event_source.next().await {
                    Some(event) => event,
                    None => break,
                },
            };
            match event_result {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => match state.handle(&message.event, &message.data) {
                    SseStep::Emit(event) => yield event,
                    SseStep::Continue => {}
                    SseStep::Stop => break,
                    SseStep::Fail(message) => {
                        failure = Some(message);
                        break;
                    }
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    failure = Some(connection_error(e).await.to_string());
                    break;
                }
            }
        }
        event_source.close();

        match failure {
            Some(message) => {
                tracing::error!("Anthropic stream failed: {}", message);
                yield StreamEvent::Error { message };
            }
            None => {
                for event in state.finish() {
                    yield event;
                }
            }
        }
    }
}

/// Map an event source failure to a typed error
async fn connection_error(err: reqwest_eventsource::Error) -> Error {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            status_error(status.as_u16(), retry_after, &body)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

/// Typed error for a non-2xx response
fn status_error(status: u16, retry_after: Option<u64>, body: &str) -> Error {
    let parsed = serde_json::from_str::<ErrorEvent>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        401 | 403 => Error::Auth(message),
        429 => Error::RateLimited {
            message,
            retry_after,
        },
        _ => {
            let error_type = match parsed {
                Some(e) => e.error.error_type,
                None if status >= 500 => "server_error".to_string(),
                None => format!("http_{}", status),
            };
            Error::Api {
                error_type,
                message,
            }
        }
    }
}

fn describe_api_error(error: &ApiError) -> String {
    format!("{}: {}", error.error_type, error.message)
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<AnthropicSystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_management: Option<ContextManagement>,
}

#[derive(Debug, Serialize)]
struct AnthropicSystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: String,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ContextManagement {
    edits: Vec<ContextEdit>,
}

#[derive(Debug, Serialize)]
struct ContextEdit {
    #[serde(rename = "type")]
    edit_type: String,
    trigger: EditTrigger,
}

#[derive(Debug, Serialize)]
struct EditTrigger {
    #[serde(rename = "type")]
    trigger_type: String,
    value: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

// ============================================================================
// Response event types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsageInfo {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

impl UsageInfo {
    /// Overwrite the fields this report carries
    fn apply_to(&self, usage: &mut UsageReport) {
        if let Some(n) = self.input_tokens {
            usage.input_tokens = n;
        }
        if let Some(n) = self.output_tokens {
            usage.output_tokens = n;
        }
        if let Some(n) = self.cache_read_input_tokens {
            usage.cache_read_tokens = n;
        }
        if let Some(n) = self.cache_creation_input_tokens {
            usage.cache_creation_tokens = n;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    #[serde(default)]
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

fn convert_system_block(block: &SystemBlock) -> AnthropicSystemBlock {
    let cache_control = match block.cache {
        CacheFlag::Uncached => None,
        CacheFlag::Cached(ttl) => Some(CacheControl {
            control_type: "ephemeral".to_string(),
            // 5m is the provider default and is left implicit
            ttl: match ttl {
                CacheTtl::FiveMinutes => None,
                CacheTtl::OneHour => Some(ttl.as_str().to_string()),
            },
        }),
    };
    AnthropicSystemBlock {
        block_type: "text".to_string(),
        text: block.text.clone(),
        cache_control,
    }
}

fn convert_turn(turn: &Turn) -> AnthropicMessage {
    let content = match &turn.content {
        TurnContent::Text(text) => serde_json::Value::String(text.clone()),
        TurnContent::Parts(parts) => {
            serde_json::Value::Array(parts.iter().map(convert_part).collect())
        }
    };
    AnthropicMessage {
        role: turn.role.as_str().to_string(),
        content,
    }
}

fn convert_part(part: &ContentPart) -> serde_json::Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentPart::Image { media_type, data } => serde_json::json!({
            "type": "image",
            "source": { "type": "base64", "media_type": media_type, "data": data }
        }),
        ContentPart::Document { media_type, data } => serde_json::json!({
            "type": "document",
            "source": { "type": "base64", "media_type": media_type, "data": data }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attachment, ServerCompaction};

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("sk-test")
    }

    fn request() -> StreamRequest {
        StreamRequest {
            system: vec![
                SystemBlock::cached("persona and docs", CacheTtl::FiveMinutes),
                SystemBlock::cached("<conversation_summary>\ns\n</conversation_summary>", CacheTtl::OneHour),
                SystemBlock::text(""),
            ],
            messages: vec![Turn::user("hi"), Turn::assistant("hello"), Turn::user("again")],
            model_id: "claude-sonnet-4-5-20250929".into(),
            max_output_tokens: 8192,
            thinking_budget: None,
            compaction: None,
        }
    }

    #[test]
    fn test_system_blocks_carry_cache_control() {
        let body = serde_json::to_value(provider().build_request(&request())).unwrap();
        let system = body["system"].as_array().unwrap();
        // empty block dropped
        assert_eq!(system.len(), 2);
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
        assert!(system[0]["cache_control"].get("ttl").is_none());
        assert_eq!(system[1]["cache_control"]["ttl"], "1h");
        assert!(body.get("thinking").is_none());
        assert!(body.get("context_management").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_uncached_block_has_no_cache_control() {
        let mut req = request();
        req.system = vec![SystemBlock::text("plain")];
        let body = serde_json::to_value(provider().build_request(&req)).unwrap();
        assert!(body["system"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_thinking_raises_max_tokens() {
        let mut req = request();
        req.max_output_tokens = 2048;
        req.thinking_budget = Some(8192);
        let body = serde_json::to_value(provider().build_request(&req)).unwrap();
        assert_eq!(body["thinking"]["budget_tokens"], 8192);
        assert_eq!(body["max_tokens"], 8192 + 4096);
    }

    #[test]
    fn test_compaction_adds_context_management_and_beta() {
        let mut req = request();
        req.compaction = Some(ServerCompaction {
            beta: "compact-2026-01-12".into(),
            trigger_tokens: 160_000,
        });
        let p = provider();
        let body = serde_json::to_value(p.build_request(&req)).unwrap();
        let edit = &body["context_management"]["edits"][0];
        assert_eq!(edit["type"], "compact_20260112");
        assert_eq!(edit["trigger"]["value"], 160_000);

        let headers = p.build_headers(&req).unwrap();
        assert_eq!(headers["anthropic-beta"], "compact-2026-01-12");
    }

    #[test]
    fn test_attachments_become_base64_sources() {
        let mut req = request();
        req.messages = vec![Turn::user_with_parts(vec![
            ContentPart::text("what is this"),
            Attachment::image("image/jpeg", "AAAA").to_content_part(),
            Attachment::document("application/pdf", "JVBE").to_content_part(),
        ])];
        let body = serde_json::to_value(provider().build_request(&req)).unwrap();
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[2]["type"], "document");
        assert_eq!(content[2]["source"]["type"], "base64");
    }

    #[test]
    fn test_plain_turns_send_string_content() {
        let body = serde_json::to_value(provider().build_request(&request())).unwrap();
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_usage_info_overwrites_present_fields_only() {
        let mut usage = UsageReport::default();
        let start: MessageStartEvent = serde_json::from_str(
            r#"{"message":{"usage":{"input_tokens":120,"output_tokens":1,"cache_read_input_tokens":9000,"cache_creation_input_tokens":0}}}"#,
        )
        .unwrap();
        start.message.usage.apply_to(&mut usage);
        let delta: MessageDeltaEvent = serde_json::from_str(
            r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":350}}"#,
        )
        .unwrap();
        delta.usage.apply_to(&mut usage);

        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 350);
        assert_eq!(usage.cache_read_tokens, 9000);
        assert_eq!(delta.delta.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_thinking_budget_near_max_saturates() {
        let mut req = request();
        req.thinking_budget = Some(u32::MAX - 10);
        let body = serde_json::to_value(provider().build_request(&req)).unwrap();
        assert_eq!(body["max_tokens"], u32::MAX);
    }

    #[test]
    fn test_stream_state_folds_usage_across_messages() {
        let mut state = StreamState::default();
        let steps = [
            state.handle(
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":40,"cache_creation_input_tokens":2100,"cache_read_input_tokens":0,"output_tokens":1}}}"#,
            ),
            state.handle("content_block_start", r#"{"type":"content_block_start","index":0}"#),
            state.handle(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
            ),
            state.handle(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            state.handle("ping", "{}"),
            state.handle(
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":57}}"#,
            ),
            state.handle("message_stop", r#"{"type":"message_stop"}"#),
        ];
        assert_eq!(
            steps,
            [
                SseStep::Continue,
                SseStep::Continue,
                SseStep::Emit(StreamEvent::ThinkingDelta {
                    thinking: "hmm".into()
                }),
                SseStep::Emit(StreamEvent::TextDelta { text: "Hi".into() }),
                SseStep::Continue,
                SseStep::Continue,
                SseStep::Stop,
            ]
        );

        let [usage, done] = state.finish();
        assert_eq!(
            usage,
            StreamEvent::Usage {
                usage: UsageReport {
                    input_tokens: 40,
                    output_tokens: 57,
                    cache_creation_tokens: 2100,
                    cache_read_tokens: 0,
                }
            }
        );
        assert_eq!(
            done,
            StreamEvent::Done {
                stop_reason: Some("end_turn".into())
            }
        );
    }

    #[test]
    fn test_stream_state_error_event() {
        let mut state = StreamState::default();
        let step = state.handle(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert_eq!(step, SseStep::Fail("overloaded_error: Overloaded".into()));
        assert_eq!(
            state.handle("error", "not json"),
            SseStep::Fail("not json".into())
        );
    }

    #[test]
    fn test_stream_state_ignores_malformed_delta() {
        let mut state = StreamState::default();
        assert_eq!(state.handle("content_block_delta", "{"), SseStep::Continue);
        assert_eq!(state.handle("message_start", "{}"), SseStep::Continue);
        assert_eq!(state.usage, UsageReport::default());
    }

    #[test]
    fn test_status_error_is_typed() {
        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        match status_error(429, Some(12), body) {
            Error::RateLimited {
                message,
                retry_after,
            } => {
                assert_eq!(message, "slow down");
                assert_eq!(retry_after, Some(12));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert!(matches!(status_error(401, None, "nope"), Error::Auth(m) if m == "nope"));

        let overloaded = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = status_error(529, None, overloaded);
        assert!(err.is_retryable());
        assert!(status_error(502, None, "bad gateway").is_retryable());
        assert!(!status_error(400, None, "bad request").is_retryable());
    }

    #[test]
    fn test_invalid_api_key_header() {
        let p = AnthropicProvider::new("bad\nkey");
        assert!(matches!(
            p.build_headers(&request()),
            Err(Error::InvalidApiKey)
        ));
    }
}
