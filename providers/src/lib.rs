//! Streaming client for the Anthropic Messages API.
//!
//! # Architecture
//!
//! - [`send_message`] - Issues one streaming completion request and decodes
//!   the response until a terminal event
//! - [`claude`] - Request-body construction and SSE frame interpretation
//! - [`retry`] - Exponential-backoff retry policy for the initial request
//!
//! Decoded events are delivered through a
//! [`tokio::sync::mpsc::Sender<StreamEvent>`] channel so the caller can fold
//! streaming content into its transcript as it arrives.
//!
//! # Error Handling
//!
//! Failures during streaming are delivered as [`StreamEvent::Error`] events
//! rather than `Result::Err` returns, allowing partial output to be kept.
//! Only low-level failures reading the HTTP byte stream return `Err`.

pub mod retry;
pub mod sse_types;

pub(crate) use anyhow::Result;
pub(crate) use stagehand_types::{
    ApiUsage, StopReason, StreamEvent, ToolDefinition, TranscriptMessage,
};
use std::sync::OnceLock;
use std::time::Duration;
pub(crate) use tokio::sync::mpsc;

pub use stagehand_types;

/// Canonical Anthropic Messages API endpoint.
pub const CLAUDE_MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

// reqwest only exposes tcp_keepalive (idle time); interval/retries use
// platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!(
                "Failed to build hardened HTTP client: {e}. Attempting minimal hardened fallback."
            );
            reqwest::Client::builder()
                .https_only(true)
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("Minimal hardened HTTP client must build; cannot proceed without TLS")
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .https_only(true)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

#[derive(Debug)]
pub(crate) enum SseParseAction {
    /// Continue processing, no event to emit
    Continue,
    /// Emit these events and continue
    Emit(Vec<StreamEvent>),
    /// Stream is done (message_stop)
    Done(StopReason),
    Error(String),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let timeout = std::env::var("STAGEHAND_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(timeout)
    })
}

pub(crate) async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

pub(crate) fn parse_sse_payload<T>(json: &serde_json::Value) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    match serde_json::from_value(json.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(%e, "Failed to parse SSE event");
            None
        }
    }
}

pub(crate) fn emit_or_continue(events: Vec<StreamEvent>) -> SseParseAction {
    if events.is_empty() {
        SseParseAction::Continue
    } else {
        SseParseAction::Emit(events)
    }
}

/// Process an SSE stream using a frame parser.
///
/// Handles the transport-level concerns:
/// - Timeout handling for idle streams
/// - Buffer management with size limits
/// - UTF-8 validation
/// - Event boundary detection
/// - `[DONE]` marker handling
/// - Parse error tracking with threshold
pub(crate) async fn process_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_event(tx, StreamEvent::Error("Stream idle timeout".to_string())).await;
            return Ok(());
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        // Security: prevent unbounded buffer growth
        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_event(
                tx,
                StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".to_string()),
            )
            .await;
            return Ok(());
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_event(
                    tx,
                    StreamEvent::Error("Received invalid UTF-8 from SSE stream".to_string()),
                )
                .await;
                return Ok(());
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                let _ = send_event(tx, StreamEvent::Done(StopReason::Unknown)).await;
                return Ok(());
            }

            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => {
                    parse_errors = 0;
                    match parser.parse(&json) {
                        SseParseAction::Continue => {}
                        SseParseAction::Emit(events) => {
                            for event in events {
                                let is_terminal = matches!(
                                    &event,
                                    StreamEvent::Done(_) | StreamEvent::Error(_)
                                );
                                if !send_event(tx, event).await {
                                    return Ok(());
                                }
                                if is_terminal {
                                    return Ok(());
                                }
                            }
                        }
                        SseParseAction::Done(reason) => {
                            let _ = send_event(tx, StreamEvent::Done(reason)).await;
                            return Ok(());
                        }
                        SseParseAction::Error(msg) => {
                            let _ = send_event(tx, StreamEvent::Error(msg)).await;
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            StreamEvent::Error(format!("Invalid stream payload: {e}")),
                        )
                        .await;
                        return Ok(());
                    }
                }
            }
        }
    }

    // Premature EOF: connection closed without completion signal
    let _ = send_event(
        tx,
        StreamEvent::Error("Connection closed before stream completed".to_string()),
    )
    .await;
    Ok(())
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[derive(Debug)]
pub(crate) enum ApiResponse {
    Success(reqwest::Response),
    StreamTerminated,
}

pub(crate) async fn handle_response(
    outcome: retry::RetryOutcome,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ApiResponse> {
    let response = match outcome {
        retry::RetryOutcome::Success(resp) | retry::RetryOutcome::HttpError(resp) => resp,
        retry::RetryOutcome::ConnectionError { attempts, source } => {
            let _ = send_event(
                tx,
                StreamEvent::Error(format!(
                    "Request failed after {attempts} attempts: {source}"
                )),
            )
            .await;
            return Ok(ApiResponse::StreamTerminated);
        }
        retry::RetryOutcome::NonRetryable(e) => {
            let _ = send_event(tx, StreamEvent::Error(format!("Request failed: {e}"))).await;
            return Ok(ApiResponse::StreamTerminated);
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let error_text = read_capped_error_body(response).await;
        let _ = send_event(
            tx,
            StreamEvent::Error(format!("API error {status}: {error_text}")),
        )
        .await;
        return Ok(ApiResponse::StreamTerminated);
    }

    Ok(ApiResponse::Success(response))
}

pub(crate) async fn send_retried_sse_request<P, F>(
    build_request: F,
    retry_config: &retry::RetryConfig,
    tx: &mpsc::Sender<StreamEvent>,
    parser: &mut P,
    idle_timeout: Duration,
) -> Result<()>
where
    P: SseParser,
    F: Fn() -> reqwest::RequestBuilder,
{
    let outcome = retry::send_with_retry(&build_request, None, retry_config).await;
    let response = match handle_response(outcome, tx).await? {
        ApiResponse::Success(resp) => resp,
        ApiResponse::StreamTerminated => return Ok(()),
    };

    process_sse_stream(response, parser, tx, idle_timeout).await
}

/// API credentials and model selection for the completion service.
///
/// The key is redacted from `Debug` output so request logging cannot leak it.
#[derive(Clone)]
pub struct ApiConfig {
    api_key: String,
    model: String,
    max_output_tokens: u32,
    thinking_budget: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiConfigError {
    #[error("API key must not be empty")]
    EmptyApiKey,
    #[error("model name must not be empty")]
    EmptyModel,
}

impl ApiConfig {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_output_tokens: u32,
    ) -> Result<Self, ApiConfigError> {
        let api_key = api_key.into();
        let model = model.into();
        if api_key.trim().is_empty() {
            return Err(ApiConfigError::EmptyApiKey);
        }
        if model.trim().is_empty() {
            return Err(ApiConfigError::EmptyModel);
        }
        Ok(Self {
            api_key,
            model,
            max_output_tokens,
            thinking_budget: None,
        })
    }

    /// Enable extended thinking with the given token budget.
    #[must_use]
    pub fn with_thinking_budget(mut self, budget_tokens: u32) -> Self {
        self.thinking_budget = Some(budget_tokens);
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub const fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    #[must_use]
    pub const fn thinking_budget(&self) -> Option<u32> {
        self.thinking_budget
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &"[redacted]")
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("thinking_budget", &self.thinking_budget)
            .finish()
    }
}

pub struct SendMessageRequest<'a> {
    pub config: &'a ApiConfig,
    pub messages: &'a [TranscriptMessage],
    pub system_prompt: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub tx: mpsc::Sender<StreamEvent>,
}

pub async fn send_message(request: SendMessageRequest<'_>) -> Result<()> {
    claude::send_message(&request).await
}

/// Anthropic Messages API client: request-body construction plus the SSE
/// frame parser that normalizes wire events to [`StreamEvent`].
pub mod claude;

#[cfg(test)]
mod tests {
    use super::{ApiConfig, drain_next_sse_event, extract_sse_data, find_sse_event_boundary};

    #[test]
    fn api_config_rejects_blank_key() {
        assert!(ApiConfig::new("  ", "claude-sonnet-4-5", 4096).is_err());
    }

    #[test]
    fn api_config_debug_redacts_key() {
        let config = ApiConfig::new("sk-ant-secret", "claude-sonnet-4-5", 4096).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("[redacted]"));
    }

    mod event_boundaries {
        use super::find_sse_event_boundary;

        #[test]
        fn lf_and_crlf_delimiters_are_both_recognized() {
            assert_eq!(
                find_sse_event_boundary(b"event: ping\n\nmore"),
                Some((11, 2))
            );
            assert_eq!(
                find_sse_event_boundary(b"event: ping\r\n\r\nmore"),
                Some((11, 4))
            );
        }

        #[test]
        fn earliest_delimiter_wins_regardless_of_style() {
            assert_eq!(find_sse_event_boundary(b"a\n\nb\r\n\r\n"), Some((1, 2)));
            assert_eq!(find_sse_event_boundary(b"a\r\n\r\nb\n\n"), Some((1, 4)));
        }

        #[test]
        fn partial_frames_have_no_boundary() {
            assert_eq!(find_sse_event_boundary(b""), None);
            assert_eq!(find_sse_event_boundary(b"event: message_start\n"), None);
            assert_eq!(find_sse_event_boundary(b"data: {\"index\": 0}\r\n"), None);
        }

        #[test]
        fn boundary_may_start_the_buffer() {
            assert_eq!(find_sse_event_boundary(b"\n\nevent: ping"), Some((0, 2)));
        }
    }

    mod frame_draining {
        use super::drain_next_sse_event;

        #[test]
        fn complete_frames_drain_in_order() {
            let mut buffer = b"event: message_start\n\nevent: ping\n\n".to_vec();
            assert_eq!(
                drain_next_sse_event(&mut buffer),
                Some(b"event: message_start".to_vec())
            );
            assert_eq!(drain_next_sse_event(&mut buffer), Some(b"event: ping".to_vec()));
            assert_eq!(drain_next_sse_event(&mut buffer), None);
            assert!(buffer.is_empty());
        }

        #[test]
        fn incomplete_frame_stays_buffered() {
            let mut buffer = b"data: {\"type\"".to_vec();
            assert_eq!(drain_next_sse_event(&mut buffer), None);
            assert_eq!(buffer, b"data: {\"type\"");
        }

        #[test]
        fn leading_delimiter_yields_an_empty_frame() {
            let mut buffer = b"\n\ndata: after\n\n".to_vec();
            assert_eq!(drain_next_sse_event(&mut buffer), Some(Vec::new()));
            assert_eq!(buffer, b"data: after\n\n");
        }

        #[test]
        fn crlf_framed_events_drain_cleanly() {
            let mut buffer = b"data: ok\r\n\r\ntail".to_vec();
            assert_eq!(drain_next_sse_event(&mut buffer), Some(b"data: ok".to_vec()));
            assert_eq!(buffer, b"tail");
        }

        #[test]
        fn split_frame_reassembles_across_chunks() {
            // Bytes arriving in two reads produce the same event as one read.
            let mut buffer = b"data: {\"type\":".to_vec();
            assert_eq!(drain_next_sse_event(&mut buffer), None);
            buffer.extend_from_slice(b" \"ping\"}\n\n");
            let event = drain_next_sse_event(&mut buffer);
            assert_eq!(event, Some(b"data: {\"type\": \"ping\"}".to_vec()));
            assert!(buffer.is_empty());
        }
    }

    mod data_extraction {
        use super::extract_sse_data;

        #[test]
        fn data_lines_join_with_newlines() {
            assert_eq!(extract_sse_data("data: one"), Some("one".to_string()));
            assert_eq!(
                extract_sse_data("data: one\ndata: two\ndata: three"),
                Some("one\ntwo\nthree".to_string())
            );
        }

        #[test]
        fn space_after_the_colon_is_optional() {
            assert_eq!(extract_sse_data("data:bare"), Some("bare".to_string()));
        }

        #[test]
        fn only_data_fields_contribute() {
            let event = "event: content_block_delta\nid: 7\ndata: {\"index\": 0}\nretry: 3000";
            assert_eq!(extract_sse_data(event), Some("{\"index\": 0}".to_string()));
            assert_eq!(extract_sse_data("event: ping\nid: 8"), None);
        }

        #[test]
        fn empty_payload_is_still_a_payload() {
            assert_eq!(extract_sse_data("data: "), Some(String::new()));
        }

        #[test]
        fn colons_inside_the_payload_survive() {
            assert_eq!(
                extract_sse_data("data: {\"type\": \"message_stop\"}"),
                Some("{\"type\": \"message_stop\"}".to_string())
            );
        }

        #[test]
        fn trailing_carriage_returns_are_stripped() {
            assert_eq!(extract_sse_data("data: one\r"), Some("one".to_string()));
            assert_eq!(
                extract_sse_data("data: one\r\ndata: two\ndata: three\r"),
                Some("one\ntwo\nthree".to_string())
            );
        }

        #[test]
        fn done_sentinel_passes_through_verbatim() {
            assert_eq!(extract_sse_data("data: [DONE]"), Some("[DONE]".to_string()));
        }
    }
}
