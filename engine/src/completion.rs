//! The streaming completion seam and its production implementation.

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use stagehand_providers::{ApiConfig, SendMessageRequest, send_message};
use stagehand_types::{StreamEvent, ToolDefinition, TranscriptMessage};

use crate::STREAM_EVENT_CHANNEL_CAPACITY;

/// One round's worth of request state, built fresh by the turn loop.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<TranscriptMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// A started completion stream: decoded events plus the handle that cancels
/// the underlying request.
pub struct StreamHandle {
    pub events: mpsc::Receiver<StreamEvent>,
    pub abort_handle: AbortHandle,
}

/// Streaming model backend. Production is [`AnthropicCompletion`]; tests
/// substitute a stub that scripts event sequences.
pub trait CompletionService {
    fn begin(&self, request: CompletionRequest) -> StreamHandle;
}

/// Sends requests to the Anthropic Messages API on a spawned task.
///
/// Aborting the handle drops the request future; the event channel closes and
/// the turn loop observes end-of-stream.
#[derive(Debug, Clone)]
pub struct AnthropicCompletion {
    config: ApiConfig,
}

impl AnthropicCompletion {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }
}

impl CompletionService for AnthropicCompletion {
    fn begin(&self, request: CompletionRequest) -> StreamHandle {
        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let config = self.config.clone();

        let task = async move {
            let result = send_message(SendMessageRequest {
                config: &config,
                messages: &request.messages,
                system_prompt: Some(&request.system_prompt),
                tools: &request.tools,
                tx: tx.clone(),
            })
            .await;

            // Transport-level failure reading the byte stream; everything else
            // already arrived as StreamEvent::Error.
            if let Err(e) = result {
                let _ = tx.send(StreamEvent::Error(format!("Stream failed: {e}"))).await;
            }
        };

        tokio::spawn(async move {
            let _ = Abortable::new(task, abort_registration).await;
        });

        StreamHandle {
            events: rx,
            abort_handle,
        }
    }
}
