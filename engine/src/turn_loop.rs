//! The tool loop: one user send, up to [`MAX_TOOL_ROUNDS`] completion rounds.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use stagehand_types::{
    ApiUsage, ChatMessage, ChatRole, ContentBlock, ImageAttachment, MessageId, StopReason,
    StreamEvent, ToolCall, ToolCallStatus, TranscriptMessage,
};

use crate::MAX_TOOL_ROUNDS;
use crate::assembler::{AssembledCall, ToolCallAssembler};
use crate::completion::{CompletionRequest, CompletionService};
use crate::gate::ApprovalMode;
use crate::session::{ChatSession, SendError, SessionStats};
use crate::store::{SceneStore, ToolExecution};

const EMPTY_RESPONSE_NOTICE: &str = "[Empty response - the service returned no content]";
const ROUND_CAP_NOTICE: &str = "[Stopped: tool round limit reached]";

impl<S: SceneStore, C: CompletionService> ChatSession<S, C> {
    /// Send a user message and run the turn to completion.
    ///
    /// Returns the id of the assistant message that accumulated the
    /// response. The turn ends when the model stops requesting tools, the
    /// round cap is hit, the stream errors, or the caller cancels; in every
    /// case partial content is kept and all tool calls reach a settled
    /// status (gated leftovers settle as `Preview`).
    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
        images: Vec<ImageAttachment>,
        entity_refs: BTreeMap<String, String>,
    ) -> Result<MessageId, SendError> {
        let text = text.into();
        if self.in_flight.load(Ordering::SeqCst) {
            return Err(SendError::AlreadyStreaming);
        }
        if text.trim().is_empty() && images.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        self.in_flight.store(true, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.last_error = None;

        let user_id = self.alloc_message_id();
        self.messages.push(ChatMessage::user(
            user_id,
            text,
            images,
            entity_refs,
            SystemTime::now(),
        ));

        let assistant_id = self.alloc_message_id();
        let mut assistant = ChatMessage::assistant(assistant_id, SystemTime::now());

        let mut wire = wire_history(&self.messages);
        let mut turn_usage = ApiUsage::default();
        let mut assembler = ToolCallAssembler::new();

        'rounds: for round in 1..=MAX_TOOL_ROUNDS {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            // Fresh scene snapshot every round - tool effects from the
            // previous round must be visible to the model.
            let mut request_messages = Vec::with_capacity(wire.len() + 1);
            request_messages.push(TranscriptMessage::text(
                ChatRole::System,
                self.store.snapshot_summary(),
            ));
            request_messages.extend(wire.iter().cloned());

            let mut handle = self.completion.begin(CompletionRequest {
                system_prompt: self.system_prompt.clone(),
                messages: request_messages,
                tools: self.tools.clone(),
            });
            self.stats.requests += 1;
            self.store_abort_handle(handle.abort_handle.clone());

            let round_calls_start = assistant.tool_calls.len();
            let mut stop_reason: Option<StopReason> = None;
            let mut stream_error: Option<String> = None;

            while let Some(event) = handle.events.recv().await {
                if self.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    StreamEvent::TextDelta(delta) => assistant.content.push_str(&delta),
                    StreamEvent::ThinkingStart => {
                        assistant.thinking.get_or_insert_with(String::new);
                    }
                    StreamEvent::ThinkingDelta(delta) => {
                        assistant
                            .thinking
                            .get_or_insert_with(String::new)
                            .push_str(&delta);
                    }
                    StreamEvent::ToolCallStart { id, name } => {
                        let undoable = self
                            .tools
                            .iter()
                            .find(|t| t.name == name)
                            .is_some_and(|t| t.mutates_scene);
                        assembler.begin(id.clone());
                        assistant.tool_calls.push(ToolCall::pending(id, name, undoable));
                    }
                    StreamEvent::ToolCallDelta { fragment } => {
                        assembler.append_fragment(&fragment);
                    }
                    StreamEvent::ContentBlockStop => {
                        if let Some(assembled) = assembler.finish() {
                            close_tool_call(
                                &mut assistant,
                                assembled,
                                self.approval_mode,
                                &mut self.store,
                                &mut self.stats,
                            );
                        }
                    }
                    StreamEvent::Usage(usage) => turn_usage.add(usage),
                    StreamEvent::Done(reason) => {
                        stop_reason = Some(reason);
                        break;
                    }
                    StreamEvent::Error(message) => {
                        stream_error = Some(message);
                        break;
                    }
                }
            }

            self.clear_abort_handle();

            // A tool-use block the stream never closed has no usable input.
            if assembler.finish().is_some() {
                tracing::warn!("Stream ended inside a tool input block");
            }

            if self.cancelled.load(Ordering::SeqCst) {
                fail_unresolved(&mut assistant, round_calls_start, "Interrupted by user");
                break 'rounds;
            }

            if let Some(error) = stream_error {
                tracing::warn!(%error, "Completion stream ended with error");
                append_notice(&mut assistant, &format!("[Stream error: {error}]"));
                self.last_error = Some(error);
                fail_unresolved(&mut assistant, round_calls_start, "Stream ended before execution");
                break 'rounds;
            }

            let Some(stop) = stop_reason else {
                tracing::warn!("Event channel closed without a terminal event");
                append_notice(&mut assistant, "[Stream ended unexpectedly]");
                self.last_error = Some("Stream ended unexpectedly".to_string());
                fail_unresolved(&mut assistant, round_calls_start, "Stream ended before execution");
                break 'rounds;
            };

            let round_requested_tools = assistant.tool_calls.len() > round_calls_start;

            if !stop.wants_tools() || !round_requested_tools {
                if stop.wants_tools() {
                    tracing::warn!("Stop reason requested tools but none were streamed");
                }
                // Turn is over. Under approval gating, whatever is still
                // pending becomes a preview for the user to settle. In
                // immediate mode a call can only still be pending when the
                // stream never closed its input block, so it settles as an
                // error rather than waiting on an approval nobody asked for.
                for call in &mut assistant.tool_calls[round_calls_start..] {
                    if call.status != ToolCallStatus::Pending {
                        continue;
                    }
                    let settled = if self.approval_mode.executes_during_stream() {
                        call.resolve_error("Tool input block never closed")
                    } else {
                        call.defer()
                    };
                    if let Err(e) = settled {
                        tracing::warn!(%e, call_id = %call.id, "Failed to settle leftover tool call");
                    }
                }
                break 'rounds;
            }

            // The model is blocked on results, so deferred calls execute even
            // under approval gating - the turn has not ended yet.
            for call in &mut assistant.tool_calls[round_calls_start..] {
                if call.status == ToolCallStatus::Pending {
                    execute_call(&mut self.store, call, &mut self.stats);
                }
            }

            if round == MAX_TOOL_ROUNDS {
                tracing::warn!(rounds = MAX_TOOL_ROUNDS, "Tool round cap reached; ending turn");
                append_notice(&mut assistant, ROUND_CAP_NOTICE);
                break;
            }

            // Feed this round back: the assistant's tool requests, then
            // their results as the next user entry.
            let round_text = assistant.content.trim();
            let round_calls = &assistant.tool_calls[round_calls_start..];
            let mut blocks = Vec::with_capacity(round_calls.len() + 1);
            if !round_text.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: round_text.to_string(),
                });
            }
            blocks.extend(round_calls.iter().map(tool_use_block));
            wire.push(TranscriptMessage::new(ChatRole::Assistant, blocks));
            wire.push(TranscriptMessage::new(
                ChatRole::User,
                round_calls.iter().map(tool_result_block).collect(),
            ));

            // Tool calls accumulate across rounds; visible text does not.
            // This round's text lives on in the wire entry above.
            assistant.content.clear();
        }

        if turn_usage.has_data() {
            self.stats.usage.add(turn_usage);
            assistant.usage = Some(turn_usage);
        }

        if assistant.content.is_empty()
            && assistant.thinking.is_none()
            && assistant.tool_calls.is_empty()
        {
            assistant.content = EMPTY_RESPONSE_NOTICE.to_string();
        }

        self.messages.push(assistant);
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(assistant_id)
    }
}

/// Attach assembled input to its call; execute now when the gate allows.
fn close_tool_call<S: SceneStore>(
    assistant: &mut ChatMessage,
    assembled: AssembledCall,
    mode: ApprovalMode,
    store: &mut S,
    stats: &mut SessionStats,
) {
    let Some(call) = assistant.tool_call_mut(&assembled.call_id) else {
        tracing::warn!(call_id = %assembled.call_id, "Assembled input for unknown tool call");
        return;
    };
    match assembled.input {
        Ok(input) => {
            call.input = input;
            if mode.executes_during_stream() {
                execute_call(store, call, stats);
            }
        }
        Err(e) => {
            if let Err(err) = call.resolve_error(e.to_string()) {
                tracing::warn!(%err, call_id = %call.id, "Failed to record tool input error");
            }
        }
    }
}

pub(crate) fn execute_call<S: SceneStore>(
    store: &mut S,
    call: &mut ToolCall,
    stats: &mut SessionStats,
) {
    stats.tools_executed += 1;
    let resolution = match store.execute_tool(&call.name, &call.input) {
        ToolExecution::Applied { summary } => call.resolve_success(summary),
        ToolExecution::Failed { message } => call.resolve_error(message),
    };
    if let Err(e) = resolution {
        tracing::warn!(%e, call_id = %call.id, "Tool call resolution rejected");
    }
}

fn fail_unresolved(assistant: &mut ChatMessage, from: usize, message: &str) {
    for call in &mut assistant.tool_calls[from..] {
        if call.status == ToolCallStatus::Pending
            && let Err(e) = call.resolve_error(message)
        {
            tracing::warn!(%e, call_id = %call.id, "Failed to fail unresolved tool call");
        }
    }
}

fn append_notice(assistant: &mut ChatMessage, notice: &str) {
    if !assistant.content.is_empty() {
        assistant.content.push_str("\n\n");
    }
    assistant.content.push_str(notice);
}

fn tool_use_block(call: &ToolCall) -> ContentBlock {
    ContentBlock::ToolUse {
        id: call.id.clone(),
        name: call.name.clone(),
        input: call.input.clone(),
    }
}

/// Render a settled call as the tool result the model sees.
fn tool_result_block(call: &ToolCall) -> ContentBlock {
    let (content, is_error) = match call.status {
        ToolCallStatus::Success | ToolCallStatus::Undone => {
            (call.result.clone().unwrap_or_default(), false)
        }
        ToolCallStatus::Error => (
            call.error
                .clone()
                .unwrap_or_else(|| "Tool execution failed".to_string()),
            true,
        ),
        ToolCallStatus::Preview => ("Deferred, awaiting user approval".to_string(), true),
        ToolCallStatus::Rejected => ("Rejected by user".to_string(), true),
        ToolCallStatus::Pending => ("Not executed".to_string(), true),
    };
    ContentBlock::ToolResult {
        tool_use_id: call.id.clone(),
        content,
        is_error,
    }
}

fn user_wire_text(message: &ChatMessage) -> String {
    if message.entity_refs.is_empty() {
        return message.content.clone();
    }
    let refs: Vec<String> = message
        .entity_refs
        .iter()
        .map(|(alias, target)| format!("\"{alias}\" refers to scene entity {target}"))
        .collect();
    format!("{}\n\n[{}]", message.content, refs.join("; "))
}

/// Rebuild the wire transcript from the session transcript.
///
/// Assistant messages with tool calls expand into the assistant entry plus a
/// user entry of results, mirroring what the turn loop sent while the calls
/// were live.
pub(crate) fn wire_history(messages: &[ChatMessage]) -> Vec<TranscriptMessage> {
    let mut wire = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            ChatRole::System => {
                if !message.content.trim().is_empty() {
                    wire.push(TranscriptMessage::text(ChatRole::System, &message.content));
                }
            }
            ChatRole::User => {
                let mut blocks = Vec::with_capacity(message.images.len() + 1);
                let text = user_wire_text(message);
                if !text.trim().is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                blocks.extend(message.images.iter().map(|image| ContentBlock::Image {
                    media_type: image.media_type.clone(),
                    data: image.data.clone(),
                }));
                if !blocks.is_empty() {
                    wire.push(TranscriptMessage::new(ChatRole::User, blocks));
                }
            }
            ChatRole::Assistant => {
                let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
                if !message.content.trim().is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                blocks.extend(message.tool_calls.iter().map(tool_use_block));
                if blocks.is_empty() {
                    continue;
                }
                wire.push(TranscriptMessage::new(ChatRole::Assistant, blocks));
                if message.has_tool_calls() {
                    wire.push(TranscriptMessage::new(
                        ChatRole::User,
                        message.tool_calls.iter().map(tool_result_block).collect(),
                    ));
                }
            }
        }
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::{tool_result_block, user_wire_text, wire_history};
    use stagehand_types::{
        ChatMessage, ChatRole, ContentBlock, MessageId, ToolCall,
    };
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    #[test]
    fn entity_refs_render_into_user_text() {
        let mut refs = BTreeMap::new();
        refs.insert("the cube".to_string(), "node_42".to_string());
        let msg = ChatMessage::user(
            MessageId::new(0),
            "make it red",
            Vec::new(),
            refs,
            SystemTime::UNIX_EPOCH,
        );
        let text = user_wire_text(&msg);
        assert!(text.starts_with("make it red"));
        assert!(text.contains("\"the cube\" refers to scene entity node_42"));
    }

    #[test]
    fn rejected_call_replays_as_error_result() {
        let mut call = ToolCall::pending("toolu_1", "spawn_cube", true);
        call.defer().unwrap();
        call.reject().unwrap();
        match tool_result_block(&call) {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert_eq!(content, "Rejected by user");
                assert!(is_error);
            }
            other => panic!("expected tool result block, got {other:?}"),
        }
    }

    #[test]
    fn wire_history_expands_assistant_tool_calls() {
        let user = ChatMessage::user(
            MessageId::new(0),
            "spawn a cube",
            Vec::new(),
            BTreeMap::new(),
            SystemTime::UNIX_EPOCH,
        );
        let mut assistant = ChatMessage::assistant(MessageId::new(1), SystemTime::UNIX_EPOCH);
        assistant.content = "Spawning.".to_string();
        let mut call = ToolCall::pending("toolu_1", "spawn_cube", true);
        call.resolve_success("created node_1").unwrap();
        assistant.tool_calls.push(call);

        let wire = wire_history(&[user, assistant]);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, ChatRole::User);
        assert_eq!(wire[1].role, ChatRole::Assistant);
        assert_eq!(wire[1].blocks.len(), 2);
        assert_eq!(wire[2].role, ChatRole::User);
        assert!(matches!(
            &wire[2].blocks[0],
            ContentBlock::ToolResult { is_error: false, .. }
        ));
    }

    #[test]
    fn wire_history_skips_empty_assistant_messages() {
        let assistant = ChatMessage::assistant(MessageId::new(0), SystemTime::UNIX_EPOCH);
        assert!(wire_history(&[assistant]).is_empty());
    }
}
