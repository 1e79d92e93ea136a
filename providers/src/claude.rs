use crate::{
    ApiUsage, Result, SendMessageRequest, SseParseAction, SseParser, StopReason, StreamEvent,
    ToolDefinition, TranscriptMessage, emit_or_continue, http_client, parse_sse_payload,
    retry::RetryConfig, send_retried_sse_request,
};
use stagehand_types::{ChatRole, ContentBlock};
use serde_json::json;

const API_URL: &str = crate::CLAUDE_MESSAGES_API_URL;

fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User | ChatRole::System => "user",
        ChatRole::Assistant => "assistant",
    }
}

fn block_to_json(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => json!({
            "type": "text",
            "text": text
        }),
        ContentBlock::Image { media_type, data } => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": media_type,
                "data": data
            }
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error
        }),
    }
}

struct ClaudeRequestBodyInput<'a> {
    model: &'a str,
    messages: &'a [TranscriptMessage],
    max_output_tokens: u32,
    system_prompt: Option<&'a str>,
    tools: &'a [ToolDefinition],
    thinking_budget: Option<u32>,
}

fn build_request_body(input: ClaudeRequestBodyInput<'_>) -> serde_json::Value {
    let ClaudeRequestBodyInput {
        model,
        messages,
        max_output_tokens,
        system_prompt,
        tools,
        thinking_budget,
    } = input;

    let mut system_blocks: Vec<serde_json::Value> = Vec::new();
    let mut api_messages: Vec<serde_json::Value> = Vec::new();

    if let Some(prompt) = system_prompt
        && !prompt.trim().is_empty()
    {
        system_blocks.push(json!({ "type": "text", "text": prompt }));
    }

    for message in messages {
        // System-role transcript entries are hoisted into system blocks; the
        // Messages API only accepts user/assistant turns.
        if message.role == ChatRole::System {
            for block in &message.blocks {
                if let ContentBlock::Text { text } = block {
                    system_blocks.push(json!({ "type": "text", "text": text }));
                }
            }
            continue;
        }

        let content: Vec<serde_json::Value> = message.blocks.iter().map(block_to_json).collect();
        if content.is_empty() {
            continue;
        }
        api_messages.push(json!({
            "role": role_str(message.role),
            "content": content
        }));
    }

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(model));
    body.insert("max_tokens".into(), json!(max_output_tokens));
    body.insert("stream".into(), json!(true));
    body.insert("messages".into(), json!(api_messages));

    if !system_blocks.is_empty() {
        body.insert("system".into(), json!(system_blocks));
    }

    if !tools.is_empty() {
        let tool_schemas: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect();
        body.insert("tools".into(), json!(tool_schemas));
    }

    if let Some(budget) = thinking_budget {
        body.insert(
            "thinking".into(),
            json!({
                "type": "enabled",
                "budget_tokens": budget
            }),
        );
    }

    serde_json::Value::Object(body)
}

use crate::sse_types::claude as typed;

/// Normalizes Messages API wire events to [`StreamEvent`]s.
///
/// Tracks a single active tool-use block: the API never interleaves
/// `input_json_delta` frames from different blocks, so one slot is enough,
/// and orphan input deltas (no open block) are dropped.
struct ClaudeParser {
    current_tool_id: Option<String>,
    /// Recorded from `message_delta`; reported with `Done` at `message_stop`.
    stop_reason: StopReason,
}

impl Default for ClaudeParser {
    fn default() -> Self {
        Self {
            current_tool_id: None,
            stop_reason: StopReason::EndTurn,
        }
    }
}

impl SseParser for ClaudeParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction {
        // Deserialize into typed event - forward compatible via Unknown variant
        let Some(event) = parse_sse_payload::<typed::Event>(json) else {
            return SseParseAction::Continue;
        };

        let mut events = Vec::new();

        match event {
            typed::Event::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    events.push(StreamEvent::Usage(ApiUsage {
                        input_tokens: usage.total_input_tokens(),
                        output_tokens: 0,
                    }));
                }
            }

            typed::Event::MessageDelta { delta, usage } => {
                if let Some(typed::MessageDeltaInfo {
                    stop_reason: Some(reason),
                }) = delta
                {
                    self.stop_reason = reason.into();
                }

                if let Some(usage) = usage
                    && usage.output_tokens > 0
                {
                    events.push(StreamEvent::Usage(ApiUsage {
                        input_tokens: 0,
                        output_tokens: usage.output_tokens,
                    }));
                }
            }

            typed::Event::ContentBlockStart { content_block, .. } => match content_block {
                typed::ContentBlock::ToolUse { id, name } => {
                    if id.is_empty() {
                        return SseParseAction::Error("Claude tool call missing id".to_string());
                    }
                    if name.is_empty() {
                        return SseParseAction::Error("Claude tool call missing name".to_string());
                    }
                    self.current_tool_id = Some(id.clone());
                    events.push(StreamEvent::ToolCallStart { id, name });
                }
                typed::ContentBlock::Thinking { thinking } => {
                    events.push(StreamEvent::ThinkingStart);
                    if !thinking.is_empty() {
                        events.push(StreamEvent::ThinkingDelta(thinking));
                    }
                }
                typed::ContentBlock::Text { .. } | typed::ContentBlock::Unknown => {}
            },

            typed::Event::ContentBlockDelta { delta, .. } => match delta {
                typed::Delta::TextDelta { text } => {
                    events.push(StreamEvent::TextDelta(text));
                }
                typed::Delta::ThinkingDelta { thinking } => {
                    events.push(StreamEvent::ThinkingDelta(thinking));
                }
                typed::Delta::InputJsonDelta { partial_json } => {
                    if self.current_tool_id.is_some() {
                        events.push(StreamEvent::ToolCallDelta {
                            fragment: partial_json,
                        });
                    } else {
                        tracing::warn!("Dropping input_json_delta with no open tool_use block");
                    }
                }
                typed::Delta::Unknown => {}
            },

            typed::Event::ContentBlockStop { .. } => {
                self.current_tool_id = None;
                events.push(StreamEvent::ContentBlockStop);
            }

            typed::Event::MessageStop => {
                return SseParseAction::Done(self.stop_reason);
            }

            typed::Event::Error { error } => {
                let msg = if error.message.is_empty() {
                    format!("Claude stream error: {}", error.error_type)
                } else {
                    error.message
                };
                return SseParseAction::Error(msg);
            }

            typed::Event::Ping | typed::Event::Unknown => {}
        }

        emit_or_continue(events)
    }
}

pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<()> {
    let client = http_client();
    let retry_config = RetryConfig::default();
    let config = request.config;

    let body = build_request_body(ClaudeRequestBodyInput {
        model: config.model(),
        messages: request.messages,
        max_output_tokens: config.max_output_tokens(),
        system_prompt: request.system_prompt,
        tools: request.tools,
        thinking_budget: config.thinking_budget(),
    });

    let api_key = config.api_key().to_string();
    let body_json = body;

    let mut parser = ClaudeParser::default();
    send_retried_sse_request(
        || {
            client
                .post(API_URL)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body_json)
        },
        &retry_config,
        &request.tx,
        &mut parser,
        crate::stream_idle_timeout(),
    )
    .await
}
