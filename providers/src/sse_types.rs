//! Typed SSE event structures for the Messages API.
//!
//! These types enable compile-time validation of wire JSON. Parse errors
//! happen at the serde boundary, not scattered through parsing logic, and
//! unknown event/block/delta kinds deserialize to `Unknown` variants so a
//! newer server cannot break the decoder.

pub mod claude {
    use serde::Deserialize;

    /// Top-level Claude SSE event, tagged by `type` field.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Event {
        MessageStart {
            message: MessageInfo,
        },
        MessageDelta {
            delta: Option<MessageDeltaInfo>,
            usage: Option<OutputUsage>,
        },
        ContentBlockStart {
            index: u32,
            content_block: ContentBlock,
        },
        ContentBlockDelta {
            index: u32,
            delta: Delta,
        },
        ContentBlockStop {
            index: u32,
        },
        MessageStop,
        /// Ping events (keepalive)
        Ping,
        Error {
            error: ErrorInfo,
        },
        /// Unknown event type - allows forward compatibility
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default, rename = "type")]
        pub error_type: String,
        #[serde(default)]
        pub message: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageInfo {
        pub usage: Option<InputUsage>,
    }

    /// Input token usage from message_start.
    ///
    /// Note: Anthropic's `input_tokens` is non-cached tokens only.
    /// Total input = input_tokens + cache_read + cache_creation
    #[derive(Debug, Deserialize, Default)]
    pub struct InputUsage {
        #[serde(default)]
        pub input_tokens: u64,
        #[serde(default)]
        pub cache_read_input_tokens: u64,
        #[serde(default)]
        pub cache_creation_input_tokens: u64,
    }

    impl InputUsage {
        /// Total input tokens including cached.
        #[must_use]
        pub fn total_input_tokens(&self) -> u64 {
            self.input_tokens
                .saturating_add(self.cache_read_input_tokens)
                .saturating_add(self.cache_creation_input_tokens)
        }
    }

    /// Output token usage from message_delta.
    #[derive(Debug, Deserialize, Default)]
    pub struct OutputUsage {
        #[serde(default)]
        pub output_tokens: u64,
    }

    /// Stop reason from message_delta's `delta` field.
    #[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
    #[serde(rename_all = "snake_case")]
    pub enum StopReason {
        EndTurn,
        MaxTokens,
        StopSequence,
        ToolUse,
        #[serde(other)]
        Unknown,
    }

    impl From<StopReason> for stagehand_types::StopReason {
        fn from(wire: StopReason) -> Self {
            match wire {
                StopReason::EndTurn => Self::EndTurn,
                StopReason::MaxTokens => Self::MaxTokens,
                StopReason::StopSequence => Self::StopSequence,
                StopReason::ToolUse => Self::ToolUse,
                StopReason::Unknown => Self::Unknown,
            }
        }
    }

    /// The `delta` object inside a `message_delta` event.
    #[derive(Debug, Deserialize)]
    pub struct MessageDeltaInfo {
        #[serde(default)]
        pub stop_reason: Option<StopReason>,
    }

    /// Content block in content_block_start.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentBlock {
        Text {
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
        },
        Thinking {
            thinking: String,
        },
        /// Unknown block type - forward compatibility
        #[serde(other)]
        Unknown,
    }

    /// Delta in content_block_delta.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Delta {
        TextDelta {
            text: String,
        },
        ThinkingDelta {
            thinking: String,
        },
        InputJsonDelta {
            partial_json: String,
        },
        /// Unknown delta type - forward compatibility
        #[serde(other)]
        Unknown,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn deserialize_message_start() {
            let json = r#"{
                "type": "message_start",
                "message": {
                    "usage": {
                        "input_tokens": 100,
                        "cache_read_input_tokens": 50,
                        "cache_creation_input_tokens": 25
                    }
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::MessageStart { message } => {
                    let usage = message.usage.unwrap();
                    assert_eq!(usage.input_tokens, 100);
                    assert_eq!(usage.cache_read_input_tokens, 50);
                    assert_eq!(usage.total_input_tokens(), 175);
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_content_block_start_tool_use() {
            let json = r#"{
                "type": "content_block_start",
                "index": 0,
                "content_block": {
                    "type": "tool_use",
                    "id": "toolu_123",
                    "name": "spawn_cube"
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockStart { content_block, .. } => match content_block {
                    ContentBlock::ToolUse { id, name } => {
                        assert_eq!(id, "toolu_123");
                        assert_eq!(name, "spawn_cube");
                    }
                    _ => panic!("wrong block type"),
                },
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_text_delta() {
            let json = r#"{
                "type": "content_block_delta",
                "index": 0,
                "delta": {
                    "type": "text_delta",
                    "text": "Hello"
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockDelta { delta, .. } => match delta {
                    Delta::TextDelta { text } => assert_eq!(text, "Hello"),
                    _ => panic!("wrong delta type"),
                },
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_thinking_delta() {
            let json = r#"{
                "type": "content_block_delta",
                "index": 0,
                "delta": {
                    "type": "thinking_delta",
                    "thinking": "Let me think..."
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockDelta { delta, .. } => match delta {
                    Delta::ThinkingDelta { thinking } => assert_eq!(thinking, "Let me think..."),
                    _ => panic!("wrong delta type"),
                },
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_input_json_delta() {
            let json = r#"{
                "type": "content_block_delta",
                "index": 0,
                "delta": {
                    "type": "input_json_delta",
                    "partial_json": "{\"size\":"
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockDelta { delta, .. } => match delta {
                    Delta::InputJsonDelta { partial_json } => {
                        assert_eq!(partial_json, "{\"size\":");
                    }
                    _ => panic!("wrong delta type"),
                },
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_message_stop() {
            let json = r#"{"type": "message_stop"}"#;
            let event: Event = serde_json::from_str(json).unwrap();
            assert!(matches!(event, Event::MessageStop));
        }

        #[test]
        fn unknown_event_type_deserializes() {
            let json = r#"{"type": "future_event", "data": 123}"#;
            let event: Event = serde_json::from_str(json).unwrap();
            assert!(matches!(event, Event::Unknown));
        }

        #[test]
        fn unknown_delta_type_deserializes() {
            let json = r#"{
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "signature_delta", "signature": "abc"}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockDelta { delta, .. } => {
                    assert!(matches!(delta, Delta::Unknown));
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn missing_usage_fields_default_to_zero() {
            let json = r#"{
                "type": "message_start",
                "message": {
                    "usage": {
                        "input_tokens": 100
                    }
                }
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::MessageStart { message } => {
                    let usage = message.usage.unwrap();
                    assert_eq!(usage.input_tokens, 100);
                    assert_eq!(usage.cache_read_input_tokens, 0);
                    assert_eq!(usage.cache_creation_input_tokens, 0);
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_message_delta_with_tool_use_stop_reason() {
            let json = r#"{
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use"},
                "usage": {"output_tokens": 42}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::MessageDelta { delta, usage } => {
                    let info = delta.unwrap();
                    assert_eq!(info.stop_reason, Some(StopReason::ToolUse));
                    assert_eq!(usage.unwrap().output_tokens, 42);
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_message_delta_unknown_stop_reason() {
            let json = r#"{
                "type": "message_delta",
                "delta": {"stop_reason": "future_reason"},
                "usage": {"output_tokens": 0}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::MessageDelta { delta, .. } => {
                    let info = delta.unwrap();
                    assert_eq!(info.stop_reason, Some(StopReason::Unknown));
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn deserialize_error_event() {
            let json = r#"{
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::Error { error } => {
                    assert_eq!(error.error_type, "overloaded_error");
                    assert_eq!(error.message, "Overloaded");
                }
                _ => panic!("wrong event type"),
            }
        }

        #[test]
        fn error_event_does_not_become_unknown() {
            let json = r#"{
                "type": "error",
                "error": {"type": "api_error", "message": "Internal server error"}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            assert!(!matches!(event, Event::Unknown));
        }
    }
}
