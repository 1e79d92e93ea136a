//! Wire-transcript shape consumed by the completion-service request builder.
//!
//! The turn loop builds one of these sequences per send from the session
//! transcript, then appends follow-up entries (assistant tool requests plus
//! their results) between rounds. The provider client serializes it to the
//! Messages API body; test stubs only inspect it.

use serde::{Deserialize, Serialize};

use crate::ChatRole;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: ChatRole,
    pub blocks: Vec<ContentBlock>,
}

impl TranscriptMessage {
    #[must_use]
    pub fn new(role: ChatRole, blocks: Vec<ContentBlock>) -> Self {
        Self { role, blocks }
    }

    #[must_use]
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}
