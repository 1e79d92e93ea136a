//! Core domain types for Stagehand.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the copilot.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod ids;
mod message;
mod tool_call;
mod wire;

pub use ids::MessageId;
pub use message::{ChatMessage, ChatRole, ImageAttachment, MessageFeedback};
pub use tool_call::{StatusTransitionError, ToolCall, ToolCallStatus};
pub use wire::{ContentBlock, TranscriptMessage};

use serde::{Deserialize, Serialize};

// ============================================================================
// Usage Accounting
// ============================================================================

/// Token consumption reported by the completion service.
///
/// Used at three granularities: a single `usage` stream report, the total
/// for one turn, and the running session counters. All additive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ApiUsage {
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Fold another report into this counter. Saturating - counters are
    /// monotonically non-decreasing and must never wrap.
    pub fn add(&mut self, other: ApiUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.input_tokens > 0 || self.output_tokens > 0
    }
}

// ============================================================================
// Streaming Events
// ============================================================================

/// Terminal signal from the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Unknown,
}

impl StopReason {
    /// Whether the model is waiting for tool results before continuing.
    #[must_use]
    pub const fn wants_tools(self) -> bool {
        matches!(self, StopReason::ToolUse)
    }
}

/// A decoded completion-stream event.
///
/// This is a closed sum type: adding an event kind is a compile-time-checked
/// change for every consumer. The provider client normalizes its wire frames
/// to exactly these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text content delta for the active message.
    TextDelta(String),
    /// A reasoning/thinking block opened.
    ThinkingStart,
    /// Reasoning content delta.
    ThinkingDelta(String),
    /// Tool call started - emitted when a `tool_use` content block begins.
    ToolCallStart { id: String, name: String },
    /// Partial JSON for the most recently started tool call's input.
    ToolCallDelta { fragment: String },
    /// The current content block (text, thinking, or tool input) closed.
    ContentBlockStop,
    /// Token consumption report.
    Usage(ApiUsage),
    /// Stream completed with the service's stop reason.
    Done(StopReason),
    /// Stream terminated with an error.
    Error(String),
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// A tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (function name).
    pub name: String,
    /// A description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's input.
    pub parameters: serde_json::Value,
    /// Whether invoking this tool pushes an entry onto the scene store's
    /// undo history. Fixes `ToolCall::undoable` at creation time.
    pub mutates_scene: bool,
}

impl ToolDefinition {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        mutates_scene: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            mutates_scene,
        }
    }
}
