//! Assembles streamed tool-call input fragments into parsed JSON.
//!
//! The Messages API streams one content block at a time and never interleaves
//! `input_json_delta` frames from different tool calls, so the assembler
//! holds exactly one active call. Fragments arriving with no active call are
//! dropped with a warning.

use serde_json::Value;
use thiserror::Error;

/// Upper bound on accumulated input fragments for one call.
const MAX_TOOL_INPUT_BYTES: usize = 256 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("tool input exceeded {limit} bytes")]
    InputTooLarge { limit: usize },
}

/// A closed tool-use block: the call id plus its parsed input. `Err` only
/// for inputs over the size cap; unparseable input degrades to `{}`.
#[derive(Debug)]
pub struct AssembledCall {
    pub call_id: String,
    pub input: Result<Value, AssembleError>,
}

#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    active: Option<ActiveCall>,
}

#[derive(Debug)]
struct ActiveCall {
    call_id: String,
    buffer: String,
    overflowed: bool,
}

impl ToolCallAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new active call. A still-open previous call is discarded; the
    /// wire protocol closes every block before starting the next, so hitting
    /// this path means the stream itself was malformed.
    pub fn begin(&mut self, call_id: impl Into<String>) {
        let call_id = call_id.into();
        if let Some(previous) = self.active.take() {
            tracing::warn!(
                previous = %previous.call_id,
                replacement = %call_id,
                "Tool call block started before previous block closed; discarding buffered input"
            );
        }
        self.active = Some(ActiveCall {
            call_id,
            buffer: String::new(),
            overflowed: false,
        });
    }

    /// Append an input fragment to the active call. Returns false when no
    /// call is open (fragment dropped).
    pub fn append_fragment(&mut self, fragment: &str) -> bool {
        let Some(active) = self.active.as_mut() else {
            tracing::warn!("Dropping tool input fragment with no active call");
            return false;
        };
        if active.overflowed {
            return true;
        }
        if active.buffer.len().saturating_add(fragment.len()) > MAX_TOOL_INPUT_BYTES {
            tracing::warn!(call_id = %active.call_id, "Tool input exceeded size cap");
            active.overflowed = true;
            active.buffer.clear();
            return true;
        }
        active.buffer.push_str(fragment);
        true
    }

    /// Close the active call, parsing its accumulated input.
    ///
    /// An empty buffer parses as `{}` - tools without parameters stream no
    /// fragments at all. Input that fails to parse also degrades to `{}`
    /// rather than failing the call. Returns `None` when no call is open
    /// (the closed block was text or thinking).
    pub fn finish(&mut self) -> Option<AssembledCall> {
        let active = self.active.take()?;
        let input = if active.overflowed {
            Err(AssembleError::InputTooLarge {
                limit: MAX_TOOL_INPUT_BYTES,
            })
        } else if active.buffer.trim().is_empty() {
            Ok(empty_object())
        } else {
            Ok(serde_json::from_str(&active.buffer).unwrap_or_else(|e| {
                tracing::warn!(%e, call_id = %active.call_id, "Tool input is not valid JSON; using empty input");
                empty_object()
            }))
        };
        Some(AssembledCall {
            call_id: active.call_id,
            input,
        })
    }

    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
