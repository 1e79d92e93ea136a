//! Execution gating policy for scene-mutating tool calls.

use serde::{Deserialize, Serialize};

/// When the engine may apply tool calls to the scene.
///
/// `Immediate` executes each call as soon as its input block closes.
/// `RequireApproval` defers execution, with one carve-out: calls in a round
/// the model follows with more work (stop reason `tool_use`) execute anyway,
/// because the model is blocked on their results. Only calls left over when
/// the turn ends become previews awaiting the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Immediate,
    RequireApproval,
}

impl ApprovalMode {
    /// Whether calls execute while the stream is still open.
    #[must_use]
    pub const fn executes_during_stream(self) -> bool {
        matches!(self, ApprovalMode::Immediate)
    }
}
