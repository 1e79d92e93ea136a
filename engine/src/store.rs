//! The seam between the chat engine and the host application's scene.

use serde_json::Value;

/// Outcome of executing one tool against the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolExecution {
    /// The tool ran and its effect is in the scene. `summary` is the text fed
    /// back to the model as the tool result.
    Applied { summary: String },
    /// The tool could not be applied. `message` is fed back to the model as
    /// an error tool result.
    Failed { message: String },
}

impl ToolExecution {
    #[must_use]
    pub fn applied(summary: impl Into<String>) -> Self {
        Self::Applied {
            summary: summary.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Host-side scene state the tools operate on.
///
/// Implementations are synchronous: the engine executes tool calls one at a
/// time, in stream order, between completion rounds.
pub trait SceneStore {
    /// Execute a named tool. Unknown names should return
    /// [`ToolExecution::Failed`], not panic.
    ///
    /// The session owns its store, so implementations read their own
    /// current state; there is no separate scene-snapshot argument. The
    /// only snapshot the engine takes is [`Self::snapshot_summary`].
    fn execute_tool(&mut self, name: &str, input: &Value) -> ToolExecution;

    /// Pop the most recent entry from the scene's undo history.
    ///
    /// Returns false when the history is empty or the entry could not be
    /// reversed; batch undo stops at the first false.
    fn undo_last(&mut self) -> bool;

    /// Whether the undo history has at least one entry. Lets hosts gate
    /// their undo affordances without attempting a pop.
    fn can_undo(&self) -> bool;

    /// One-paragraph description of the current scene, injected into the
    /// request so the model sees fresh state every round.
    fn snapshot_summary(&self) -> String;
}
