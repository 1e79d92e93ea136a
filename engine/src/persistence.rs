//! Session persistence.
//!
//! Archives are plain JSON written atomically (temp file + rename) so a
//! crash mid-save never corrupts the previous archive. Only the most recent
//! [`HISTORY_PERSIST_CAP`] messages survive a save; older history is the
//! first thing dropped. Callers pick the path, typically
//! `<project_id>.json` under their sessions directory.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use stagehand_types::ChatMessage;

use crate::HISTORY_PERSIST_CAP;
use crate::completion::CompletionService;
use crate::gate::ApprovalMode;
use crate::session::{ChatSession, SessionStats};
use crate::store::SceneStore;

const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionArchive {
    pub version: u32,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    #[serde(default)]
    pub stats: SessionStats,
    pub messages: Vec<ChatMessage>,
}

impl SessionArchive {
    #[must_use]
    pub fn capture(
        messages: &[ChatMessage],
        approval_mode: ApprovalMode,
        stats: SessionStats,
    ) -> Self {
        let start = messages.len().saturating_sub(HISTORY_PERSIST_CAP);
        Self {
            version: ARCHIVE_VERSION,
            approval_mode,
            stats,
            messages: messages[start..].to_vec(),
        }
    }
}

impl<S: SceneStore, C: CompletionService> ChatSession<S, C> {
    /// Save the transcript tail plus session counters and mode to `path`.
    pub fn save_session(&self, path: &Path) -> anyhow::Result<()> {
        let archive = SessionArchive::capture(&self.messages, self.approval_mode, self.stats);
        let json = serde_json::to_vec_pretty(&archive)?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                NamedTempFile::new_in(dir)?
            }
            None => NamedTempFile::new_in(".")?,
        };
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        Ok(())
    }

    /// Replace the session's transcript, counters, and mode with an archive
    /// loaded from `path`.
    ///
    /// The id allocator advances past every loaded id so new messages never
    /// collide with restored ones.
    pub fn load_session(&mut self, path: &Path) -> anyhow::Result<()> {
        let bytes = std::fs::read(path)?;
        let archive: SessionArchive = serde_json::from_slice(&bytes)?;
        anyhow::ensure!(
            archive.version == ARCHIVE_VERSION,
            "unsupported session archive version {}",
            archive.version
        );

        let next_id = archive
            .messages
            .iter()
            .map(|m| m.id.value() + 1)
            .max()
            .unwrap_or(0);
        self.next_message_id = self.next_message_id.max(next_id);
        self.messages = archive.messages;
        self.approval_mode = archive.approval_mode;
        self.stats = archive.stats;
        self.last_error = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionArchive;
    use crate::HISTORY_PERSIST_CAP;
    use crate::gate::ApprovalMode;
    use crate::session::SessionStats;
    use stagehand_types::{ChatMessage, MessageId};
    use std::collections::BTreeMap;
    use std::time::SystemTime;

    fn user(id: u64) -> ChatMessage {
        ChatMessage::user(
            MessageId::new(id),
            format!("message {id}"),
            Vec::new(),
            BTreeMap::new(),
            SystemTime::UNIX_EPOCH,
        )
    }

    fn capture(messages: &[ChatMessage]) -> SessionArchive {
        SessionArchive::capture(messages, ApprovalMode::Immediate, SessionStats::default())
    }

    #[test]
    fn capture_keeps_only_the_tail() {
        let messages: Vec<ChatMessage> = (0..60).map(user).collect();
        let archive = capture(&messages);
        assert_eq!(archive.messages.len(), HISTORY_PERSIST_CAP);
        assert_eq!(archive.messages[0].id, MessageId::new(10));
        assert_eq!(archive.messages.last().unwrap().id, MessageId::new(59));
    }

    #[test]
    fn capture_keeps_everything_under_the_cap() {
        let messages: Vec<ChatMessage> = (0..3).map(user).collect();
        let archive = capture(&messages);
        assert_eq!(archive.messages.len(), 3);
    }
}
