//! Notifications pushed to the attached shell.
//!
//! The shell owns the receiving end of an unbounded channel. The log is
//! cumulative: each new line re-emits the whole log so a late subscriber can
//! render it without replaying history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What a chat event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Chat,
    Shout,
    Whisper,
    Join,
    Left,
}

impl ChatKind {
    /// Whether this kind carries speech that can be mimicked.
    pub fn is_speech(&self) -> bool {
        matches!(self, ChatKind::Chat | ChatKind::Shout | ChatKind::Whisper)
    }
}

/// A single entry of the room's chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: i32,
    pub username: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ChatKind,
}

impl ChatEvent {
    pub fn new(
        user_id: i32,
        username: impl Into<String>,
        message: impl Into<String>,
        kind: ChatKind,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            username: username.into(),
            message: message.into(),
            kind,
        }
    }
}

/// Events delivered to the shell.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The full log, newline-joined.
    LogUpdated(String),
    /// Usernames currently in the room.
    UsersUpdated(Vec<String>),
    /// A chat log entry.
    Chat(ChatEvent),
}

/// Sending half of the notification channel, shared by every task.
#[derive(Debug, Clone)]
pub struct Notifier {
    lines: Arc<Mutex<Vec<String>>>,
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            tx,
        };
        (notifier, rx)
    }

    /// Append a line and re-emit the whole log.
    pub async fn log(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().await;
        lines.push(line.into());
        self.emit(Notification::LogUpdated(lines.join("\n")));
    }

    pub fn users(&self, names: Vec<String>) {
        self.emit(Notification::UsersUpdated(names));
    }

    pub fn chat(&self, event: ChatEvent) {
        self.emit(Notification::Chat(event));
    }

    /// Copy of the log lines so far.
    pub async fn lines(&self) -> Vec<String> {
        self.lines.lock().await.clone()
    }

    fn emit(&self, notification: Notification) {
        // A shell that went away is not an error for the engine.
        let _ = self.tx.send(notification);
    }
}
