//! The single user-facing notification channel.
//!
//! Interior components return typed errors; the application layer folds
//! everything a user should see (throttle warnings, storage quota notices,
//! generation failures) into [`Notice`] values on one unbounded channel the
//! host renders however it likes: toast, status line, dialog.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Cheap-to-clone producer half of the notice channel. Sends never fail;
/// if the host dropped the receiver the notice is discarded.
#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Notice::info(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(Notice::warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Notice::error(message));
    }

    fn push(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}
