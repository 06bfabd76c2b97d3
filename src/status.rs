//! User-visible status line.
//!
//! Every failure path and long-running step reports here. The receiving end
//! is whatever renders the editor (the CLI prints them).

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

/// Cheap, cloneable sender for status updates. Reporting never fails; a
/// status nobody listens to is dropped.
#[derive(Clone)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<Status>>,
}

impl StatusReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Status>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that only logs.
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StatusKind::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(StatusKind::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StatusKind::Error, message.into());
    }

    fn emit(&self, kind: StatusKind, message: String) {
        match kind {
            StatusKind::Error => log::warn!("[STATUS] {}", message),
            _ => log::debug!("[STATUS] {}", message),
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(Status { kind, message });
        }
    }
}
