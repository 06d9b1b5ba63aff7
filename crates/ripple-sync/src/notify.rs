//! User-visible notices.
//!
//! Sync operations never hand errors back to the view layer. They report
//! one [`Notice`] through a [`Notifier`] instead, which a UI shell renders
//! as an alert and headless callers route to logs.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    /// Set for error notices.
    pub kind: Option<ErrorKind>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            kind: None,
        }
    }

    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            kind: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "{}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Sink for user-visible notices. Implementations can raise an alert,
/// forward to a UI channel, write to tracing, or discard them.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier that uses the `tracing` crate.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Info => tracing::info!(notice = true, "{}", notice.message),
            Severity::Error => tracing::error!(notice = true, kind = ?notice.kind, "{}", notice.message),
        }
    }
}

/// No-op notifier that discards all notices.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _notice: Notice) {}
}

/// Forwards notices to whoever renders them, typically the UI task.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            tracing::debug!("notice dropped, nobody is listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_forwards_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notice::info("saved"));
        notifier.notify(Notice::error("Something went wrong", ErrorKind::NetworkOrServer));

        assert_eq!(rx.try_recv().unwrap(), Notice::info("saved"));
        let second = rx.try_recv().unwrap();
        assert!(second.is_error());
        assert_eq!(second.kind, Some(ErrorKind::NetworkOrServer));
        assert_eq!(second.to_string(), "error: Something went wrong");
    }

    #[test]
    fn closed_channel_is_not_fatal() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notice::info("nobody home"));
    }
}
