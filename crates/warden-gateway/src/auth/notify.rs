//! Outbound notifications for verification and password reset.

use async_trait::async_trait;
use serde::Serialize;

/// What a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Email verification link.
    Verification,
    /// Password reset link.
    PasswordReset,
}

/// A single-use token on its way to the account holder.
#[derive(Clone, Serialize)]
pub struct Notification {
    /// Recipient email.
    pub to: String,
    /// Purpose of the message.
    pub kind: NotificationKind,
    /// The single-use token to embed in the link.
    pub token: String,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("to", &self.to)
            .field("kind", &self.kind)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Delivers notifications. Callers fire and forget.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Errors are the notifier's to log.
    async fn deliver(&self, notification: Notification);
}

/// Notifier that writes the token to the log, for development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: Notification) {
        tracing::info!(
            to = %notification.to,
            kind = ?notification.kind,
            token = %notification.token,
            "Notification ready for delivery"
        );
    }
}
