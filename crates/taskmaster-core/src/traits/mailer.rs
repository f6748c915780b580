//! Outbound email transport interface.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver one email. A failure is reported as `TaskmasterError::Transport`.
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;

    /// Human-readable transport name for logs.
    fn name(&self) -> &str;
}
