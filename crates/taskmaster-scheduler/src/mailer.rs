//! SMTP email transport (async lettre).
//! Sends each notification as multipart/alternative (plain text + HTML).

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use taskmaster_core::config::SmtpConfig;
use taskmaster_core::{EmailTransport, OutgoingEmail, Result, TaskmasterError};

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build the transport. Call inside a tokio runtime: lettre's connection
    /// pool spawns tasks on the current runtime.
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| TaskmasterError::Config(format!("Invalid from: {e}")))?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| TaskmasterError::Config(format!("SMTP relay: {e}")))?
                .port(config.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| TaskmasterError::Transport(format!("Invalid to: {e}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(|e| TaskmasterError::Transport(format!("Build email: {e}")))
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let message = self.build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| TaskmasterError::Transport(format!("SMTP send: {e}")))?;
        tracing::info!("📤 Email sent to: {}", email.to);
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.into(),
            subject: "Overdue task: Taxes".into(),
            html_body: "<p>Taxes</p>".into(),
            text_body: "Taxes".into(),
        }
    }

    #[tokio::test]
    async fn test_default_config_builds() {
        assert!(SmtpMailer::from_config(&SmtpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_from_is_config_error() {
        let config = SmtpConfig {
            from: "not-an-address".into(),
            ..SmtpConfig::default()
        };
        let err = SmtpMailer::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("Configuration error"), "got: {err}");
    }

    #[tokio::test]
    async fn test_message_is_multipart() {
        let mailer = SmtpMailer::from_config(&SmtpConfig::default()).unwrap();
        let message = mailer.build_message(&email("alice@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Overdue task: Taxes"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_transport_error() {
        let mailer = SmtpMailer::from_config(&SmtpConfig::default()).unwrap();
        let err = mailer.build_message(&email("nobody")).unwrap_err();
        assert!(matches!(err, TaskmasterError::Transport(_)));
    }
}
