use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::NotificationSink;
use crate::config::SmtpConfig;
use crate::error::NotifyError;

// ---

/// Sends alert email through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    // ---
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        // ---
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid SMTP_FROM {:?}: {}", config.from, e))?;

        let mut builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| anyhow!("Invalid SMTP relay {:?}: {}", config.host, e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, recipients: &[String], subject: &str, body: &str) -> Result<Message, NotifyError> {
        // ---
        let mut message = Message::builder().from(self.from.clone());
        for recipient in recipients {
            let mailbox = recipient
                .parse::<Mailbox>()
                .map_err(|e| NotifyError::Build(format!("recipient {recipient:?}: {e}")))?;
            message = message.to(mailbox);
        }

        message
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl NotificationSink for SmtpNotifier {
    // ---
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        // ---
        let message = self.build_message(recipients, subject, body)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

/// Logs notifications instead of delivering them. Used when SMTP is unset.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    // ---
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        info!(recipients = ?recipients, subject, body, "Notification (log only)");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn plain_config() -> SmtpConfig {
        // ---
        SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            username: None,
            password: None,
            from: "HeatSync <alerts@heatsync.local>".to_string(),
            tls: false,
        }
    }

    #[test]
    fn test_rejects_invalid_sender() {
        // ---
        let mut config = plain_config();
        config.from = "nobody".to_string();
        assert!(SmtpNotifier::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_build_message_addresses_every_recipient() {
        // ---
        let notifier = SmtpNotifier::new(&plain_config()).unwrap();
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];

        let message = notifier.build_message(&recipients, "subject", "body").unwrap();
        let envelope = message.envelope();

        assert_eq!(envelope.to().len(), 2);
        assert_eq!(
            envelope.from().map(|a| a.to_string()),
            Some("alerts@heatsync.local".to_string())
        );
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_recipient() {
        // ---
        let notifier = SmtpNotifier::new(&plain_config()).unwrap();
        let recipients = vec!["broken".to_string()];

        assert!(matches!(
            notifier.build_message(&recipients, "s", "b"),
            Err(NotifyError::Build(_))
        ));
    }
}
