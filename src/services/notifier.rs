//! Outbound notifications sent once a submission's files are stored.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Mutex;
use thiserror::Error;

use crate::config::MailConfig;
use crate::models::SubmissionForm;

/// Business days within which the applicant is promised an answer
pub const RESPONSE_WINDOW_DAYS: u32 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Message could not be built: {0}")]
    Build(String),

    #[error("Delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    /// Copy for the administrator listing everything the applicant sent
    pub fn admin_copy(admin_email: &str, form: &SubmissionForm, radicado: &str) -> Self {
        Self {
            recipient: admin_email.to_string(),
            subject: format!("Nuevo formulario recibido - {}", radicado),
            body: format!(
                "Se recibió un nuevo formulario:\n\n\
                 Nombre: {}\n\
                 Correo: {}\n\
                 Cédula: {}\n\
                 Ciudad: {}\n\
                 Asunto: {}\n\
                 Radicado: {}",
                form.applicant_name,
                form.applicant_email,
                form.applicant_id,
                form.city,
                form.subject,
                radicado
            ),
        }
    }

    /// Acknowledgement for the applicant carrying the tracking number
    pub fn submitter_copy(form: &SubmissionForm, radicado: &str) -> Self {
        Self {
            recipient: form.applicant_email.clone(),
            subject: format!("Tu solicitud fue recibida - Radicado {}", radicado),
            body: format!(
                "Hola {},\n\n\
                 Tu solicitud ha sido radicada con el número {}.\n\
                 Recibirás una respuesta en un plazo máximo de {} días hábiles.\n\n\
                 Gracias.",
                form.applicant_name, radicado, RESPONSE_WINDOW_DAYS
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// Sends plain-text mail through an authenticated SMTP relay (STARTTLS)
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn from_config(config: &MailConfig) -> Result<Self, NotificationError> {
        let from: Mailbox =
            config
                .from_email
                .parse()
                .map_err(|e: lettre::address::AddressError| {
                    NotificationError::InvalidAddress {
                        address: config.from_email.clone(),
                        reason: e.to_string(),
                    }
                })?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotificationError::Build(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_pass.clone(),
            ))
            .build();

        tracing::info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            "📧 Mail transport initialized (SMTP with STARTTLS)"
        );

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let to: Mailbox =
            message
                .recipient
                .parse()
                .map_err(|e: lettre::address::AddressError| {
                    NotificationError::InvalidAddress {
                        address: message.recipient.clone(),
                        reason: e.to_string(),
                    }
                })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| NotificationError::Build(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| NotificationError::Delivery {
                recipient: message.recipient.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(recipient = %message.recipient, "📨 Notification sent");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Selected with
/// `MAIL_TRANSPORT=log`; keeps every message for inspection.
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<NotificationMessage>>,
    failing_recipients: Mutex<Vec<String>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: delivery to `recipient` fails. Never armed by the service.
    pub fn fail_for(&self, recipient: impl Into<String>) {
        if let Ok(mut failing) = self.failing_recipients.lock() {
            failing.push(recipient.into());
        }
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        let rejected = self
            .failing_recipients
            .lock()
            .map(|f| f.contains(&message.recipient))
            .unwrap_or(false);
        if rejected {
            return Err(NotificationError::Delivery {
                recipient: message.recipient.clone(),
                reason: "recipient rejected".to_string(),
            });
        }

        tracing::info!(
            recipient = %message.recipient,
            subject = %message.subject,
            "📨 Notification (log transport):\n{}",
            message.body
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> SubmissionForm {
        SubmissionForm {
            applicant_name: "Ana Pérez".to_string(),
            applicant_email: "ana@example.com".to_string(),
            applicant_id: "1020304050".to_string(),
            city: "Medellín".to_string(),
            subject: "Derecho de petición".to_string(),
        }
    }

    #[test]
    fn test_admin_copy_lists_every_field() {
        let msg = NotificationMessage::admin_copy("admin@example.com", &form(), "a1b2c3d4");
        assert_eq!(msg.recipient, "admin@example.com");
        assert_eq!(msg.subject, "Nuevo formulario recibido - a1b2c3d4");
        for expected in [
            "Nombre: Ana Pérez",
            "Correo: ana@example.com",
            "Cédula: 1020304050",
            "Ciudad: Medellín",
            "Asunto: Derecho de petición",
            "Radicado: a1b2c3d4",
        ] {
            assert!(msg.body.contains(expected), "missing {:?}", expected);
        }
    }

    #[test]
    fn test_submitter_copy_goes_to_applicant() {
        let msg = NotificationMessage::submitter_copy(&form(), "a1b2c3d4");
        assert_eq!(msg.recipient, "ana@example.com");
        assert_eq!(msg.subject, "Tu solicitud fue recibida - Radicado a1b2c3d4");
        assert!(msg.body.starts_with("Hola Ana Pérez,"));
        assert!(msg.body.contains("5 días hábiles"));
    }

    #[tokio::test]
    async fn test_log_notifier_records_and_fails_on_demand() {
        let notifier = LogNotifier::new();
        notifier.fail_for("bad@example.com");

        let ok = NotificationMessage::submitter_copy(&form(), "x");
        notifier.send(&ok).await.unwrap();

        let mut bad = ok.clone();
        bad.recipient = "bad@example.com".to_string();
        assert!(matches!(
            notifier.send(&bad).await,
            Err(NotificationError::Delivery { .. })
        ));
        assert_eq!(notifier.sent(), vec![ok]);
    }

    #[test]
    fn test_smtp_notifier_rejects_bad_sender() {
        let mut config = crate::config::AppConfig::development().mail;
        config.from_email = "not an address".to_string();
        assert!(matches!(
            SmtpNotifier::from_config(&config),
            Err(NotificationError::InvalidAddress { .. })
        ));
    }
}
