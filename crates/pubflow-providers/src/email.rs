//! Outgoing email.
//!
//! Messages are RFC 5322 MIME with an optional `application/*` attachment,
//! sent over SMTP with optional STARTTLS and AUTH from settings.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parking_lot::Mutex;

use pubflow_core::settings::SmtpSettings;

/// Error building or sending a message.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("email address did not parse: {0}")]
    Address(String),

    #[error("email message could not be built: {0}")]
    Build(String),

    #[error("smtp error: {0}")]
    Smtp(String),
}

/// An attachment carried by an outgoing email.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub file_name: String,
    /// Media type, e.g. `application/xml`.
    pub media_type: String,
    pub content: Vec<u8>,
}

/// One outgoing email.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Option<EmailAttachment>,
}

/// Seam pipelines send email through.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

fn build_message(email: &OutgoingEmail) -> Result<Message, MailError> {
    let from: Mailbox = email
        .from
        .parse()
        .map_err(|_| MailError::Address(email.from.clone()))?;

    let mut builder = Message::builder().from(from).subject(email.subject.clone());
    for recipient in &email.to {
        let to: Mailbox = recipient
            .parse()
            .map_err(|_| MailError::Address(recipient.clone()))?;
        builder = builder.to(to);
    }

    let message = match &email.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.media_type)
                .map_err(|err| MailError::Build(err.to_string()))?;
            let part = Attachment::new(attachment.file_name.clone())
                .body(Body::new(attachment.content.clone()), content_type);
            builder
                .multipart(
                    MultiPart::mixed()
                        .singlepart(SinglePart::plain(email.body.clone()))
                        .singlepart(part),
                )
                .map_err(|err| MailError::Build(err.to_string()))?
        }
        None => builder
            .body(email.body.clone())
            .map_err(|err| MailError::Build(err.to_string()))?,
    };
    Ok(message)
}

/// SMTP implementation over `lettre`.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, MailError> {
        let mut builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(settings.host.as_str())
                .map_err(|err| MailError::Smtp(err.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
        };
        builder = builder.port(settings.port);

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(&email)?;
        self.transport
            .send(message)
            .await
            .map_err(|err| MailError::Smtp(err.to_string()))?;
        Ok(())
    }
}

/// Recording mailer for tests.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        // Validate the message builds even though nothing is transported.
        build_message(&email)?;
        self.sent.lock().push(email);
        Ok(())
    }
}
