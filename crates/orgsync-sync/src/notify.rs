//! Outbound mail for the audit report.

use std::fmt;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone)]
pub struct NoticeAttachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub attachment: NoticeAttachment,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid mail address {address:?}: {reason}")]
    Address { address: String, reason: String },
    #[error("building message: {0}")]
    Message(String),
    #[error("reading attachment: {0}")]
    Attachment(String),
    #[error("smtp delivery: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notice: &Notice) -> Result<(), NotificationError>;
}

#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

/// Authenticated STARTTLS relay.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    settings: SmtpSettings,
}

fn mailbox(address: &str) -> Result<Mailbox, NotificationError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|err| NotificationError::Address {
            address: address.to_string(),
            reason: err.to_string(),
        })
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    pub fn build_message(&self, notice: &Notice) -> Result<Message, NotificationError> {
        if notice.recipients.is_empty() {
            return Err(NotificationError::Message("notice has no recipients".into()));
        }

        let mut builder = Message::builder()
            .from(mailbox(&self.settings.from)?)
            .subject(notice.subject.clone());
        for recipient in &notice.recipients {
            builder = builder.to(mailbox(recipient)?);
        }

        let content_type = ContentType::parse(&notice.attachment.content_type)
            .map_err(|err| NotificationError::Message(err.to_string()))?;
        let attachment = Attachment::new(notice.attachment.file_name.clone())
            .body(notice.attachment.bytes.clone(), content_type);

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(notice.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|err| NotificationError::Message(err.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[tracing::instrument(skip_all, fields(host = %self.settings.host, recipients = notice.recipients.len()))]
    async fn send(&self, notice: &Notice) -> Result<(), NotificationError> {
        let message = self.build_message(notice)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.host)
            .map_err(|err| NotificationError::Transport(err.to_string()))?
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.username.clone(),
                self.settings.password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        info!("audit notice sent");
        Ok(())
    }
}
