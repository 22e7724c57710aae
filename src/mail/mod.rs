//! Completion notifications.
//!
//! The pipeline hands finished-batch messages to a [`Mailer`]. The actual
//! transport is not ours: [`OutboxMailer`] persists messages for the delivery
//! worker, [`LogMailer`] only logs them. Both hand over the delivery form of a
//! message: an HTML body and only an attachment that can be read.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::storage::{outbox, Pool};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("message has no recipients")]
    NoRecipients,

    #[error("failed to queue message: {0}")]
    Queue(String),
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from_address: String,
    pub from_name: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl MailMessage {
    /// Body for transports that deliver text/html: line breaks become `<br>`.
    pub fn html_body(&self) -> String {
        self.body.replace("\r\n", "<br>").replace('\n', "<br>")
    }

    /// The message as the transport receives it. An attachment whose file
    /// cannot be found is dropped; the message is still sent.
    pub fn for_delivery(&self) -> MailMessage {
        let attachment = self.attachment.clone().filter(|a| {
            let readable = a.path.is_file();
            if !readable {
                error!(name = %a.name, path = %a.path.display(), "attachment not found, sending without it");
            }
            readable
        });
        MailMessage {
            body: self.html_body(),
            attachment,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), NotificationError> {
        if self.recipients.iter().all(|r| r.trim().is_empty()) {
            return Err(NotificationError::NoRecipients);
        }
        Ok(())
    }
}

/// Outbound mail boundary.
pub trait Mailer: Send + Sync {
    fn send_mail(&self, message: &MailMessage) -> Result<(), NotificationError>;
}

/// Queues messages in the `mail_outbox` table.
#[derive(Clone)]
pub struct OutboxMailer {
    pool: Pool,
}

impl OutboxMailer {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl Mailer for OutboxMailer {
    fn send_mail(&self, message: &MailMessage) -> Result<(), NotificationError> {
        message.validate()?;
        let delivery = message.for_delivery();
        let conn = self
            .pool
            .get()
            .map_err(|e| NotificationError::Queue(e.to_string()))?;
        let id = outbox::enqueue(&conn, &delivery)
            .map_err(|e| NotificationError::Queue(e.to_string()))?;
        info!(
            outbox_id = id,
            recipients = ?delivery.recipients,
            subject = %delivery.subject,
            attachment = ?delivery.attachment.as_ref().map(|a| &a.name),
            "mail queued"
        );
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_mail(&self, message: &MailMessage) -> Result<(), NotificationError> {
        message.validate()?;
        let delivery = message.for_delivery();
        info!(
            from = %delivery.from_address,
            recipients = ?delivery.recipients,
            subject = %delivery.subject,
            body = %delivery.body,
            attachment = ?delivery.attachment.as_ref().map(|a| &a.name),
            "mail (log transport)"
        );
        Ok(())
    }
}
