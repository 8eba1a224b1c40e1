//! Outbound email collaborator.
//!
//! The real provider (and its contact-id -> address lookup) lives outside this
//! repository; handlers only see [`EmailSender`].

use async_trait::async_trait;
use serde::Serialize;

use crate::jobs::payload::EmailJob;

/// One rendered delivery to one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub job_type: String,
    pub company_id: String,
    pub contact_id: String,
    pub offer_key: String,
    pub campaign_key: Option<String>,
    pub subject: Option<String>,
    pub preview: Option<String>,
}

impl EmailMessage {
    pub fn for_contact(job_type: &str, job: &EmailJob, contact_id: &str) -> Self {
        Self {
            job_type: job_type.to_string(),
            company_id: job.company_id.clone(),
            contact_id: contact_id.to_string(),
            offer_key: job.offer_key.clone(),
            campaign_key: job.campaign_key.clone(),
            subject: job.subject.clone(),
            preview: job.preview.clone(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    /// Worth retrying later (timeouts, 5xx, throttling).
    #[error("transient send failure ({code}): {message}")]
    Transient { code: &'static str, message: String },
    /// The provider will never accept this message (bounced, unsubscribed, bad address).
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transient {
            code: "TIMEOUT",
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Transient {
            code: "DEPENDENCY_DOWN",
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError>;
}

/// Dry-run sender: logs what would have gone out.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        tracing::info!(
            job_type = %message.job_type,
            company_id = %message.company_id,
            contact_id = %message.contact_id,
            offer_key = %message.offer_key,
            campaign_key = message.campaign_key.as_deref().unwrap_or("-"),
            "email send (dry run)"
        );
        Ok(())
    }
}
