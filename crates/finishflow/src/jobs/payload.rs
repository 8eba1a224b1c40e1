use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SEND_OFFER_EMAIL: &str = "send_offer_email";
pub const SEND_CAMPAIGN_EMAIL: &str = "send_campaign_email";
pub const SEND_REORDER_EMAIL: &str = "send_reorder_email";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("unknown job_type: {0}")]
    UnknownJobType(String),
    #[error("malformed payload for {job_type}: {message}")]
    Malformed { job_type: String, message: String },
    #[error("invalid payload for {job_type}: {field} {problem}")]
    Invalid {
        job_type: String,
        field: &'static str,
        problem: &'static str,
    },
}

/// Wire shape shared by every email job:
/// `{ company_id, contact_ids[], offer_key, campaign_key, subject, preview }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub company_id: String,
    pub contact_ids: Vec<String>,
    pub offer_key: String,
    #[serde(default)]
    pub campaign_key: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
}

impl EmailJob {
    /// Same job, restricted to the given recipients.
    pub fn with_contacts(&self, contact_ids: Vec<String>) -> Self {
        Self {
            contact_ids,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    SendOfferEmail(EmailJob),
    SendCampaignEmail(EmailJob),
    SendReorderEmail(EmailJob),
}

impl JobPayload {
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::SendOfferEmail(_) => SEND_OFFER_EMAIL,
            JobPayload::SendCampaignEmail(_) => SEND_CAMPAIGN_EMAIL,
            JobPayload::SendReorderEmail(_) => SEND_REORDER_EMAIL,
        }
    }

    pub fn email(&self) -> &EmailJob {
        match self {
            JobPayload::SendOfferEmail(e)
            | JobPayload::SendCampaignEmail(e)
            | JobPayload::SendReorderEmail(e) => e,
        }
    }

    pub fn map_email(&self, f: impl FnOnce(&EmailJob) -> EmailJob) -> Self {
        match self {
            JobPayload::SendOfferEmail(e) => JobPayload::SendOfferEmail(f(e)),
            JobPayload::SendCampaignEmail(e) => JobPayload::SendCampaignEmail(f(e)),
            JobPayload::SendReorderEmail(e) => JobPayload::SendReorderEmail(f(e)),
        }
    }

    pub fn to_value(&self) -> Value {
        // EmailJob only holds strings, so serialization cannot fail.
        serde_json::to_value(self.email()).unwrap_or(Value::Null)
    }

    /// Parse and validate a stored `(job_type, payload)` pair.
    pub fn parse(job_type: &str, payload: &Value) -> Result<Self, PayloadError> {
        let email = || {
            serde_json::from_value::<EmailJob>(payload.clone()).map_err(|e| {
                PayloadError::Malformed {
                    job_type: job_type.to_string(),
                    message: e.to_string(),
                }
            })
        };

        let parsed = match job_type {
            SEND_OFFER_EMAIL => JobPayload::SendOfferEmail(email()?),
            SEND_CAMPAIGN_EMAIL => JobPayload::SendCampaignEmail(email()?),
            SEND_REORDER_EMAIL => JobPayload::SendReorderEmail(email()?),
            other => return Err(PayloadError::UnknownJobType(other.to_string())),
        };

        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        let job_type = self.job_type();
        let invalid = |field: &'static str, problem: &'static str| PayloadError::Invalid {
            job_type: job_type.to_string(),
            field,
            problem,
        };

        let e = self.email();
        if e.company_id.trim().is_empty() {
            return Err(invalid("company_id", "is required"));
        }
        if e.offer_key.trim().is_empty() {
            return Err(invalid("offer_key", "is required"));
        }
        if e.contact_ids.is_empty() {
            return Err(invalid("contact_ids", "must not be empty"));
        }
        if e.contact_ids.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("contact_ids", "must not contain blank ids"));
        }

        if let JobPayload::SendCampaignEmail(e) = self {
            if e.campaign_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(invalid("campaign_key", "is required"));
            }
            if e.subject.as_deref().map_or(true, |s| s.trim().is_empty()) {
                return Err(invalid("subject", "is required"));
            }
        }

        Ok(())
    }
}
