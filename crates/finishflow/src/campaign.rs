//! Recipient selection for marketing sends. Consent is decided here, before
//! anything reaches the producer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketingStatus {
    Subscribed,
    Unsubscribed,
    Bounced,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub marketing_status: MarketingStatus,
}

/// Ids of contacts that may receive marketing email, in input order, without duplicates.
pub fn eligible_contacts(contacts: &[Contact]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in contacts {
        let id = c.id.trim();
        if c.marketing_status != MarketingStatus::Subscribed || id.is_empty() {
            continue;
        }
        if !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignTarget {
    pub company_id: String,
    pub contacts: Vec<Contact>,
}

/// One company and the contacts that passed the consent filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients {
    pub company_id: String,
    pub contact_ids: Vec<String>,
}

impl From<&CampaignTarget> for Recipients {
    fn from(t: &CampaignTarget) -> Self {
        Self {
            company_id: t.company_id.clone(),
            contact_ids: eligible_contacts(&t.contacts),
        }
    }
}
