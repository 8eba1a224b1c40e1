use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::CampaignTarget;
use crate::distributors::Distributor;
use crate::engagement::EngagementEvent;
use crate::jobs::store::StatusCounts;
use crate::jobs::Job;
use crate::producer::CampaignSpec;
use crate::subscriptions::{RatchetAnomaly, SubscriptionPrices};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: Job,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayRequest {
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub job_id: Uuid,
    pub replay_of_job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub now_utc: DateTime<Utc>,
    pub counts: StatusCounts,
}

#[derive(Debug, Deserialize)]
pub struct CampaignRequest {
    #[serde(flatten)]
    pub spec: CampaignSpec,
    pub targets: Vec<CampaignTarget>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EngagementQueryParams {
    pub company_id: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<EngagementEvent>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: EngagementEvent,
}

#[derive(Debug, Serialize)]
pub struct DistributorsResponse {
    pub distributors: Vec<Distributor>,
}

#[derive(Debug, Deserialize)]
pub struct TierUpdateRequest {
    pub codes: Vec<String>,
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct TierUpdateResponse {
    pub updated: u64,
    pub unknown: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PortalLinkResponse {
    pub code: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct RatchetCheckRequest {
    pub subscriptions: Vec<SubscriptionPrices>,
}

#[derive(Debug, Serialize)]
pub struct RatchetCheckResponse {
    pub anomalies: Vec<RatchetAnomaly>,
}
