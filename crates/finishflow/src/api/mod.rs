use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::campaign::Recipients;
use crate::distributors::{portal_path, DistributorStore, DistributorTierSheet};
use crate::engagement::{EngagementQuery, EngagementRecorder, NewEngagementEvent};
use crate::jobs::payload::EmailJob;
use crate::jobs::store::{JobFilter, JobStore};
use crate::jobs::timeline::{build_timeline, JobTimeline};
use crate::jobs::JobStatus;
use crate::producer::{CampaignReport, JobProducer};
use crate::subscriptions::find_anomalies;

pub mod auth;
pub mod error;
pub mod models;

pub use auth::{AdminAuth, Caller, Role};
pub use error::ApiError;
use models::*;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: Arc<dyn JobStore>,
    pub producer: JobProducer,
    pub engagement: EngagementRecorder,
    pub distributors: Arc<dyn DistributorStore>,
    pub auth: AdminAuth,
}

pub fn router(state: ApiState) -> Router {
    let admin = Router::new()
        // jobs / dead letters
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/timeline", get(get_timeline))
        .route("/jobs/:id/replay", post(replay_job))
        .route("/dlq", get(list_dlq))
        .route("/metrics", get(metrics))
        // producers
        .route("/campaigns/send", post(send_campaign))
        .route("/offers/test", post(send_test_offer))
        .route("/reorders/send", post(send_reorder))
        // engagement
        .route("/engagement", get(list_engagement).post(record_engagement))
        // distributors
        .route("/distributors", get(list_distributors))
        .route("/distributors/tiers", put(update_tiers))
        .route("/distributors/:code/portal-link", get(portal_link))
        .route("/subscriptions/ratchet-check", post(ratchet_check));

    Router::new()
        .nest("/api/admin", admin)
        .route("/health", get(health))
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// An empty body means defaults; anything else has to parse.
fn optional_body<T: serde::de::DeserializeOwned + Default>(raw: &[u8]) -> Result<T, ApiError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(raw).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

fn query<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    q.map(|Query(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn job_id(p: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    p.map(|Path(id)| id)
        .map_err(|_| ApiError::BadRequest("job id must be a uuid".into()))
}

fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

pub async fn list_jobs(
    _caller: Caller,
    State(state): State<ApiState>,
    q: Result<Query<ListJobsQuery>, QueryRejection>,
) -> ApiResult<JobsResponse> {
    let q = query(q)?;

    let status = match q.status.as_deref() {
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {s}")))?,
        ),
        None => None,
    };

    let filter = JobFilter {
        status,
        job_type: q.job_type,
        limit: q.limit.unwrap_or(100),
    };

    let jobs = state.jobs.list(&filter).await?;
    Ok(Json(JobsResponse { jobs }))
}

pub async fn get_job(
    _caller: Caller,
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<JobResponse> {
    let id = job_id(id)?;
    let job = state
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".into()))?;
    Ok(Json(JobResponse { job }))
}

pub async fn get_timeline(
    _caller: Caller,
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<JobTimeline> {
    let id = job_id(id)?;
    let timeline = build_timeline(state.jobs.as_ref(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".into()))?;
    Ok(Json(timeline))
}

pub async fn replay_job(
    caller: Caller,
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
    raw: Bytes,
) -> ApiResult<ReplayResponse> {
    caller.require_director("replay")?;
    let id = job_id(id)?;
    let req = optional_body::<ReplayRequest>(&raw)?;

    let job = state.producer.replay(id, req.scheduled_for).await?;
    Ok(Json(ReplayResponse {
        job_id: job.id,
        replay_of_job_id: id,
    }))
}

pub async fn list_dlq(
    _caller: Caller,
    State(state): State<ApiState>,
    q: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<JobsResponse> {
    let q = query(q)?;
    let filter = JobFilter {
        status: Some(JobStatus::Dead),
        job_type: None,
        limit: q.limit.unwrap_or(100),
    };
    let jobs = state.jobs.list(&filter).await?;
    Ok(Json(JobsResponse { jobs }))
}

pub async fn metrics(_caller: Caller, State(state): State<ApiState>) -> ApiResult<MetricsResponse> {
    let counts = state.jobs.status_counts().await?;
    Ok(Json(MetricsResponse {
        now_utc: Utc::now(),
        counts,
    }))
}

pub async fn send_campaign(
    _caller: Caller,
    State(state): State<ApiState>,
    req: Result<Json<CampaignRequest>, JsonRejection>,
) -> ApiResult<CampaignReport> {
    let req = body(req)?;
    required("campaign_key", &req.spec.campaign_key)?;
    required("offer_key", &req.spec.offer_key)?;
    required("subject", &req.spec.subject)?;
    if req.targets.is_empty() {
        return Err(ApiError::BadRequest("targets must not be empty".into()));
    }
    if req.spec.max_attempts.is_some_and(|n| n <= 0) {
        return Err(ApiError::BadRequest("max_attempts must be > 0".into()));
    }

    let recipients: Vec<Recipients> = req.targets.iter().map(Recipients::from).collect();
    let report = state.producer.enqueue_campaign(&req.spec, &recipients).await;
    Ok(Json(report))
}

pub async fn send_test_offer(
    _caller: Caller,
    State(state): State<ApiState>,
    req: Result<Json<EmailJob>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    let job = state.producer.enqueue_test_offer(body(req)?).await?;
    Ok(Json(EnqueueResponse { job_id: job.id }))
}

pub async fn send_reorder(
    _caller: Caller,
    State(state): State<ApiState>,
    req: Result<Json<EmailJob>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    let job = state.producer.enqueue_reorder_email(body(req)?).await?;
    Ok(Json(EnqueueResponse { job_id: job.id }))
}

pub async fn list_engagement(
    _caller: Caller,
    State(state): State<ApiState>,
    q: Result<Query<EngagementQueryParams>, QueryRejection>,
) -> ApiResult<EventsResponse> {
    let q = query(q)?;
    required("company_id", &q.company_id)?;

    let mut eq = EngagementQuery::for_company(q.company_id);
    eq.from = q.from;
    eq.to = q.to;
    if let Some(limit) = q.limit {
        eq.limit = limit;
    }

    let events = state.engagement.store().list(&eq).await?;
    Ok(Json(EventsResponse { events }))
}

pub async fn record_engagement(
    _caller: Caller,
    State(state): State<ApiState>,
    req: Result<Json<NewEngagementEvent>, JsonRejection>,
) -> ApiResult<EventResponse> {
    let event = body(req)?;
    required("company_id", &event.company_id)?;

    let event = state.engagement.store().append(event).await?;
    Ok(Json(EventResponse { event }))
}

pub async fn list_distributors(
    _caller: Caller,
    State(state): State<ApiState>,
) -> ApiResult<DistributorsResponse> {
    let distributors = state.distributors.list().await?;
    Ok(Json(DistributorsResponse { distributors }))
}

pub async fn update_tiers(
    caller: Caller,
    State(state): State<ApiState>,
    req: Result<Json<TierUpdateRequest>, JsonRejection>,
) -> ApiResult<TierUpdateResponse> {
    caller.require_director("tier update")?;
    let req = body(req)?;
    required("tier", &req.tier)?;
    if req.codes.is_empty() {
        return Err(ApiError::BadRequest("codes must not be empty".into()));
    }

    let mut sheet = DistributorTierSheet::load(state.distributors.as_ref()).await?;
    let bulk = sheet.bulk_set_tier(&req.codes, req.tier.trim());
    let updated = sheet.save(state.distributors.as_ref(), Utc::now()).await?;

    Ok(Json(TierUpdateResponse {
        updated,
        unknown: bulk.unknown,
    }))
}

pub async fn portal_link(
    _caller: Caller,
    Path(code): Path<String>,
) -> ApiResult<PortalLinkResponse> {
    required("code", &code)?;
    Ok(Json(PortalLinkResponse {
        path: portal_path(&code),
        code,
    }))
}

pub async fn ratchet_check(
    _caller: Caller,
    req: Result<Json<RatchetCheckRequest>, JsonRejection>,
) -> ApiResult<RatchetCheckResponse> {
    let req = body(req)?;
    Ok(Json(RatchetCheckResponse {
        anomalies: find_anomalies(&req.subscriptions),
    }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
