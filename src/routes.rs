use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{HeaderMap, request::Parts},
    routing::{get, post},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    jobs::{DispatchOutcome, JobCreated, JobDetail, JobService, JobSummary, UsageSummary},
    store::JobStatus,
    youtube::VideoInfo,
};

const INFO_LIMIT_PER_MINUTE: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
    pub internal_secret: String,
    pub trust_proxy_headers: bool,
}

/// Opaque authenticated identity, as handed over by the external session
/// provider in a bearer token. No token, no identity.
pub struct Identity(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Identity(token.to_string()))
            .ok_or(ApiError::Unauthenticated)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/info", get(video_info))
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/process", post(process_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/usage", get(usage))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    url: Option<String>,
}

async fn create_job(
    State(state): State<AppState>,
    Identity(user_id): Identity,
    Json(payload): Json<CreateJobRequest>,
) -> Result<Json<JobCreated>, ApiError> {
    let url = payload
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("URL is required".to_string()))?;

    let created = state.service.create(&user_id, url).await?;
    Ok(Json(created))
}

async fn get_job(
    State(state): State<AppState>,
    Identity(user_id): Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<JobDetail>, ApiError> {
    Ok(Json(state.service.get(id, &user_id).await?))
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobSummary>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Identity(user_id): Identity,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.service.list_recent(&user_id).await?;
    Ok(Json(JobListResponse { jobs }))
}

async fn usage(
    State(state): State<AppState>,
    Identity(user_id): Identity,
) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(state.service.usage(&user_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    job_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    status: JobStatus,
    job_id: Uuid,
}

/// Internal dispatch trigger. Not client-facing: guarded by the shared
/// secret, idempotent through the PENDING claim.
async fn process_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let secret = headers
        .get("x-internal-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if secret != state.internal_secret {
        return Err(ApiError::PermissionDenied("Forbidden".to_string()));
    }

    let status = match state.service.dispatch(payload.job_id).await? {
        DispatchOutcome::Done => JobStatus::Done,
        DispatchOutcome::Failed => JobStatus::Failed,
        DispatchOutcome::Skipped => {
            return Err(ApiError::NotFound(
                "Job not found or already processed".to_string(),
            ));
        }
    };

    Ok(Json(ProcessResponse {
        status,
        job_id: payload.job_id,
    }))
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    url: Option<String>,
}

async fn video_info(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<InfoQuery>,
) -> Result<Json<VideoInfo>, ApiError> {
    let ip = client_ip_for_request(state.trust_proxy_headers, &headers, addr);
    let gate = state.service.check_rate(
        &format!("info:{ip}"),
        INFO_LIMIT_PER_MINUTE,
        Duration::minutes(1),
    );
    if !gate.allowed {
        return Err(ApiError::RateLimited {
            retry_after_seconds: gate.retry_after_seconds(chrono::Utc::now()),
        });
    }

    let url = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("URL parameter is required".to_string()))?;
    Ok(Json(state.service.preview(url).await?))
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("x-real-ip")
}

fn client_ip_for_request(trust_proxy: bool, headers: &HeaderMap, addr: SocketAddr) -> String {
    if trust_proxy {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn proxy_headers_are_ignored_unless_trusted() {
        let addr: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        assert_eq!(client_ip_for_request(false, &headers, addr), "10.0.0.9");
        assert_eq!(client_ip_for_request(true, &headers, addr), "203.0.113.7");
    }

    #[test]
    fn real_ip_is_a_fallback_for_forwarded_for() {
        let addr: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.3"));
        assert_eq!(client_ip_for_request(true, &headers, addr), "198.51.100.3");
    }
}
