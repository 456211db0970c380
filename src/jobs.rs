use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    cobalt::Extractor,
    error::ApiError,
    ratelimit::{RateGate, RateLimiter},
    store::{Job, JobOutcome, JobStatus, RecordStore, UsageRecord},
    transcribe::Transcriber,
    youtube::{self, VideoInfo, VideoLookup},
};

pub const USAGE_LIMIT: u64 = 5;
pub const JOBS_PER_WINDOW: u32 = 5;
pub const LIST_LIMIT: usize = 20;

fn jobs_window() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl UsageSummary {
    pub fn new(used: u64, limit: u64) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub title: String,
    pub thumbnail: String,
    pub duration: String,
    pub author: String,
}

/// Detail projection for polling clients. Result fields stay hidden until
/// the job is DONE and the error until it is FAILED, so partial internal
/// state never leaks.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub id: Uuid,
    pub status: JobStatus,
    pub title: String,
    pub thumbnail: String,
    pub duration: String,
    pub author: String,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub transcript: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobDetail {
    fn from(job: Job) -> Self {
        let done = job.status == JobStatus::Done;
        let failed = job.status == JobStatus::Failed;
        Self {
            id: job.id,
            status: job.status,
            title: job.title,
            thumbnail: job.thumbnail,
            duration: job.duration,
            author: job.author,
            video_url: job.video_url.filter(|_| done),
            audio_url: job.audio_url.filter(|_| done),
            transcript: job.transcript.filter(|_| done),
            error: job.error.filter(|_| failed),
            created_at: job.created_at,
        }
    }
}

/// List projection: metadata only, no asset paths.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub title: String,
    pub thumbnail: String,
    pub duration: String,
    pub author: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        let failed = job.status == JobStatus::Failed;
        Self {
            id: job.id,
            status: job.status,
            title: job.title,
            thumbnail: job.thumbnail,
            duration: job.duration,
            author: job.author,
            error: job.error.filter(|_| failed),
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Done,
    Failed,
    /// Unknown id or a job no longer PENDING; duplicate triggers land here.
    Skipped,
}

/// Owns the PENDING → PROCESSING → DONE/FAILED lifecycle and every
/// admission gate in front of it.
pub struct JobService {
    store: Arc<dyn RecordStore>,
    lookup: Arc<dyn VideoLookup>,
    extractor: Arc<dyn Extractor>,
    transcriber: Option<Arc<dyn Transcriber>>,
    limiter: RateLimiter,
    dispatch_tx: mpsc::UnboundedSender<Uuid>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        lookup: Arc<dyn VideoLookup>,
        extractor: Arc<dyn Extractor>,
        transcriber: Option<Arc<dyn Transcriber>>,
        dispatch_tx: mpsc::UnboundedSender<Uuid>,
    ) -> Self {
        Self {
            store,
            lookup,
            extractor,
            transcriber,
            limiter: RateLimiter::new(),
            dispatch_tx,
        }
    }

    /// Admission gate + metadata pre-validation, then a PENDING record and
    /// an immediate return. Extraction happens on the worker; nothing here
    /// blocks on it, and no failure past this point reaches this caller.
    pub async fn create(&self, user_id: &str, url: &str) -> Result<JobCreated, ApiError> {
        let gate = self
            .limiter
            .check(&format!("jobs:{user_id}"), JOBS_PER_WINDOW, jobs_window());
        if !gate.allowed {
            return Err(ApiError::RateLimited {
                retry_after_seconds: gate.retry_after_seconds(Utc::now()),
            });
        }

        let usage = self.usage(user_id).await?;
        if usage.remaining == 0 {
            return Err(ApiError::QuotaExceeded {
                used: usage.used,
                limit: usage.limit,
            });
        }

        if !youtube::is_valid_youtube_url(url) {
            return Err(ApiError::InvalidInput(
                "Invalid YouTube URL. Please paste a valid YouTube link.".to_string(),
            ));
        }

        let info = self.lookup.resolve(url).await?;
        youtube::validate_for_download(&info)?;

        let job = Job::new(user_id, url, &info);
        let created = JobCreated {
            job_id: job.id,
            status: job.status,
            title: job.title.clone(),
            thumbnail: job.thumbnail.clone(),
            duration: job.duration.clone(),
            author: job.author.clone(),
        };
        self.store.insert_job(job).await?;

        if self.dispatch_tx.send(created.job_id).is_err() {
            // Worker gone; the job stays PENDING until the internal
            // trigger route picks it up.
            warn!(job_id = %created.job_id, "dispatch queue closed, job left PENDING");
        }

        Ok(created)
    }

    /// Claim and process one job. Safe to invoke any number of times per
    /// id: the PENDING compare-and-set admits exactly one caller past it.
    pub async fn dispatch(&self, job_id: Uuid) -> Result<DispatchOutcome, ApiError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(DispatchOutcome::Skipped);
        };
        if !self.store.claim_pending(job_id).await? {
            return Ok(DispatchOutcome::Skipped);
        }

        match self.extractor.extract(&job.url).await {
            Ok(links) => {
                let transcript = match &self.transcriber {
                    Some(transcriber) => match transcriber.transcribe(&links.audio_url).await {
                        Ok(text) => Some(text),
                        Err(error) => {
                            // Transcription is auxiliary; the job still
                            // completes DONE.
                            warn!(job_id = %job_id, "transcription failed: {error}");
                            None
                        }
                    },
                    None => None,
                };

                self.store
                    .finish_job(job_id, JobOutcome::Done { links, transcript })
                    .await?;
                self.store
                    .append_usage(UsageRecord {
                        user_id: job.user_id,
                        job_id,
                        created_at: Utc::now(),
                    })
                    .await?;
                info!(job_id = %job_id, "job done");
                Ok(DispatchOutcome::Done)
            }
            Err(error) => {
                warn!(job_id = %job_id, "extraction failed: {error}");
                self.store
                    .finish_job(
                        job_id,
                        JobOutcome::Failed {
                            error: error.to_string(),
                        },
                    )
                    .await?;
                Ok(DispatchOutcome::Failed)
            }
        }
    }

    pub async fn get(&self, job_id: Uuid, user_id: &str) -> Result<JobDetail, ApiError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;
        if job.user_id != user_id {
            return Err(ApiError::PermissionDenied(
                "You do not have access to this job.".to_string(),
            ));
        }
        Ok(job.into())
    }

    pub async fn list_recent(&self, user_id: &str) -> Result<Vec<JobSummary>, ApiError> {
        let jobs = self.store.list_jobs(user_id, LIST_LIMIT).await?;
        Ok(jobs.into_iter().map(JobSummary::from).collect())
    }

    pub async fn usage(&self, user_id: &str) -> Result<UsageSummary, ApiError> {
        let used = self.store.usage_count(user_id).await?;
        Ok(UsageSummary::new(used, USAGE_LIMIT))
    }

    /// Unauthenticated metadata preview for the info route.
    pub async fn preview(&self, url: &str) -> Result<VideoInfo, ApiError> {
        if !youtube::is_valid_youtube_url(url) {
            return Err(ApiError::InvalidInput(
                "Invalid YouTube URL. Please paste a valid YouTube link.".to_string(),
            ));
        }
        self.lookup.resolve(url).await
    }

    pub fn check_rate(&self, key: &str, limit: u32, window: Duration) -> RateGate {
        self.limiter.check(key, limit, window)
    }

    pub fn sweep_rate_limits(&self) {
        self.limiter.sweep();
    }
}
