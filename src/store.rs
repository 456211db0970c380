use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::{cobalt::DownloadLinks, error::ApiError, youtube::VideoInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub url: String,
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

impl Job {
    pub fn new(user_id: &str, url: &str, info: &VideoInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            status: JobStatus::Pending,
            title: info.title.clone(),
            thumbnail: info.thumbnail.clone(),
            duration: info.duration.clone(),
            author: info.author.clone(),
            video_url: None,
            audio_url: None,
            transcript: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// One quota unit consumed: append-only, never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum JobOutcome {
    Done {
        links: DownloadLinks,
        transcript: Option<String>,
    },
    Failed {
        error: String,
    },
}

/// Durable record store collaborator. Reads reflect the latest committed
/// write for the identity that issued it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> Result<(), ApiError>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, ApiError>;
    /// Atomic PENDING → PROCESSING compare-and-set. Returns false when the
    /// job is unknown or its status is anything but PENDING.
    async fn claim_pending(&self, id: Uuid) -> Result<bool, ApiError>;
    async fn finish_job(&self, id: Uuid, outcome: JobOutcome) -> Result<(), ApiError>;
    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, ApiError>;
    async fn append_usage(&self, record: UsageRecord) -> Result<(), ApiError>;
    async fn usage_count(&self, user_id: &str) -> Result<u64, ApiError>;
}

/// Snapshot-persisting JSON store: every mutation rewrites the affected
/// file in full, loads tolerate a missing file.
pub struct JsonStore {
    inner: Mutex<StoreData>,
    jobs_path: Option<PathBuf>,
    usage_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct StoreData {
    jobs: Vec<Job>,
    usage: Vec<UsageRecord>,
}

impl JsonStore {
    pub async fn open(data_dir: &std::path::Path) -> Result<Self, ApiError> {
        let jobs_path = data_dir.join("jobs.json");
        let usage_path = data_dir.join("usage.json");
        let jobs = load_json(&jobs_path).await?;
        let usage = load_json(&usage_path).await?;

        Ok(Self {
            inner: Mutex::new(StoreData { jobs, usage }),
            jobs_path: Some(jobs_path),
            usage_path: Some(usage_path),
        })
    }

    /// No persistence. Backs the tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreData::default()),
            jobs_path: None,
            usage_path: None,
        }
    }

    async fn persist_jobs(&self, snapshot: &[Job]) -> Result<(), ApiError> {
        if let Some(path) = &self.jobs_path {
            persist_json(path, snapshot).await?;
        }
        Ok(())
    }

    async fn persist_usage(&self, snapshot: &[UsageRecord]) -> Result<(), ApiError> {
        if let Some(path) = &self.usage_path {
            persist_json(path, snapshot).await?;
        }
        Ok(())
    }
}

async fn load_json<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<Vec<T>, ApiError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|error| ApiError::internal(format!("Could not read {path:?}: {error}"))),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(ApiError::internal(format!(
            "Could not open {path:?}: {error}"
        ))),
    }
}

async fn persist_json<T: Serialize>(path: &std::path::Path, records: &[T]) -> Result<(), ApiError> {
    let payload = serde_json::to_string_pretty(records)
        .map_err(|error| ApiError::internal(format!("Could not serialize {path:?}: {error}")))?;
    tokio::fs::write(path, payload)
        .await
        .map_err(|error| ApiError::internal(format!("Could not write {path:?}: {error}")))
}

#[async_trait]
impl RecordStore for JsonStore {
    async fn insert_job(&self, job: Job) -> Result<(), ApiError> {
        let snapshot = {
            let mut data = self.inner.lock().await;
            data.jobs.push(job);
            data.jobs.clone()
        };
        self.persist_jobs(&snapshot).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, ApiError> {
        let data = self.inner.lock().await;
        Ok(data.jobs.iter().find(|job| job.id == id).cloned())
    }

    async fn claim_pending(&self, id: Uuid) -> Result<bool, ApiError> {
        let snapshot = {
            let mut data = self.inner.lock().await;
            let Some(job) = data.jobs.iter_mut().find(|job| job.id == id) else {
                return Ok(false);
            };
            if job.status != JobStatus::Pending {
                return Ok(false);
            }
            job.status = JobStatus::Processing;
            data.jobs.clone()
        };
        self.persist_jobs(&snapshot).await?;
        Ok(true)
    }

    async fn finish_job(&self, id: Uuid, outcome: JobOutcome) -> Result<(), ApiError> {
        let snapshot = {
            let mut data = self.inner.lock().await;
            let Some(job) = data.jobs.iter_mut().find(|job| job.id == id) else {
                return Err(ApiError::NotFound("Job not found".to_string()));
            };
            if job.status.is_terminal() {
                warn!(job_id = %id, "refusing to overwrite a terminal job");
                return Ok(());
            }
            match outcome {
                JobOutcome::Done { links, transcript } => {
                    job.status = JobStatus::Done;
                    job.video_url = Some(links.video_url);
                    job.audio_url = Some(links.audio_url);
                    job.transcript = transcript;
                    job.error = None;
                }
                JobOutcome::Failed { error } => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error);
                    job.video_url = None;
                    job.audio_url = None;
                    job.transcript = None;
                }
            }
            data.jobs.clone()
        };
        self.persist_jobs(&snapshot).await
    }

    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<Job>, ApiError> {
        let data = self.inner.lock().await;
        let mut jobs: Vec<Job> = data
            .jobs
            .iter()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn append_usage(&self, record: UsageRecord) -> Result<(), ApiError> {
        let snapshot = {
            let mut data = self.inner.lock().await;
            data.usage.push(record);
            data.usage.clone()
        };
        self.persist_usage(&snapshot).await
    }

    async fn usage_count(&self, user_id: &str) -> Result<u64, ApiError> {
        let data = self.inner.lock().await;
        Ok(data
            .usage
            .iter()
            .filter(|record| record.user_id == user_id)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> VideoInfo {
        VideoInfo {
            title: "Title".into(),
            author: "Author".into(),
            thumbnail: "https://i.ytimg.com/vi/abc/hqdefault.jpg".into(),
            duration: "N/A".into(),
            duration_seconds: None,
            is_live: false,
        }
    }

    fn sample_links() -> DownloadLinks {
        DownloadLinks {
            video_url: "https://cdn/v.mp4".into(),
            video_filename: "v.mp4".into(),
            audio_url: "https://cdn/a.mp3".into(),
            audio_filename: "a.mp3".into(),
        }
    }

    #[tokio::test]
    async fn claim_is_a_single_shot_compare_and_set() {
        let store = JsonStore::in_memory();
        let job = Job::new("u1", "https://youtu.be/abc", &sample_info());
        let id = job.id;
        store.insert_job(job).await.unwrap();

        assert!(store.claim_pending(id).await.unwrap());
        assert!(!store.claim_pending(id).await.unwrap());
        assert_eq!(
            store.get_job(id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
        assert!(!store.claim_pending(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_mutated() {
        let store = JsonStore::in_memory();
        let job = Job::new("u1", "https://youtu.be/abc", &sample_info());
        let id = job.id;
        store.insert_job(job).await.unwrap();
        store.claim_pending(id).await.unwrap();
        store
            .finish_job(
                id,
                JobOutcome::Failed {
                    error: "backend down".into(),
                },
            )
            .await
            .unwrap();

        // Late success must not resurrect a failed job.
        store
            .finish_job(
                id,
                JobOutcome::Done {
                    links: sample_links(),
                    transcript: None,
                },
            )
            .await
            .unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("backend down"));
        assert!(job.video_url.is_none() && job.audio_url.is_none());
    }

    #[tokio::test]
    async fn done_jobs_carry_links_and_no_error() {
        let store = JsonStore::in_memory();
        let job = Job::new("u1", "https://youtu.be/abc", &sample_info());
        let id = job.id;
        store.insert_job(job).await.unwrap();
        store.claim_pending(id).await.unwrap();
        store
            .finish_job(
                id,
                JobOutcome::Done {
                    links: sample_links(),
                    transcript: Some("hello".into()),
                },
            )
            .await
            .unwrap();

        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(job.audio_url.as_deref(), Some("https://cdn/a.mp3"));
        assert_eq!(job.transcript.as_deref(), Some("hello"));
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn listing_is_per_user_newest_first_and_capped() {
        let store = JsonStore::in_memory();
        for i in 0..3 {
            let mut job = Job::new("u1", "https://youtu.be/abc", &sample_info());
            job.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.insert_job(job).await.unwrap();
        }
        store
            .insert_job(Job::new("u2", "https://youtu.be/abc", &sample_info()))
            .await
            .unwrap();

        let jobs = store.list_jobs("u1", 2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].created_at >= jobs[1].created_at);
        assert!(jobs.iter().all(|job| job.user_id == "u1"));
    }

    #[tokio::test]
    async fn usage_counts_are_per_user() {
        let store = JsonStore::in_memory();
        for _ in 0..2 {
            store
                .append_usage(UsageRecord {
                    user_id: "u1".into(),
                    job_id: Uuid::new_v4(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.usage_count("u1").await.unwrap(), 2);
        assert_eq!(store.usage_count("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_tolerates_a_missing_data_dir_file() {
        let dir = std::env::temp_dir().join(format!("tubefetch-test-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = JsonStore::open(&dir).await.unwrap();
        assert_eq!(store.usage_count("u1").await.unwrap(), 0);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
