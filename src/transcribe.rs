use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Optional speech-to-text collaborator. Strictly auxiliary: a failure
/// here never fails the job that requested it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String, ApiError>;
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_url: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&TranscribeRequest { audio_url })
            .send()
            .await
            .map_err(|error| {
                ApiError::upstream(None, format!("Transcription service unreachable: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::upstream(
                Some(status.as_u16()),
                format!("Transcription service returned HTTP {}.", status.as_u16()),
            ));
        }

        let body: TranscribeResponse = response.json().await.map_err(|error| {
            ApiError::upstream(None, format!("Invalid transcription response: {error}"))
        })?;
        Ok(body.text)
    }
}
