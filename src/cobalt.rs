use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ApiError;

const VIDEO_QUALITY: &str = "720";
const AUDIO_FORMAT: &str = "mp3";
const VIDEO_CODEC: &str = "h264";

/// Asset references for one completed extraction. All-or-nothing: a job
/// with only one of the two links is not a useful result.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadLinks {
    pub video_url: String,
    pub video_filename: String,
    pub audio_url: String,
    pub audio_filename: String,
}

/// External extraction backend collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<DownloadLinks, ApiError>;
}

pub struct CobaltClient {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    video_quality: &'static str,
    audio_format: &'static str,
    youtube_video_codec: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_mode: Option<&'static str>,
}

/// The backend discriminates its responses on `status`. Exhaustive by
/// construction: a discriminator this enum does not know fails to
/// deserialize instead of falling through.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum CobaltResponse {
    Redirect {
        url: String,
        filename: Option<String>,
    },
    Tunnel {
        url: String,
        filename: Option<String>,
    },
    Picker {
        picker: Vec<PickerItem>,
        filename: Option<String>,
    },
    Error {
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct PickerItem {
    url: String,
}

#[derive(Debug, Clone)]
struct ResolvedAsset {
    download_url: String,
    filename: String,
}

#[derive(Debug, Clone, Copy)]
enum LegMode {
    Auto,
    Audio,
}

impl CobaltClient {
    pub fn new(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    async fn call(&self, url: &str, mode: LegMode) -> Result<ResolvedAsset, ApiError> {
        let request = CobaltRequest {
            url,
            video_quality: VIDEO_QUALITY,
            audio_format: AUDIO_FORMAT,
            youtube_video_codec: VIDEO_CODEC,
            download_mode: match mode {
                LegMode::Auto => None,
                LegMode::Audio => Some("audio"),
            },
        };

        let response = self
            .client
            .post(format!("{}/", self.api_url.trim_end_matches('/')))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                ApiError::upstream(None, format!("Download service unreachable: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "extraction backend HTTP error");
            return Err(ApiError::upstream(
                Some(status.as_u16()),
                format!(
                    "Download service returned HTTP {}. Please try again.",
                    status.as_u16()
                ),
            ));
        }

        let body = response.text().await.map_err(|error| {
            ApiError::upstream(None, format!("Download service response unreadable: {error}"))
        })?;
        normalize(&body)
    }
}

/// Collapse the three success shapes into one `{downloadUrl, filename}`
/// result; propagate the backend's own error message verbatim.
fn normalize(body: &str) -> Result<ResolvedAsset, ApiError> {
    let response: CobaltResponse = serde_json::from_str(body).map_err(|_| {
        ApiError::upstream(None, "Unexpected response from download service.".to_string())
    })?;

    match response {
        CobaltResponse::Redirect { url, filename } | CobaltResponse::Tunnel { url, filename } => {
            Ok(ResolvedAsset {
                download_url: url,
                filename: filename.unwrap_or_else(|| "download".to_string()),
            })
        }
        CobaltResponse::Picker { picker, filename } => {
            // First candidate, deterministically. No quality re-ranking.
            let first = picker.into_iter().next().ok_or_else(|| {
                ApiError::upstream(None, "Download service returned no URL.".to_string())
            })?;
            Ok(ResolvedAsset {
                download_url: first.url,
                filename: filename.unwrap_or_else(|| "download".to_string()),
            })
        }
        CobaltResponse::Error { error } => Err(ApiError::upstream(
            None,
            error.unwrap_or_else(|| "Download service encountered an error.".to_string()),
        )),
    }
}

#[async_trait]
impl Extractor for CobaltClient {
    /// Both legs are independent and slow; run them in parallel so total
    /// latency approximates the slower leg. Both are always driven to
    /// completion; the first error wins and the other result is dropped.
    async fn extract(&self, url: &str) -> Result<DownloadLinks, ApiError> {
        let (video, audio) = tokio::join!(self.call(url, LegMode::Auto), self.call(url, LegMode::Audio));
        let video = video?;
        let audio = audio?;

        Ok(DownloadLinks {
            video_url: video.download_url,
            video_filename: video.filename,
            audio_url: audio.download_url,
            audio_filename: audio.filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_and_tunnel_pass_the_url_through() {
        let asset =
            normalize(r#"{"status":"redirect","url":"https://cdn/x.mp4","filename":"x.mp4"}"#)
                .unwrap();
        assert_eq!(asset.download_url, "https://cdn/x.mp4");
        assert_eq!(asset.filename, "x.mp4");

        let asset = normalize(r#"{"status":"tunnel","url":"https://proxy/y"}"#).unwrap();
        assert_eq!(asset.download_url, "https://proxy/y");
        assert_eq!(asset.filename, "download");
    }

    #[test]
    fn picker_selects_the_first_candidate() {
        let asset = normalize(
            r#"{"status":"picker","picker":[{"url":"https://a/1"},{"url":"https://a/2"}]}"#,
        )
        .unwrap();
        assert_eq!(asset.download_url, "https://a/1");
    }

    #[test]
    fn empty_picker_fails() {
        let error = normalize(r#"{"status":"picker","picker":[]}"#).unwrap_err();
        assert_eq!(error.to_string(), "Download service returned no URL.");
    }

    #[test]
    fn backend_error_message_is_propagated_verbatim() {
        let error =
            normalize(r#"{"status":"error","error":"content is region locked"}"#).unwrap_err();
        assert_eq!(error.to_string(), "content is region locked");

        let error = normalize(r#"{"status":"error"}"#).unwrap_err();
        assert_eq!(error.to_string(), "Download service encountered an error.");
    }

    #[test]
    fn unknown_discriminator_is_an_upstream_failure() {
        let error = normalize(r#"{"status":"stream","url":"https://x"}"#).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Unexpected response from download service."
        );
        assert!(normalize("not json at all").is_err());
    }
}
