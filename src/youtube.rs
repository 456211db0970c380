use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ApiError;

/// Content longer than this is rejected before any extraction is
/// scheduled; the extraction backend runs under a hard wall-clock budget.
const MAX_VIDEO_DURATION_SECONDS: u64 = 900;

const OEMBED_URL: &str = "https://www.youtube.com/oembed";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Resolved source metadata. Transient: consumed by pre-dispatch
/// validation and copied onto the job record, never stored on its own.
#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub title: String,
    pub author: String,
    pub thumbnail: String,
    pub duration: String,
    #[serde(skip)]
    pub duration_seconds: Option<u64>,
    pub is_live: bool,
}

pub fn is_valid_youtube_url(input: &str) -> bool {
    extract_video_id(input).is_some()
}

/// Pull the canonical video identifier out of any of the recognized URL
/// shapes: `youtu.be/ID`, `youtube.com/watch?v=ID`, `/shorts/ID`,
/// `/embed/ID`. Returns None for anything it cannot parse.
pub fn extract_video_id(input: &str) -> Option<String> {
    let parsed = Url::parse(input.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();

    if host == "youtu.be" {
        let id = parsed.path_segments()?.next()?;
        return valid_video_id(id);
    }

    if host == "youtube.com" || host.ends_with(".youtube.com") {
        if let Some(id) = parsed
            .query_pairs()
            .find(|(name, _)| name == "v")
            .map(|(_, value)| value.into_owned())
        {
            return valid_video_id(&id);
        }

        let mut segments = parsed.path_segments()?.filter(|segment| !segment.is_empty());
        if matches!(segments.next(), Some("shorts") | Some("embed")) {
            return segments.next().and_then(valid_video_id);
        }
    }

    None
}

fn valid_video_id(candidate: &str) -> Option<String> {
    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| candidate.to_string())
}

/// Reject content the extraction step must never be scheduled against.
/// Unknown duration passes: the oEmbed lookup does not expose one.
pub fn validate_for_download(info: &VideoInfo) -> Result<(), ApiError> {
    if info.is_live {
        return Err(ApiError::InvalidInput(
            "Live videos cannot be downloaded.".to_string(),
        ));
    }
    if let Some(seconds) = info.duration_seconds
        && seconds > MAX_VIDEO_DURATION_SECONDS
    {
        return Err(ApiError::InvalidInput(format!(
            "Video is too long ({}). Maximum allowed duration is {}.",
            format_duration(seconds),
            format_duration(MAX_VIDEO_DURATION_SECONDS)
        )));
    }
    Ok(())
}

pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// External metadata lookup collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoLookup: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ApiError>;
}

/// Live oEmbed lookup. No caching: every call is a fresh fetch so the
/// private/unavailable signal is always current.
pub struct OembedLookup {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OembedResponse {
    title: Option<String>,
    author_name: Option<String>,
}

impl OembedLookup {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VideoLookup for OembedLookup {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ApiError> {
        let video_id = extract_video_id(url).ok_or_else(|| {
            ApiError::InvalidInput("Could not extract video ID from URL.".to_string())
        })?;

        let lookup_url = format!(
            "{OEMBED_URL}?url={}&format=json",
            urlencoding::encode(url)
        );
        let response = self
            .client
            .get(&lookup_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|error| ApiError::upstream(None, format!("Failed to fetch video info: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 => ApiError::PermissionDenied(
                    "This video is private and cannot be downloaded.".to_string(),
                ),
                403 => ApiError::NotFound("This video is unavailable.".to_string()),
                other => ApiError::upstream(
                    Some(other),
                    format!("Failed to fetch video info (HTTP {other})."),
                ),
            });
        }

        let data: OembedResponse = response.json().await.map_err(|error| {
            ApiError::upstream(None, format!("Invalid video info response: {error}"))
        })?;

        Ok(VideoInfo {
            title: data.title.unwrap_or_else(|| "Unknown".to_string()),
            author: data.author_name.unwrap_or_else(|| "Unknown".to_string()),
            thumbnail: format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg"),
            // oEmbed does not expose duration; the ceiling check is skipped.
            duration: "N/A".to_string(),
            duration_seconds: None,
            is_live: false,
        })
    }
}
