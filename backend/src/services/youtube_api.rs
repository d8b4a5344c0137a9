use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ResourceKind, Result, SyncError};

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const PAGE_SIZE: u32 = 50;

const RATE_LIMIT_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

/// One page of a list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Empty tokens are treated the same as a missing one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Page {
            items: Vec::new(),
            next_page_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
    #[serde(default)]
    pub standard: Option<Thumbnail>,
    #[serde(default)]
    pub maxres: Option<Thumbnail>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
}

/// Snippet shape shared by playlists, playlist items, search results and videos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Thumbnails>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<Snippet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItemResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub snippet: Option<Snippet>,
}

impl PlaylistItemResource {
    pub fn video_id(&self) -> Option<&str> {
        self.snippet
            .as_ref()?
            .resource_id
            .as_ref()?
            .video_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultId {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: SearchResultId,
    #[serde(default)]
    pub snippet: Option<Snippet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<Snippet>,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub subscriber_count: Option<String>,
    #[serde(default)]
    pub hidden_subscriber_count: Option<bool>,
    #[serde(default)]
    pub video_count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelResource {
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

/// The five upstream calls the synchronizer needs. Each call is a single
/// request; there is no retry at this level.
#[async_trait]
pub trait YouTubeApi: Send + Sync {
    async fn list_playlists(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<PlaylistResource>>;

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<PlaylistItemResource>>;

    async fn search_videos(
        &self,
        channel_id: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<Page<SearchResult>>;

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoResource>>;

    async fn get_channel_statistics(&self, channel_id: &str) -> Result<ChannelStatistics>;
}

/// reqwest-backed client for the YouTube Data API v3.
pub struct YouTubeDataClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl YouTubeDataClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::upstream(ResourceKind::Playlists, None, e.to_string()))?;

        Ok(YouTubeDataClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: ResourceKind,
        mut query: Vec<(&'static str, String)>,
        page_token: Option<&str>,
    ) -> Result<T> {
        // Documentation: https://developers.google.com/youtube/v3/docs
        let url = format!("{}/{}", self.base_url, resource.endpoint());
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        query.push(("key", self.api_key.clone()));

        debug!("GET {url} (cursor {page_token:?})");

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| SyncError::upstream(resource, page_token, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(resource, page_token, status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::upstream(resource, page_token, format!("malformed body: {e}")))
    }
}

/// Maps a non-success response to either a rate-limit signal or a plain fetch error.
fn classify_failure(
    resource: ResourceKind,
    page_token: Option<&str>,
    status: StatusCode,
    body: &str,
) -> SyncError {
    let envelope = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && envelope.as_ref().is_some_and(|e| {
                e.error
                    .errors
                    .iter()
                    .any(|d| RATE_LIMIT_REASONS.contains(&d.reason.as_str()))
            }));

    if throttled {
        warn!("YouTube API throttled {resource}: {message}");
        SyncError::RateLimited(message)
    } else {
        SyncError::upstream(resource, page_token, format!("HTTP {status}: {message}"))
    }
}

fn first_item<T>(page: Page<T>) -> Option<T> {
    page.items.into_iter().next()
}

fn parse_count(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.parse::<u64>().ok())
}

impl ChannelStatistics {
    pub fn subscribers(&self) -> Option<u64> {
        parse_count(self.subscriber_count.as_deref())
    }

    pub fn views(&self) -> Option<u64> {
        parse_count(self.view_count.as_deref())
    }

    pub fn videos(&self) -> Option<u64> {
        parse_count(self.video_count.as_deref())
    }
}

#[async_trait]
impl YouTubeApi for YouTubeDataClient {
    async fn list_playlists(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<PlaylistResource>> {
        let query = vec![
            ("part", "snippet".to_string()),
            ("channelId", channel_id.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        self.get_json(ResourceKind::Playlists, query, page_token)
            .await
    }

    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<Page<PlaylistItemResource>> {
        let query = vec![
            ("part", "snippet".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        self.get_json(ResourceKind::PlaylistItems, query, page_token)
            .await
    }

    async fn search_videos(
        &self,
        channel_id: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<Page<SearchResult>> {
        let query = vec![
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("order", "date".to_string()),
            ("channelId", channel_id.to_string()),
            ("maxResults", max_results.clamp(1, PAGE_SIZE).to_string()),
        ];
        self.get_json(ResourceKind::Search, query, page_token).await
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoResource>> {
        let query = vec![
            ("part", "snippet".to_string()),
            ("id", video_id.to_string()),
        ];
        let page: Page<VideoResource> = self.get_json(ResourceKind::Video, query, None).await?;
        Ok(page.items.into_iter().find(|v| v.id == video_id))
    }

    async fn get_channel_statistics(&self, channel_id: &str) -> Result<ChannelStatistics> {
        let query = vec![
            ("part", "statistics".to_string()),
            ("id", channel_id.to_string()),
        ];
        let page: Page<ChannelResource> = self
            .get_json(ResourceKind::ChannelStatistics, query, None)
            .await?;

        first_item(page)
            .and_then(|channel| channel.statistics)
            .ok_or_else(|| {
                SyncError::upstream(
                    ResourceKind::ChannelStatistics,
                    None,
                    format!("no statistics returned for channel {channel_id}"),
                )
            })
    }
}
