use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Video {
    pub video_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// default+medium+high+maxres URLs, joined by `+`.
    pub thumbnail: String,
    pub description: Option<String>,
    pub is_private: bool,
    pub is_short: bool,
    #[serde(default)]
    pub is_old_channel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Playlist {
    pub playlist_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail: String,
    /// Derived from the membership rows on every sync, never trusted in between.
    pub video_count: u64,
    #[serde(default)]
    pub is_old_channel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaylistVideo {
    pub playlist_id: String,
    pub video_id: String,
}

impl PlaylistVideo {
    pub fn new(playlist_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        PlaylistVideo {
            playlist_id: playlist_id.into(),
            video_id: video_id.into(),
        }
    }

    /// Document key used by stores that need a single id per membership row.
    pub fn key(&self) -> String {
        format!("{}:{}", self.playlist_id, self.video_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStat {
    pub subscriber_count: Option<u64>,
    pub view_count: Option<u64>,
    pub video_count: Option<u64>,
    pub hidden_subscriber_count: Option<bool>,
    pub captured_at: DateTime<Utc>,
}

impl Default for ChannelStat {
    fn default() -> Self {
        ChannelStat {
            subscriber_count: None,
            view_count: None,
            video_count: None,
            hidden_subscriber_count: None,
            captured_at: Utc::now(),
        }
    }
}

/// Raw hub notification, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub payload: String,
    pub host: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Playlist id plus the videos in it that are *not* shorts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortPlaylistRule {
    #[serde(alias = "playlist_id")]
    pub playlist_id: String,
    #[serde(default, alias = "exceptional_videos")]
    pub exceptional_videos: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoListResponse {
    pub videos: Vec<Video>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        MessageResponse {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateCallbackRequest {
    pub old_callback_url: String,
    pub new_callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: Status,
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(status: Status, error: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorResponse {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Status::InternalServerError, "Internal server error", message)
    }
}

impl<'r> Responder<'r, 'static> for ErrorResponse {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status;
        Response::build_from(Json(self).respond_to(request)?)
            .status(status)
            .ok()
    }
}

impl From<SyncError> for ErrorResponse {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::RateLimited(message) => {
                ErrorResponse::new(Status::TooManyRequests, "Rate limit exceeded", message)
            }
            SyncError::SubscriptionProtocol { leg, message } => ErrorResponse::new(
                Status::BadGateway,
                "Hub request failed",
                format!("{leg}: {message}"),
            ),
            SyncError::Cancelled => ErrorResponse::new(
                Status::ServiceUnavailable,
                "Cancelled",
                "The server is shutting down",
            ),
            SyncError::UpstreamFetch { .. } | SyncError::Persistence(_) => {
                ErrorResponse::internal("The request could not be completed")
            }
        }
    }
}
