use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Upstream resource kinds, used to give fetch failures some context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Playlists,
    PlaylistItems,
    Search,
    Video,
    ChannelStatistics,
}

impl ResourceKind {
    pub fn endpoint(self) -> &'static str {
        match self {
            ResourceKind::Playlists => "playlists",
            ResourceKind::PlaylistItems => "playlistItems",
            ResourceKind::Search => "search",
            ResourceKind::Video => "videos",
            ResourceKind::ChannelStatistics => "channels",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// Which half of a callback migration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubLeg {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for HubLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubLeg::Subscribe => f.write_str("subscribe"),
            HubLeg::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, non-success status or malformed body from the video API.
    #[error("failed to fetch {resource} (cursor {cursor:?}): {message}")]
    UpstreamFetch {
        resource: ResourceKind,
        cursor: Option<String>,
        message: String,
    },

    /// The video API refused the call because of quota or throttling.
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("hub {leg} request failed: {message}")]
    SubscriptionProtocol { leg: HubLeg, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn upstream(
        resource: ResourceKind,
        cursor: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        SyncError::UpstreamFetch {
            resource,
            cursor: cursor.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }
}

impl From<elasticsearch::Error> for SyncError {
    fn from(e: elasticsearch::Error) -> Self {
        SyncError::Persistence(e.to_string())
    }
}
