//! Persistence collaborator for the catalog.
//!
//! Writes are staged inside a unit of work opened with [`CatalogStore::begin`]
//! and only become visible to reads after [`CatalogStore::commit`].
//! [`CatalogStore::rollback`] drops whatever was staged.
//!
//! Units are serialized per store: `begin` waits until the previous unit's
//! [`UnitGuard`] is dropped, so concurrent writers never share staged writes.

pub mod elasticsearch;
pub mod memory;

use std::future::Future;

use async_trait::async_trait;
use log::warn;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::models::{ChannelStat, Notification, Playlist, PlaylistVideo, Video};

pub use self::elasticsearch::ElasticsearchStore;
pub use self::memory::MemoryStore;

/// Held for the lifetime of one unit of work.
pub type UnitGuard = OwnedMutexGuard<()>;

/// Deepest result window a catalog listing may reach (`page * per_page`).
pub const MAX_LISTING_WINDOW: u64 = 10_000;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn begin(&self) -> Result<UnitGuard>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;

    async fn get_video(&self, video_id: &str) -> Result<Option<Video>>;
    async fn video_exists(&self, video_id: &str) -> Result<bool>;
    async fn add_video(&self, video: Video) -> Result<()>;
    async fn update_video(&self, video: Video) -> Result<()>;

    async fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>>;
    async fn add_playlist(&self, playlist: Playlist) -> Result<()>;
    async fn update_playlist(&self, playlist: Playlist) -> Result<()>;
    async fn list_all_playlists(&self) -> Result<Vec<Playlist>>;

    async fn playlist_video_exists(&self, playlist_id: &str, video_id: &str) -> Result<bool>;
    async fn add_playlist_video(&self, membership: PlaylistVideo) -> Result<()>;
    async fn count_membership(&self, playlist_id: &str) -> Result<u64>;

    async fn get_channel_stat(&self) -> Result<Option<ChannelStat>>;
    async fn update_channel_stat(&self, stat: ChannelStat) -> Result<()>;

    async fn add_notification(&self, notification: Notification) -> Result<()>;

    /// Newest first; `page` starts at 1.
    async fn list_videos(&self, page: u64, per_page: u64) -> Result<(Vec<Video>, u64)>;
}

/// Staged write, shared by both backends.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Video(Video),
    Playlist(Playlist),
    Membership(PlaylistVideo),
    ChannelStat(ChannelStat),
    Notification(Notification),
}

/// Runs `work` between `begin` and `commit`. Staged writes are rolled back
/// when either the work or the commit fails. The unit stays exclusive until
/// the commit or rollback has finished.
pub async fn in_unit<T, F>(store: &dyn CatalogStore, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let _unit = store.begin().await?;
    let outcome = match work.await {
        Ok(value) => store.commit().await.map(|_| value),
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        if let Err(rollback_err) = store.rollback().await {
            warn!("Rollback after '{e}' failed: {rollback_err}");
        }
    }
    outcome
}
