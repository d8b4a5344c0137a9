use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex;

use super::{CatalogStore, PendingWrite, UnitGuard};
use crate::error::{Result, SyncError};
use crate::models::{ChannelStat, Notification, Playlist, PlaylistVideo, Video};

#[derive(Debug, Default)]
struct MemoryState {
    videos: BTreeMap<String, Video>,
    playlists: BTreeMap<String, Playlist>,
    memberships: BTreeSet<(String, String)>,
    channel_stat: Option<ChannelStat>,
    notifications: Vec<Notification>,
    pending: Vec<PendingWrite>,
    applied_writes: u64,
    fail_next_commit: bool,
}

impl MemoryState {
    fn apply(&mut self, write: PendingWrite) {
        match write {
            PendingWrite::Video(video) => {
                self.videos.insert(video.video_id.clone(), video);
            }
            PendingWrite::Playlist(playlist) => {
                self.playlists.insert(playlist.playlist_id.clone(), playlist);
            }
            PendingWrite::Membership(m) => {
                self.memberships.insert((m.playlist_id, m.video_id));
            }
            PendingWrite::ChannelStat(stat) => self.channel_stat = Some(stat),
            PendingWrite::Notification(n) => self.notifications.push(n),
        }
        self.applied_writes += 1;
    }
}

/// Process-local store. Used by the test suite and for running without Elasticsearch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unit: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes applied by successful commits so far.
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.applied_writes
    }

    pub async fn videos(&self) -> Vec<Video> {
        self.state.lock().await.videos.values().cloned().collect()
    }

    pub async fn playlists(&self) -> Vec<Playlist> {
        self.state.lock().await.playlists.values().cloned().collect()
    }

    pub async fn memberships(&self) -> Vec<PlaylistVideo> {
        self.state
            .lock()
            .await
            .memberships
            .iter()
            .map(|(p, v)| PlaylistVideo::new(p.clone(), v.clone()))
            .collect()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    /// Makes the next commit fail with a persistence error.
    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }

    async fn stage(&self, write: PendingWrite) -> Result<()> {
        self.state.lock().await.pending.push(write);
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin(&self) -> Result<UnitGuard> {
        let unit = self.unit.clone().lock_owned().await;
        let mut state = self.state.lock().await;
        if !state.pending.is_empty() {
            warn!(
                "Discarding {} writes left by an abandoned unit of work",
                state.pending.len()
            );
            state.pending.clear();
        }
        Ok(unit)
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(SyncError::Persistence("commit rejected".to_string()));
        }
        let pending = std::mem::take(&mut state.pending);
        for write in pending {
            state.apply(write);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.state.lock().await.pending.clear();
        Ok(())
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        Ok(self.state.lock().await.videos.get(video_id).cloned())
    }

    async fn video_exists(&self, video_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.videos.contains_key(video_id))
    }

    async fn add_video(&self, video: Video) -> Result<()> {
        self.stage(PendingWrite::Video(video)).await
    }

    async fn update_video(&self, video: Video) -> Result<()> {
        self.stage(PendingWrite::Video(video)).await
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>> {
        Ok(self.state.lock().await.playlists.get(playlist_id).cloned())
    }

    async fn add_playlist(&self, playlist: Playlist) -> Result<()> {
        self.stage(PendingWrite::Playlist(playlist)).await
    }

    async fn update_playlist(&self, playlist: Playlist) -> Result<()> {
        self.stage(PendingWrite::Playlist(playlist)).await
    }

    async fn list_all_playlists(&self) -> Result<Vec<Playlist>> {
        Ok(self.playlists().await)
    }

    async fn playlist_video_exists(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .contains(&(playlist_id.to_string(), video_id.to_string())))
    }

    async fn add_playlist_video(&self, membership: PlaylistVideo) -> Result<()> {
        self.stage(PendingWrite::Membership(membership)).await
    }

    async fn count_membership(&self, playlist_id: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .iter()
            .filter(|(p, _)| p == playlist_id)
            .count() as u64)
    }

    async fn get_channel_stat(&self) -> Result<Option<ChannelStat>> {
        Ok(self.state.lock().await.channel_stat.clone())
    }

    async fn update_channel_stat(&self, stat: ChannelStat) -> Result<()> {
        self.stage(PendingWrite::ChannelStat(stat)).await
    }

    async fn add_notification(&self, notification: Notification) -> Result<()> {
        self.stage(PendingWrite::Notification(notification)).await
    }

    async fn list_videos(&self, page: u64, per_page: u64) -> Result<(Vec<Video>, u64)> {
        let state = self.state.lock().await;
        let mut videos: Vec<Video> = state.videos.values().cloned().collect();
        videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let total = videos.len() as u64;
        let from = page.saturating_sub(1).saturating_mul(per_page) as usize;
        let videos = videos
            .into_iter()
            .skip(from)
            .take(per_page as usize)
            .collect();

        Ok((videos, total))
    }
}
