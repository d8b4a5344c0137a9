//! Diffs fetched upstream snapshots against the catalog.
//!
//! Inserts are idempotent: every write is preceded by an existence check on the
//! natural key. Existing videos are only rewritten when their privacy flag
//! flips, which is how a republished (or newly privated) video shows up.
//! Each video and its membership row are written in one unit of work.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::models::{Playlist, PlaylistVideo, Video};
use crate::services::short_classifier::ShortClassifier;
use crate::services::youtube_api::{
    PlaylistItemResource, PlaylistResource, SearchResult, Snippet, VideoResource,
};
use crate::store::{self, CatalogStore};
use crate::utils::{compose_thumbnail, is_private, normalize_description, parse_published_at};

pub const UNTITLED_VIDEO: &str = "Untitled Video";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaylistOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Write counters for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub videos_created: usize,
    pub videos_updated: usize,
    pub videos_unchanged: usize,
    pub playlists_created: usize,
    pub playlists_updated: usize,
    pub memberships_added: usize,
}

impl ReconcileStats {
    fn record_video(&mut self, outcome: VideoOutcome) {
        match outcome {
            VideoOutcome::Created => self.videos_created += 1,
            VideoOutcome::Updated => self.videos_updated += 1,
            VideoOutcome::Unchanged => self.videos_unchanged += 1,
        }
    }

    fn record_playlist(&mut self, outcome: PlaylistOutcome) {
        match outcome {
            PlaylistOutcome::Created => self.playlists_created += 1,
            PlaylistOutcome::Updated => self.playlists_updated += 1,
            PlaylistOutcome::Unchanged => {}
        }
    }

    pub fn merge(&mut self, other: &ReconcileStats) {
        self.videos_created += other.videos_created;
        self.videos_updated += other.videos_updated;
        self.videos_unchanged += other.videos_unchanged;
        self.playlists_created += other.playlists_created;
        self.playlists_updated += other.playlists_updated;
        self.memberships_added += other.memberships_added;
    }

    /// Number of catalog writes this pass performed.
    pub fn writes(&self) -> usize {
        self.videos_created
            + self.videos_updated
            + self.playlists_created
            + self.playlists_updated
            + self.memberships_added
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn CatalogStore>,
    classifier: ShortClassifier,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn CatalogStore>, classifier: ShortClassifier) -> Self {
        ReconciliationEngine { store, classifier }
    }

    async fn in_unit<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        store::in_unit(self.store.as_ref(), work).await
    }

    /// Video record for `video_id` as seen in `playlist_id` ("" when unknown).
    fn derive_video(&self, video_id: &str, snippet: &Snippet, playlist_id: &str) -> Video {
        let title = snippet.title.as_deref();
        let description = snippet.description.as_deref();

        Video {
            video_id: video_id.to_string(),
            title: title.unwrap_or(UNTITLED_VIDEO).to_string(),
            published_at: parse_published_at(snippet.published_at.as_deref()),
            thumbnail: compose_thumbnail(snippet.thumbnails.as_ref()),
            description: normalize_description(description),
            is_private: is_private(title, description),
            is_short: self.classifier.is_short(video_id, playlist_id, description),
            is_old_channel: false,
        }
    }

    pub async fn reconcile_playlist(
        &self,
        playlist: &PlaylistResource,
        items: &[PlaylistItemResource],
        cancel: &CancellationToken,
    ) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let outcome = self.in_unit(self.upsert_playlist(playlist)).await?;
        stats.record_playlist(outcome);

        for item in items {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let (Some(video_id), Some(snippet)) = (item.video_id(), item.snippet.as_ref()) else {
                continue;
            };

            let derived = self.derive_video(video_id, snippet, &playlist.id);
            let (outcome, linked) = self
                .in_unit(self.upsert_video(derived, Some(playlist.id.as_str())))
                .await?;
            stats.record_video(outcome);
            if linked {
                stats.memberships_added += 1;
            }
        }

        debug!("Playlist {} reconciled: {stats:?}", playlist.id);
        Ok(stats)
    }

    async fn upsert_playlist(&self, fetched: &PlaylistResource) -> Result<PlaylistOutcome> {
        let snippet = fetched.snippet.clone().unwrap_or_default();
        let thumbnail = compose_thumbnail(snippet.thumbnails.as_ref());

        match self.store.get_playlist(&fetched.id).await? {
            None => {
                info!("New playlist {}", fetched.id);
                self.store
                    .add_playlist(Playlist {
                        playlist_id: fetched.id.clone(),
                        title: snippet.title.unwrap_or_default(),
                        published_at: parse_published_at(snippet.published_at.as_deref()),
                        thumbnail,
                        video_count: 0,
                        is_old_channel: false,
                    })
                    .await?;
                Ok(PlaylistOutcome::Created)
            }
            Some(mut existing) if existing.thumbnail != thumbnail => {
                existing.thumbnail = thumbnail;
                self.store.update_playlist(existing).await?;
                Ok(PlaylistOutcome::Updated)
            }
            Some(_) => Ok(PlaylistOutcome::Unchanged),
        }
    }

    /// Returns the video outcome and whether a membership row was added.
    async fn upsert_video(
        &self,
        derived: Video,
        playlist_id: Option<&str>,
    ) -> Result<(VideoOutcome, bool)> {
        let video_id = derived.video_id.clone();

        let outcome = match self.store.get_video(&video_id).await? {
            None => {
                self.store.add_video(derived).await?;
                VideoOutcome::Created
            }
            Some(stored) if stored.is_private != derived.is_private => {
                info!(
                    "Video {video_id} privacy changed ({} -> {}), overwriting",
                    stored.is_private, derived.is_private
                );
                self.store
                    .update_video(Video {
                        is_old_channel: stored.is_old_channel,
                        ..derived
                    })
                    .await?;
                VideoOutcome::Updated
            }
            Some(_) => VideoOutcome::Unchanged,
        };

        let linked = match playlist_id {
            Some(playlist_id) => self.ensure_membership(playlist_id, &video_id).await?,
            None => false,
        };

        Ok((outcome, linked))
    }

    async fn ensure_membership(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        if self
            .store
            .playlist_video_exists(playlist_id, video_id)
            .await?
        {
            return Ok(false);
        }
        self.store
            .add_playlist_video(PlaylistVideo::new(playlist_id, video_id))
            .await?;
        Ok(true)
    }

    /// Insert-only pass over channel search results. Known videos are never
    /// touched; memberships are added when the result names a playlist.
    pub async fn reconcile_discovery(
        &self,
        results: &[SearchResult],
        cancel: &CancellationToken,
    ) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        for result in results {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let (Some(video_id), Some(snippet)) =
                (result.id.video_id.as_deref(), result.snippet.as_ref())
            else {
                continue;
            };
            let playlist_id = result.id.playlist_id.as_deref().filter(|p| !p.is_empty());

            let (outcome, linked) = self
                .in_unit(self.insert_discovered(video_id, snippet, playlist_id))
                .await?;
            stats.record_video(outcome);
            if linked {
                stats.memberships_added += 1;
            }
        }

        info!(
            "Discovery pass: {} new videos out of {} results",
            stats.videos_created,
            results.len()
        );
        Ok(stats)
    }

    async fn insert_discovered(
        &self,
        video_id: &str,
        snippet: &Snippet,
        playlist_id: Option<&str>,
    ) -> Result<(VideoOutcome, bool)> {
        let outcome = if self.store.video_exists(video_id).await? {
            VideoOutcome::Unchanged
        } else {
            let derived = self.derive_video(video_id, snippet, playlist_id.unwrap_or(""));
            self.store.add_video(derived).await?;
            VideoOutcome::Created
        };

        let linked = match playlist_id {
            Some(playlist_id) => self.ensure_membership(playlist_id, video_id).await?,
            None => false,
        };

        Ok((outcome, linked))
    }

    /// Overwrites the stored copy of one video with a fresh upstream read.
    /// `Ok(None)` when the video is not in the catalog.
    pub async fn refresh_video(&self, fetched: &VideoResource) -> Result<Option<Video>> {
        let Some(stored) = self.store.get_video(&fetched.id).await? else {
            return Ok(None);
        };

        let snippet = fetched.snippet.clone().unwrap_or_default();
        let title = snippet.title.as_deref();
        let description = snippet.description.as_deref();

        let refreshed = Video {
            title: title.unwrap_or(UNTITLED_VIDEO).to_string(),
            description: normalize_description(description),
            thumbnail: compose_thumbnail(snippet.thumbnails.as_ref()),
            published_at: parse_published_at(snippet.published_at.as_deref()),
            is_private: is_private(title, description),
            ..stored
        };

        let written = refreshed.clone();
        self.in_unit(async move { self.store.update_video(written).await })
            .await?;

        info!("Video {} refreshed from upstream", refreshed.video_id);
        Ok(Some(refreshed))
    }
}
