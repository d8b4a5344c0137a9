//! One synchronization run: walk every playlist, run the discovery search,
//! then recompute playlist counts. Failures never escape a run; they are
//! folded into the returned [`SyncReport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SyncError};
use crate::models::{ChannelStat, Video};
use crate::services::counts::CountRecomputer;
use crate::services::fetcher::PaginatedFetcher;
use crate::services::reconcile::{ReconcileStats, ReconciliationEngine};
use crate::services::short_classifier::ShortClassifier;
use crate::services::youtube_api::YouTubeApi;
use crate::store::{self, CatalogStore};

pub const DEFAULT_SEARCH_MAX_RESULTS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    Failed,
    RateLimited,
    Cancelled,
    /// A scheduled run found another scheduled run still in progress.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub trigger: SyncTrigger,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub playlists_processed: usize,
    pub stats: ReconcileStats,
    /// None when the recompute did not run or failed.
    pub counts_changed: Option<usize>,
    pub error: Option<String>,
}

impl SyncReport {
    fn skipped(trigger: SyncTrigger) -> Self {
        let now = Utc::now();
        SyncReport {
            trigger,
            status: SyncStatus::Skipped,
            started_at: now,
            finished_at: now,
            playlists_processed: 0,
            stats: ReconcileStats::default(),
            counts_changed: None,
            error: None,
        }
    }
}

/// Result of refreshing a single video from upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "video", rename_all = "snake_case")]
pub enum VideoRefresh {
    Updated(Video),
    MissingUpstream,
    MissingLocally,
}

/// Clears the scheduled-run flag when the run ends or is dropped.
struct ScheduledSlot<'a>(&'a AtomicBool);

impl Drop for ScheduledSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct RunProgress {
    playlists_processed: usize,
    stats: ReconcileStats,
}

pub struct SyncOrchestrator {
    api: Arc<dyn YouTubeApi>,
    store: Arc<dyn CatalogStore>,
    fetcher: PaginatedFetcher,
    engine: ReconciliationEngine,
    counts: CountRecomputer,
    channel_id: String,
    search_max_results: u32,
    scheduled_running: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn YouTubeApi>,
        store: Arc<dyn CatalogStore>,
        classifier: ShortClassifier,
        channel_id: impl Into<String>,
        search_max_results: u32,
    ) -> Self {
        SyncOrchestrator {
            fetcher: PaginatedFetcher::new(api.clone()),
            engine: ReconciliationEngine::new(store.clone(), classifier),
            counts: CountRecomputer::new(store.clone()),
            api,
            store,
            channel_id: channel_id.into(),
            search_max_results,
            scheduled_running: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Cron entry point. Skips when the previous scheduled run is still going.
    pub async fn run_scheduled(&self, cancel: &CancellationToken) -> SyncReport {
        if self
            .scheduled_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous scheduled sync still running, skipping this one");
            return SyncReport::skipped(SyncTrigger::Scheduled);
        }
        let _slot = ScheduledSlot(&self.scheduled_running);
        self.run(SyncTrigger::Scheduled, cancel).await
    }

    /// On-demand runs neither wait for nor claim the scheduled slot.
    pub async fn run_on_demand(&self, cancel: &CancellationToken) -> SyncReport {
        if self.scheduled_running.load(Ordering::Acquire) {
            warn!("On-demand sync started while a scheduled sync is running");
        }
        self.run(SyncTrigger::OnDemand, cancel).await
    }

    pub async fn run(&self, trigger: SyncTrigger, cancel: &CancellationToken) -> SyncReport {
        let started_at = Utc::now();
        info!("Starting {trigger:?} sync for channel {}", self.channel_id);

        let mut progress = RunProgress::default();
        let outcome = self.reconcile_channel(&mut progress, cancel).await;

        let (mut status, mut error) = match &outcome {
            Ok(()) => (SyncStatus::Completed, None),
            Err(SyncError::Cancelled) => {
                info!("Sync cancelled after {} playlists", progress.playlists_processed);
                (SyncStatus::Cancelled, None)
            }
            Err(e) if e.is_rate_limited() => {
                warn!("Sync stopped by upstream rate limit: {e}");
                (SyncStatus::RateLimited, Some(e.to_string()))
            }
            Err(e) => {
                error!("Sync failed: {e}");
                (SyncStatus::Failed, Some(e.to_string()))
            }
        };

        // counts are derived state, so they are repaired even after a failed walk
        let counts_changed = if status == SyncStatus::Cancelled {
            None
        } else {
            match self.counts.recompute().await {
                Ok(changed) => Some(changed),
                Err(e) => {
                    error!("Count recompute failed: {e}");
                    if status == SyncStatus::Completed {
                        status = SyncStatus::Failed;
                        error = Some(e.to_string());
                    }
                    None
                }
            }
        };

        let report = SyncReport {
            trigger,
            status,
            started_at,
            finished_at: Utc::now(),
            playlists_processed: progress.playlists_processed,
            stats: progress.stats,
            counts_changed,
            error,
        };
        info!(
            "Sync finished with {:?}: {} playlists, {} videos created, {} updated, {} memberships added",
            report.status,
            report.playlists_processed,
            report.stats.videos_created,
            report.stats.videos_updated,
            report.stats.memberships_added
        );
        report
    }

    async fn reconcile_channel(
        &self,
        progress: &mut RunProgress,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let playlists = self
            .fetcher
            .fetch_all_playlists(&self.channel_id, cancel)
            .await?;

        for playlist in &playlists {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let items = self
                .fetcher
                .fetch_playlist_videos(&playlist.id, cancel)
                .await?;
            let stats = self
                .engine
                .reconcile_playlist(playlist, &items, cancel)
                .await?;
            progress.stats.merge(&stats);
            progress.playlists_processed += 1;
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let results = self
            .fetcher
            .fetch_search_results(&self.channel_id, self.search_max_results, cancel)
            .await?;
        let stats = self.engine.reconcile_discovery(&results, cancel).await?;
        progress.stats.merge(&stats);

        Ok(())
    }

    /// Replaces the stored channel statistics with a fresh upstream snapshot.
    pub async fn refresh_channel_stats(&self) -> Result<ChannelStat> {
        let statistics = self.api.get_channel_statistics(&self.channel_id).await?;
        let stat = ChannelStat {
            subscriber_count: statistics.subscribers(),
            view_count: statistics.views(),
            video_count: statistics.videos(),
            hidden_subscriber_count: statistics.hidden_subscriber_count,
            captured_at: Utc::now(),
        };

        store::in_unit(
            self.store.as_ref(),
            self.store.update_channel_stat(stat.clone()),
        )
        .await?;

        info!(
            "Channel stats updated: {:?} subscribers, {:?} views, {:?} videos",
            stat.subscriber_count, stat.view_count, stat.video_count
        );
        Ok(stat)
    }

    pub async fn refresh_video(&self, video_id: &str) -> Result<VideoRefresh> {
        let Some(fetched) = self.api.get_video(video_id).await? else {
            info!("Video {video_id} not found upstream");
            return Ok(VideoRefresh::MissingUpstream);
        };

        match self.engine.refresh_video(&fetched).await? {
            Some(video) => Ok(VideoRefresh::Updated(video)),
            None => {
                info!("Video {video_id} not in catalog, nothing to refresh");
                Ok(VideoRefresh::MissingLocally)
            }
        }
    }
}
