use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use channel_sync::error::Result;
use channel_sync::models::{ChannelStat, Notification, Playlist, PlaylistVideo, Video};
use channel_sync::services::notification_service;
use channel_sync::services::youtube_api::{
    PlaylistItemResource, PlaylistResource, ResourceId, Snippet,
};
use channel_sync::services::{ReconciliationEngine, ShortClassifier};
use channel_sync::store::{CatalogStore, MemoryStore, UnitGuard};

/// Delivers a hub notification every time a video is staged, the way a push
/// request can land while a sync unit is open.
struct PushDuringSync {
    inner: Arc<MemoryStore>,
    deliveries: Mutex<Vec<JoinHandle<Result<Notification>>>>,
}

impl PushDuringSync {
    fn new(inner: Arc<MemoryStore>) -> Self {
        PushDuringSync {
            inner,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    fn take_deliveries(&self) -> Vec<JoinHandle<Result<Notification>>> {
        std::mem::take(&mut *self.deliveries.lock().unwrap())
    }
}

#[async_trait]
impl CatalogStore for PushDuringSync {
    async fn begin(&self) -> Result<UnitGuard> {
        self.inner.begin().await
    }

    async fn commit(&self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<()> {
        self.inner.rollback().await
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        self.inner.get_video(video_id).await
    }

    async fn video_exists(&self, video_id: &str) -> Result<bool> {
        self.inner.video_exists(video_id).await
    }

    async fn add_video(&self, video: Video) -> Result<()> {
        let store = self.inner.clone();
        let delivery = tokio::spawn(async move {
            notification_service::ingest(
                store.as_ref(),
                "<feed><entry/></feed>".to_string(),
                Some("hub.example".into()),
            )
            .await
        });
        self.deliveries.lock().unwrap().push(delivery);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        self.inner.add_video(video).await
    }

    async fn update_video(&self, video: Video) -> Result<()> {
        self.inner.update_video(video).await
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>> {
        self.inner.get_playlist(playlist_id).await
    }

    async fn add_playlist(&self, playlist: Playlist) -> Result<()> {
        self.inner.add_playlist(playlist).await
    }

    async fn update_playlist(&self, playlist: Playlist) -> Result<()> {
        self.inner.update_playlist(playlist).await
    }

    async fn list_all_playlists(&self) -> Result<Vec<Playlist>> {
        self.inner.list_all_playlists().await
    }

    async fn playlist_video_exists(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        self.inner.playlist_video_exists(playlist_id, video_id).await
    }

    async fn add_playlist_video(&self, membership: PlaylistVideo) -> Result<()> {
        self.inner.add_playlist_video(membership).await
    }

    async fn count_membership(&self, playlist_id: &str) -> Result<u64> {
        self.inner.count_membership(playlist_id).await
    }

    async fn get_channel_stat(&self) -> Result<Option<ChannelStat>> {
        self.inner.get_channel_stat().await
    }

    async fn update_channel_stat(&self, stat: ChannelStat) -> Result<()> {
        self.inner.update_channel_stat(stat).await
    }

    async fn add_notification(&self, notification: Notification) -> Result<()> {
        self.inner.add_notification(notification).await
    }

    async fn list_videos(&self, page: u64, per_page: u64) -> Result<(Vec<Video>, u64)> {
        self.inner.list_videos(page, per_page).await
    }
}

fn item(video_id: &str) -> PlaylistItemResource {
    PlaylistItemResource {
        id: Some(format!("item-{video_id}")),
        snippet: Some(Snippet {
            published_at: Some("2024-03-01T09:30:00Z".into()),
            title: Some(format!("Lecture {video_id}")),
            description: Some("A long lecture".into()),
            thumbnails: None,
            resource_id: Some(ResourceId {
                kind: Some("youtube#video".into()),
                video_id: Some(video_id.into()),
            }),
        }),
    }
}

#[tokio::test]
async fn push_arriving_mid_sync_does_not_split_the_unit() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(PushDuringSync::new(inner.clone()));
    let engine = ReconciliationEngine::new(store.clone(), ShortClassifier::new(Vec::new()));

    let playlist = PlaylistResource {
        id: "PL1".into(),
        snippet: None,
    };
    let stats = engine
        .reconcile_playlist(&playlist, &[item("V1"), item("V2")], &CancellationToken::new())
        .await
        .unwrap();

    for delivery in store.take_deliveries() {
        delivery.await.unwrap().unwrap();
    }

    assert_eq!(stats.videos_created, 2);
    assert_eq!(stats.memberships_added, 2);
    for video_id in ["V1", "V2"] {
        assert!(inner.video_exists(video_id).await.unwrap(), "{video_id} lost");
        assert!(inner.playlist_video_exists("PL1", video_id).await.unwrap());
    }
    assert_eq!(inner.notifications().await.len(), 2);
}

#[tokio::test]
async fn concurrent_ingests_are_all_stored() {
    let store = Arc::new(MemoryStore::new());

    let deliveries: Vec<_> = (0..8)
        .map(|n| {
            let store = store.clone();
            tokio::spawn(async move {
                notification_service::ingest(store.as_ref(), format!("<feed id=\"{n}\"/>"), None)
                    .await
            })
        })
        .collect();
    for delivery in deliveries {
        delivery.await.unwrap().unwrap();
    }

    assert_eq!(store.notifications().await.len(), 8);
}
