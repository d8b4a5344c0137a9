use std::sync::Arc;

use async_trait::async_trait;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use tokio_util::sync::CancellationToken;

use channel_sync::error::{Result, SyncError};
use channel_sync::models::Video;
use channel_sync::services::pubsub::{HubClient, HubRequest, HubResponse};
use channel_sync::services::youtube_api::{
    ChannelStatistics, Page, PlaylistItemResource, PlaylistResource, SearchResult, VideoResource,
    YouTubeApi,
};
use channel_sync::services::{ShortClassifier, SubscriptionManager, SyncOrchestrator};
use channel_sync::store::{CatalogStore, MemoryStore};
use channel_sync::{build_rocket, AppState};

const ADMIN: &str = "test-admin-token";

/// Upstream that has run out of quota.
struct ThrottledApi;

#[async_trait]
impl YouTubeApi for ThrottledApi {
    async fn list_playlists(
        &self,
        _channel_id: &str,
        _page_token: Option<&str>,
    ) -> Result<Page<PlaylistResource>> {
        Err(SyncError::RateLimited("quotaExceeded".into()))
    }

    async fn list_playlist_items(
        &self,
        _playlist_id: &str,
        _page_token: Option<&str>,
    ) -> Result<Page<PlaylistItemResource>> {
        Err(SyncError::RateLimited("quotaExceeded".into()))
    }

    async fn search_videos(
        &self,
        _channel_id: &str,
        _max_results: u32,
        _page_token: Option<&str>,
    ) -> Result<Page<SearchResult>> {
        Err(SyncError::RateLimited("quotaExceeded".into()))
    }

    async fn get_video(&self, _video_id: &str) -> Result<Option<VideoResource>> {
        Ok(None)
    }

    async fn get_channel_statistics(&self, _channel_id: &str) -> Result<ChannelStatistics> {
        Err(SyncError::RateLimited("quotaExceeded".into()))
    }
}

struct AcceptingHub;

#[async_trait]
impl HubClient for AcceptingHub {
    async fn post(&self, _request: HubRequest) -> anyhow::Result<HubResponse> {
        Ok(HubResponse {
            status: 202,
            body: String::new(),
        })
    }
}

async fn client() -> (Client, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let api: Arc<dyn YouTubeApi> = Arc::new(ThrottledApi);
    let orchestrator = Arc::new(SyncOrchestrator::new(
        api.clone(),
        store.clone(),
        ShortClassifier::default(),
        "UC_TEST",
        50,
    ));

    let state = AppState {
        store: store.clone(),
        api,
        orchestrator,
        subscriptions: SubscriptionManager::new(Arc::new(AcceptingHub)),
        channel_id: "UC_TEST".into(),
        callback_url: Some("https://example.org/api/youtube/push".into()),
        admin_token: Some(ADMIN.into()),
        scheduler: None,
        shutdown: CancellationToken::new(),
    };

    let rocket = build_rocket(state).expect("rocket builds");
    let client = Client::tracked(rocket).await.expect("valid rocket instance");
    (client, store)
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

#[rocket::async_test]
async fn subscribe_verification_echoes_the_challenge() {
    let (client, store) = client().await;

    let response = client
        .get("/api/youtube/push?hub.mode=subscribe&hub.topic=https%3A%2F%2Fwww.youtube.com%2Ffeeds%2Fvideos.xml%3Fchannel_id%3DUC_TEST&hub.challenge=4729185&hub.lease_seconds=432000")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "4729185");
    assert!(store.notifications().await.is_empty());
}

#[rocket::async_test]
async fn other_hub_callbacks_are_recorded() {
    let (client, store) = client().await;

    let response = client
        .get("/api/youtube/push?hub.mode=unsubscribe&hub.topic=feed&hub.challenge=99")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let stored = store.notifications().await;
    assert_eq!(stored.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(&stored[0].payload).unwrap();
    assert_eq!(payload["hub.mode"], "unsubscribe");
    assert_eq!(payload["hub.challenge"], "99");
}

#[rocket::async_test]
async fn pushed_feed_is_stored_verbatim() {
    let (client, store) = client().await;
    let feed = "<?xml version='1.0' encoding='UTF-8'?>\n<feed xmlns:yt=\"http://www.youtube.com/xml/schemas/2015\">\n  <entry><yt:videoId>V1</yt:videoId></entry>\n</feed>";

    let response = client
        .post("/api/youtube/push")
        .header(ContentType::XML)
        .body(feed)
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(
        response.into_string().await.unwrap(),
        "Notification received"
    );
    assert_eq!(store.notifications().await[0].payload, feed);
}

#[rocket::async_test]
async fn admin_routes_require_the_token() {
    let (client, _) = client().await;

    let missing = client.post("/api/youtube/sync").dispatch().await;
    assert_eq!(missing.status(), Status::Unauthorized);

    let wrong = client
        .post("/api/youtube/sync")
        .header(bearer("nope"))
        .dispatch()
        .await;
    assert_eq!(wrong.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn rate_limited_sync_maps_to_429() {
    let (client, _) = client().await;

    let response = client
        .post("/api/youtube/sync")
        .header(bearer(ADMIN))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::TooManyRequests);
    let body: serde_json::Value = response.into_json().await.unwrap();
    assert_eq!(body["error"], "Rate limit exceeded");

    let stats = client
        .post("/api/youtube/update-channel-stats")
        .header(bearer(ADMIN))
        .dispatch()
        .await;
    assert_eq!(stats.status(), Status::TooManyRequests);
}

#[rocket::async_test]
async fn channel_stat_is_404_before_first_refresh() {
    let (client, _) = client().await;
    let response = client.get("/api/youtube/channelstat").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn subscribe_uses_configured_callback() {
    let (client, _) = client().await;
    let response = client
        .post("/api/youtube/subscribe")
        .header(bearer(ADMIN))
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().await.unwrap();
    assert_eq!(body["success"], true);
}

#[rocket::async_test]
async fn videos_are_listed_one_page_at_a_time() {
    let (client, store) = client().await;
    for (id, day) in [("A", 1), ("B", 2), ("C", 3)] {
        store
            .add_video(Video {
                video_id: id.into(),
                title: format!("Video {id}"),
                published_at: chrono::DateTime::from_timestamp(day * 86_400, 0),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    store.commit().await.unwrap();

    let response = client
        .get("/api/videos?page=2&per_page=2")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let body: serde_json::Value = response.into_json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 2);
    assert_eq!(body["videos"][0]["video_id"], "A");

    let deepest = client
        .get("/api/videos?page=100&per_page=100")
        .dispatch()
        .await;
    assert_eq!(deepest.status(), Status::Ok);
    let too_deep = client
        .get("/api/videos?page=101&per_page=100")
        .dispatch()
        .await;
    assert_eq!(too_deep.status(), Status::BadRequest);

    let single = client.get("/api/youtube/video-db/B").dispatch().await;
    assert_eq!(single.status(), Status::Ok);

    let refresh = client
        .put("/api/youtube/video/B")
        .header(bearer(ADMIN))
        .dispatch()
        .await;
    assert_eq!(refresh.status(), Status::NotFound);
}
