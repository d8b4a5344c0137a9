use async_trait::async_trait;
use elasticsearch::http::response::Response;
use elasticsearch::indices::IndicesCreateParts;
use elasticsearch::params::Refresh;
use elasticsearch::{
    BulkOperation, BulkParts, CountParts, Elasticsearch, ExistsParts, GetParts, SearchParts,
};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{CatalogStore, PendingWrite, UnitGuard};
use crate::error::{Result, SyncError};
use crate::models::{ChannelStat, Notification, Playlist, PlaylistVideo, Video};

pub const VIDEOS_INDEX: &str = "yt_videos";
pub const PLAYLISTS_INDEX: &str = "yt_playlists";
pub const PLAYLIST_VIDEOS_INDEX: &str = "yt_playlist_videos";
pub const CHANNEL_STATS_INDEX: &str = "yt_channel_stats";
pub const NOTIFICATIONS_INDEX: &str = "yt_notifications";

const CHANNEL_STAT_DOC_ID: &str = "current";
const MAX_PLAYLISTS: u64 = 10_000;

/// Catalog stored in Elasticsearch. Natural keys are used as document ids, so
/// re-indexing a video or membership can never create a duplicate.
pub struct ElasticsearchStore {
    client: Elasticsearch,
    pending: Mutex<Vec<PendingWrite>>,
    unit: Arc<Mutex<()>>,
}

impl ElasticsearchStore {
    pub fn new(client: Elasticsearch) -> Self {
        ElasticsearchStore {
            client,
            pending: Mutex::new(Vec::new()),
            unit: Arc::new(Mutex::new(())),
        }
    }

    /// Creates the catalog indices, tolerating ones that already exist.
    pub async fn create_indices(&self) {
        for (index, mapping) in index_mappings() {
            self.create_index(index, mapping).await;
        }
    }

    async fn create_index(&self, index: &str, mapping: Value) {
        match self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(mapping)
            .send()
            .await
        {
            Ok(response) => {
                if response.status_code().is_success() {
                    info!("Elasticsearch index '{index}' created.");
                } else {
                    let response_text = response.text().await.unwrap_or_default();
                    if response_text.contains("resource_already_exists_exception") {
                        info!("Elasticsearch index '{index}' already exists.");
                    } else {
                        error!("Failed to create Elasticsearch index '{index}': {response_text}");
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to Elasticsearch to create index '{index}': {e:?}");
            }
        }
    }

    async fn stage(&self, write: PendingWrite) -> Result<()> {
        self.pending.lock().await.push(write);
        Ok(())
    }

    async fn get_source<T: DeserializeOwned>(&self, index: &str, id: &str) -> Result<Option<T>> {
        let response = self
            .client
            .get(GetParts::IndexId(index, id))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        let body = success_json(response, index).await?;

        match body.get("_source") {
            Some(source) => serde_json::from_value(source.clone())
                .map(Some)
                .map_err(|e| SyncError::Persistence(format!("bad document {index}/{id}: {e}"))),
            None => Ok(None),
        }
    }

    async fn exists(&self, index: &str, id: &str) -> Result<bool> {
        let response = self
            .client
            .exists(ExistsParts::IndexId(index, id))
            .send()
            .await?;

        match response.status_code().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(SyncError::Persistence(format!(
                "exists check on {index}/{id} returned HTTP {status}"
            ))),
        }
    }

    async fn search_sources<T: DeserializeOwned>(
        &self,
        index: &str,
        body: Value,
    ) -> Result<(Vec<T>, u64)> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(body)
            .send()
            .await?;
        let json_response = success_json(response, index).await?;

        let total = json_response["hits"]["total"]["value"]
            .as_u64()
            .unwrap_or(0);
        let mut documents = Vec::new();
        if let Some(hits) = json_response["hits"]["hits"].as_array() {
            for hit in hits {
                match serde_json::from_value::<T>(hit["_source"].clone()) {
                    Ok(doc) => documents.push(doc),
                    Err(e) => warn!("Skipping unreadable document in '{index}': {e}"),
                }
            }
        }

        Ok((documents, total))
    }
}

async fn success_json(response: Response, index: &str) -> Result<Value> {
    let status = response.status_code();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(SyncError::Persistence(format!(
            "request on '{index}' failed with HTTP {status}: {text}"
        )));
    }
    Ok(response.json::<Value>().await?)
}

fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| SyncError::Persistence(e.to_string()))
}

fn bulk_operation(write: &PendingWrite) -> Result<BulkOperation<Value>> {
    let op = match write {
        PendingWrite::Video(video) => BulkOperation::index(to_document(video)?)
            .id(video.video_id.as_str())
            .index(VIDEOS_INDEX)
            .into(),
        PendingWrite::Playlist(playlist) => BulkOperation::index(to_document(playlist)?)
            .id(playlist.playlist_id.as_str())
            .index(PLAYLISTS_INDEX)
            .into(),
        PendingWrite::Membership(membership) => BulkOperation::index(to_document(membership)?)
            .id(membership.key())
            .index(PLAYLIST_VIDEOS_INDEX)
            .into(),
        PendingWrite::ChannelStat(stat) => BulkOperation::index(to_document(stat)?)
            .id(CHANNEL_STAT_DOC_ID)
            .index(CHANNEL_STATS_INDEX)
            .into(),
        PendingWrite::Notification(notification) => {
            BulkOperation::index(to_document(notification)?)
                .index(NOTIFICATIONS_INDEX)
                .into()
        }
    };
    Ok(op)
}

fn index_mappings() -> Vec<(&'static str, Value)> {
    vec![
        (
            VIDEOS_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "video_id": { "type": "keyword" },
                        "title": { "type": "text" },
                        "published_at": { "type": "date" },
                        "thumbnail": { "type": "keyword", "index": false },
                        "description": { "type": "text" },
                        "is_private": { "type": "boolean" },
                        "is_short": { "type": "boolean" },
                        "is_old_channel": { "type": "boolean" }
                    }
                }
            }),
        ),
        (
            PLAYLISTS_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "playlist_id": { "type": "keyword" },
                        "title": { "type": "text" },
                        "published_at": { "type": "date" },
                        "thumbnail": { "type": "keyword", "index": false },
                        "video_count": { "type": "long" },
                        "is_old_channel": { "type": "boolean" }
                    }
                }
            }),
        ),
        (
            PLAYLIST_VIDEOS_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "playlist_id": { "type": "keyword" },
                        "video_id": { "type": "keyword" }
                    }
                }
            }),
        ),
        (
            CHANNEL_STATS_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "subscriber_count": { "type": "long" },
                        "view_count": { "type": "long" },
                        "video_count": { "type": "long" },
                        "hidden_subscriber_count": { "type": "boolean" },
                        "captured_at": { "type": "date" }
                    }
                }
            }),
        ),
        (
            NOTIFICATIONS_INDEX,
            json!({
                "mappings": {
                    "properties": {
                        "payload": { "type": "text", "index": false },
                        "host": { "type": "keyword" },
                        "received_at": { "type": "date" }
                    }
                }
            }),
        ),
    ]
}

#[async_trait]
impl CatalogStore for ElasticsearchStore {
    async fn begin(&self) -> Result<UnitGuard> {
        let unit = self.unit.clone().lock_owned().await;
        let mut pending = self.pending.lock().await;
        if !pending.is_empty() {
            warn!(
                "Discarding {} writes left by an abandoned unit of work",
                pending.len()
            );
            pending.clear();
        }
        Ok(unit)
    }

    /// Flushes the unit of work as one bulk request and waits for a refresh so
    /// counts and searches see it.
    async fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        let operations = pending
            .iter()
            .map(bulk_operation)
            .collect::<Result<Vec<_>>>()?;

        let response = self
            .client
            .bulk(BulkParts::None)
            .body(operations)
            .refresh(Refresh::WaitFor)
            .send()
            .await?;
        let body = success_json(response, "_bulk").await?;

        if body["errors"].as_bool().unwrap_or(false) {
            let reason = body["items"]
                .as_array()
                .and_then(|items| {
                    items.iter().find_map(|item| {
                        item["index"]["error"]["reason"].as_str().map(String::from)
                    })
                })
                .unwrap_or_else(|| "unknown bulk failure".to_string());
            return Err(SyncError::Persistence(format!("bulk write failed: {reason}")));
        }

        debug!("Committed {} writes", pending.len());
        pending.clear();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.pending.lock().await.clear();
        Ok(())
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<Video>> {
        self.get_source(VIDEOS_INDEX, video_id).await
    }

    async fn video_exists(&self, video_id: &str) -> Result<bool> {
        self.exists(VIDEOS_INDEX, video_id).await
    }

    async fn add_video(&self, video: Video) -> Result<()> {
        self.stage(PendingWrite::Video(video)).await
    }

    async fn update_video(&self, video: Video) -> Result<()> {
        self.stage(PendingWrite::Video(video)).await
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>> {
        self.get_source(PLAYLISTS_INDEX, playlist_id).await
    }

    async fn add_playlist(&self, playlist: Playlist) -> Result<()> {
        self.stage(PendingWrite::Playlist(playlist)).await
    }

    async fn update_playlist(&self, playlist: Playlist) -> Result<()> {
        self.stage(PendingWrite::Playlist(playlist)).await
    }

    async fn list_all_playlists(&self) -> Result<Vec<Playlist>> {
        let body = json!({
            "size": MAX_PLAYLISTS,
            "query": { "match_all": {} }
        });
        let (playlists, total) = self.search_sources(PLAYLISTS_INDEX, body).await?;
        if total > MAX_PLAYLISTS {
            warn!("Only {MAX_PLAYLISTS} of {total} playlists were loaded");
        }
        Ok(playlists)
    }

    async fn playlist_video_exists(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        let key = PlaylistVideo::new(playlist_id, video_id).key();
        self.exists(PLAYLIST_VIDEOS_INDEX, &key).await
    }

    async fn add_playlist_video(&self, membership: PlaylistVideo) -> Result<()> {
        self.stage(PendingWrite::Membership(membership)).await
    }

    async fn count_membership(&self, playlist_id: &str) -> Result<u64> {
        let response = self
            .client
            .count(CountParts::Index(&[PLAYLIST_VIDEOS_INDEX]))
            .body(json!({
                "query": {
                    "term": { "playlist_id": playlist_id }
                }
            }))
            .send()
            .await?;
        let body = success_json(response, PLAYLIST_VIDEOS_INDEX).await?;

        body["count"].as_u64().ok_or_else(|| {
            SyncError::Persistence(format!("count response without count for {playlist_id}"))
        })
    }

    async fn get_channel_stat(&self) -> Result<Option<ChannelStat>> {
        self.get_source(CHANNEL_STATS_INDEX, CHANNEL_STAT_DOC_ID)
            .await
    }

    async fn update_channel_stat(&self, stat: ChannelStat) -> Result<()> {
        self.stage(PendingWrite::ChannelStat(stat)).await
    }

    async fn add_notification(&self, notification: Notification) -> Result<()> {
        self.stage(PendingWrite::Notification(notification)).await
    }

    async fn list_videos(&self, page: u64, per_page: u64) -> Result<(Vec<Video>, u64)> {
        let from = page.saturating_sub(1).saturating_mul(per_page);

        let search_body = json!({
            "size": per_page,
            "from": from,
            "track_total_hits": true,
            "query": {
                "match_all": {}
            },
            "sort": [
                {
                    "published_at": {
                        "order": "desc",
                        "missing": "_last"
                    }
                }
            ]
        });

        self.search_sources(VIDEOS_INDEX, search_body).await
    }
}
