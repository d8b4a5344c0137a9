use std::future::Future;
use std::sync::Arc;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{ResourceKind, Result, SyncError};
use crate::services::youtube_api::{
    Page, PlaylistItemResource, PlaylistResource, SearchResult, YouTubeApi, PAGE_SIZE,
};

/// Walks cursor-paginated listings to exhaustion. Every page is a single
/// upstream call; the first failure ends the walk.
pub struct PaginatedFetcher {
    api: Arc<dyn YouTubeApi>,
}

impl PaginatedFetcher {
    pub fn new(api: Arc<dyn YouTubeApi>) -> Self {
        PaginatedFetcher { api }
    }

    pub async fn fetch_all_playlists(
        &self,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PlaylistResource>> {
        let api = self.api.clone();
        let channel = channel_id.to_string();

        collect_pages(
            ResourceKind::Playlists,
            channel_id,
            cancel,
            None,
            |p: &PlaylistResource| !p.id.is_empty() && p.snippet.is_some(),
            |cursor| {
                let api = api.clone();
                let channel = channel.clone();
                async move { api.list_playlists(&channel, cursor.as_deref()).await }
            },
        )
        .await
    }

    pub async fn fetch_playlist_videos(
        &self,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PlaylistItemResource>> {
        let api = self.api.clone();
        let playlist = playlist_id.to_string();

        collect_pages(
            ResourceKind::PlaylistItems,
            playlist_id,
            cancel,
            None,
            // deleted entries come back without a resource id
            |item: &PlaylistItemResource| item.video_id().is_some(),
            |cursor| {
                let api = api.clone();
                let playlist = playlist.clone();
                async move { api.list_playlist_items(&playlist, cursor.as_deref()).await }
            },
        )
        .await
    }

    /// Recent uploads of the channel, newest first, at most `max_results` of them.
    pub async fn fetch_search_results(
        &self,
        channel_id: &str,
        max_results: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let api = self.api.clone();
        let channel = channel_id.to_string();
        let page_size = max_results.min(PAGE_SIZE);

        collect_pages(
            ResourceKind::Search,
            channel_id,
            cancel,
            Some(max_results as usize),
            |r: &SearchResult| {
                r.snippet.is_some() && r.id.video_id.as_deref().is_some_and(|id| !id.is_empty())
            },
            |cursor| {
                let api = api.clone();
                let channel = channel.clone();
                async move {
                    api.search_videos(&channel, page_size, cursor.as_deref())
                        .await
                }
            },
        )
        .await
    }
}

/// Follows cursors until exhaustion or until `limit` items passing `keep`
/// have been collected.
async fn collect_pages<T, K, F, Fut>(
    resource: ResourceKind,
    owner: &str,
    cancel: &CancellationToken,
    limit: Option<usize>,
    keep: K,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    K: Fn(&T) -> bool,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            info!("Stopping {resource} walk for {owner} after {pages} pages: cancelled");
            return Err(SyncError::Cancelled);
        }

        let page = fetch_page(cursor.take()).await?;
        pages += 1;
        let next = page.next_cursor().map(str::to_string);
        debug!(
            "{resource} page {pages} for {owner}: {} items",
            page.items.len()
        );
        items.extend(page.items.into_iter().filter(|item| keep(item)));

        if let Some(limit) = limit {
            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
        }

        match next {
            Some(token) => cursor = Some(token),
            None => break,
        }
    }

    info!(
        "Fetched {} {resource} items for {owner} in {pages} pages",
        items.len()
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::services::youtube_api::{
        ChannelStatistics, ResourceId, SearchResultId, Snippet, VideoResource,
    };

    /// Serves playlist items from a cursor -> page table and records every cursor asked for.
    #[derive(Default)]
    struct PagedApi {
        item_pages: HashMap<Option<String>, Page<PlaylistItemResource>>,
        search_pages: HashMap<Option<String>, Page<SearchResult>>,
        fail_on: Option<String>,
        requested: Mutex<Vec<Option<String>>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl PagedApi {
        fn record(&self, cursor: Option<&str>) -> Result<()> {
            self.requested
                .lock()
                .unwrap()
                .push(cursor.map(str::to_string));
            if let Some(token) = &self.cancel_after_first {
                token.cancel();
            }
            if cursor.is_some() && cursor == self.fail_on.as_deref() {
                return Err(SyncError::upstream(
                    ResourceKind::PlaylistItems,
                    cursor,
                    "HTTP 500",
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl YouTubeApi for PagedApi {
        async fn list_playlists(
            &self,
            _channel_id: &str,
            _page_token: Option<&str>,
        ) -> Result<Page<PlaylistResource>> {
            Ok(Page::default())
        }

        async fn list_playlist_items(
            &self,
            _playlist_id: &str,
            page_token: Option<&str>,
        ) -> Result<Page<PlaylistItemResource>> {
            self.record(page_token)?;
            Ok(self
                .item_pages
                .get(&page_token.map(str::to_string))
                .cloned()
                .unwrap_or_default())
        }

        async fn search_videos(
            &self,
            _channel_id: &str,
            _max_results: u32,
            page_token: Option<&str>,
        ) -> Result<Page<SearchResult>> {
            self.record(page_token)?;
            Ok(self
                .search_pages
                .get(&page_token.map(str::to_string))
                .cloned()
                .unwrap_or_default())
        }

        async fn get_video(&self, _video_id: &str) -> Result<Option<VideoResource>> {
            Ok(None)
        }

        async fn get_channel_statistics(&self, _channel_id: &str) -> Result<ChannelStatistics> {
            Ok(ChannelStatistics::default())
        }
    }

    fn item(video_id: Option<&str>) -> PlaylistItemResource {
        PlaylistItemResource {
            id: None,
            snippet: Some(Snippet {
                title: Some("t".into()),
                resource_id: Some(ResourceId {
                    kind: Some("youtube#video".into()),
                    video_id: video_id.map(str::to_string),
                }),
                ..Default::default()
            }),
        }
    }

    fn hit(video_id: &str) -> SearchResult {
        SearchResult {
            id: SearchResultId {
                video_id: Some(video_id.into()),
                ..Default::default()
            },
            snippet: Some(Snippet::default()),
        }
    }

    fn page<T>(items: Vec<T>, next: Option<&str>) -> Page<T> {
        Page {
            items,
            next_page_token: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn follows_cursors_until_exhausted() {
        let mut api = PagedApi::default();
        api.item_pages
            .insert(None, page(vec![item(Some("a")), item(Some("b"))], Some("p2")));
        api.item_pages
            .insert(Some("p2".into()), page(vec![item(Some("c")), item(None)], Some("")));
        let api = Arc::new(api);

        let fetcher = PaginatedFetcher::new(api.clone());
        let items = fetcher
            .fetch_playlist_videos("PL", &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = items.iter().filter_map(|i| i.video_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(
            *api.requested.lock().unwrap(),
            vec![None, Some("p2".to_string())]
        );
    }

    #[tokio::test]
    async fn page_failure_aborts_the_walk() {
        let mut api = PagedApi::default();
        api.item_pages
            .insert(None, page(vec![item(Some("a"))], Some("p2")));
        api.fail_on = Some("p2".into());

        let fetcher = PaginatedFetcher::new(Arc::new(api));
        let err = fetcher
            .fetch_playlist_videos("PL", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::UpstreamFetch { cursor: Some(ref c), .. } if c == "p2"
        ));
    }

    #[tokio::test]
    async fn cancellation_is_observed_between_pages() {
        let cancel = CancellationToken::new();
        let mut api = PagedApi::default();
        api.item_pages
            .insert(None, page(vec![item(Some("a"))], Some("p2")));
        api.cancel_after_first = Some(cancel.clone());
        let api = Arc::new(api);

        let fetcher = PaginatedFetcher::new(api.clone());
        let err = fetcher
            .fetch_playlist_videos("PL", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(api.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_stops_at_max_results() {
        let mut api = PagedApi::default();
        api.search_pages
            .insert(None, page(vec![hit("a"), hit("b")], Some("p2")));
        api.search_pages
            .insert(Some("p2".into()), page(vec![hit("c"), hit("d")], Some("p3")));
        let api = Arc::new(api);

        let fetcher = PaginatedFetcher::new(api.clone());
        let results = fetcher
            .fetch_search_results("UC", 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(api.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unusable_search_hits_do_not_count_toward_the_cap() {
        let channel_hit = SearchResult {
            id: SearchResultId {
                kind: Some("youtube#channel".into()),
                ..Default::default()
            },
            snippet: Some(Snippet::default()),
        };
        let bare_hit = SearchResult {
            snippet: None,
            ..hit("x")
        };

        let mut api = PagedApi::default();
        api.search_pages.insert(
            None,
            page(vec![channel_hit, hit("a"), bare_hit], Some("p2")),
        );
        api.search_pages
            .insert(Some("p2".into()), page(vec![hit("b"), hit("c")], None));
        let api = Arc::new(api);

        let fetcher = PaginatedFetcher::new(api.clone());
        let results = fetcher
            .fetch_search_results("UC", 2, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = results
            .iter()
            .filter_map(|r| r.id.video_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(api.requested.lock().unwrap().len(), 2);
    }
}
