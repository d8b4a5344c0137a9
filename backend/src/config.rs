use crate::models::{AdminToken, ShortPlaylistRule};
use crate::services::pubsub::{ReqwestHubClient, DEFAULT_HUB_URL};
use crate::services::sync::{SyncOrchestrator, DEFAULT_SEARCH_MAX_RESULTS};
use crate::services::youtube_api::{YouTubeApi, YouTubeDataClient, DEFAULT_API_BASE_URL};
use crate::services::{ShortClassifier, SubscriptionManager};
use crate::store::{CatalogStore, ElasticsearchStore, MemoryStore};
use crate::AppState;
use anyhow::{Context, Result};
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    Elasticsearch,
};
use env_logger::Builder;
use lazy_static::lazy_static;
use log::{error, info, warn, LevelFilter};
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::Request;
use rocket_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

lazy_static! {
    pub static ref ADMIN_TOKEN: Option<String> =
        env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    pub static ref ELASTICSEARCH_URL: String =
        env::var("ELASTICSEARCH_URL").unwrap_or_else(|_| "http://localhost:9200".to_string());
    pub static ref STORE_BACKEND: String =
        env::var("STORE_BACKEND").unwrap_or_else(|_| "elasticsearch".to_string());
    // 22:00 Asia/Baku
    pub static ref SYNC_SCHEDULE: String =
        env::var("SYNC_SCHEDULE").unwrap_or_else(|_| "0 0 18 * * *".to_string());
    pub static ref STATS_SCHEDULE: String =
        env::var("STATS_SCHEDULE").unwrap_or_else(|_| "0 30 18 * * *".to_string());
    pub static ref HUB_URL: String =
        env::var("HUB_URL").unwrap_or_else(|_| DEFAULT_HUB_URL.to_string());
    pub static ref HUB_CALLBACK_URL: Option<String> =
        env::var("HUB_CALLBACK_URL").ok().filter(|u| !u.is_empty());
    pub static ref CORS_ORIGIN: String =
        env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:8080".to_string());
}

/// Upstream settings. Unlike the process settings above these have no
/// sensible default, so missing values are reported instead of panicking.
#[derive(Debug, Clone)]
pub struct YouTubeSettings {
    pub api_key: String,
    pub channel_id: String,
    pub api_base_url: String,
    pub search_max_results: u32,
}

impl YouTubeSettings {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("YOUTUBE_API_KEY")
            .context("YOUTUBE_API_KEY environment variable must be set")?;
        let channel_id = env::var("YOUTUBE_CHANNEL_ID")
            .context("YOUTUBE_CHANNEL_ID environment variable must be set")?;
        let search_max_results = match env::var("SEARCH_MAX_RESULTS") {
            Ok(value) => value
                .parse::<u32>()
                .with_context(|| format!("SEARCH_MAX_RESULTS is not a number: {value}"))?,
            Err(_) => DEFAULT_SEARCH_MAX_RESULTS,
        };

        Ok(YouTubeSettings {
            api_key,
            channel_id,
            api_base_url: env::var("YOUTUBE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            search_max_results,
        })
    }
}

pub fn init_logger() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    info!("Starting channel sync backend...");
}

pub fn load_environment() {
    dotenv::dotenv().ok();
}

pub fn parse_short_playlist_rules(json: &str) -> Result<Vec<ShortPlaylistRule>> {
    serde_json::from_str(json).context("short playlist rules must be a JSON array")
}

/// Reads the short-playlist table from `SHORT_PLAYLISTS` (inline JSON) or the
/// file named by `SHORT_PLAYLISTS_FILE`.
pub fn load_short_playlist_rules() -> Result<Vec<ShortPlaylistRule>> {
    if let Ok(inline) = env::var("SHORT_PLAYLISTS") {
        return parse_short_playlist_rules(&inline);
    }

    if let Ok(path) = env::var("SHORT_PLAYLISTS_FILE") {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read short playlist rules from {path}"))?;
        return parse_short_playlist_rules(&contents);
    }

    warn!("No short playlist rules configured; only blank descriptions mark shorts");
    Ok(Vec::new())
}

pub fn create_elasticsearch_client() -> Result<Elasticsearch> {
    let es_url = &*ELASTICSEARCH_URL;
    info!("Connecting to Elasticsearch at: {es_url}");

    let transport =
        TransportBuilder::new(SingleNodeConnectionPool::new(es_url.parse()?)).build()?;

    Ok(Elasticsearch::new(transport))
}

pub async fn create_store() -> Result<Arc<dyn CatalogStore>> {
    match STORE_BACKEND.as_str() {
        "memory" => {
            warn!("Using the in-memory catalog store; nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "elasticsearch" => {
            let store = ElasticsearchStore::new(create_elasticsearch_client()?);
            store.create_indices().await;
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!("Unknown STORE_BACKEND '{other}'")),
    }
}

pub async fn setup_sync_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    shutdown: CancellationToken,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sync_orchestrator = orchestrator.clone();
    let sync_shutdown = shutdown.clone();
    let sync_job = Job::new_async(SYNC_SCHEDULE.as_str(), move |_uuid, _l| {
        let orchestrator = sync_orchestrator.clone();
        let cancel = sync_shutdown.child_token();
        Box::pin(async move {
            orchestrator.run_scheduled(&cancel).await;
        })
    })?;

    let stats_orchestrator = orchestrator.clone();
    let stats_job = Job::new_async(STATS_SCHEDULE.as_str(), move |_uuid, _l| {
        let orchestrator = stats_orchestrator.clone();
        Box::pin(async move {
            if let Err(e) = orchestrator.refresh_channel_stats().await {
                error!("Scheduled channel stats refresh failed: {e}");
            }
        })
    })?;

    scheduler.add(sync_job).await?;
    scheduler.add(stats_job).await?;
    scheduler.start().await?;
    info!(
        "Sync scheduler started (sync '{}', stats '{}').",
        *SYNC_SCHEDULE, *STATS_SCHEDULE
    );

    Ok(scheduler)
}

pub async fn create_app_state() -> Result<AppState> {
    let settings = YouTubeSettings::from_env()?;
    let rules = load_short_playlist_rules()?;
    let classifier = ShortClassifier::new(rules);
    info!("Loaded {} short playlist rules", classifier.rule_count());

    let store = create_store().await?;
    let api: Arc<dyn YouTubeApi> = Arc::new(YouTubeDataClient::new(
        settings.api_key.clone(),
        settings.api_base_url.clone(),
    )?);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        api.clone(),
        store.clone(),
        classifier,
        settings.channel_id.clone(),
        settings.search_max_results,
    ));
    let subscriptions = SubscriptionManager::new(Arc::new(ReqwestHubClient::new(
        HUB_URL.as_str(),
    )?));

    if ADMIN_TOKEN.is_none() {
        warn!("ADMIN_TOKEN is not set; admin routes will reject every request");
    }

    let shutdown = CancellationToken::new();
    let scheduler = setup_sync_scheduler(orchestrator.clone(), shutdown.clone()).await?;

    Ok(AppState {
        store,
        api,
        orchestrator,
        subscriptions,
        channel_id: settings.channel_id,
        callback_url: HUB_CALLBACK_URL.clone(),
        admin_token: ADMIN_TOKEN.clone(),
        scheduler: Some(Mutex::new(scheduler)),
        shutdown,
    })
}

pub fn create_cors() -> Result<rocket_cors::Cors> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::some_exact(&[CORS_ORIGIN.as_str()]))
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Put, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allowed_headers(AllowedHeaders::some(&[
            "Authorization",
            "Accept",
            "Content-Type",
        ]))
        .allow_credentials(true)
        .to_cors()
        .map_err(|e| anyhow::anyhow!("Failed to create CORS options: {}", e))?;

    Ok(cors)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminToken {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "));
        let expected = request
            .rocket()
            .state::<AppState>()
            .and_then(|state| state.admin_token.as_deref());

        match (token, expected) {
            (None, _) => Outcome::Error((Status::Unauthorized, "Missing token")),
            (Some(_), None) => Outcome::Error((Status::Unauthorized, "Admin access disabled")),
            (Some(t), Some(expected)) => {
                if t == expected {
                    Outcome::Success(AdminToken(t.to_string()))
                } else {
                    Outcome::Error((Status::Unauthorized, "Invalid token"))
                }
            }
        }
    }
}
