pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use rocket::{routes, Build, Rocket};
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;

use crate::services::{SubscriptionManager, SyncOrchestrator, YouTubeApi};
use crate::store::CatalogStore;

pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub api: Arc<dyn YouTubeApi>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub subscriptions: SubscriptionManager,
    pub channel_id: String,
    /// Default callback for hub subscriptions.
    pub callback_url: Option<String>,
    pub admin_token: Option<String>,
    /// Kept alive for the lifetime of the server; None when nothing is scheduled.
    pub scheduler: Option<Mutex<JobScheduler>>,
    pub shutdown: CancellationToken,
}

pub fn build_rocket(state: AppState) -> anyhow::Result<Rocket<Build>> {
    let cors = config::create_cors()?;

    Ok(rocket::build()
        .manage(state)
        .mount(
            "/api/youtube",
            routes![
                api::push_notification,
                api::verify_subscription,
                api::sync_now,
                api::update_channel_stats,
                api::get_channel_stat,
                api::subscribe,
                api::migrate_callback,
                api::get_video_from_db,
                api::get_video_from_youtube,
                api::refresh_video,
            ],
        )
        .mount("/api/videos", routes![api::list_videos])
        .mount("/api/playlists", routes![api::list_playlists])
        .attach(cors))
}
