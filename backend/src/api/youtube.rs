use log::{error, info, warn};
use rocket::http::uri::Host;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, FromForm, State};
use serde::Serialize;

use crate::models::{
    AdminToken, ChannelStat, ErrorResponse, MessageResponse, MigrateCallbackRequest,
};
use crate::services::notification_service;
use crate::services::{SyncReport, SyncStatus};
use crate::AppState;

/// `hub.*` query parameters sent by the hub when it verifies a lease.
#[derive(Debug, Default, FromForm, Serialize)]
pub struct HubParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<String>,
}

#[derive(Serialize)]
struct HubCallbackRecord<'a> {
    #[serde(flatten)]
    hub: &'a HubParams,
    host: Option<String>,
}

#[post("/push", data = "<payload>")]
pub async fn push_notification(
    state: &State<AppState>,
    host: Option<&Host<'_>>,
    payload: String,
) -> Result<&'static str, ErrorResponse> {
    let host = host.map(|h| h.to_string());
    match notification_service::ingest(state.store.as_ref(), payload, host).await {
        Ok(_) => Ok("Notification received"),
        Err(e) => {
            error!("Failed to store hub notification: {e}");
            Err(e.into())
        }
    }
}

#[get("/push?<hub>")]
pub async fn verify_subscription(
    state: &State<AppState>,
    host: Option<&Host<'_>>,
    hub: HubParams,
) -> Result<String, ErrorResponse> {
    if hub.mode.as_deref() == Some("subscribe") {
        info!(
            "Hub verified subscription for {} (lease {:?}s)",
            hub.topic.as_deref().unwrap_or("unknown topic"),
            hub.lease_seconds
        );
        return Ok(hub.challenge.unwrap_or_default());
    }

    let record = HubCallbackRecord {
        hub: &hub,
        host: host.map(|h| h.to_string()),
    };
    let payload = serde_json::to_string(&record).map_err(|e| {
        error!("Failed to serialize hub callback: {e}");
        ErrorResponse::internal("Failed to record hub callback")
    })?;

    match notification_service::ingest(state.store.as_ref(), payload, record.host.clone()).await {
        Ok(_) => Ok("Notification received".to_string()),
        Err(e) => {
            error!("Failed to store hub callback: {e}");
            Err(e.into())
        }
    }
}

#[post("/sync")]
pub async fn sync_now(
    _token: AdminToken,
    state: &State<AppState>,
) -> Result<Json<SyncReport>, ErrorResponse> {
    info!("Synchronization requested via API");
    let cancel = state.shutdown.child_token();
    let report = state.orchestrator.run_on_demand(&cancel).await;

    match report.status {
        SyncStatus::RateLimited => {
            warn!("On-demand sync hit the upstream rate limit");
            Err(ErrorResponse::new(
                Status::TooManyRequests,
                "Rate limit exceeded",
                report.error.unwrap_or_default(),
            ))
        }
        SyncStatus::Failed => Err(ErrorResponse::internal("Synchronization failed")),
        _ => Ok(Json(report)),
    }
}

#[post("/update-channel-stats")]
pub async fn update_channel_stats(
    _token: AdminToken,
    state: &State<AppState>,
) -> Result<Json<ChannelStat>, ErrorResponse> {
    match state.orchestrator.refresh_channel_stats().await {
        Ok(stat) => Ok(Json(stat)),
        Err(e) => {
            error!("Failed to update channel stats: {e}");
            Err(e.into())
        }
    }
}

#[get("/channelstat")]
pub async fn get_channel_stat(state: &State<AppState>) -> Result<Json<ChannelStat>, ErrorResponse> {
    match state.store.get_channel_stat().await {
        Ok(Some(stat)) => Ok(Json(stat)),
        Ok(None) => Err(ErrorResponse::new(
            Status::NotFound,
            "Not found",
            "Channel statistics have not been fetched yet",
        )),
        Err(e) => {
            error!("Failed to read channel stats: {e}");
            Err(e.into())
        }
    }
}

fn callback_or_default(
    state: &AppState,
    callback: Option<String>,
) -> Result<String, ErrorResponse> {
    callback
        .or_else(|| state.callback_url.clone())
        .ok_or_else(|| {
            ErrorResponse::new(
                Status::BadRequest,
                "Missing callback",
                "No callback given and HUB_CALLBACK_URL is not set",
            )
        })
}

#[post("/subscribe?<callback>")]
pub async fn subscribe(
    _token: AdminToken,
    state: &State<AppState>,
    callback: Option<String>,
) -> Result<Json<MessageResponse>, ErrorResponse> {
    let callback = callback_or_default(state, callback)?;

    match state
        .subscriptions
        .subscribe(&state.channel_id, &callback)
        .await
    {
        Ok(()) => Ok(Json(MessageResponse::ok(format!(
            "Subscribed {callback} to channel {}",
            state.channel_id
        )))),
        Err(e) => {
            error!("Hub subscription failed: {e}");
            Err(e.into())
        }
    }
}

#[post("/migrate-callback", data = "<request>")]
pub async fn migrate_callback(
    _token: AdminToken,
    state: &State<AppState>,
    request: Json<MigrateCallbackRequest>,
) -> Result<Json<MessageResponse>, ErrorResponse> {
    let request = request.into_inner();
    let new_callback = callback_or_default(state, request.new_callback_url)?;

    match state
        .subscriptions
        .migrate_callback(&state.channel_id, &request.old_callback_url, &new_callback)
        .await
    {
        Ok(()) => Ok(Json(MessageResponse::ok("Subscription updated successfully."))),
        Err(e) => {
            error!("Callback migration failed: {e}");
            Err(e.into())
        }
    }
}
