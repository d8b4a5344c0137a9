use log::{error, info};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, put, State};

use crate::models::{AdminToken, ErrorResponse, Video, VideoListResponse};
use crate::services::youtube_api::VideoResource;
use crate::services::VideoRefresh;
use crate::store::MAX_LISTING_WINDOW;
use crate::AppState;

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

fn not_found(message: &str) -> ErrorResponse {
    ErrorResponse::new(Status::NotFound, "Not found", message)
}

#[get("/?<page>&<per_page>")]
pub async fn list_videos(
    state: &State<AppState>,
    page: Option<u64>,
    per_page: Option<u64>,
) -> Result<Json<VideoListResponse>, ErrorResponse> {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    if page.saturating_mul(per_page) > MAX_LISTING_WINDOW {
        return Err(ErrorResponse::new(
            Status::BadRequest,
            "Bad request",
            format!("Listings stop at {MAX_LISTING_WINDOW} videos; page {page} is past the end"),
        ));
    }

    match state.store.list_videos(page, per_page).await {
        Ok((videos, total)) => {
            info!("Retrieved {} videos for page {}", videos.len(), page);
            Ok(Json(VideoListResponse {
                videos,
                total,
                page,
                per_page,
            }))
        }
        Err(e) => {
            error!("Failed to list videos: {e}");
            Err(e.into())
        }
    }
}

#[get("/video-db/<id>")]
pub async fn get_video_from_db(
    state: &State<AppState>,
    id: &str,
) -> Result<Json<Video>, ErrorResponse> {
    match state.store.get_video(id).await {
        Ok(Some(video)) => Ok(Json(video)),
        Ok(None) => Err(not_found("Video not found in catalog")),
        Err(e) => {
            error!("Failed to read video {id}: {e}");
            Err(e.into())
        }
    }
}

#[get("/video-ytb/<id>")]
pub async fn get_video_from_youtube(
    state: &State<AppState>,
    id: &str,
) -> Result<Json<VideoResource>, ErrorResponse> {
    match state.api.get_video(id).await {
        Ok(Some(video)) => Ok(Json(video)),
        Ok(None) => Err(not_found("Video not found on YouTube")),
        Err(e) => {
            error!("Failed to fetch video {id} from YouTube: {e}");
            Err(e.into())
        }
    }
}

#[put("/video/<id>")]
pub async fn refresh_video(
    _token: AdminToken,
    state: &State<AppState>,
    id: &str,
) -> Result<Json<Video>, ErrorResponse> {
    match state.orchestrator.refresh_video(id).await {
        Ok(VideoRefresh::Updated(video)) => {
            info!("Video updated successfully: {id}");
            Ok(Json(video))
        }
        Ok(VideoRefresh::MissingUpstream) => Err(not_found("Video not found on YouTube")),
        Ok(VideoRefresh::MissingLocally) => Err(not_found("Video not found in catalog")),
        Err(e) => {
            error!("Failed to refresh video {id}: {e}");
            Err(e.into())
        }
    }
}
