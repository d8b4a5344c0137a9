use log::{error, info};
use rocket::serde::json::Json;
use rocket::{get, State};

use crate::models::{ErrorResponse, Playlist};
use crate::AppState;

#[get("/")]
pub async fn list_playlists(state: &State<AppState>) -> Result<Json<Vec<Playlist>>, ErrorResponse> {
    match state.store.list_all_playlists().await {
        Ok(playlists) => {
            info!("Found {} playlists.", playlists.len());
            Ok(Json(playlists))
        }
        Err(e) => {
            error!("Failed to list playlists: {e}");
            Err(e.into())
        }
    }
}
