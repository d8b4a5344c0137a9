use chrono::Utc;
use log::info;

use crate::error::Result;
use crate::models::Notification;
use crate::store::{self, CatalogStore};

/// Stores an inbound hub delivery verbatim. The payload is never parsed.
pub async fn ingest(
    store: &dyn CatalogStore,
    payload: String,
    host: Option<String>,
) -> Result<Notification> {
    let notification = Notification {
        payload,
        host,
        received_at: Utc::now(),
    };

    store::in_unit(store, store.add_notification(notification.clone())).await?;

    info!(
        "Stored hub notification ({} bytes) from {}",
        notification.payload.len(),
        notification.host.as_deref().unwrap_or("unknown host")
    );
    Ok(notification)
}
