use std::sync::Arc;

use log::info;

use crate::error::Result;
use crate::store::{self, CatalogStore};

/// Recomputes every playlist's `video_count` from its membership rows.
pub struct CountRecomputer {
    store: Arc<dyn CatalogStore>,
}

impl CountRecomputer {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        CountRecomputer { store }
    }

    /// Returns how many playlists had a stale count.
    pub async fn recompute(&self) -> Result<usize> {
        let changed = store::in_unit(self.store.as_ref(), self.recompute_staged()).await?;
        info!("Recomputed playlist counts, {changed} changed");
        Ok(changed)
    }

    async fn recompute_staged(&self) -> Result<usize> {
        let mut changed = 0;
        for mut playlist in self.store.list_all_playlists().await? {
            let actual = self.store.count_membership(&playlist.playlist_id).await?;
            if playlist.video_count != actual {
                info!(
                    "Playlist {} count {} -> {actual}",
                    playlist.playlist_id, playlist.video_count
                );
                playlist.video_count = actual;
                self.store.update_playlist(playlist).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
