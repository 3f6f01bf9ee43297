//! Learns which songs and artists get played back to back.
//!
//! A sliding window of the last played ids produces one edge per completed
//! pair. Long breaks between plays cut the window so unrelated listening
//! sessions are not linked.

use crate::error::Result;
use crate::models::{MediaId, RelationKind};
use crate::services::catalog::Catalog;
use crate::services::relation_store::RelationStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const WINDOW_SIZE: usize = 3;

#[derive(Default)]
struct Window {
    ids: VecDeque<MediaId>,
    /// Unix time of the last `new_song`
    last_seen: Option<i64>,
}

pub struct RelationshipTracker {
    window: Mutex<Window>,
    idle_timeout: Duration,
    catalog: Arc<dyn Catalog>,
    relations: Arc<dyn RelationStore>,
}

impl RelationshipTracker {
    pub fn new(
        idle_timeout: Duration,
        catalog: Arc<dyn Catalog>,
        relations: Arc<dyn RelationStore>,
    ) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            idle_timeout,
            catalog,
            relations,
        }
    }

    pub async fn new_song(&self, id: MediaId) -> Result<()> {
        self.new_song_at(id, Utc::now().timestamp()).await
    }

    pub async fn new_song_at(&self, id: MediaId, now: i64) -> Result<()> {
        if id <= 0 {
            warn!("Ignoring play of invalid media id {}", id);
            return Ok(());
        }

        let pair = {
            let mut window = self.window.lock();

            if let Some(last_seen) = window.last_seen {
                let idle = now.saturating_sub(last_seen);
                if idle > self.idle_timeout.as_secs() as i64 {
                    debug!("No plays for {}s, starting a new tracking window", idle);
                    window.ids.clear();
                }
            }
            window.last_seen = Some(now);

            if window.ids.back() == Some(&id) {
                return Ok(());
            }
            window.ids.push_back(id);

            if window.ids.len() < WINDOW_SIZE {
                None
            } else {
                window
                    .ids
                    .pop_front()
                    .zip(window.ids.front().copied())
            }
        };

        if let Some((a, b)) = pair {
            self.commit(a, b).await;
        }
        Ok(())
    }

    /// The last `new_song` was a skip, not a finished play
    pub fn song_skipped(&self) -> Result<()> {
        let mut window = self.window.lock();
        if let Some(id) = window.ids.pop_back() {
            debug!("Dropped skipped song {} from the tracking window", id);
        }
        Ok(())
    }

    pub fn window(&self) -> Vec<MediaId> {
        self.window.lock().ids.iter().copied().collect()
    }

    async fn commit(&self, a: MediaId, b: MediaId) {
        let (media_a, media_b) = match (
            self.catalog.lookup_media(a).await,
            self.catalog.lookup_media(b).await,
        ) {
            (Ok(media_a), Ok(media_b)) => (media_a, media_b),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Not relating songs {} and {}: {}", a, b, e);
                return;
            }
        };

        if let Err(e) = self.relations.add_relation(RelationKind::Song, a, b).await {
            warn!("Failed to relate songs {} and {}: {}", a, b, e);
        }

        let (artist_a, artist_b) = (media_a.artist_id, media_b.artist_id);
        if let Err(e) = self
            .relations
            .add_relation(RelationKind::Artist, artist_a, artist_b)
            .await
        {
            warn!("Failed to relate artists {} and {}: {}", artist_a, artist_b, e);
        }
    }
}
