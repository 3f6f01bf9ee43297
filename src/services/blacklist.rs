//! Recently played songs, albums and artists
//!
//! Each category is a fixed-capacity FIFO of slots. Pushing evicts the oldest
//! slot and appends a new one. Slots older than the configured age are
//! emptied in place, so every list always holds exactly `capacity` slots.

use crate::error::{AppError, Result};
use crate::models::{AlbumId, ArtistId, BlacklistCategory, BlacklistEntry, MediaId};
use crate::services::state_store::StateStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistSettings {
    pub song_capacity: usize,
    pub album_capacity: usize,
    pub artist_capacity: usize,
    pub max_age_hours: u32,
}

impl Default for BlacklistSettings {
    fn default() -> Self {
        Self {
            song_capacity: 50,
            album_capacity: 20,
            artist_capacity: 10,
            max_age_hours: 24,
        }
    }
}

impl BlacklistSettings {
    pub fn capacity(&self, category: BlacklistCategory) -> usize {
        match category {
            BlacklistCategory::Song => self.song_capacity,
            BlacklistCategory::Album => self.album_capacity,
            BlacklistCategory::Artist => self.artist_capacity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_age_hours == 0 {
            return Err(AppError::InvalidArgument(
                "blacklist max age must be at least one hour".into(),
            ));
        }
        Ok(())
    }

    fn max_age_secs(&self) -> i64 {
        i64::from(self.max_age_hours) * 3600
    }
}

fn index(category: BlacklistCategory) -> usize {
    match category {
        BlacklistCategory::Song => 0,
        BlacklistCategory::Album => 1,
        BlacklistCategory::Artist => 2,
    }
}

pub struct BlacklistManager {
    settings: BlacklistSettings,
    lists: Mutex<[VecDeque<BlacklistEntry>; 3]>,
    store: Arc<dyn StateStore>,
}

impl BlacklistManager {
    /// Load the three lists from `store`, fitting each to its configured capacity
    pub fn load(settings: BlacklistSettings, store: Arc<dyn StateStore>) -> Result<Self> {
        settings.validate()?;

        let lists = BlacklistCategory::ALL.map(|category| {
            let capacity = settings.capacity(category);
            let stored = store.load_blacklist(category).unwrap_or_else(|e| {
                warn!("Could not restore {} blacklist, starting empty: {}", category, e);
                Vec::new()
            });
            if stored.len() != capacity {
                info!(
                    "Resizing {} blacklist from {} to {} slots",
                    category,
                    stored.len(),
                    capacity
                );
            }
            fit_to_capacity(stored, capacity)
        });

        Ok(Self {
            settings,
            lists: Mutex::new(lists),
            store,
        })
    }

    pub fn settings(&self) -> &BlacklistSettings {
        &self.settings
    }

    pub fn is_enabled(&self, category: BlacklistCategory) -> bool {
        self.settings.capacity(category) > 0
    }

    /// Record a finished play in every enabled category
    pub fn push(&self, song: MediaId, album: AlbumId, artist: ArtistId) {
        self.push_at(song, album, artist, Utc::now().timestamp());
    }

    pub fn push_at(&self, song: MediaId, album: AlbumId, artist: ArtistId, now: i64) {
        let mut lists = self.lists.lock();

        for (category, id) in [
            (BlacklistCategory::Song, song),
            (BlacklistCategory::Album, album),
            (BlacklistCategory::Artist, artist),
        ] {
            let list = &mut lists[index(category)];
            if list.is_empty() {
                continue;
            }
            list.pop_front();
            list.push_back(BlacklistEntry::new(id, now));
        }

        for category in BlacklistCategory::ALL {
            self.expire(&mut lists[index(category)], now);
        }
        for category in BlacklistCategory::ALL {
            self.persist(category, &lists[index(category)]);
        }

        debug!("Blacklisted song {} album {} artist {}", song, album, artist);
    }

    /// Empty every slot of `category` that is older than the max age
    pub fn validate(&self, category: BlacklistCategory) {
        self.validate_at(category, Utc::now().timestamp());
    }

    pub fn validate_at(&self, category: BlacklistCategory, now: i64) {
        let mut lists = self.lists.lock();
        let list = &mut lists[index(category)];
        if self.expire(list, now) > 0 {
            self.persist(category, list);
        }
    }

    pub fn active_ids(&self, category: BlacklistCategory) -> HashSet<i64> {
        self.active_ids_at(category, Utc::now().timestamp())
    }

    pub fn active_ids_at(&self, category: BlacklistCategory, now: i64) -> HashSet<i64> {
        self.validate_at(category, now);
        let lists = self.lists.lock();
        lists[index(category)].iter().filter_map(|e| e.id).collect()
    }

    pub fn contains(&self, category: BlacklistCategory, id: i64) -> bool {
        self.contains_at(category, id, Utc::now().timestamp())
    }

    pub fn contains_at(&self, category: BlacklistCategory, id: i64, now: i64) -> bool {
        self.active_ids_at(category, now).contains(&id)
    }

    /// All slots of `category`, oldest first
    pub fn snapshot(&self, category: BlacklistCategory) -> Vec<BlacklistEntry> {
        let lists = self.lists.lock();
        lists[index(category)].iter().copied().collect()
    }

    fn expire(&self, list: &mut VecDeque<BlacklistEntry>, now: i64) -> usize {
        let cutoff = now - self.settings.max_age_secs();
        let mut expired = 0;
        for entry in list.iter_mut() {
            if matches!(entry.timestamp, Some(ts) if ts < cutoff) {
                entry.clear();
                expired += 1;
            }
        }
        expired
    }

    fn persist(&self, category: BlacklistCategory, list: &VecDeque<BlacklistEntry>) {
        let entries: Vec<BlacklistEntry> = list.iter().copied().collect();
        if let Err(e) = self.store.save_blacklist(category, &entries) {
            warn!("Failed to save {} blacklist: {}", category, e);
        }
    }
}

/// Keep the newest entries that fit and pad the front with empty slots
fn fit_to_capacity(stored: Vec<BlacklistEntry>, capacity: usize) -> VecDeque<BlacklistEntry> {
    let skip = stored.len().saturating_sub(capacity);
    let kept = stored.into_iter().skip(skip);

    let mut list = VecDeque::with_capacity(capacity);
    list.extend(std::iter::repeat(BlacklistEntry::default()).take(capacity - kept.len()));
    list.extend(kept);
    list
}
