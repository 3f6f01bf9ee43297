use crate::error::{AppError, Result};
use crate::models::{AlbumId, BlacklistCategory, MediaId, MediaRecord, SongConstraints, TagId};
use crate::services::blacklist::BlacklistManager;
use crate::services::catalog::Catalog;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

/// What the engine asks for when it tops up the queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefillSettings {
    pub tag_filter: HashSet<TagId>,
    pub constraints: SongConstraints,
    pub pinned_album: Option<AlbumId>,
}

/// Picks a random song matching a genre filter, avoiding recent plays
pub struct RandomSelector {
    catalog: Arc<dyn Catalog>,
    blacklist: Option<Arc<BlacklistManager>>,
}

impl RandomSelector {
    pub fn new(catalog: Arc<dyn Catalog>, blacklist: Option<Arc<BlacklistManager>>) -> Self {
        Self { catalog, blacklist }
    }

    /// Pick a song for the queue. Songs in `queued` are treated like
    /// blacklisted songs so a refill never repeats what is already waiting.
    pub async fn get_song_with(
        &self,
        settings: &RefillSettings,
        queued: &HashSet<MediaId>,
    ) -> Result<MediaId> {
        self.select(
            &settings.tag_filter,
            &settings.constraints,
            settings.pinned_album,
            queued,
        )
        .await
    }

    /// Pick one song. With `pinned_album` the tag filter is ignored and only
    /// the song blacklist applies.
    pub async fn get_song(
        &self,
        tag_filter: &HashSet<TagId>,
        constraints: &SongConstraints,
        pinned_album: Option<AlbumId>,
    ) -> Result<MediaId> {
        self.select(tag_filter, constraints, pinned_album, &HashSet::new())
            .await
    }

    async fn select(
        &self,
        tag_filter: &HashSet<TagId>,
        constraints: &SongConstraints,
        pinned_album: Option<AlbumId>,
        queued: &HashSet<MediaId>,
    ) -> Result<MediaId> {
        let albums = match pinned_album {
            Some(album) => {
                if !tag_filter.is_empty() {
                    tracing::warn!(
                        "Album {} is pinned, ignoring the genre filter for random selection",
                        album
                    );
                }
                vec![album]
            }
            None if tag_filter.is_empty() => {
                tracing::debug!("No genre filter active, nothing to select from");
                return Err(AppError::EmptyCandidatePool);
            }
            None => self.catalog.lookup_albums_by_tag(tag_filter).await?,
        };

        let mut candidates = self.catalog.lookup_songs(&albums, constraints).await?;
        tracing::debug!(
            "Selecting from {} candidate songs in {} albums",
            candidates.len(),
            albums.len()
        );

        // Reading the blacklist may expire slots and rewrite its snapshot
        let blacklist = self.blacklist.clone();
        let song_only = pinned_album.is_some();
        let mut blocked =
            tokio::task::spawn_blocking(move || Blocked::collect(blacklist.as_deref(), song_only))
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        blocked.songs.extend(queued.iter().copied());

        while !candidates.is_empty() {
            let idx = rand::thread_rng().gen_range(0..candidates.len());
            let song_id = candidates.swap_remove(idx);

            let media = match self.catalog.lookup_media(song_id).await {
                Ok(media) => media,
                Err(e) => {
                    tracing::warn!("Failed to look up candidate song {}: {}", song_id, e);
                    continue;
                }
            };

            if pinned_album.is_none() && !matches_genre(&media, tag_filter) {
                continue;
            }
            if blocked.rejects(&media) {
                continue;
            }

            tracing::info!("Randomly selected song {}", song_id);
            return Ok(song_id);
        }

        Err(AppError::EmptyCandidatePool)
    }
}

/// Album tags are only a hint; a song with confirmed tags of its own must
/// share at least one of them with the filter.
fn matches_genre(media: &MediaRecord, tag_filter: &HashSet<TagId>) -> bool {
    let mut confirmed = media.confirmed_tags().peekable();
    if confirmed.peek().is_none() {
        return true;
    }
    confirmed.any(|tag| tag_filter.contains(&tag))
}

/// Active blacklist ids, read once per selection
#[derive(Default)]
struct Blocked {
    artists: HashSet<i64>,
    albums: HashSet<i64>,
    songs: HashSet<i64>,
}

impl Blocked {
    fn collect(blacklist: Option<&BlacklistManager>, song_only: bool) -> Self {
        let Some(blacklist) = blacklist else {
            return Self::default();
        };
        let active = |category| {
            if blacklist.is_enabled(category) {
                blacklist.active_ids(category)
            } else {
                HashSet::new()
            }
        };

        if song_only {
            return Self {
                songs: active(BlacklistCategory::Song),
                ..Self::default()
            };
        }
        Self {
            artists: active(BlacklistCategory::Artist),
            albums: active(BlacklistCategory::Album),
            songs: active(BlacklistCategory::Song),
        }
    }

    fn rejects(&self, media: &MediaRecord) -> bool {
        self.artists.contains(&media.artist_id)
            || self.albums.contains(&media.album_id)
            || self.songs.contains(&media.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::blacklist::BlacklistSettings;
    use crate::services::fakes::FakeCatalog;
    use crate::services::state_store::MemoryStateStore;

    fn catalog() -> Arc<FakeCatalog> {
        let catalog = Arc::new(FakeCatalog::new());
        // Albums 10 and 20 are rock (tag 1), album 30 is jazz (tag 2)
        for (id, album, artist) in [(1, 10, 100), (2, 10, 100), (3, 20, 200), (4, 20, 200), (5, 30, 300)] {
            catalog.add_song(id, album, artist);
        }
        catalog.tag_album(10, 1);
        catalog.tag_album(20, 1);
        catalog.tag_album(30, 2);
        catalog
    }

    fn blacklist(song: usize, album: usize, artist: usize) -> Arc<BlacklistManager> {
        let settings = BlacklistSettings {
            song_capacity: song,
            album_capacity: album,
            artist_capacity: artist,
            max_age_hours: 24,
        };
        Arc::new(BlacklistManager::load(settings, Arc::new(MemoryStateStore::new())).unwrap())
    }

    fn rock() -> HashSet<TagId> {
        HashSet::from([1])
    }

    #[tokio::test]
    async fn test_selects_from_filtered_albums() {
        let selector = RandomSelector::new(catalog(), None);
        for _ in 0..50 {
            let id = selector
                .get_song(&rock(), &SongConstraints::default(), None)
                .await
                .unwrap();
            assert!((1..=4).contains(&id));
        }
    }

    #[tokio::test]
    async fn test_empty_filter_is_empty_pool() {
        let selector = RandomSelector::new(catalog(), None);
        assert!(matches!(
            selector
                .get_song(&HashSet::new(), &SongConstraints::default(), None)
                .await,
            Err(AppError::EmptyCandidatePool)
        ));
    }

    #[tokio::test]
    async fn test_never_returns_blacklisted() {
        let blacklist = blacklist(5, 0, 0);
        blacklist.push(1, 10, 100);
        blacklist.push(2, 10, 100);
        blacklist.push(3, 20, 200);

        let selector = RandomSelector::new(catalog(), Some(blacklist));
        for _ in 0..50 {
            let id = selector
                .get_song(&rock(), &SongConstraints::default(), None)
                .await
                .unwrap();
            assert_eq!(id, 4);
        }
    }

    #[tokio::test]
    async fn test_artist_blacklist_excludes_whole_artist() {
        let blacklist = blacklist(0, 0, 5);
        blacklist.push(1, 10, 100);

        let selector = RandomSelector::new(catalog(), Some(blacklist));
        for _ in 0..50 {
            let id = selector
                .get_song(&rock(), &SongConstraints::default(), None)
                .await
                .unwrap();
            assert!(id == 3 || id == 4);
        }
    }

    #[tokio::test]
    async fn test_all_blacklisted_is_empty_pool() {
        let blacklist = blacklist(0, 5, 0);
        blacklist.push(1, 10, 100);
        blacklist.push(3, 20, 200);

        let selector = RandomSelector::new(catalog(), Some(blacklist));
        assert!(matches!(
            selector.get_song(&rock(), &SongConstraints::default(), None).await,
            Err(AppError::EmptyCandidatePool)
        ));
    }

    #[tokio::test]
    async fn test_song_tags_override_album_tags() {
        let catalog = catalog();
        // Song 1 is confirmed jazz, song 2 only has an unconfirmed jazz guess
        catalog.tag_song(1, 2, 1);
        catalog.tag_song(2, 2, 0);
        catalog.tag_song(3, 2, 2);
        catalog.tag_song(3, 1, 1);

        let selector = RandomSelector::new(catalog, None);
        for _ in 0..50 {
            let id = selector
                .get_song(&rock(), &SongConstraints::default(), None)
                .await
                .unwrap();
            assert_ne!(id, 1);
        }
    }

    #[tokio::test]
    async fn test_queued_songs_are_not_picked_again() {
        let selector = RandomSelector::new(catalog(), None);
        let settings = RefillSettings {
            tag_filter: rock(),
            ..RefillSettings::default()
        };

        for _ in 0..50 {
            let id = selector
                .get_song_with(&settings, &HashSet::from([1, 2, 3]))
                .await
                .unwrap();
            assert_eq!(id, 4);
        }
        assert!(matches!(
            selector
                .get_song_with(&settings, &HashSet::from([1, 2, 3, 4]))
                .await,
            Err(AppError::EmptyCandidatePool)
        ));
    }

    #[tokio::test]
    async fn test_pinned_album_ignores_filter_and_album_blacklist() {
        let blacklist = blacklist(5, 5, 5);
        blacklist.push(5, 30, 300);
        blacklist.push(1, 10, 100);

        let selector = RandomSelector::new(catalog(), Some(blacklist));
        for _ in 0..50 {
            let id = selector
                .get_song(&rock(), &SongConstraints::default(), Some(10))
                .await
                .unwrap();
            assert_eq!(id, 2);
        }

        let settings = RefillSettings {
            pinned_album: Some(30),
            ..RefillSettings::default()
        };
        assert!(matches!(
            selector.get_song_with(&settings, &HashSet::new()).await,
            Err(AppError::EmptyCandidatePool)
        ));
    }
}
