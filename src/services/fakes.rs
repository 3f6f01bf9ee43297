//! In-memory collaborators for unit tests

use crate::error::{AppError, Result};
use crate::models::{
    AlbumId, ArtistId, MediaId, MediaRecord, Relation, RelationKind, SongConstraints, Stat,
    TagId, TagLink,
};
use crate::services::catalog::Catalog;
use crate::services::relation_store::RelationStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

#[derive(Default)]
pub struct FakeCatalog {
    media: Mutex<BTreeMap<MediaId, MediaRecord>>,
    album_tags: Mutex<HashMap<AlbumId, HashSet<TagId>>>,
    pub stats: Mutex<Vec<(MediaId, Stat)>>,
    pub last_played: Mutex<Vec<(MediaId, i64)>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_song(&self, id: MediaId, album: AlbumId, artist: ArtistId) {
        self.add(MediaRecord {
            id,
            album_id: album,
            artist_id: artist,
            path: PathBuf::from(format!("music/{}/{}/{}.mp3", artist, album, id)),
            length: 200,
            disabled: false,
            favorite: 0,
            genre_tags: Vec::new(),
        });
    }

    pub fn add(&self, media: MediaRecord) {
        self.media.lock().insert(media.id, media);
    }

    pub fn tag_album(&self, album: AlbumId, tag: TagId) {
        self.album_tags.lock().entry(album).or_default().insert(tag);
    }

    pub fn tag_song(&self, id: MediaId, tag: TagId, approval: u8) {
        if let Some(media) = self.media.lock().get_mut(&id) {
            media.genre_tags.push(TagLink { tag_id: tag, approval });
        }
    }

    pub fn stat_count(&self, id: MediaId, stat: Stat) -> usize {
        self.stats
            .lock()
            .iter()
            .filter(|(m, s)| *m == id && *s == stat)
            .count()
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn lookup_media(&self, id: MediaId) -> Result<MediaRecord> {
        self.media
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("media {} not in catalog", id)))
    }

    async fn lookup_albums_by_tag(&self, tags: &HashSet<TagId>) -> Result<Vec<AlbumId>> {
        let mut albums: Vec<AlbumId> = self
            .album_tags
            .lock()
            .iter()
            .filter(|(_, album_tags)| !album_tags.is_disjoint(tags))
            .map(|(album, _)| *album)
            .collect();
        albums.sort();
        Ok(albums)
    }

    async fn lookup_songs(
        &self,
        albums: &[AlbumId],
        constraints: &SongConstraints,
    ) -> Result<Vec<MediaId>> {
        Ok(self
            .media
            .lock()
            .values()
            .filter(|m| albums.contains(&m.album_id) && constraints.accepts(m))
            .map(|m| m.id)
            .collect())
    }

    async fn increment_stat(&self, id: MediaId, stat: Stat) -> Result<()> {
        self.stats.lock().push((id, stat));
        Ok(())
    }

    async fn set_last_played(&self, id: MediaId, timestamp: i64) -> Result<()> {
        self.last_played.lock().push((id, timestamp));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRelationStore {
    edges: Mutex<HashMap<(RelationKind, i64, i64), i64>>,
}

impl FakeRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight of the edge between `a` and `b`, 0 when absent
    pub fn weight(&self, kind: RelationKind, a: i64, b: i64) -> i64 {
        let key = if a < b { (kind, a, b) } else { (kind, b, a) };
        self.edges.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn edge_count(&self, kind: RelationKind) -> usize {
        self.edges.lock().keys().filter(|(k, _, _)| *k == kind).count()
    }
}

#[async_trait]
impl RelationStore for FakeRelationStore {
    async fn add_relation(&self, kind: RelationKind, a: i64, b: i64) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let key = if a < b { (kind, a, b) } else { (kind, b, a) };
        *self.edges.lock().entry(key).or_insert(0) += 1;
        Ok(())
    }

    async fn get_relations(&self, kind: RelationKind, id: i64) -> Result<Vec<Relation>> {
        let mut relations: Vec<Relation> = self
            .edges
            .lock()
            .iter()
            .filter(|((k, _, _), _)| *k == kind)
            .filter_map(|(&(_, a, b), &weight)| match id {
                _ if id == a => Some(Relation { id: b, weight }),
                _ if id == b => Some(Relation { id: a, weight }),
                _ => None,
            })
            .collect();
        relations.sort_by(|x, y| y.weight.cmp(&x.weight).then(x.id.cmp(&y.id)));
        Ok(relations)
    }
}
