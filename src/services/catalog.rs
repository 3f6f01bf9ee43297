//! Catalog lookups
//!
//! The playback core only reads a handful of facts about media (album, artist,
//! file, length, flags, genre tags) and writes back play statistics. The
//! `Catalog` trait is that narrow view; `SqliteCatalog` implements it over the
//! music database, one instance per media kind.

use crate::error::{AppError, Result};
use crate::models::{
    AlbumId, MediaId, MediaKind, MediaRecord, SongConstraints, Stat, TagId, TagLink,
    FAVORITE_HATED,
};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::path::PathBuf;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup_media(&self, id: MediaId) -> Result<MediaRecord>;

    /// Albums carrying at least one of `tags`
    async fn lookup_albums_by_tag(&self, tags: &HashSet<TagId>) -> Result<Vec<AlbumId>>;

    /// Songs of `albums` that satisfy `constraints`
    async fn lookup_songs(
        &self,
        albums: &[AlbumId],
        constraints: &SongConstraints,
    ) -> Result<Vec<MediaId>>;

    async fn increment_stat(&self, id: MediaId, stat: Stat) -> Result<()>;

    /// `timestamp` is unix time
    async fn set_last_played(&self, id: MediaId, timestamp: i64) -> Result<()>;
}

#[derive(Debug, FromRow)]
struct MediaRow {
    id: i64,
    albumid: i64,
    artistid: i64,
    path: String,
    playtime: i64,
    disabled: bool,
    favorite: i64,
}

#[derive(Debug, FromRow)]
struct TagRow {
    tagid: i64,
    approval: i64,
}

struct Tables {
    media: &'static str,
    id: &'static str,
    /// Videos have no album; they report album 0
    album: &'static str,
    tags: &'static str,
}

impl Tables {
    fn for_kind(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self {
                media: "songs",
                id: "songid",
                album: "albumid",
                tags: "songtags",
            },
            MediaKind::Video => Self {
                media: "videos",
                id: "videoid",
                album: "0",
                tags: "videotags",
            },
        }
    }
}

pub struct SqliteCatalog {
    db: SqlitePool,
    kind: MediaKind,
    tables: Tables,
}

impl SqliteCatalog {
    pub fn new(db: SqlitePool, kind: MediaKind) -> Self {
        Self {
            db,
            kind,
            tables: Tables::for_kind(kind),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn lookup_media(&self, id: MediaId) -> Result<MediaRecord> {
        let t = &self.tables;
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {id} AS id, {album} AS albumid, artistid, path, playtime, disabled, favorite \
             FROM {media} WHERE {id} = ?",
            id = t.id,
            album = t.album,
            media = t.media,
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} {} not in catalog", self.kind, id)))?;

        let tags = sqlx::query_as::<_, TagRow>(&format!(
            "SELECT tagid, approval FROM {} WHERE {} = ?",
            t.tags, t.id
        ))
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(MediaRecord {
            id: row.id,
            album_id: row.albumid,
            artist_id: row.artistid,
            path: PathBuf::from(row.path),
            length: u32::try_from(row.playtime).unwrap_or(0),
            disabled: row.disabled,
            favorite: i8::try_from(row.favorite).unwrap_or(0),
            genre_tags: tags
                .into_iter()
                .map(|tag| TagLink {
                    tag_id: tag.tagid,
                    approval: u8::try_from(tag.approval).unwrap_or(0),
                })
                .collect(),
        })
    }

    async fn lookup_albums_by_tag(&self, tags: &HashSet<TagId>) -> Result<Vec<AlbumId>> {
        if tags.is_empty() || self.kind == MediaKind::Video {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT albumid FROM albumtags WHERE tagid IN (",
        );
        let mut ids = query.separated(", ");
        for tag in tags {
            ids.push_bind(*tag);
        }
        ids.push_unseparated(")");

        let albums = query
            .build_query_scalar::<i64>()
            .fetch_all(&self.db)
            .await?;
        Ok(albums)
    }

    async fn lookup_songs(
        &self,
        albums: &[AlbumId],
        constraints: &SongConstraints,
    ) -> Result<Vec<MediaId>> {
        if albums.is_empty() || self.kind == MediaKind::Video {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT songid FROM songs WHERE albumid IN (");
        let mut ids = query.separated(", ");
        for album in albums {
            ids.push_bind(*album);
        }
        ids.push_unseparated(")");

        if constraints.exclude_disabled {
            query.push(" AND disabled = 0");
        }
        if constraints.exclude_hated {
            query.push(" AND favorite != ").push_bind(i64::from(FAVORITE_HATED));
        }
        if let Some(min) = constraints.min_length {
            query.push(" AND playtime >= ").push_bind(i64::from(min));
        }
        if let Some(max) = constraints.max_length {
            query.push(" AND playtime <= ").push_bind(i64::from(max));
        }

        let songs = query
            .build_query_scalar::<i64>()
            .fetch_all(&self.db)
            .await?;
        Ok(songs)
    }

    async fn increment_stat(&self, id: MediaId, stat: Stat) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {media} SET {col} = {col} + 1 WHERE {id} = ?",
            media = self.tables.media,
            col = stat.column(),
            id = self.tables.id,
        ))
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {} not in catalog", self.kind, id)));
        }
        Ok(())
    }

    async fn set_last_played(&self, id: MediaId, timestamp: i64) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET lastplayed = ? WHERE {} = ?",
            self.tables.media, self.tables.id
        ))
        .bind(timestamp)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {} not in catalog", self.kind, id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn seed(db: &SqlitePool) {
        for (id, album, artist, playtime, disabled, favorite) in [
            (1, 10, 100, 200, 0, 0),
            (2, 10, 100, 90, 0, 0),
            (3, 10, 100, 240, 1, 0),
            (4, 20, 200, 180, 0, -1),
            (5, 20, 200, 300, 0, 1),
            (6, 30, 300, 210, 0, 0),
        ] {
            sqlx::query(
                "INSERT INTO songs (songid, albumid, artistid, path, playtime, disabled, favorite) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(album)
            .bind(artist)
            .bind(format!("artist/album/{:02} song.mp3", id))
            .bind(playtime)
            .bind(disabled)
            .bind(favorite)
            .execute(db)
            .await
            .unwrap();
        }

        for (album, tag) in [(10, 1), (20, 1), (20, 2), (30, 3)] {
            sqlx::query("INSERT INTO albumtags (albumid, tagid) VALUES (?, ?)")
                .bind(album)
                .bind(tag)
                .execute(db)
                .await
                .unwrap();
        }

        for (song, tag, approval) in [(1, 1, 1), (1, 4, 0)] {
            sqlx::query("INSERT INTO songtags (songid, tagid, approval) VALUES (?, ?, ?)")
                .bind(song)
                .bind(tag)
                .bind(approval)
                .execute(db)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_lookup_media() {
        let db = db::memory().await;
        seed(&db).await;
        let catalog = SqliteCatalog::new(db, MediaKind::Audio);

        let media = catalog.lookup_media(1).await.unwrap();
        assert_eq!(media.album_id, 10);
        assert_eq!(media.artist_id, 100);
        assert_eq!(media.length, 200);
        assert_eq!(media.path, PathBuf::from("artist/album/01 song.mp3"));
        assert_eq!(media.genre_tags.len(), 2);
        assert_eq!(media.confirmed_tags().collect::<Vec<_>>(), vec![1]);

        assert!(catalog.lookup_media(4).await.unwrap().is_hated());
        assert!(matches!(catalog.lookup_media(99).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_albums_by_tag() {
        let db = db::memory().await;
        seed(&db).await;
        let catalog = SqliteCatalog::new(db, MediaKind::Audio);

        let mut albums = catalog
            .lookup_albums_by_tag(&HashSet::from([1, 2]))
            .await
            .unwrap();
        albums.sort();
        assert_eq!(albums, vec![10, 20]);

        assert!(catalog
            .lookup_albums_by_tag(&HashSet::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_songs_respect_constraints() {
        let db = db::memory().await;
        seed(&db).await;
        let catalog = SqliteCatalog::new(db, MediaKind::Audio);

        let mut songs = catalog
            .lookup_songs(&[10, 20], &SongConstraints::default())
            .await
            .unwrap();
        songs.sort();
        assert_eq!(songs, vec![1, 5]);

        let mut songs = catalog
            .lookup_songs(
                &[10, 20],
                &SongConstraints {
                    exclude_disabled: false,
                    exclude_hated: false,
                    min_length: None,
                    max_length: Some(200),
                },
            )
            .await
            .unwrap();
        songs.sort();
        assert_eq!(songs, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_statistics() {
        let db = db::memory().await;
        seed(&db).await;
        let catalog = SqliteCatalog::new(db.clone(), MediaKind::Audio);

        catalog.increment_stat(6, Stat::RandomAdds).await.unwrap();
        catalog.increment_stat(6, Stat::RandomAdds).await.unwrap();
        catalog.increment_stat(6, Stat::Skips).await.unwrap();
        catalog.set_last_played(6, 1_700_000_000).await.unwrap();

        let (rnd, skips, last): (i64, i64, i64) =
            sqlx::query_as("SELECT qrndadds, qskips, lastplayed FROM songs WHERE songid = 6")
                .fetch_one(&db)
                .await
                .unwrap();
        assert_eq!((rnd, skips, last), (2, 1, 1_700_000_000));

        assert!(matches!(
            catalog.increment_stat(99, Stat::Skips).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_video_lookup() {
        let db = db::memory().await;
        sqlx::query("INSERT INTO videos (videoid, artistid, path, playtime) VALUES (7, 70, 'clip.mp4', 240)")
            .execute(&db)
            .await
            .unwrap();
        let catalog = SqliteCatalog::new(db, MediaKind::Video);

        let video = catalog.lookup_media(7).await.unwrap();
        assert_eq!(video.album_id, 0);
        assert_eq!(video.artist_id, 70);
        assert!(video.genre_tags.is_empty());
    }
}
