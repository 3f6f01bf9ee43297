use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub type MediaId = i64;
pub type AlbumId = i64;
pub type ArtistId = i64;
pub type TagId = i64;

/// Favorite value the catalog uses for hated songs
pub const FAVORITE_HATED: i8 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A genre or mood tag attached to a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLink {
    pub tag_id: TagId,
    /// 0 = guessed by the classifier, 1 = set by the user, 2 = classifier guess confirmed by the user
    pub approval: u8,
}

impl TagLink {
    pub fn is_confirmed(&self) -> bool {
        self.approval >= 1
    }
}

/// Everything the playback core needs to know about one media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: MediaId,
    pub album_id: AlbumId,
    pub artist_id: ArtistId,
    pub path: PathBuf,
    /// Play time in seconds
    pub length: u32,
    pub disabled: bool,
    pub favorite: i8,
    pub genre_tags: Vec<TagLink>,
}

impl MediaRecord {
    pub fn is_hated(&self) -> bool {
        self.favorite == FAVORITE_HATED
    }

    /// Tag ids the user (or a confirmed classifier run) assigned to this song
    pub fn confirmed_tags(&self) -> impl Iterator<Item = TagId> + '_ {
        self.genre_tags
            .iter()
            .filter(|t| t.is_confirmed())
            .map(|t| t.tag_id)
    }
}

/// Constraints applied while gathering random candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongConstraints {
    pub exclude_disabled: bool,
    pub exclude_hated: bool,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
}

impl Default for SongConstraints {
    fn default() -> Self {
        Self {
            exclude_disabled: true,
            exclude_hated: true,
            min_length: Some(120),
            max_length: None,
        }
    }
}

impl SongConstraints {
    pub fn accepts(&self, media: &MediaRecord) -> bool {
        if self.exclude_disabled && media.disabled {
            return false;
        }
        if self.exclude_hated && media.is_hated() {
            return false;
        }
        if let Some(min) = self.min_length {
            if media.length < min {
                return false;
            }
        }
        if let Some(max) = self.max_length {
            if media.length > max {
                return false;
            }
        }
        true
    }
}

/// Per-song statistics kept by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stat {
    /// Song was added to the queue by the random selector
    RandomAdds,
    /// Song was skipped while playing
    Skips,
}

impl Stat {
    pub fn column(&self) -> &'static str {
        match self {
            Stat::RandomAdds => "qrndadds",
            Stat::Skips => "qskips",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Song,
    Artist,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Song => "song",
            RelationKind::Artist => "artist",
        }
    }
}

/// A neighbour in the relationship graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub weight: i64,
}
