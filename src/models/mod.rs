pub mod blacklist;
pub mod events;
pub mod media;
pub mod queue;

pub use blacklist::{BlacklistCategory, BlacklistEntry};
pub use events::{EngineEvent, EngineStatus, StreamState};
pub use media::{
    AlbumId, ArtistId, MediaId, MediaKind, MediaRecord, Relation, RelationKind, SongConstraints,
    Stat, TagId, TagLink, FAVORITE_HATED,
};
pub use queue::{EntryId, QueueEntry, QueuePosition, QueueRow};
