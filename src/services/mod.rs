pub mod blacklist;
pub mod broadcast_sink;
pub mod catalog;
pub mod media_source;
pub mod observers;
pub mod playback_queue;
pub mod random_selector;
pub mod relation_store;
pub mod relationship_tracker;
pub mod state_store;
pub mod streaming_engine;

#[cfg(test)]
pub(crate) mod fakes;

pub use blacklist::{BlacklistManager, BlacklistSettings};
pub use broadcast_sink::{BroadcastSink, TcpSink};
pub use catalog::{Catalog, SqliteCatalog};
pub use media_source::{FileOpener, Frame, FrameSource, MediaOpener};
pub use observers::{Observer, ObserverId};
pub use playback_queue::PlaybackQueue;
pub use random_selector::{RandomSelector, RefillSettings};
pub use relation_store::{RelationStore, SqliteRelationStore};
pub use relationship_tracker::RelationshipTracker;
pub use state_store::{JsonStateStore, MemoryStateStore, StateStore};
pub use streaming_engine::{EndOfQueue, EngineServices, EngineSettings, StreamingEngine};
