use crate::models::EntryId;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("The current queue entry cannot be removed or moved")]
    CurrentEntryProtected,

    #[error("Queue entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("No eligible media left to select")]
    EmptyCandidatePool,

    #[error("Broadcast sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Corrupt persisted state: {0}")]
    CorruptPersistedState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
