use crate::error::AppError;
use crate::models::MediaId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 128-bit random identifier of a queue entry, rendered as a decimal string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u128);

impl EntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Self)
            .map_err(|e| AppError::InvalidArgument(format!("Invalid entry id '{}': {}", s, e)))
    }
}

impl Serialize for EntryId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub entry_id: EntryId,
    pub media_id: MediaId,
    pub is_random: bool,
}

/// Where `enqueue` places a new entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePosition {
    /// Directly behind the current entry
    Next,
    /// At the end of the queue
    Last,
}

impl FromStr for QueuePosition {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(QueuePosition::Next),
            "last" => Ok(QueuePosition::Last),
            other => Err(AppError::InvalidArgument(format!(
                "Position must be \"next\" or \"last\", got \"{}\"",
                other
            ))),
        }
    }
}

/// One row of the persisted queue table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRow {
    pub entryid: String,
    pub mediaid: MediaId,
    pub israndom: String,
}

impl From<&QueueEntry> for QueueRow {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            entryid: entry.entry_id.to_string(),
            mediaid: entry.media_id,
            israndom: if entry.is_random { "True" } else { "False" }.to_string(),
        }
    }
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = AppError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let entry_id = row
            .entryid
            .parse::<EntryId>()
            .map_err(|e| AppError::CorruptPersistedState(e.to_string()))?;

        let is_random = match row.israndom.as_str() {
            "True" => true,
            "False" => false,
            other => {
                return Err(AppError::CorruptPersistedState(format!(
                    "israndom must be True or False, got \"{}\"",
                    other
                )))
            }
        };

        Ok(QueueEntry {
            entry_id,
            media_id: row.mediaid,
            is_random,
        })
    }
}
