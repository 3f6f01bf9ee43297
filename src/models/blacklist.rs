use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistCategory {
    Song,
    Album,
    Artist,
}

impl BlacklistCategory {
    pub const ALL: [BlacklistCategory; 3] = [
        BlacklistCategory::Song,
        BlacklistCategory::Album,
        BlacklistCategory::Artist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistCategory::Song => "songs",
            BlacklistCategory::Album => "albums",
            BlacklistCategory::Artist => "artists",
        }
    }
}

impl fmt::Display for BlacklistCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot of a blacklist. Both fields are `None` for an empty or expired slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: Option<i64>,
    /// Unix time of the push
    pub timestamp: Option<i64>,
}

impl BlacklistEntry {
    pub fn new(id: i64, timestamp: i64) -> Self {
        Self {
            id: Some(id),
            timestamp: Some(timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.timestamp = None;
    }
}
