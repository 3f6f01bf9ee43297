use serde::{Deserialize, Serialize};

/// Snapshot of a streaming worker, as reported by `get_state`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub is_connected: bool,
    pub is_playing: bool,
}

/// Where the worker loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Disconnected,
    Connecting,
    /// Connected, nothing in the queue
    Idle,
    Streaming,
    /// Streaming silence in place of media frames
    Muted,
}

/// Events delivered to registered observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum EngineEvent {
    StatusChanged(StreamState),
    TimeChanged { elapsed_ms: u64 },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::StatusChanged(_) => "StatusChanged",
            EngineEvent::TimeChanged { .. } => "TimeChanged",
        }
    }
}
