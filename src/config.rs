use crate::error::{AppError, Result};
use crate::models::{SongConstraints, TagId};
use crate::services::{BlacklistSettings, EndOfQueue, EngineSettings, RefillSettings};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Directory for queue and blacklist snapshots
    pub state_dir: PathBuf,
    /// Catalog paths are relative to this directory
    pub media_root: PathBuf,
    pub audio_sink_addr: String,
    /// The video worker only runs when this is set
    pub video_sink_addr: Option<String>,
    pub blacklist: BlacklistSettings,
    pub tracker_enabled: bool,
    pub tracker_idle_timeout: Duration,
    pub song_constraints: SongConstraints,
    pub genre_filter: HashSet<TagId>,
    pub end_of_queue: EndOfQueue,
    pub reconnect_interval: Duration,
    pub idle_poll: Duration,
    /// `None` disables pacing; the sink's backpressure alone sets the speed
    pub stream_lead: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let blacklist = BlacklistSettings {
            song_capacity: capacity(var("SONG_BLACKLIST_LEN"), "SONG_BLACKLIST_LEN", 50)?,
            album_capacity: capacity(var("ALBUM_BLACKLIST_LEN"), "ALBUM_BLACKLIST_LEN", 20)?,
            artist_capacity: capacity(var("ARTIST_BLACKLIST_LEN"), "ARTIST_BLACKLIST_LEN", 10)?,
            max_age_hours: parse(var("BLACKLIST_MAX_AGE_HOURS"), "BLACKLIST_MAX_AGE_HOURS", 24)?,
        };
        blacklist.validate()?;

        let song_constraints = SongConstraints {
            exclude_disabled: flag(var("RANDOM_NO_DISABLED"), "RANDOM_NO_DISABLED", true)?,
            exclude_hated: flag(var("RANDOM_NO_HATED"), "RANDOM_NO_HATED", true)?,
            min_length: Some(parse(var("RANDOM_MIN_LENGTH"), "RANDOM_MIN_LENGTH", 120)?)
                .filter(|min| *min > 0),
            max_length: var("RANDOM_MAX_LENGTH")
                .map(|v| parse_value::<u32>(&v, "RANDOM_MAX_LENGTH"))
                .transpose()?,
        };

        let genre_filter = var("GENRE_FILTER")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| parse_value::<TagId>(s, "GENRE_FILTER"))
                    .collect::<Result<HashSet<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let stream_lead_ms: u64 = parse(var("STREAM_LEAD_MILLIS"), "STREAM_LEAD_MILLIS", 2000)?;

        Ok(Config {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://musicdb.db".to_string()),
            state_dir: PathBuf::from(var("STATE_DIR").unwrap_or_else(|| "./state".to_string())),
            media_root: PathBuf::from(var("MEDIA_ROOT").unwrap_or_else(|| ".".to_string())),
            audio_sink_addr: var("AUDIO_SINK_ADDR")
                .unwrap_or_else(|| "127.0.0.1:6666".to_string()),
            video_sink_addr: var("VIDEO_SINK_ADDR"),
            blacklist,
            tracker_enabled: flag(var("TRACKER_ENABLED"), "TRACKER_ENABLED", true)?,
            tracker_idle_timeout: Duration::from_secs(
                60 * parse::<u64>(
                    var("TRACKER_IDLE_TIMEOUT_MINUTES"),
                    "TRACKER_IDLE_TIMEOUT_MINUTES",
                    30,
                )?,
            ),
            song_constraints,
            genre_filter,
            end_of_queue: var("END_OF_QUEUE")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(EndOfQueue::AutoRefill),
            reconnect_interval: Duration::from_secs(parse(
                var("RECONNECT_INTERVAL_SECONDS"),
                "RECONNECT_INTERVAL_SECONDS",
                5,
            )?),
            idle_poll: Duration::from_millis(parse(var("IDLE_POLL_MILLIS"), "IDLE_POLL_MILLIS", 500)?),
            stream_lead: Some(Duration::from_millis(stream_lead_ms)).filter(|d| !d.is_zero()),
        })
    }

    pub fn refill_settings(&self) -> RefillSettings {
        RefillSettings {
            tag_filter: self.genre_filter.clone(),
            constraints: self.song_constraints.clone(),
            pinned_album: None,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            end_of_queue: self.end_of_queue,
            reconnect_interval: self.reconnect_interval,
            idle_poll: self.idle_poll,
            max_lead: self.stream_lead,
            refill: self.refill_settings(),
        }
    }
}

fn parse_value<T: FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AppError::InvalidArgument(format!("{} has an invalid value '{}'", key, value)))
}

fn parse<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    value.map_or(Ok(default), |v| parse_value(&v, key))
}

fn capacity(value: Option<String>, key: &str, default: usize) -> Result<usize> {
    let Some(value) = value else {
        return Ok(default);
    };
    let len: i64 = parse_value(&value, key)?;
    usize::try_from(len)
        .map_err(|_| AppError::InvalidArgument(format!("{} must not be negative, got {}", key, len)))
}

fn flag(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(AppError::InvalidArgument(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}
