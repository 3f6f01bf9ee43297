//! Streaming Engine
//!
//! One worker task per media kind. The worker keeps the broadcast sink
//! connected, streams the current queue entry frame by frame and commits
//! finished plays (relationship tracker, last played, blacklist) before
//! advancing the queue. Callers talk to the worker through a FIFO command
//! channel and never wait for it.

use crate::error::{AppError, Result};
use crate::models::{
    EngineEvent, EngineStatus, EntryId, MediaId, MediaKind, MediaRecord, QueueEntry,
    QueuePosition, Stat, StreamState,
};
use crate::services::blacklist::BlacklistManager;
use crate::services::broadcast_sink::BroadcastSink;
use crate::services::catalog::Catalog;
use crate::services::media_source::{Frame, FrameSource, MediaOpener};
use crate::services::observers::{Observer, ObserverId, ObserverRegistry};
use crate::services::playback_queue::PlaybackQueue;
use crate::services::random_selector::{RandomSelector, RefillSettings};
use crate::services::relationship_tracker::RelationshipTracker;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Queue depth the worker keeps up when refilling
pub const REFILL_DEPTH: usize = 2;

/// Pending commands beyond this are logged; the worker is falling behind
const COMMAND_BACKLOG_WARN: usize = 25;

/// What to do when the queue runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfQueue {
    /// Top the queue up with random songs
    AutoRefill,
    /// Go idle until someone enqueues something
    Stop,
}

impl FromStr for EndOfQueue {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(EndOfQueue::AutoRefill),
            "stop" => Ok(EndOfQueue::Stop),
            other => Err(AppError::InvalidArgument(format!(
                "unknown end of queue policy '{}', expected 'add' or 'stop'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub end_of_queue: EndOfQueue,
    pub reconnect_interval: Duration,
    /// Wait between queue polls while idle
    pub idle_poll: Duration,
    /// How far the worker may run ahead of real time. `None` leaves pacing
    /// entirely to sink backpressure.
    pub max_lead: Option<Duration>,
    pub refill: RefillSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            end_of_queue: EndOfQueue::AutoRefill,
            reconnect_interval: Duration::from_secs(5),
            idle_poll: Duration::from_millis(500),
            max_lead: Some(Duration::from_secs(2)),
            refill: RefillSettings::default(),
        }
    }
}

/// Collaborators of one worker. Selector, blacklist and tracker are optional;
/// the video worker runs without them.
#[derive(Clone)]
pub struct EngineServices {
    pub queue: Arc<PlaybackQueue>,
    pub catalog: Arc<dyn Catalog>,
    pub opener: Arc<dyn MediaOpener>,
    pub sink: Arc<dyn BroadcastSink>,
    pub selector: Option<Arc<RandomSelector>>,
    pub blacklist: Option<Arc<BlacklistManager>>,
    pub tracker: Option<Arc<RelationshipTracker>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play(bool),
    /// Stop the current entry. Carries the entry that was current when the
    /// command was issued; a skip for an entry that already ended is stale.
    PlayNextSong { entry_id: Option<EntryId> },
}

/// State read by callers and written by the worker
struct Shared {
    kind: MediaKind,
    status: RwLock<EngineStatus>,
    playing: AtomicBool,
    running: AtomicBool,
    backlog: AtomicUsize,
    shutdown: Notify,
    observers: ObserverRegistry,
    refill: RwLock<RefillSettings>,
}

impl Shared {
    fn state(&self) -> StreamState {
        let status = *self.status.read();
        StreamState {
            is_connected: !matches!(status, EngineStatus::Disconnected | EngineStatus::Connecting),
            is_playing: self.playing.load(Ordering::SeqCst),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record the new status; observers hear about it if the public state changed
    fn set_status(&self, status: EngineStatus) {
        let before = self.state();
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            debug!("{} worker: {:?} -> {:?}", self.kind, *current, status);
            *current = status;
        }
        let after = self.state();
        if before != after {
            self.observers.notify(&EngineEvent::StatusChanged(after));
        }
    }
}

pub struct StreamingEngine {
    shared: Arc<Shared>,
    queue: Arc<PlaybackQueue>,
    commands_tx: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<Worker>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingEngine {
    pub fn new(kind: MediaKind, services: EngineServices, settings: EngineSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            kind,
            status: RwLock::new(EngineStatus::Disconnected),
            playing: AtomicBool::new(true),
            running: AtomicBool::new(false),
            backlog: AtomicUsize::new(0),
            shutdown: Notify::new(),
            observers: ObserverRegistry::new(),
            refill: RwLock::new(settings.refill.clone()),
        });

        let queue = services.queue.clone();
        let worker = Worker {
            shared: shared.clone(),
            services,
            settings,
            commands: commands_rx,
        };

        Self {
            shared,
            queue,
            commands_tx,
            worker: Mutex::new(Some(worker)),
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.shared.kind
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    /// Spawn the worker task. A worker can only be started once.
    pub fn start(&self) -> Result<()> {
        let worker = self.worker.lock().take().ok_or_else(|| {
            AppError::InvalidArgument(format!("{} worker already started", self.shared.kind))
        })?;

        self.shared.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(worker.run());
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Ask the worker to finish and wait for it. Returns within about one
    /// frame, or one sink write if the sink is blocking.
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdown.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("{} worker ended abnormally: {}", self.shared.kind, e);
            }
        }
    }

    pub fn get_state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn status(&self) -> EngineStatus {
        *self.shared.status.read()
    }

    /// Stream media (`true`) or silence (`false`). Returns false if the
    /// worker is gone.
    pub fn play(&self, play: bool) -> bool {
        self.send(Command::Play(play))
    }

    /// End the current entry early. The skip is dropped if that entry has
    /// finished by the time the worker gets to it.
    pub fn skip_current(&self) -> bool {
        let entry_id = self.queue.current().map(|e| e.entry_id);
        self.send(Command::PlayNextSong { entry_id })
    }

    pub fn register_observer(&self, observer: Observer) -> ObserverId {
        self.shared.observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.remove(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.observers.subscribe()
    }

    /// Replace the genre filter, constraints and pinned album used for refills
    pub fn set_refill_settings(&self, settings: RefillSettings) {
        *self.shared.refill.write() = settings;
    }

    pub fn refill_settings(&self) -> RefillSettings {
        self.shared.refill.read().clone()
    }

    fn send(&self, command: Command) -> bool {
        let backlog = self.shared.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        if backlog > COMMAND_BACKLOG_WARN {
            warn!(
                "{} worker has {} unprocessed commands",
                self.shared.kind, backlog
            );
        }

        if self.commands_tx.send(command).is_err() {
            self.shared.backlog.fetch_sub(1, Ordering::SeqCst);
            warn!("{} worker is not running, dropping {:?}", self.shared.kind, command);
            return false;
        }
        true
    }
}

/// Result of streaming one entry
enum PlayOutcome {
    Finished(MediaRecord),
    Skipped(MediaRecord),
    /// Media could not be looked up or opened
    Failed,
    Disconnected,
    Stopped,
}

/// Keeps the worker from running further ahead of the wall clock than `lead`
struct Pacer {
    start: Instant,
    streamed: Duration,
    lead: Option<Duration>,
}

impl Pacer {
    fn new(lead: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            streamed: Duration::ZERO,
            lead,
        }
    }

    async fn streamed(&mut self, duration: Duration) {
        self.streamed += duration;
        let Some(lead) = self.lead else {
            return;
        };
        let allowed = self.start.elapsed() + lead;
        if self.streamed > allowed {
            tokio::time::sleep(self.streamed - allowed).await;
        }
    }

    /// Account for time spent waiting instead of streaming
    fn waited(&mut self, duration: Duration) {
        self.streamed += duration;
    }
}

struct Worker {
    shared: Arc<Shared>,
    services: EngineServices,
    settings: EngineSettings,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    async fn run(mut self) {
        let kind = self.shared.kind;
        info!("{} streaming worker started", kind);

        while self.shared.is_running() {
            if !self.services.sink.is_connected().await {
                self.shared.set_status(EngineStatus::Connecting);
                if let Err(e) = self.services.sink.connect().await {
                    warn!("{} sink unavailable, retrying in {:?}: {}", kind, self.settings.reconnect_interval, e);
                    self.shared.set_status(EngineStatus::Disconnected);
                    self.wait(self.settings.reconnect_interval).await;
                    continue;
                }
                let playing = self.shared.playing.load(Ordering::SeqCst);
                self.services.sink.mute(!playing).await;
                self.shared.set_status(EngineStatus::Idle);
            }

            self.refill().await;

            let Some(entry) = self.services.queue.current() else {
                self.shared.set_status(EngineStatus::Idle);
                self.wait(self.settings.idle_poll).await;
                continue;
            };

            match self.play_entry(entry).await {
                PlayOutcome::Finished(media) => self.complete(entry, &media).await,
                PlayOutcome::Skipped(media) => {
                    info!("{} {} skipped", kind, media.id);
                    if let Err(e) = self.services.catalog.increment_stat(media.id, Stat::Skips).await {
                        warn!("Failed to count skip of {}: {}", media.id, e);
                    }
                    self.advance_past(entry.entry_id).await;
                }
                PlayOutcome::Failed => self.advance_past(entry.entry_id).await,
                PlayOutcome::Disconnected => {
                    warn!("{} sink dropped while streaming {}, keeping it queued", kind, entry.media_id);
                    self.shared.set_status(EngineStatus::Disconnected);
                }
                PlayOutcome::Stopped => break,
            }
        }

        if let Err(e) = self.services.sink.disconnect().await {
            warn!("{} sink disconnect failed: {}", kind, e);
        }
        self.shared.set_status(EngineStatus::Disconnected);
        info!("{} streaming worker stopped", kind);
    }

    /// Wait up to `timeout` for a command while not streaming
    async fn wait(&mut self, timeout: Duration) {
        let received = tokio::select! {
            _ = self.shared.shutdown.notified() => return,
            received = tokio::time::timeout(timeout, self.commands.recv()) => received,
        };

        match received {
            Err(_) => {}
            Ok(None) => {
                debug!("{} engine dropped, stopping worker", self.shared.kind);
                self.shared.running.store(false, Ordering::SeqCst);
            }
            Ok(Some(command)) => {
                self.shared.backlog.fetch_sub(1, Ordering::SeqCst);
                match command {
                    Command::Play(play) => self.set_playing(play).await,
                    Command::PlayNextSong { entry_id: Some(id) } => {
                        debug!("Skipping {} while not streaming", id);
                        self.advance_past(id).await;
                    }
                    Command::PlayNextSong { entry_id: None } => debug!("Ignoring skip of an empty queue"),
                }
            }
        }
    }

    fn next_command(&mut self) -> Option<Command> {
        let command = self.commands.try_recv().ok()?;
        self.shared.backlog.fetch_sub(1, Ordering::SeqCst);
        Some(command)
    }

    async fn set_playing(&self, play: bool) {
        self.shared.playing.store(play, Ordering::SeqCst);
        self.services.sink.mute(!play).await;

        let status = *self.shared.status.read();
        if matches!(status, EngineStatus::Streaming | EngineStatus::Muted) {
            let status = if play { EngineStatus::Streaming } else { EngineStatus::Muted };
            *self.shared.status.write() = status;
        }

        info!("{} {}", self.shared.kind, if play { "playing" } else { "muted" });
        self.shared
            .observers
            .notify(&EngineEvent::StatusChanged(self.shared.state()));
    }

    async fn play_entry(&mut self, entry: QueueEntry) -> PlayOutcome {
        let kind = self.shared.kind;

        let media = match self.services.catalog.lookup_media(entry.media_id).await {
            Ok(media) => media,
            Err(e) => {
                error!("Cannot stream {} {}: {}", kind, entry.media_id, e);
                return PlayOutcome::Failed;
            }
        };
        let mut source = match self.services.opener.open(&media).await {
            Ok(source) => source,
            Err(e) => {
                error!("Cannot open {} {} ({}): {}", kind, media.id, media.path.display(), e);
                return PlayOutcome::Failed;
            }
        };

        let frames_per_tick = frames_per_second(source.as_ref());
        let playing = self.shared.playing.load(Ordering::SeqCst);
        self.shared
            .set_status(if playing { EngineStatus::Streaming } else { EngineStatus::Muted });
        info!("Streaming {} {} ({})", kind, media.id, media.path.display());

        let mut pacer = Pacer::new(self.settings.max_lead);
        let mut pending: Option<Frame> = None;
        let mut media_frames: u64 = 0;
        let mut elapsed = Duration::ZERO;

        loop {
            if !self.shared.is_running() {
                return PlayOutcome::Stopped;
            }

            match self.next_command() {
                Some(Command::Play(play)) => self.set_playing(play).await,
                Some(Command::PlayNextSong { entry_id }) => {
                    if entry_id == Some(entry.entry_id) {
                        return PlayOutcome::Skipped(media);
                    }
                    debug!("Ignoring stale skip for {:?}", entry_id);
                }
                None => {}
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => match source.next_frame().await {
                    Some(frame) => frame,
                    None => return PlayOutcome::Finished(media),
                },
            };

            if self.shared.playing.load(Ordering::SeqCst) {
                if let Err(e) = self.services.sink.stream_chunk(&frame.data).await {
                    debug!("Frame write failed: {}", e);
                    return PlayOutcome::Disconnected;
                }
                pacer.streamed(frame.duration).await;

                media_frames += 1;
                elapsed += frame.duration;
                if media_frames % frames_per_tick == 0 {
                    self.shared.observers.notify(&EngineEvent::TimeChanged {
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
            } else {
                // Muted: fill the frame slot with silence, keep the frame for later
                match source.silence(&frame) {
                    Some(silence) => {
                        if let Err(e) = self.services.sink.stream_chunk(&silence.data).await {
                            debug!("Silence write failed: {}", e);
                            return PlayOutcome::Disconnected;
                        }
                        pacer.streamed(silence.duration).await;
                    }
                    None => {
                        tokio::time::sleep(frame.duration).await;
                        pacer.waited(frame.duration);
                    }
                }
                pending = Some(frame);
            }
        }
    }

    async fn complete(&self, entry: QueueEntry, media: &MediaRecord) {
        info!("Finished {} {}", self.shared.kind, media.id);

        if let Some(tracker) = &self.services.tracker {
            if let Err(e) = tracker.new_song(media.id).await {
                warn!("Relationship tracking failed for {}: {}", media.id, e);
            }
        }

        if let Err(e) = self
            .services
            .catalog
            .set_last_played(media.id, Utc::now().timestamp())
            .await
        {
            warn!("Failed to update last played of {}: {}", media.id, e);
        }

        if let Some(blacklist) = self.services.blacklist.clone() {
            let (song, album, artist) = (media.id, media.album_id, media.artist_id);
            if let Err(e) = persisting(move || blacklist.push(song, album, artist)).await {
                warn!("Failed to blacklist {}: {}", media.id, e);
            }
        }

        self.advance_past(entry.entry_id).await;
    }

    /// Advance the queue if `entry_id` is still the current entry
    async fn advance_past(&self, entry_id: EntryId) {
        let queue = self.services.queue.clone();
        let advanced = persisting(move || {
            queue.transaction(|queue| {
                if queue.current().map(|e| e.entry_id) == Some(entry_id) {
                    queue.advance();
                }
            })
        })
        .await;
        if let Err(e) = advanced {
            error!("Failed to advance the {} queue: {}", self.shared.kind, e);
        }
    }

    async fn refill(&self) {
        if self.settings.end_of_queue != EndOfQueue::AutoRefill {
            return;
        }
        let Some(selector) = &self.services.selector else {
            return;
        };

        let settings = self.shared.refill.read().clone();
        while self.services.queue.len() < REFILL_DEPTH {
            let queued: HashSet<MediaId> = self
                .services
                .queue
                .snapshot()
                .iter()
                .map(|e| e.media_id)
                .collect();
            let media_id = match selector.get_song_with(&settings, &queued).await {
                Ok(media_id) => media_id,
                Err(AppError::EmptyCandidatePool) => {
                    debug!("Nothing eligible for random refill");
                    return;
                }
                Err(e) => {
                    warn!("Random refill failed: {}", e);
                    return;
                }
            };

            let queue = self.services.queue.clone();
            let enqueued =
                persisting(move || queue.enqueue_entry(media_id, QueuePosition::Last, true)).await;
            if let Err(e) = enqueued {
                error!("Failed to queue random pick {}: {}", media_id, e);
                return;
            }
            if let Err(e) = self
                .services
                .catalog
                .increment_stat(media_id, Stat::RandomAdds)
                .await
            {
                warn!("Failed to count random add of {}: {}", media_id, e);
            }
        }
    }
}

/// Queue and blacklist mutations write their snapshot to disk
async fn persisting<T, F>(mutation: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(mutation)
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

/// Frames per second of media, at least 1
fn frames_per_second(source: &dyn FrameSource) -> u64 {
    let frame = source.frame_duration();
    if frame.is_zero() {
        return 1;
    }
    (Duration::from_secs(1).as_secs_f64() / frame.as_secs_f64())
        .round()
        .max(1.0) as u64
}
