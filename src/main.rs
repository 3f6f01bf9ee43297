use musicdb_stream::config::Config;
use musicdb_stream::db;
use musicdb_stream::models::{EngineEvent, MediaKind};
use musicdb_stream::services::{
    BlacklistManager, EndOfQueue, EngineServices, FileOpener, JsonStateStore, PlaybackQueue,
    RandomSelector, RelationshipTracker, SqliteCatalog, SqliteRelationStore, StateStore,
    StreamingEngine, TcpSink,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,musicdb_stream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let db = db::connect(&config.database_url).await?;

    let state: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(&config.state_dir)?);
    tracing::info!("Persisting playback state in {}", config.state_dir.display());

    let mut engines = vec![audio_engine(&config, db.clone(), state.clone())?];
    match &config.video_sink_addr {
        Some(addr) => engines.push(video_engine(&config, addr, db.clone(), state.clone())),
        None => tracing::info!("VIDEO_SINK_ADDR not set, video streaming disabled"),
    }

    for engine in &engines {
        let kind = engine.kind();
        engine.register_observer(Arc::new(move |event: &EngineEvent| match event {
            EngineEvent::StatusChanged(state) => tracing::info!(
                "{} stream: connected={} playing={}",
                kind,
                state.is_connected,
                state.is_playing
            ),
            EngineEvent::TimeChanged { elapsed_ms } => {
                tracing::trace!("{} stream at {}ms", kind, elapsed_ms)
            }
        }));
        engine.start()?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    for engine in &engines {
        engine.stop().await;
    }
    db.close().await;

    Ok(())
}

fn audio_engine(
    config: &Config,
    db: sqlx::SqlitePool,
    state: Arc<dyn StateStore>,
) -> anyhow::Result<StreamingEngine> {
    let catalog = Arc::new(SqliteCatalog::new(db.clone(), MediaKind::Audio));
    let blacklist = Arc::new(BlacklistManager::load(config.blacklist.clone(), state.clone())?);

    let tracker = config.tracker_enabled.then(|| {
        Arc::new(RelationshipTracker::new(
            config.tracker_idle_timeout,
            catalog.clone(),
            Arc::new(SqliteRelationStore::new(db)),
        ))
    });

    let selector = match config.end_of_queue {
        EndOfQueue::AutoRefill => {
            if config.genre_filter.is_empty() {
                tracing::warn!("END_OF_QUEUE=add without GENRE_FILTER, random refill will find nothing");
            }
            Some(Arc::new(RandomSelector::new(catalog.clone(), Some(blacklist.clone()))))
        }
        EndOfQueue::Stop => None,
    };

    let services = EngineServices {
        queue: Arc::new(PlaybackQueue::load(MediaKind::Audio, state)),
        catalog,
        opener: Arc::new(FileOpener::new(&config.media_root, MediaKind::Audio)),
        sink: Arc::new(TcpSink::new(config.audio_sink_addr.clone())),
        selector,
        blacklist: Some(blacklist),
        tracker,
    };

    Ok(StreamingEngine::new(
        MediaKind::Audio,
        services,
        config.engine_settings(),
    ))
}

fn video_engine(
    config: &Config,
    addr: &str,
    db: sqlx::SqlitePool,
    state: Arc<dyn StateStore>,
) -> StreamingEngine {
    let mut settings = config.engine_settings();
    settings.end_of_queue = EndOfQueue::Stop;

    let services = EngineServices {
        queue: Arc::new(PlaybackQueue::load(MediaKind::Video, state)),
        catalog: Arc::new(SqliteCatalog::new(db, MediaKind::Video)),
        opener: Arc::new(FileOpener::new(&config.media_root, MediaKind::Video)),
        sink: Arc::new(TcpSink::new(addr)),
        selector: None,
        blacklist: None,
        tracker: None,
    };

    StreamingEngine::new(MediaKind::Video, services, settings)
}
