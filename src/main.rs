mod artwork_resolver;
mod blob_decoder;
mod change_detector;
mod config;
mod cover_art;
mod dedup;
mod media_library_db;
mod path_index;
mod playback_monitor;
mod protocol;
mod snapshot_poller;
mod state_publisher;
mod state_server;

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::artwork_resolver::ArtworkResolver;
use crate::config::{
    config_file_path, load_or_create_config, resolve_cover_path, resolve_db_path, Config,
};
use crate::cover_art::{CoverArtReader, LoftyCoverArtReader};
use crate::media_library_db::{MediaLibraryDb, MediaLibrarySource};
use crate::path_index::PathIndex;
use crate::playback_monitor::PlaybackMonitor;
use crate::snapshot_poller::SnapshotPoller;
use crate::state_publisher::StatePublisher;
use crate::state_server::{ServerContext, StateServer};

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn build_artwork_resolver(
    config: &Config,
    source: Arc<dyn MediaLibrarySource>,
    cover_path: PathBuf,
) -> ArtworkResolver {
    let reader: Option<Box<dyn CoverArtReader>> = if config.artwork.enabled {
        Some(Box::new(LoftyCoverArtReader))
    } else {
        None
    };
    ArtworkResolver::new(
        source,
        PathIndex::new(
            config.source.locations_collection.clone(),
            config.artwork.path_style,
        ),
        reader,
        cover_path,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.parse_default_env();
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = config_file_path().ok_or("Could not determine the config directory")?;
    let config = load_or_create_config(&config_file)?;

    let db_path = resolve_db_path(&config).ok_or(
        "djay media library not found. Set [source] db_path in the config file.",
    )?;
    let library_db = MediaLibraryDb::new(
        db_path,
        Duration::from_millis(config.source.query_timeout_ms),
    );
    info!("Watching media library {}", library_db.path().display());
    let source: Arc<dyn MediaLibrarySource> = Arc::new(library_db);

    let cover_path = resolve_cover_path(&config)
        .unwrap_or_else(|| std::env::temp_dir().join("deckwatch").join("current_cover.jpg"));
    let artwork = build_artwork_resolver(&config, Arc::clone(&source), cover_path);
    if artwork.is_enabled() {
        info!("Cover art will be written to {}", artwork.cover_path().display());
    }
    let served_cover = artwork.is_enabled().then(|| artwork.cover_path().to_path_buf());

    let publisher = Arc::new(StatePublisher::new());
    let monitor = PlaybackMonitor::new(
        SnapshotPoller::new(Arc::clone(&source), config.source.history_collections.clone()),
        artwork,
        Arc::clone(&publisher),
        Box::new(|line: &str| info!("{}", line)),
        Duration::from_millis(config.source.poll_interval_ms),
    );

    let server = StateServer::bind(
        &config.server.bind_address,
        config.server.port,
        ServerContext {
            publisher,
            display: config.display.clone(),
            cover_path: served_cover,
        },
    )?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let monitor_handle = thread::Builder::new()
        .name("playback-monitor".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                monitor.run(stop_rx);
            }));
            if let Err(payload) = run_result {
                log::error!(
                    "Monitor thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    server.run();

    warn!("State server stopped; shutting down monitor");
    let _ = stop_tx.send(());
    if monitor_handle.join().is_err() {
        warn!("Monitor thread did not shut down cleanly");
    }
    Ok(())
}
