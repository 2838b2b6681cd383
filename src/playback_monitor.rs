//! Background worker that turns library writes into published playback events.
//!
//! One tick: snapshot the history collections, diff against the previous
//! snapshot, decode the new rows, drop burst duplicates, extract artwork and
//! publish. Nothing in a tick is fatal; an unreadable database just means the
//! tick produced nothing.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::artwork_resolver::ArtworkResolver;
use crate::blob_decoder;
use crate::change_detector::ChangeDetector;
use crate::dedup::Deduplicator;
use crate::protocol::PlaybackEvent;
use crate::snapshot_poller::SnapshotPoller;
use crate::state_publisher::StatePublisher;

/// Receives one human-readable line per accepted detection.
pub type ActivityLog = Box<dyn Fn(&str) + Send>;

pub struct PlaybackMonitor {
    poller: SnapshotPoller,
    detector: ChangeDetector,
    dedup: Deduplicator,
    artwork: ArtworkResolver,
    publisher: Arc<StatePublisher>,
    activity_log: ActivityLog,
    poll_interval: Duration,
}

fn local_clock_time() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

impl PlaybackMonitor {
    pub fn new(
        poller: SnapshotPoller,
        artwork: ArtworkResolver,
        publisher: Arc<StatePublisher>,
        activity_log: ActivityLog,
        poll_interval: Duration,
    ) -> Self {
        Self {
            poller,
            detector: ChangeDetector::new(),
            dedup: Deduplicator::default(),
            artwork,
            publisher,
            activity_log,
            poll_interval,
        }
    }

    /// Builds the artwork index and records the baseline snapshot.
    ///
    /// If the baseline poll fails, the first successful tick becomes the
    /// baseline instead.
    pub fn prime(&mut self) {
        info!("Monitor thread started");
        if self.artwork.is_enabled() {
            let indexed = self.artwork.rebuild_index();
            (self.activity_log)(&format!("Loaded {} file paths for artwork.", indexed));
        } else {
            info!("Artwork extraction disabled");
        }

        match self.poller.poll() {
            Ok(snapshot) => {
                self.detector.observe(snapshot);
            }
            Err(err) => debug!("Baseline poll failed, retrying next tick: {}", err),
        }
    }

    /// Runs one pipeline pass and returns how many events were published.
    pub fn tick(&mut self) -> usize {
        let snapshot = match self.poller.poll() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!("Media library unavailable this tick: {}", err);
                return 0;
            }
        };

        if !self.detector.has_baseline() {
            debug!("Baseline snapshot recorded with {} rows", snapshot.len());
        }
        let mut published = 0;
        for record in self.detector.observe(snapshot) {
            let Some(track) = blob_decoder::decode_track(&record.payload) else {
                continue;
            };
            let display = track.display_string();
            if !self.dedup.admit(&display) {
                debug!("Suppressed repeat detection: {}", display);
                continue;
            }

            let has_artwork = self.artwork.resolve(&track.identity());
            let event = PlaybackEvent::playing(
                &track,
                has_artwork,
                local_clock_time(),
                if has_artwork { unix_seconds() } else { 0 },
            );
            let line = format!(
                "[{}] Detected: {} (ON AIR) [Source: {}] [Art: {}]",
                event.timestamp,
                display,
                track.source_id,
                if has_artwork { "Yes" } else { "No" }
            );
            self.publisher.apply(event);
            (self.activity_log)(&line);
            published += 1;
        }
        published
    }

    /// Primes, then ticks every poll interval until `stop_rx` receives a
    /// message or its sender is dropped.
    pub fn run(mut self, stop_rx: Receiver<()>) {
        self.prime();
        loop {
            match stop_rx.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.tick();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Monitor thread stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityLog, PlaybackMonitor};
    use crate::artwork_resolver::ArtworkResolver;
    use crate::blob_decoder::encode_fixture_blob;
    use crate::config::PathStyle;
    use crate::cover_art::CoverArtReader;
    use crate::media_library_db::fixture::FixtureLibrary;
    use crate::media_library_db::{MediaLibraryDb, MediaLibrarySource};
    use crate::path_index::PathIndex;
    use crate::protocol::{EventType, RawRecord};
    use crate::snapshot_poller::SnapshotPoller;
    use crate::state_publisher::StatePublisher;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const HISTORY: &str = "historySessionItems";
    const LOCATIONS: &str = "localMediaItemLocations";

    struct Harness {
        monitor: PlaybackMonitor,
        publisher: Arc<StatePublisher>,
        lines: Arc<Mutex<Vec<String>>>,
    }

    fn harness_with(
        source: Arc<dyn MediaLibrarySource>,
        reader: Option<Box<dyn CoverArtReader>>,
        cover_path: PathBuf,
    ) -> Harness {
        let publisher = Arc::new(StatePublisher::new());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let activity_log: ActivityLog = Box::new(move |line: &str| {
            sink.lock().expect("log sink lock").push(line.to_string());
        });
        let artwork = ArtworkResolver::new(
            Arc::clone(&source),
            PathIndex::new(LOCATIONS, PathStyle::Posix),
            reader,
            cover_path,
        );
        let monitor = PlaybackMonitor::new(
            SnapshotPoller::new(source, vec![HISTORY.to_string()]),
            artwork,
            Arc::clone(&publisher),
            activity_log,
            Duration::from_millis(20),
        );
        Harness {
            monitor,
            publisher,
            lines,
        }
    }

    fn harness(fixture: &FixtureLibrary) -> Harness {
        harness_with(
            Arc::new(MediaLibraryDb::new(
                fixture.path.clone(),
                Duration::from_millis(200),
            )),
            None,
            std::env::temp_dir().join("deckwatch_monitor_unused_cover.jpg"),
        )
    }

    /// Answers history polls from a script, one entry per poll, and counts
    /// location queries.
    struct ScriptedLibrary {
        polls: Mutex<Vec<Result<Vec<RawRecord>, String>>>,
        locations: Vec<Vec<u8>>,
        location_queries: AtomicUsize,
    }

    impl ScriptedLibrary {
        fn new(polls: Vec<Result<Vec<RawRecord>, String>>, locations: Vec<Vec<u8>>) -> Self {
            Self {
                polls: Mutex::new(polls),
                locations,
                location_queries: AtomicUsize::new(0),
            }
        }
    }

    impl MediaLibrarySource for ScriptedLibrary {
        fn rows_in_collections(&self, _collections: &[String]) -> Result<Vec<RawRecord>, String> {
            let mut polls = self.polls.lock().expect("script lock");
            if polls.is_empty() {
                return Err("script exhausted".to_string());
            }
            polls.remove(0)
        }

        fn payloads_in_collection(&self, _collection: &str) -> Result<Vec<Vec<u8>>, String> {
            self.location_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.locations.clone())
        }
    }

    struct CountingCover {
        image: Vec<u8>,
        reads: Arc<AtomicUsize>,
    }

    impl CoverArtReader for CountingCover {
        fn read_cover(&self, _path: &Path) -> Option<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Some(self.image.clone())
        }
    }

    fn record(row_id: i64, payload: Vec<u8>) -> RawRecord {
        RawRecord {
            row_id,
            collection: HISTORY.to_string(),
            payload,
        }
    }

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("deckwatch_{name}_{nonce}"));
        fs::create_dir_all(&dir).expect("fixture dir should be creatable");
        dir
    }

    fn history_blob(artist: &str, title: &str, source_id: &str) -> Vec<u8> {
        encode_fixture_blob(&[
            artist,
            "artist",
            title,
            "title",
            source_id,
            "originSourceID",
        ])
    }

    #[test]
    fn test_new_history_row_is_published() {
        let fixture = FixtureLibrary::create("monitor_publish");
        let mut h = harness(&fixture);
        h.monitor.prime();

        fixture.insert(HISTORY, &history_blob("Moderat", "Bad Kingdom", "Spotify"));
        assert_eq!(h.monitor.tick(), 1);

        let state = h.publisher.snapshot();
        assert_eq!(state.current.artist, "Moderat");
        assert_eq!(state.current.title, "Bad Kingdom");
        assert_eq!(state.current.source.as_deref(), Some("Spotify"));
        assert_eq!(state.current.event_type, EventType::Playing);
        assert!(!state.current.has_artwork);
        assert_eq!(state.current.artwork_ts, 0);
        assert_eq!(state.history.len(), 1);

        let lines = h.lines.lock().expect("log sink lock");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(
            "Detected: Moderat - Bad Kingdom (ON AIR) [Source: Spotify] [Art: No]"
        ));
    }

    #[test]
    fn test_rows_present_at_startup_are_not_replayed() {
        let fixture = FixtureLibrary::create("monitor_baseline");
        fixture.insert(HISTORY, &history_blob("Old Artist", "Old Title", "Spotify"));
        let mut h = harness(&fixture);
        h.monitor.prime();

        assert_eq!(h.monitor.tick(), 0);
        assert_eq!(h.publisher.snapshot().current.event_type, EventType::Info);
        assert!(h.lines.lock().expect("log sink lock").is_empty());
    }

    #[test]
    fn test_burst_of_duplicate_rows_publishes_once() {
        let fixture = FixtureLibrary::create("monitor_burst");
        let mut h = harness(&fixture);
        h.monitor.prime();

        fixture.insert(HISTORY, &history_blob("Burial", "Archangel", "Beatport"));
        fixture.insert(HISTORY, &history_blob("Burial", "Archangel", "Beatport"));
        assert_eq!(h.monitor.tick(), 1);
        fixture.insert(HISTORY, &history_blob("Burial", "Archangel", "Beatport"));
        assert_eq!(h.monitor.tick(), 0);

        assert_eq!(h.publisher.snapshot().history.len(), 1);
    }

    #[test]
    fn test_explorer_source_is_published_without_source() {
        let fixture = FixtureLibrary::create("monitor_explorer");
        let mut h = harness(&fixture);
        h.monitor.prime();

        fixture.insert(HISTORY, &history_blob("Floating Points", "Silhouettes", "explorer"));
        assert_eq!(h.monitor.tick(), 1);

        let state = h.publisher.snapshot();
        assert_eq!(state.current.source, None);
        let lines = h.lines.lock().expect("log sink lock");
        assert!(lines[0].contains("[Source: explorer]"));
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let fixture = FixtureLibrary::create("monitor_undecodable");
        let mut h = harness(&fixture);
        h.monitor.prime();

        fixture.insert(HISTORY, b"\x00\x01\x02");
        fixture.insert(HISTORY, &history_blob("Four Tet", "Baby", "Tidal"));
        assert_eq!(h.monitor.tick(), 1);
        assert_eq!(h.publisher.snapshot().current.title, "Baby");
    }

    #[test]
    fn test_run_stops_when_signalled() {
        let fixture = FixtureLibrary::create("monitor_run");
        let h = harness(&fixture);
        let publisher = Arc::clone(&h.publisher);
        let (stop_tx, stop_rx) = mpsc::channel();

        let worker = thread::spawn(move || h.monitor.run(stop_rx));
        thread::sleep(Duration::from_millis(100));
        fixture.insert(HISTORY, &history_blob("Jon Hopkins", "Emerald Rush", "Spotify"));

        let mut published = false;
        for _ in 0..100 {
            if publisher.snapshot().current.title == "Emerald Rush" {
                published = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        stop_tx.send(()).expect("worker should be listening");
        worker.join().expect("worker should exit cleanly");
        assert!(published);
    }

    #[test]
    fn test_failed_polls_neither_set_nor_reset_the_baseline() {
        let old = || record(1, history_blob("Old Artist", "Old Title", "Spotify"));
        let source = Arc::new(ScriptedLibrary::new(
            vec![
                Err("database is locked".to_string()),
                Ok(vec![old()]),
                Err("database is locked".to_string()),
                Ok(vec![
                    old(),
                    record(2, history_blob("New Artist", "New Title", "Tidal")),
                ]),
            ],
            Vec::new(),
        ));
        let mut h = harness_with(
            source,
            None,
            std::env::temp_dir().join("deckwatch_monitor_unused_cover.jpg"),
        );

        h.monitor.prime();
        assert_eq!(h.monitor.tick(), 0, "first successful poll is the baseline");
        assert_eq!(h.monitor.tick(), 0, "a failed poll publishes nothing");
        assert_eq!(h.monitor.tick(), 1);

        let state = h.publisher.snapshot();
        assert_eq!(state.current.title, "New Title");
        assert_eq!(state.history.len(), 1);
        let lines = h.lines.lock().expect("log sink lock");
        assert!(lines.iter().all(|line| !line.contains("Old Title")));
    }

    #[test]
    fn test_artwork_pipeline_publishes_cover_and_skips_suppressed_rows() {
        let dir = unique_temp_dir("monitor_artwork");
        let media = dir.join("Glue.mp3");
        fs::write(&media, b"audio").expect("media fixture should be writable");
        let cover_path = dir.join("current_cover.jpg");
        let uri = format!("file://{}", media.display());

        let track = || history_blob("Bicep", "Glue", "Beatport");
        let source = Arc::new(ScriptedLibrary::new(
            vec![
                Ok(Vec::new()),
                Ok(vec![record(1, track()), record(2, track())]),
                Ok(vec![record(1, track()), record(2, track()), record(3, track())]),
            ],
            vec![encode_fixture_blob(&["Bicep", "artist", "Glue", "title", &uri])],
        ));
        let reads = Arc::new(AtomicUsize::new(0));
        let reader = CountingCover {
            image: b"\xff\xd8cover".to_vec(),
            reads: Arc::clone(&reads),
        };
        let mut h = harness_with(
            Arc::clone(&source) as Arc<dyn MediaLibrarySource>,
            Some(Box::new(reader)),
            cover_path.clone(),
        );

        h.monitor.prime();
        assert_eq!(h.monitor.tick(), 1);
        assert_eq!(h.monitor.tick(), 0);

        let state = h.publisher.snapshot();
        assert!(state.current.has_artwork);
        assert!(state.current.artwork_ts > 0);
        assert_eq!(
            fs::read(&cover_path).expect("cover should be written"),
            b"\xff\xd8cover".to_vec()
        );
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(source.location_queries.load(Ordering::SeqCst), 1);

        let lines = h.lines.lock().expect("log sink lock");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Loaded 1 file paths for artwork.");
        assert!(lines[1]
            .ends_with("Detected: Bicep - Glue (ON AIR) [Source: Beatport] [Art: Yes]"));
        drop(lines);

        fs::remove_dir_all(dir).expect("fixture should be removable");
    }

    #[test]
    fn test_deleted_rows_are_not_detections() {
        let fixture = FixtureLibrary::create("monitor_deleted");
        let first = fixture.insert(HISTORY, &history_blob("Kelly Lee Owens", "Melt", "Tidal"));
        fixture.insert(HISTORY, &history_blob("Caribou", "Sun", "Spotify"));
        let mut h = harness(&fixture);
        h.monitor.prime();

        fixture.delete(first);
        assert_eq!(h.monitor.tick(), 0);
        fixture.insert(HISTORY, &history_blob("Daphni", "Cherry", "Spotify"));
        assert_eq!(h.monitor.tick(), 1);
        assert_eq!(h.publisher.snapshot().history.len(), 1);
    }
}
