//! Shared data model passed between the detection pipeline and its readers.
//!
//! Rows flow in as [`RawRecord`]s, decode into [`DecodedTrack`]s, and leave
//! the pipeline as [`PlaybackEvent`]s collected in a [`PublishedState`].

use std::collections::BTreeMap;

/// Placeholder used for any field the blob decoder could not recover.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Number of past events retained in [`PublishedState::history`].
pub const HISTORY_CAPACITY: usize = 10;

/// One row read from the media library database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub row_id: i64,
    pub collection: String,
    pub payload: Vec<u8>,
}

/// Point-in-time capture of the watched rows, keyed by row id.
pub type Snapshot = BTreeMap<i64, RawRecord>;

/// Track metadata recovered from a history blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrack {
    pub artist: String,
    pub title: String,
    /// Raw `originSourceID` value, e.g. a streaming service name or `explorer`.
    pub source_id: String,
}

impl DecodedTrack {
    /// Normalized identity used for dedup and path lookups.
    pub fn identity(&self) -> TrackIdentity {
        TrackIdentity::new(&self.artist, &self.title)
    }

    /// `"artist - title"`, the string the dedup window compares.
    pub fn display_string(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Trimmed, case-sensitive `(artist, title)` lookup key.
///
/// Fields are private so every key goes through [`TrackIdentity::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackIdentity {
    artist: String,
    title: String,
}

impl TrackIdentity {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
        }
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Kind of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Idle/startup placeholder.
    Info,
    /// A detected playback on deck.
    Playing,
    /// Reserved for pre-listen detection. Nothing produces it yet.
    #[allow(dead_code)]
    Preview,
}

/// Published state unit, serialized as-is for the overlay page.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlaybackEvent {
    pub artist: String,
    pub title: String,
    pub source: Option<String>,
    pub status: String,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub has_artwork: bool,
    /// Unix seconds of the cover write; the overlay uses it to bust its image cache.
    pub artwork_ts: u64,
}

impl PlaybackEvent {
    /// The sentinel shown before anything has been detected.
    pub fn idle() -> Self {
        Self {
            artist: "-".to_string(),
            title: "Waiting for playback...".to_string(),
            source: None,
            status: "Ready".to_string(),
            timestamp: String::new(),
            event_type: EventType::Info,
            has_artwork: false,
            artwork_ts: 0,
        }
    }

    /// Builds a `playing` event, applying the source display policy.
    pub fn playing(
        track: &DecodedTrack,
        has_artwork: bool,
        timestamp: String,
        artwork_ts: u64,
    ) -> Self {
        Self {
            artist: track.artist.clone(),
            title: track.title.clone(),
            source: display_source(&track.source_id),
            status: "Playing".to_string(),
            timestamp,
            event_type: EventType::Playing,
            has_artwork,
            artwork_ts,
        }
    }
}

/// `explorer` marks a manual file load in djay and is never shown.
pub fn display_source(raw_source: &str) -> Option<String> {
    if raw_source.eq_ignore_ascii_case("explorer") {
        None
    } else {
        Some(raw_source.to_string())
    }
}

/// Current track plus newest-first history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublishedState {
    pub current: PlaybackEvent,
    pub history: Vec<PlaybackEvent>,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            current: PlaybackEvent::idle(),
            history: Vec::new(),
        }
    }
}
