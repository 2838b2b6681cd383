//! Short-window duplicate suppression.
//!
//! A single load in djay can write several history rows within a burst. Any
//! `"artist - title"` seen within the window is dropped; the same track played
//! again minutes later is a new detection.

use std::time::{Duration, Instant};

pub const DEDUP_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    recent: Vec<(String, Instant)>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW)
    }
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: Vec::new(),
        }
    }

    pub fn admit(&mut self, candidate: &str) -> bool {
        self.admit_at(candidate, Instant::now())
    }

    /// Suppressed candidates keep their original timestamp; a burst cannot
    /// extend its own window.
    pub fn admit_at(&mut self, candidate: &str, now: Instant) -> bool {
        let window = self.window;
        self.recent
            .retain(|(_, detected_at)| now.saturating_duration_since(*detected_at) < window);

        if self.recent.iter().any(|(track, _)| track == candidate) {
            return false;
        }
        self.recent.push((candidate.to_string(), now));
        true
    }
}
