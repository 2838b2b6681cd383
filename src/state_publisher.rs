//! Owner of the shared "now playing" state.
//!
//! The pipeline worker is the only writer; the state server reads many times a
//! second. Each publish builds a complete new [`PublishedState`] and swaps the
//! pointer, so the lock is held only for a pointer copy and readers always see
//! `current` and the head of `history` from the same publish.

use std::sync::{Arc, RwLock};

use crate::protocol::{PlaybackEvent, PublishedState, HISTORY_CAPACITY};

#[derive(Debug, Default)]
pub struct StatePublisher {
    state: RwLock<Arc<PublishedState>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `event` current and prepends it to history, dropping the oldest
    /// entries beyond capacity.
    pub fn apply(&self, event: PlaybackEvent) {
        let previous = self.snapshot();
        let mut history = Vec::with_capacity(HISTORY_CAPACITY);
        history.push(event.clone());
        history.extend(
            previous
                .history
                .iter()
                .take(HISTORY_CAPACITY - 1)
                .cloned(),
        );
        let next = Arc::new(PublishedState {
            current: event,
            history,
        });

        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = next;
    }

    /// Immutable view of the latest publish.
    pub fn snapshot(&self) -> Arc<PublishedState> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(&state)
    }
}
