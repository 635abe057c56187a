use std::time::Duration;

use crate::communication::correlator::MessageCorrelator;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Holds refreshes off for a fixed window after a local mutation, so the
/// echo of our own write does not roll back the optimistic view.
///
/// This is a timing heuristic: the window is assumed to exceed the store's
/// round-trip time.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    window_ms: u64,
    last_mutation: Option<u64>,
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            last_mutation: None,
        }
    }

    pub fn mark_local_mutation(&mut self, now: u64) {
        self.last_mutation = Some(now);
    }

    pub fn should_suppress_refresh(&self, now: u64, correlator: &MessageCorrelator) -> bool {
        let Some(last) = self.last_mutation else {
            return false;
        };
        now.saturating_sub(last) < self.window_ms && correlator.has_sent()
    }

    /// Time left until the window closes, if it is still open.
    pub fn reopens_in(&self, now: u64) -> Option<Duration> {
        let last = self.last_mutation?;
        let left = (last + self.window_ms).checked_sub(now)?;
        (left > 0).then(|| Duration::from_millis(left))
    }

    pub fn last_mutation(&self) -> Option<u64> {
        self.last_mutation
    }
}
