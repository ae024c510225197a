use hdrhistogram::Histogram;
use std::time::{Duration, Instant};

use super::circular_buffer::CircularBuffer;
use super::types::{Version, WatcherStats};

const MAX_RECENT_ERRORS: usize = 32;
const MAX_ERROR_TEXT_BYTES: usize = 1024;

fn truncate_string(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }

    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Per-handle delivery counters and poll latency distribution.
#[derive(Debug)]
pub struct WatcherHealth {
    started: Instant,
    polls: u64,
    poll_failures: u64,
    pushed: u64,
    admitted: u64,
    stale_dropped: u64,
    errors: u64,
    demotions: u64,
    last_delivered: Option<Version>,
    recent_errors: CircularBuffer<String>,
    poll_latency: Option<Histogram<u64>>,
}

impl Default for WatcherHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherHealth {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            polls: 0,
            poll_failures: 0,
            pushed: 0,
            admitted: 0,
            stale_dropped: 0,
            errors: 0,
            demotions: 0,
            last_delivered: None,
            recent_errors: CircularBuffer::new(MAX_RECENT_ERRORS),
            // 1us..10min at 3 significant digits; bounds are static so this cannot fail.
            poll_latency: Histogram::new_with_bounds(1, 600_000_000, 3).ok(),
        }
    }

    pub fn record_poll(&mut self, latency: Duration) {
        self.polls = self.polls.saturating_add(1);
        if let Some(hist) = self.poll_latency.as_mut() {
            let micros = latency.as_micros().clamp(1, u64::MAX as u128) as u64;
            let _ = hist.record(micros);
        }
    }

    pub fn record_poll_failure(&mut self) {
        self.poll_failures = self.poll_failures.saturating_add(1);
    }

    pub fn record_pushed(&mut self) {
        self.pushed = self.pushed.saturating_add(1);
    }

    pub fn record_admitted(&mut self, version: Version) {
        self.admitted = self.admitted.saturating_add(1);
        self.last_delivered = Some(version);
    }

    pub fn record_stale(&mut self) {
        self.stale_dropped = self.stale_dropped.saturating_add(1);
    }

    pub fn record_error(&mut self, message: &str) {
        self.errors = self.errors.saturating_add(1);
        self.recent_errors.push(truncate_string(message));
    }

    pub fn record_demotion(&mut self) {
        self.demotions = self.demotions.saturating_add(1);
    }

    pub fn last_delivered(&self) -> Option<Version> {
        self.last_delivered
    }

    pub fn get_stats(&self) -> WatcherStats {
        let (p50, p99) = match self.poll_latency.as_ref() {
            Some(hist) if hist.len() > 0 => (
                hist.value_at_percentile(50.0),
                hist.value_at_percentile(99.0),
            ),
            _ => (0, 0),
        };

        WatcherStats {
            uptime: self.started.elapsed(),
            polls: self.polls,
            poll_failures: self.poll_failures,
            pushed: self.pushed,
            admitted: self.admitted,
            stale_dropped: self.stale_dropped,
            errors: self.errors,
            demotions: self.demotions,
            last_delivered: self.last_delivered,
            p50_poll_latency_us: p50,
            p99_poll_latency_us: p99,
            recent_errors: self.recent_errors.to_vec(),
        }
    }
}
