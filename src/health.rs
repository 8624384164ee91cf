use std::time::Duration;

use log::warn;

use crate::types::{SourceId, SourceMask};

/// Per-source freshness tracking, driven by sample timestamps rather than
/// wall-clock arrival so replayed logs behave like live hardware.
#[derive(Clone, Debug)]
pub struct SourceHealth {
    pub source: SourceId,
    stale_after: Duration,
    last_seen_ns: Option<u64>,
    restart_attempts: u32,
    max_restart_attempts: u32,
}

impl SourceHealth {
    pub fn new(source: SourceId, stale_after: Duration, max_restart_attempts: u32) -> Self {
        Self {
            source,
            stale_after,
            last_seen_ns: None,
            restart_attempts: 0,
            max_restart_attempts,
        }
    }

    /// Record a reading; also clears the restart counter since the source
    /// is evidently alive again.
    pub fn record(&mut self, timestamp_ns: u64) {
        self.last_seen_ns = Some(timestamp_ns);
        self.restart_attempts = 0;
    }

    pub fn last_seen_ns(&self) -> Option<u64> {
        self.last_seen_ns
    }

    /// Stale means "has produced data before, but not recently". A source
    /// that has never produced anything is absent, not stale.
    pub fn is_stale(&self, now_ns: u64) -> bool {
        match self.last_seen_ns {
            Some(last) => {
                let age_ns = now_ns.saturating_sub(last);
                age_ns > self.stale_after.as_nanos() as u64
            }
            None => false,
        }
    }

    pub fn silence(&self, now_ns: u64) -> Option<Duration> {
        self.last_seen_ns
            .map(|last| Duration::from_nanos(now_ns.saturating_sub(last)))
    }

    pub fn can_restart(&self) -> bool {
        self.restart_attempts < self.max_restart_attempts
    }

    pub fn note_restart(&mut self) {
        self.restart_attempts += 1;
        warn!(
            "{:?} restart attempt {}/{}",
            self.source, self.restart_attempts, self.max_restart_attempts
        );
    }
}

/// Health table for every source the aggregator drains.
pub struct HealthBoard {
    sources: Vec<SourceHealth>,
}

impl HealthBoard {
    pub fn new(sources: Vec<SourceHealth>) -> Self {
        Self { sources }
    }

    pub fn record(&mut self, source: SourceId, timestamp_ns: u64) {
        if let Some(entry) = self.sources.iter_mut().find(|s| s.source == source) {
            entry.record(timestamp_ns);
        }
    }

    /// Bitmask of sources whose last reading is past their threshold.
    pub fn stale_mask(&self, now_ns: u64) -> SourceMask {
        let mut mask = SourceMask::default();
        for source in &self.sources {
            if source.is_stale(now_ns) {
                mask.set(source.source);
            }
        }
        mask
    }

    pub fn get(&self, source: SourceId) -> Option<&SourceHealth> {
        self.sources.iter().find(|s| s.source == source)
    }
}
