//! Privacy-safe signal ingestion
//!
//! The capture layer reports each key as a [`KeyKind`] plus a timestamp. Nothing
//! else about the key can enter this module. Keys accumulate in a rolling buffer
//! and every `batch_size` keys a snapshot is handed back for analysis.

use crate::types::{KeyKind, TimingEvent};
use std::collections::VecDeque;

/// Maximum buffered timing events
pub const BUFFER_CAPACITY: usize = 1000;

/// Default keys per analysis batch
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Rolling buffer of timing events with an event-count batch boundary
#[derive(Debug, Clone)]
pub struct SignalCollector {
    events: VecDeque<TimingEvent>,
    capacity: usize,
    batch_size: usize,
    since_last_batch: usize,
    last_key_at: Option<f64>,
    last_activity_at: Option<f64>,
    started_at: Option<f64>,
}

impl SignalCollector {
    pub fn new(batch_size: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(BUFFER_CAPACITY),
            capacity: BUFFER_CAPACITY,
            batch_size: batch_size.max(1),
            since_last_batch: 0,
            last_key_at: None,
            last_activity_at: None,
            started_at: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
        self
    }

    /// Record one key at `at` (seconds).
    ///
    /// Returns a snapshot of the buffer when this key completes a batch.
    pub fn record_key(&mut self, kind: KeyKind, at: f64) -> Option<Vec<TimingEvent>> {
        let interval_ms = self
            .last_key_at
            .map(|prev| ((at - prev) * 1000.0).max(0.0))
            .unwrap_or(0.0);

        let event = TimingEvent {
            timestamp: at,
            interval_ms,
            is_backspace: kind == KeyKind::Backspace,
            is_modifier: kind == KeyKind::Modifier,
        };

        self.events.push_back(event);
        if self.events.len() > self.capacity {
            self.events.pop_front();
        }

        self.last_key_at = Some(at);
        self.touch(at);

        self.since_last_batch += 1;
        if self.since_last_batch >= self.batch_size {
            self.since_last_batch = 0;
            Some(self.events.iter().copied().collect())
        } else {
            None
        }
    }

    /// Record a pointer click or scroll. Only refreshes activity.
    pub fn record_pointer(&mut self, at: f64) {
        self.touch(at);
    }

    fn touch(&mut self, at: f64) {
        self.started_at.get_or_insert(at);
        self.last_activity_at = Some(match self.last_activity_at {
            Some(prev) => prev.max(at),
            None => at,
        });
    }

    /// Seconds since the last key or pointer activity, 0 before any activity
    pub fn idle_seconds(&self, now: f64) -> f64 {
        self.last_activity_at
            .map(|last| (now - last).max(0.0))
            .unwrap_or(0.0)
    }

    /// The `count` most recent events, oldest first
    pub fn recent(&self, count: usize) -> Vec<TimingEvent> {
        let skip = self.events.len().saturating_sub(count);
        self.events.iter().skip(skip).copied().collect()
    }

    /// Seconds since the first recorded activity
    pub fn session_seconds(&self, now: f64) -> f64 {
        self.started_at
            .map(|start| (now - start).max(0.0))
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for SignalCollector {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_from_previous_key() {
        let mut collector = SignalCollector::default();
        collector.record_key(KeyKind::Other, 100.0);
        collector.record_key(KeyKind::Backspace, 100.25);
        collector.record_key(KeyKind::Modifier, 100.5);

        let events = collector.recent(3);
        assert_eq!(events[0].interval_ms, 0.0);
        assert!((events[1].interval_ms - 250.0).abs() < 1e-6);
        assert!(events[1].is_backspace);
        assert!(events[2].is_modifier);
        assert!(!events[2].is_backspace);
    }

    #[test]
    fn test_batch_boundary_by_count() {
        let mut collector = SignalCollector::new(5);
        let mut batches = Vec::new();

        for i in 0..12 {
            if let Some(batch) = collector.record_key(KeyKind::Other, i as f64 * 0.1) {
                batches.push(batch.len());
            }
        }

        assert_eq!(batches, vec![5, 10]);
    }

    #[test]
    fn test_buffer_capacity() {
        let mut collector = SignalCollector::new(1000).with_capacity(10);
        for i in 0..25 {
            collector.record_key(KeyKind::Other, i as f64);
        }

        assert_eq!(collector.len(), 10);
        assert_eq!(collector.recent(1)[0].timestamp, 24.0);
        assert_eq!(collector.recent(100)[0].timestamp, 15.0);
    }

    #[test]
    fn test_pointer_refreshes_idle_but_adds_no_event() {
        let mut collector = SignalCollector::default();
        assert_eq!(collector.idle_seconds(50.0), 0.0);

        collector.record_key(KeyKind::Other, 10.0);
        assert_eq!(collector.idle_seconds(40.0), 30.0);

        collector.record_pointer(35.0);
        assert_eq!(collector.idle_seconds(40.0), 5.0);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_session_seconds() {
        let mut collector = SignalCollector::default();
        assert_eq!(collector.session_seconds(10.0), 0.0);

        collector.record_pointer(10.0);
        collector.record_key(KeyKind::Other, 20.0);
        assert_eq!(collector.session_seconds(70.0), 60.0);
    }
}
