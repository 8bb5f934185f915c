//! Log collector for capturing and storing log events.

use super::event::{LogEvent, LogLevel};
use crate::types::TokenId;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of events to keep in the default buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Trait for log event collectors.
pub trait LogCollector: Send + Sync {
    /// Collect a log event.
    fn collect(&self, event: LogEvent);

    /// Get the number of collected events.
    fn len(&self) -> usize;

    /// Check if the collector is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe log collector with a bounded ring buffer.
pub struct BufferedCollector {
    buffer: RwLock<VecDeque<LogEvent>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl BufferedCollector {
    /// Create a new collector with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a collector with default capacity.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// Get the most recent N events.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<LogEvent> {
        let buffer = self.buffer.read();
        buffer.iter().rev().take(limit).cloned().collect()
    }

    /// Get events for a specific token.
    #[must_use]
    pub fn by_token(&self, token_id: TokenId) -> Vec<LogEvent> {
        let buffer = self.buffer.read();
        buffer
            .iter()
            .filter(|e| e.token_id == Some(token_id))
            .cloned()
            .collect()
    }

    /// Get events at or above a certain level.
    #[must_use]
    pub fn by_level(&self, min_level: LogLevel) -> Vec<LogEvent> {
        let buffer = self.buffer.read();
        buffer.iter().filter(|e| e.level >= min_level).cloned().collect()
    }

    /// Get all events (up to capacity).
    #[must_use]
    pub fn all(&self) -> Vec<LogEvent> {
        self.buffer.read().iter().cloned().collect()
    }

    /// Clear all events.
    pub fn clear(&self) {
        self.buffer.write().clear();
    }

    /// Get buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl LogCollector for BufferedCollector {
    fn collect(&self, mut event: LogEvent) {
        event.id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut buffer = self.buffer.write();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    fn len(&self) -> usize {
        self.buffer.read().len()
    }
}

impl Default for BufferedCollector {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// A no-op collector that discards all events.
pub struct NullCollector;

impl LogCollector for NullCollector {
    fn collect(&self, _event: LogEvent) {}

    fn len(&self) -> usize {
        0
    }
}
