//! Record buffering ahead of the flush thread.
//!
//! Producers push into a [`BatchAccumulator`] behind a short mutex. When the
//! accumulator reaches the batch size (or, optionally, its oldest record
//! ages past the flush interval) the contents are handed to the flush thread
//! as one batch. The handoff happens under the same lock, so batches reach
//! the writer in capture order.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use super::writer::FlushCommand;
use crate::observability::metrics::{record_buffered, record_enqueued};
use crate::record::LogRecord;

/// Configuration for batch commits.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum number of records in a batch
    pub max_batch_size: usize,
    /// Maximum age of the oldest buffered record, if time-based flushing is on
    pub max_batch_delay: Option<Duration>,
}

impl BatchConfig {
    pub fn new(batch_size: usize, flush_interval: Option<Duration>) -> Self {
        Self {
            max_batch_size: batch_size,
            max_batch_delay: flush_interval,
        }
    }
}

/// Batch accumulator for buffered items.
///
/// Collects items until either:
/// - The batch is full (max_batch_size)
/// - The oldest item is older than max_batch_delay, when set
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    config: BatchConfig,
    items: Vec<T>,
    batch_start: Option<Instant>,
}

impl<T> BatchAccumulator<T> {
    /// Create a new batch accumulator with the given configuration.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            items: Vec::with_capacity(config.max_batch_size),
            batch_start: None,
        }
    }

    /// Add an item to the batch.
    ///
    /// Returns true if the batch is now full.
    pub fn push(&mut self, item: T) -> bool {
        if self.batch_start.is_none() {
            self.batch_start = Some(Instant::now());
        }
        self.items.push(item);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.config.max_batch_size
    }

    /// Check if the batch is due: full, or aged past the delay.
    pub fn is_ready(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }

        if self.is_full() {
            return true;
        }

        match (self.batch_start, self.config.max_batch_delay) {
            (Some(start), Some(delay)) => start.elapsed() >= delay,
            _ => false,
        }
    }

    /// Drain the batch, returning all accumulated items.
    pub fn drain(&mut self) -> Vec<T> {
        self.batch_start = None;
        std::mem::replace(
            &mut self.items,
            Vec::with_capacity(self.config.max_batch_size),
        )
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the current batch size.
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Thread-safe bounded buffer of pending log records.
#[derive(Debug)]
pub struct EventBuffer {
    pending: Mutex<BatchAccumulator<LogRecord>>,
    flush_tx: UnboundedSender<FlushCommand>,
}

impl EventBuffer {
    pub fn new(config: BatchConfig, flush_tx: UnboundedSender<FlushCommand>) -> Self {
        Self {
            pending: Mutex::new(BatchAccumulator::new(config)),
            flush_tx,
        }
    }

    /// Buffer a record, submitting the batch if it is now full.
    ///
    /// Returns true if this call triggered a flush.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        record_enqueued();
        let mut pending = self.lock();
        if pending.push(record) {
            self.submit(pending.drain());
            record_buffered(0);
            true
        } else {
            record_buffered(pending.len());
            false
        }
    }

    /// Submit the buffer if its oldest record has aged past the flush interval.
    pub fn submit_due(&self) -> bool {
        let mut pending = self.lock();
        if pending.is_ready() {
            self.submit(pending.drain());
            record_buffered(0);
            true
        } else {
            false
        }
    }

    /// Submit whatever is buffered, regardless of count.
    pub fn submit_pending(&self) -> bool {
        let mut pending = self.lock();
        if pending.is_empty() {
            return false;
        }
        self.submit(pending.drain());
        record_buffered(0);
        true
    }

    /// Remove and return every buffered record.
    pub fn drain(&self) -> Vec<LogRecord> {
        let records = self.lock().drain();
        record_buffered(0);
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn submit(&self, batch: Vec<LogRecord>) {
        if let Err(e) = self.flush_tx.send(FlushCommand::Batch(batch)) {
            // Only happens once the flush thread is gone.
            if let FlushCommand::Batch(lost) = e.0 {
                tracing::warn!(records = lost.len(), "Flush thread stopped, batch discarded");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BatchAccumulator<LogRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
