//! Batched, retrying record persistence
//!
//! [`BatchWriter`] buffers converted records and writes them to the records
//! table [`MAX_BATCH_SIZE`] at a time. When the store leaves part of a batch
//! unprocessed, only that part is resubmitted, up to
//! [`RetryPolicy::max_attempts`] attempts in total. Whatever is still left
//! after the last attempt is reported back by `RecordId` together with a
//! storage error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, ImportError, Result};
use crate::record::Record;
use crate::storage::{Item, KeyValueStore};

/// Largest batch the key-value store accepts in one call
pub const MAX_BATCH_SIZE: usize = 25;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Running counters for one import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    /// Data rows read from the export
    pub read: u64,
    /// Records confirmed written
    pub loaded: u64,
    /// Rows skipped because they were malformed or not convertible
    pub warnings: u64,
    /// Records the store never confirmed
    pub failed: u64,
}

impl ImportStats {
    /// Error count stored on the report row
    pub fn error_count(&self) -> u64 {
        self.failed + self.warnings
    }

    pub fn merge(&mut self, other: &ImportStats) {
        self.read += other.read;
        self.loaded += other.loaded;
        self.warnings += other.warnings;
        self.failed += other.failed;
    }
}

/// Bounded retry of unprocessed batch items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per flush, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after `attempt` (1-based) before the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

/// Outcome of one successful flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub processed: usize,
    pub rejected: Vec<String>,
}

/// A buffered record, kept with the id it is reported under
struct Pending {
    record_id: String,
    item: Item,
}

/// Writes records to one table in batches.
///
/// A writer belongs to a single import; it is not meant to be shared between
/// concurrent imports.
pub struct BatchWriter {
    store: Arc<dyn KeyValueStore>,
    table: String,
    retry: RetryPolicy,
    pending: Vec<Pending>,
    stats: ImportStats,
    batches: u64,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn KeyValueStore>, table: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            table: table.into(),
            retry,
            pending: Vec::with_capacity(MAX_BATCH_SIZE),
            stats: ImportStats::default(),
            batches: 0,
        }
    }

    /// Buffer a record, flushing once the batch is full.
    ///
    /// Records that are not importable are refused before they reach the store.
    pub async fn add(&mut self, record: Record) -> Result<()> {
        if !record.is_importable() {
            return Err(ConvertError::NotImportable {
                record_id: record.record_id,
            }
            .into());
        }

        let item = record
            .to_item()
            .map_err(|e| ImportError::Backend(anyhow::Error::new(e).context("Failed to serialize record")))?;
        self.pending.push(Pending {
            record_id: record.record_id,
            item,
        });

        if self.pending.len() >= MAX_BATCH_SIZE {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write every buffered record.
    ///
    /// Resubmits the unprocessed subset until it is empty or the retry budget
    /// is spent. `loaded` and `failed` are updated whatever the outcome; a
    /// non-empty remainder after the last attempt is an
    /// [`ImportError::Storage`].
    pub async fn flush(&mut self) -> Result<FlushReport> {
        if self.pending.is_empty() {
            return Ok(FlushReport::default());
        }

        self.batches += 1;
        let batch = self.batches;
        let mut remaining = std::mem::take(&mut self.pending);
        let submitted = remaining.len();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_error: Option<anyhow::Error> = None;

        while !remaining.is_empty() && attempts < max_attempts {
            if attempts > 0 {
                let delay = self.retry.delay_after(attempts);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            attempts += 1;

            let items: Vec<Item> = remaining.iter().map(|p| p.item.clone()).collect();
            match self.store.batch_put(&self.table, items).await {
                Ok(unprocessed) => {
                    remaining = match_unprocessed(remaining, &unprocessed);
                    if !remaining.is_empty() {
                        debug!(batch, attempt = attempts, unprocessed = remaining.len(), "Batch partially processed");
                    }
                }
                Err(e) => {
                    warn!(batch, attempt = attempts, error = %e, "Batch write failed");
                    last_error = Some(e);
                }
            }
        }

        let rejected: Vec<String> = remaining.into_iter().map(|p| p.record_id).collect();
        let processed = submitted - rejected.len();
        self.stats.loaded += processed as u64;
        self.stats.failed += rejected.len() as u64;

        if rejected.is_empty() {
            debug!(batch, processed, attempts, "Flushed batch");
            return Ok(FlushReport { processed, rejected });
        }

        warn!(
            batch,
            processed,
            failed = rejected.len(),
            attempts,
            "Batch still has unprocessed records after the last attempt"
        );
        let source = last_error
            .unwrap_or_else(|| anyhow::anyhow!("store left {} item(s) unprocessed", rejected.len()));
        Err(ImportError::Storage {
            rejected,
            processed,
            attempts,
            source,
        })
    }

    pub fn stats(&self) -> ImportStats {
        self.stats
    }

    pub fn note_read(&mut self) {
        self.stats.read += 1;
    }

    pub fn note_warning(&mut self) {
        self.stats.warnings += 1;
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Flush the remainder and hand back the final counters
    pub async fn finish(mut self) -> std::result::Result<ImportStats, (ImportStats, ImportError)> {
        match self.flush().await {
            Ok(_) => {
                info!(table = %self.table, batches = self.batches, loaded = self.stats.loaded, "Writer finished");
                Ok(self.stats)
            }
            Err(e) => Err((self.stats, e)),
        }
    }
}

/// Keep the pending records the store reported as unprocessed.
///
/// Items are matched by their `RecordId` attribute; if the store returns items
/// that cannot be matched, the trailing `unprocessed.len()` records are kept.
fn match_unprocessed(remaining: Vec<Pending>, unprocessed: &[Item]) -> Vec<Pending> {
    if unprocessed.is_empty() {
        return Vec::new();
    }

    let ids: Vec<&str> = unprocessed
        .iter()
        .filter_map(|item| item.get("RecordId").and_then(|v| v.as_str()))
        .collect();

    if ids.len() == unprocessed.len() {
        remaining
            .into_iter()
            .filter(|p| ids.contains(&p.record_id.as_str()))
            .collect()
    } else {
        let keep = remaining.len().saturating_sub(unprocessed.len());
        let mut remaining = remaining;
        remaining.split_off(keep)
    }
}
