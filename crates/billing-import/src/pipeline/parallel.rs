//! Fan-out scanning
//!
//! A blocking producer reads raw rows and deals them round-robin into one
//! bounded channel per worker. Each worker converts its rows and writes them
//! through its own [`BatchWriter`], so batch atomicity and the retry contract
//! are the same as for a sequential scan. Row order is kept within a worker
//! only.

use csv::StringRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ScanAbort;
use crate::converter::{convert_row, RecordConverter};
use crate::error::{Disposition, ImportError};
use crate::record::ExportDescriptor;
use crate::storage::KeyValueStore;
use crate::writer::{BatchWriter, ImportStats, RetryPolicy};

type Row = (u64, StringRecord);

/// Scan an export with `workers` converter/writer tasks
pub(crate) async fn scan(
    converter: RecordConverter,
    store: Arc<dyn KeyValueStore>,
    table: &str,
    retry: RetryPolicy,
    workers: usize,
    capacity: usize,
) -> Result<ImportStats, ScanAbort> {
    let workers = workers.max(1);
    let descriptor = Arc::new(converter.descriptor().clone());

    let mut senders = Vec::with_capacity(workers);
    let mut handles: Vec<JoinHandle<Result<ImportStats, ScanAbort>>> = Vec::with_capacity(workers);
    for id in 0..workers {
        let (tx, rx) = mpsc::channel::<Row>(capacity.max(1));
        senders.push(tx);
        let writer = BatchWriter::new(store.clone(), table.to_string(), retry);
        handles.push(tokio::spawn(run_worker(id, descriptor.clone(), rx, writer)));
    }
    info!(workers, capacity, "Scanning with parallel workers");

    let producer = tokio::task::spawn_blocking(move || produce(converter, senders));

    let mut stats = ImportStats::default();
    let mut first_error: Option<ScanAbort> = None;

    match producer.await {
        Ok((produced, error)) => {
            stats.merge(&produced);
            if let Some(error) = error {
                first_error = Some(ScanAbort::new(ImportStats::default(), error));
            }
        }
        Err(e) => first_error = Some(ImportError::Backend(e.into()).into()),
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(worker_stats)) => stats.merge(&worker_stats),
            Ok(Err(abort)) => {
                stats.merge(&abort.stats);
                if let Some(first) = first_error.as_mut() {
                    first.rejected.extend(abort.rejected);
                } else {
                    first_error = Some(abort);
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(ImportError::Backend(e.into()).into());
                }
            }
        }
    }

    match first_error {
        Some(mut abort) => {
            abort.stats = stats;
            Err(abort)
        }
        None => Ok(stats),
    }
}

/// Read every row and hand it to the workers.
///
/// Counts rows read and malformed rows. Stops early on a stream error or when
/// a worker has gone away. The export file is closed when this returns.
fn produce(mut converter: RecordConverter, senders: Vec<mpsc::Sender<Row>>) -> (ImportStats, Option<ImportError>) {
    let mut stats = ImportStats::default();
    let mut next = 0usize;

    while let Some(row) = converter.next_row() {
        match row {
            Ok(row) => {
                stats.read += 1;
                if senders[next].blocking_send(row).is_err() {
                    debug!(worker = next, "Worker stopped, ending scan");
                    break;
                }
                next = (next + 1) % senders.len();
            }
            Err(e) => match e.disposition() {
                Disposition::SkipRow => {
                    stats.read += 1;
                    stats.warnings += 1;
                    warn!(error = %e, "Skipping row");
                }
                Disposition::Abort => return (stats, Some(e)),
            },
        }
    }
    (stats, None)
}

async fn run_worker(
    id: usize,
    descriptor: Arc<ExportDescriptor>,
    mut rows: mpsc::Receiver<Row>,
    mut writer: BatchWriter,
) -> Result<ImportStats, ScanAbort> {
    while let Some((line, row)) = rows.recv().await {
        let written = match convert_row(&descriptor, &row, line) {
            Ok(record) => writer.add(record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            match e.disposition() {
                Disposition::SkipRow => {
                    writer.note_warning();
                    warn!(worker = id, line, error = %e, "Skipping row");
                }
                Disposition::Abort => {
                    warn!(worker = id, error = %e, "Worker aborting");
                    return Err(ScanAbort::new(writer.stats(), e));
                }
            }
        }
    }

    let stats = writer.finish().await.map_err(|(stats, e)| ScanAbort::new(stats, e))?;
    debug!(worker = id, loaded = stats.loaded, "Worker finished");
    Ok(stats)
}
