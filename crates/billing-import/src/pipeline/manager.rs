use billing_common::fingerprint::Fingerprint;
use billing_common::types::InvoicePeriod;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{parallel, ImportFailure, ImportOutcome, ImportState, ScanAbort};
use crate::archive;
use crate::checker::Checker;
use crate::config::ImportConfig;
use crate::converter::RecordConverter;
use crate::error::{Disposition, ImportError};
use crate::naming::export_object_name;
use crate::report::{ReportRecord, ReportStore};
use crate::retriever::Retriever;
use crate::storage::{KeyValueStore, ObjectStore};
use crate::writer::{BatchWriter, ImportStats};

/// Runs imports of monthly exports against a pair of stores
pub struct PipelineManager {
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn KeyValueStore>,
    config: ImportConfig,
}

impl PipelineManager {
    pub fn new(objects: Arc<dyn ObjectStore>, store: Arc<dyn KeyValueStore>, config: ImportConfig) -> Self {
        Self {
            objects,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn source_name(&self, period: &InvoicePeriod) -> String {
        export_object_name(&self.config.account_id, period)
    }

    fn checker(&self) -> Checker {
        Checker::new(
            self.objects.clone(),
            ReportStore::new(self.store.clone(), self.config.reports_table.clone()),
        )
    }

    /// Whether the export for `period` needs importing, with its current fingerprint
    pub async fn check(&self, period: &InvoicePeriod, bucket: &str) -> Result<(bool, Fingerprint), ImportError> {
        let mut checker = self.checker();
        let needed = checker.needs_import(bucket, &self.source_name(period)).await?;
        let (_, fingerprint) = checker.current_fingerprint();
        Ok((needed, fingerprint))
    }

    /// Import the export for `period` from `bucket`.
    ///
    /// An unchanged export is a successful no-op. The summary counters are
    /// logged whatever the outcome.
    #[instrument(skip(self), fields(source))]
    pub async fn import(&self, period: &InvoicePeriod, bucket: &str) -> Result<ImportOutcome, ImportFailure> {
        let source_name = self.source_name(period);
        tracing::Span::current().record("source", source_name.as_str());

        let mut state = ImportState::Idle;
        let result = self.run(&source_name, bucket, &mut state).await;

        match result {
            Ok(outcome) => {
                log_summary(&outcome.stats, outcome.state);
                Ok(outcome)
            }
            Err(abort) => {
                log_summary(&abort.stats, ImportState::Aborted);
                error!(state = %state, error = %abort.error, rejected = abort.rejected.len(), "Import aborted");
                Err(ImportFailure {
                    source_name,
                    state,
                    stats: abort.stats,
                    rejected: abort.rejected,
                    error: abort.error,
                })
            }
        }
    }

    async fn run(&self, source_name: &str, bucket: &str, state: &mut ImportState) -> Result<ImportOutcome, ScanAbort> {
        *state = ImportState::Checking;
        let mut checker = self.checker();
        if !checker.needs_import(bucket, source_name).await? {
            *state = ImportState::Done;
            return Ok(ImportOutcome {
                source_name: source_name.to_string(),
                state: ImportState::Done,
                imported: false,
                stats: ImportStats::default(),
                rejected: Vec::new(),
                report_written: false,
            });
        }

        *state = ImportState::Fetching;
        let retriever = Retriever::new(self.objects.clone(), bucket);
        let archive_path = retriever.fetch(source_name, &self.config.download_dir).await?;
        if self.config.verify_download {
            let (_, fingerprint) = checker.current_fingerprint();
            retriever.verify(&archive_path, &fingerprint).await?;
        }

        *state = ImportState::Unpacking;
        let unpack_dir = self.config.unpack_dir.clone();
        let export_path = tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &unpack_dir))
            .await
            .map_err(|e| ImportError::Backend(e.into()))??;
        if export_path.is_dir() {
            return Err(ImportError::Open {
                path: export_path,
                reason: "archive does not hold a single export file".to_string(),
            }
            .into());
        }

        *state = ImportState::Scanning;
        let stats = self.scan(&export_path, source_name).await?;

        *state = ImportState::Reporting;
        let (already_present, fingerprint) = checker.current_fingerprint();
        let report_written = if already_present {
            debug!("Report row already up to date");
            false
        } else {
            let report = ReportRecord {
                source_name: source_name.to_string(),
                fingerprint,
                error_count: stats.error_count(),
            };
            ReportStore::new(self.store.clone(), self.config.reports_table.clone())
                .write(&report)
                .await
                .map_err(|e| ScanAbort::new(stats, e))?;
            true
        };

        *state = ImportState::Done;
        Ok(ImportOutcome {
            source_name: source_name.to_string(),
            state: ImportState::Done,
            imported: true,
            stats,
            rejected: Vec::new(),
            report_written,
        })
    }

    async fn scan(&self, path: &Path, source_name: &str) -> Result<ImportStats, ScanAbort> {
        let converter = RecordConverter::open(path, source_name)?;

        if self.config.workers > 1 {
            return parallel::scan(
                converter,
                self.store.clone(),
                &self.config.records_table,
                self.config.retry,
                self.config.workers,
                self.config.channel_capacity,
            )
            .await;
        }

        let writer = BatchWriter::new(self.store.clone(), self.config.records_table.clone(), self.config.retry);
        scan_sequential(converter, writer).await
    }
}

/// Convert and write every row in file order on the calling task.
///
/// The converter, and with it the export file, is dropped on every exit path.
pub(crate) async fn scan_sequential(
    mut converter: RecordConverter,
    mut writer: BatchWriter,
) -> Result<ImportStats, ScanAbort> {
    for converted in converter.by_ref() {
        let written = match converted {
            Err(e @ ImportError::Stream(_)) => return Err(ScanAbort::new(writer.stats(), e)),
            Ok(record) => {
                writer.note_read();
                writer.add(record).await
            }
            Err(e) => {
                writer.note_read();
                Err(e)
            }
        };
        if let Err(e) = written {
            match e.disposition() {
                Disposition::SkipRow => {
                    writer.note_warning();
                    warn!(error = %e, "Skipping row");
                }
                Disposition::Abort => return Err(ScanAbort::new(writer.stats(), e)),
            }
        }
    }
    drop(converter);
    debug!("Export closed");

    writer.finish().await.map_err(|(stats, e)| ScanAbort::new(stats, e))
}

fn log_summary(stats: &ImportStats, state: ImportState) {
    info!(
        state = %state,
        read = stats.read,
        loaded = stats.loaded,
        warnings = stats.warnings,
        failed = stats.failed,
        "Import summary"
    );
}
