//! Change detection for exports

use billing_common::fingerprint::Fingerprint;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{ImportError, Result};
use crate::report::ReportStore;
use crate::storage::ObjectStore;

/// Compares the fingerprint of the last import with the published export.
///
/// Both fingerprints are kept after [`Checker::needs_import`] so the pipeline
/// can later tell whether the report row is already up to date.
pub struct Checker {
    objects: Arc<dyn ObjectStore>,
    reports: ReportStore,
    stored: Fingerprint,
    current: Fingerprint,
}

impl Checker {
    pub fn new(objects: Arc<dyn ObjectStore>, reports: ReportStore) -> Self {
        Self {
            objects,
            reports,
            stored: Fingerprint::empty(),
            current: Fingerprint::empty(),
        }
    }

    /// Whether the export `source_name` in `bucket` changed since its last import.
    ///
    /// Exactly one object must match `source_name`, and it must carry a
    /// fingerprint.
    #[instrument(skip(self))]
    pub async fn needs_import(&mut self, bucket: &str, source_name: &str) -> Result<bool> {
        self.stored = self.reports.stored_fingerprint(source_name).await?;

        let listed = self.objects.list_objects(bucket, source_name).await?;
        if listed.len() != 1 {
            return Err(ImportError::ObjectCount {
                prefix: source_name.to_string(),
                found: listed.len(),
            });
        }

        let object = &listed[0];
        self.current = object
            .etag
            .as_deref()
            .map(Fingerprint::from_etag)
            .filter(|fingerprint| !fingerprint.is_empty())
            .ok_or_else(|| ImportError::MissingFingerprint {
                key: object.key.clone(),
            })?;

        debug!(stored = %self.stored, current = %self.current, "Compared fingerprints");
        let changed = self.stored != self.current;
        if changed {
            info!(source = %source_name, "Export changed, import needed");
        } else {
            info!(source = %source_name, "Export unchanged, nothing to import");
        }
        Ok(changed)
    }

    /// Whether the stored fingerprint already equals the current one, and the current one
    pub fn current_fingerprint(&self) -> (bool, Fingerprint) {
        (self.stored == self.current, self.current.clone())
    }
}
