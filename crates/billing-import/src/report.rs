//! Report rows: one per imported export

use billing_common::fingerprint::Fingerprint;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{ImportError, Result};
use crate::storage::{Item, KeyValueStore};

pub const DEFAULT_REPORTS_TABLE: &str = "billing-reports";

/// Key attribute of the reports table
pub const NAME_FIELD: &str = "name";
pub const FINGERPRINT_FIELD: &str = "md5";
pub const ERRORS_FIELD: &str = "errors";

/// Summary of a finished import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    pub source_name: String,
    pub fingerprint: Fingerprint,
    pub error_count: u64,
}

impl ReportRecord {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(NAME_FIELD.into(), json!(self.source_name));
        item.insert(FINGERPRINT_FIELD.into(), json!(self.fingerprint.as_str()));
        item.insert(ERRORS_FIELD.into(), json!(self.error_count));
        item
    }
}

/// Access to the reports table
#[derive(Clone)]
pub struct ReportStore {
    store: Arc<dyn KeyValueStore>,
    table: String,
}

impl ReportStore {
    pub fn new(store: Arc<dyn KeyValueStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Fingerprint recorded by the last import of `name`.
    ///
    /// An export that was never imported has the empty fingerprint. A row
    /// without a fingerprint attribute is an error.
    #[instrument(skip(self))]
    pub async fn stored_fingerprint(&self, name: &str) -> Result<Fingerprint> {
        let Some(item) = self.store.get_item(&self.table, NAME_FIELD, name).await? else {
            debug!("No report row yet");
            return Ok(Fingerprint::empty());
        };
        if item.is_empty() {
            return Ok(Fingerprint::empty());
        }

        item.get(FINGERPRINT_FIELD)
            .and_then(|value| value.as_str())
            .map(Fingerprint::new)
            .ok_or_else(|| ImportError::MalformedReport {
                name: name.to_string(),
                field: FINGERPRINT_FIELD,
            })
    }

    #[instrument(skip(self, report), fields(source = %report.source_name))]
    pub async fn write(&self, report: &ReportRecord) -> Result<()> {
        self.store.put_item(&self.table, report.to_item()).await?;
        info!(
            fingerprint = %report.fingerprint,
            errors = report.error_count,
            "Report row written"
        );
        Ok(())
    }
}
