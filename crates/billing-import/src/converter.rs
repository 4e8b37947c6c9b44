//! CSV export to [`Record`] conversion
//!
//! [`RecordConverter`] owns the open export for one import. It reads the header
//! once, then yields one converted record (or one row-scoped error) per data
//! row. `None` from the iterator is the end of the export; an
//! [`ImportError::Stream`] means the file could not be read any further.

use billing_common::types::InvoicePeriod;
use csv::StringRecord;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConvertError, ImportError, Result};
use crate::record::{Column, ExportDescriptor, Record};

/// Streaming converter over one unpacked export
pub struct RecordConverter {
    descriptor: ExportDescriptor,
    reader: csv::Reader<File>,
    row: StringRecord,
}

impl RecordConverter {
    /// Open an export and read its header row.
    ///
    /// # Arguments
    /// * `path` - Unpacked CSV file
    /// * `source_name` - Name of the export object, stored on every record
    ///
    /// The invoice period comes from the `YYYY-MM` in the file name. A missing
    /// period, an unreadable file or an empty header are all fatal.
    pub fn open(path: impl AsRef<Path>, source_name: &str) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let invoice_period = InvoicePeriod::find_in(&file_name).map_err(|e| open_error(path, e))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| open_error(path, e))?;

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| open_error(path, e))?
            .iter()
            .map(str::to_string)
            .collect();
        if header.iter().all(|name| name.is_empty()) {
            return Err(open_error(path, "export has no header row"));
        }

        let descriptor = ExportDescriptor::new(source_name, invoice_period, header);
        let ignored: Vec<&str> = descriptor.ignored_columns().collect();
        if !ignored.is_empty() {
            warn!(source = %source_name, columns = ?ignored, "Ignoring unknown columns");
        }

        info!(
            source = %source_name,
            period = %invoice_period,
            columns = descriptor.field_order.len(),
            path = %path.display(),
            "Opened export"
        );

        Ok(Self {
            descriptor,
            reader,
            row: StringRecord::new(),
        })
    }

    pub fn descriptor(&self) -> &ExportDescriptor {
        &self.descriptor
    }

    /// Read the next raw row without converting it.
    ///
    /// Returns the row with its line number, `None` at end of input.
    pub fn next_row(&mut self) -> Option<Result<(u64, StringRecord)>> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => {
                let line = self.row.position().map(|p| p.line()).unwrap_or_default();
                Some(Ok((line, self.row.clone())))
            }
            Ok(false) => None,
            Err(e) => Some(Err(ImportError::from_csv(e))),
        }
    }
}

impl Iterator for RecordConverter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let (line, row) = match self.next_row()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        Some(convert_row(&self.descriptor, &row, line))
    }
}

/// Convert one data row against the header bindings of `descriptor`.
///
/// The first column that fails to coerce rejects the row. A row whose
/// `RecordId` is empty or "0" is rejected after all columns are assigned.
pub fn convert_row(descriptor: &ExportDescriptor, row: &StringRecord, line: u64) -> Result<Record> {
    let mut record = Record::default();

    for (column, raw) in descriptor.columns.iter().zip(row.iter()) {
        match column {
            Column::Field(field) => field.assign(&mut record, raw, &descriptor.invoice_period)?,
            Column::Tag(key) => {
                record.tags.insert(key.clone(), raw.to_string());
            }
            Column::Ignored(_) => {}
        }
    }

    if !record.is_importable() {
        debug!(line, record_id = %record.record_id, "Row has no RecordId");
        return Err(ConvertError::MissingRecordId { line }.into());
    }

    record.report_name = descriptor.source_name.clone();
    record.id = Record::derive_id(&descriptor.source_name, &record.record_id);
    Ok(record)
}

fn open_error(path: &Path, reason: impl ToString) -> ImportError {
    ImportError::Open {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}
