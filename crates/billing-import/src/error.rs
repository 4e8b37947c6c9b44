//! Import error taxonomy
//!
//! Every failure of the pipeline is an [`ImportError`]. Callers decide what to
//! do with it by matching on [`ImportError::kind`] or
//! [`ImportError::disposition`]: row-scoped problems skip the row, everything
//! else aborts the import.

use billing_common::CommonError;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Coarse error class used to pick a disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed row structure
    Csv,
    /// Column value could not be coerced, or the row failed validation
    Convert,
    /// The key-value store did not durably write a batch
    Storage,
    /// Anything that stops the import before or outside row processing
    Fatal,
}

/// What the scan loop does after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    SkipRow,
    Abort,
}

/// A single column could not be coerced, or the row is not importable
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("field {field}: '{value}' is not an unsigned integer: {source}")]
    Unsigned {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("field {field}: '{value}' is not an integer: {source}")]
    Signed {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("field {field}: '{value}' is not a number: {source}")]
    Float {
        field: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("field {field}: '{value}' is not a 'YYYY-MM-DD HH:MM:SS' date: {source}")]
    Date {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("no RecordId found for the entry on line {line}")]
    MissingRecordId { line: u64 },

    #[error("record with RecordId '{record_id}' cannot be stored")]
    NotImportable { record_id: String },
}

/// Errors raised while importing an export
#[derive(Error, Debug)]
pub enum ImportError {
    /// Row structure is wrong (column count, encoding)
    #[error("malformed row: {0}")]
    Csv(#[source] csv::Error),

    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),

    /// A batch still had unprocessed items after the last attempt
    #[error("{} record(s) not written after {attempts} attempt(s): {source:#}", rejected.len())]
    Storage {
        rejected: Vec<String>,
        processed: usize,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The export file itself can no longer be read
    #[error("cannot read export stream: {0}")]
    Stream(#[source] csv::Error),

    #[error("cannot open export {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("expected exactly one object matching '{prefix}', found {found}")]
    ObjectCount { prefix: String, found: usize },

    #[error("object '{key}' has no content fingerprint")]
    MissingFingerprint { key: String },

    #[error("report entry for '{name}' has no '{field}' field")]
    MalformedReport { name: String, field: &'static str },

    #[error("retrieval failed for {}: {reason}", path.display())]
    Retrieve {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    /// Collaborator failure, propagated as-is
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::Csv(_) => ErrorKind::Csv,
            ImportError::Convert(_) => ErrorKind::Convert,
            ImportError::Storage { .. } => ErrorKind::Storage,
            ImportError::Stream(_)
            | ImportError::Open { .. }
            | ImportError::ObjectCount { .. }
            | ImportError::MissingFingerprint { .. }
            | ImportError::MalformedReport { .. }
            | ImportError::Retrieve { .. }
            | ImportError::Common(_)
            | ImportError::Backend(_) => ErrorKind::Fatal,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::Csv | ErrorKind::Convert => Disposition::SkipRow,
            ErrorKind::Storage | ErrorKind::Fatal => Disposition::Abort,
        }
    }

    /// RecordIds the store never confirmed, if this is a storage failure
    pub fn rejected_ids(&self) -> &[String] {
        match self {
            ImportError::Storage { rejected, .. } => rejected,
            _ => &[],
        }
    }

    /// Classify a CSV reader error: I/O failures end the scan, the rest are row problems
    pub(crate) fn from_csv(err: csv::Error) -> Self {
        if matches!(err.kind(), csv::ErrorKind::Io(_)) {
            ImportError::Stream(err)
        } else {
            ImportError::Csv(err)
        }
    }

    pub(crate) fn retrieve(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Retrieve {
            path: path.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }
}
