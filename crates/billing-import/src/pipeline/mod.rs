//! Import orchestration
//!
//! [`PipelineManager::import`] walks one export through
//! `Idle → Checking → Fetching → Unpacking → Scanning → Reporting → Done`.
//! Any fatal error moves the run to [`ImportState::Aborted`] and is returned
//! as an [`ImportFailure`] that still carries the counters gathered so far.
//!
//! Scanning runs on the calling task when one worker is configured, and fans
//! rows out to several converter/writer tasks otherwise (see [`parallel`]).

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::error::ImportError;
use crate::writer::ImportStats;

pub mod manager;
pub mod parallel;

pub use manager::PipelineManager;

/// Where an import run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportState {
    Idle,
    Checking,
    Fetching,
    Unpacking,
    Scanning,
    Reporting,
    Done,
    Aborted,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Idle => "idle",
            ImportState::Checking => "checking",
            ImportState::Fetching => "fetching",
            ImportState::Unpacking => "unpacking",
            ImportState::Scanning => "scanning",
            ImportState::Reporting => "reporting",
            ImportState::Done => "done",
            ImportState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub source_name: String,
    /// Always [`ImportState::Done`]
    pub state: ImportState,
    /// False when the export was unchanged and nothing was imported
    pub imported: bool,
    pub stats: ImportStats,
    /// RecordIds the store never confirmed; empty for a completed run
    pub rejected: Vec<String>,
    pub report_written: bool,
}

/// An aborted run
#[derive(Debug, Error)]
#[error("import of {source_name} aborted while {state}: {error}")]
pub struct ImportFailure {
    pub source_name: String,
    /// State the run was in when it failed
    pub state: ImportState,
    pub stats: ImportStats,
    /// RecordIds left unwritten by the last flush
    pub rejected: Vec<String>,
    #[source]
    pub error: ImportError,
}

/// A scan that had to stop, with what it achieved before stopping
#[derive(Debug)]
pub(crate) struct ScanAbort {
    pub stats: ImportStats,
    pub rejected: Vec<String>,
    pub error: ImportError,
}

impl ScanAbort {
    pub(crate) fn new(stats: ImportStats, error: ImportError) -> Self {
        Self {
            stats,
            rejected: error.rejected_ids().to_vec(),
            error,
        }
    }
}

impl From<ImportError> for ScanAbort {
    fn from(error: ImportError) -> Self {
        Self::new(ImportStats::default(), error)
    }
}
