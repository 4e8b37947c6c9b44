//! Billing Import Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Imports the monthly detailed billing export of an AWS account into a
//! key-value store, once per change of the export.
//!
//! # Overview
//!
//! - **Change detection**: [`checker::Checker`] compares the fingerprint stored
//!   with the last report row against the published object
//! - **Retrieval**: [`retriever::Retriever`] downloads the archive and
//!   [`archive::unpack`] extracts it
//! - **Conversion**: [`converter::RecordConverter`] turns CSV rows into
//!   [`record::Record`]s through a typed column table
//! - **Persistence**: [`writer::BatchWriter`] writes batches of 25 with bounded
//!   retry of unprocessed items
//! - **Orchestration**: [`pipeline::PipelineManager`] runs the whole import and
//!   writes the report row
//!
//! Storage collaborators sit behind the traits in [`storage`], with AWS and
//! in-memory implementations.
//!
//! # Example
//!
//! ```no_run
//! use billing_import::config::ImportConfig;
//! use billing_import::pipeline::PipelineManager;
//! use billing_import::storage::{dynamodb::DynamoDbStore, s3::S3ObjectStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::from_env()?;
//!     let objects = Arc::new(S3ObjectStore::new(&config.s3).await?);
//!     let store = Arc::new(DynamoDbStore::new(&config.dynamodb).await?);
//!     let bucket = config.bucket.clone();
//!
//!     let manager = PipelineManager::new(objects, store, config);
//!     let outcome = manager.import(&"2017-07".parse()?, &bucket).await?;
//!     println!("{:?}", outcome.stats);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod checker;
pub mod cli;
pub mod config;
pub mod converter;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod retriever;
pub mod storage;
pub mod writer;

// Re-export commonly used types
pub use cli::{Cli, Commands};
pub use error::{ErrorKind, ImportError, Result};
pub use pipeline::{ImportFailure, ImportOutcome, ImportState, PipelineManager};
pub use writer::ImportStats;
