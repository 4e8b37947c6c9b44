//! Command-line interface

use anyhow::{Context, Result};
use billing_common::types::InvoicePeriod;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ImportConfig;
use crate::converter::RecordConverter;
use crate::pipeline::PipelineManager;
use crate::storage::dynamodb::DynamoDbStore;
use crate::storage::memory::MemoryKeyValueStore;
use crate::storage::s3::S3ObjectStore;
use crate::storage::KeyValueStore;

/// Import AWS detailed billing exports into DynamoDB
#[derive(Parser, Debug)]
#[command(name = "billing-import")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import the export of a month if it changed since the last import
    Import {
        #[command(flatten)]
        source: SourceArgs,

        /// Where the archive is downloaded (directory or file)
        #[arg(long)]
        download_dir: Option<PathBuf>,

        /// Where the archive is extracted
        #[arg(long)]
        unpack_dir: Option<PathBuf>,

        /// Number of converter/writer workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Read the real export but write records and report to memory only
        #[arg(long)]
        dry_run: bool,
    },

    /// Tell whether the export of a month needs importing
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Convert a local CSV export and print the records as JSON lines
    Convert {
        /// Unpacked CSV export; its file name must contain the YYYY-MM period
        path: PathBuf,

        /// Report name stored on the records (defaults to the file name)
        #[arg(long)]
        source_name: Option<String>,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Which export to work on
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Invoice period, YYYY-MM
    #[arg(short, long)]
    pub period: InvoicePeriod,

    /// Bucket holding the exports
    #[arg(short, long, env = "BILLING_BUCKET")]
    pub bucket: Option<String>,

    /// Account whose export is imported (defaults to the account of the S3 credentials)
    #[arg(short, long, env = "BILLING_ACCOUNT_ID")]
    pub account_id: Option<String>,
}

impl SourceArgs {
    fn apply(&self, config: &mut ImportConfig) {
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(account_id) = &self.account_id {
            config.account_id = account_id.clone();
        }
    }
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Import {
                source,
                download_dir,
                unpack_dir,
                workers,
                dry_run,
            } => {
                let mut config = ImportConfig::from_env()?;
                source.apply(&mut config);
                if let Some(dir) = download_dir {
                    config.download_dir = dir;
                }
                if let Some(dir) = unpack_dir {
                    config.unpack_dir = dir;
                }
                if let Some(workers) = workers {
                    config.workers = workers;
                }
                config.validate()?;
                config.resolve_account_id().await?;
                config.require_source()?;
                import(config, &source.period, dry_run).await
            }
            Commands::Check { source } => {
                let mut config = ImportConfig::from_env()?;
                source.apply(&mut config);
                config.validate()?;
                config.resolve_account_id().await?;
                config.require_source()?;
                check(config, &source.period).await
            }
            Commands::Convert {
                path,
                source_name,
                limit,
            } => convert(path, source_name, limit),
        }
    }
}

async fn import(config: ImportConfig, period: &InvoicePeriod, dry_run: bool) -> Result<()> {
    let objects = Arc::new(S3ObjectStore::new(&config.s3).await?);
    let store: Arc<dyn KeyValueStore> = if dry_run {
        warn!("Dry run: records and report stay in memory");
        Arc::new(MemoryKeyValueStore::new())
    } else {
        Arc::new(DynamoDbStore::new(&config.dynamodb).await?)
    };

    let bucket = config.bucket.clone();
    let manager = PipelineManager::new(objects, store, config);
    let outcome = manager.import(period, &bucket).await?;

    if outcome.imported {
        println!(
            "{}: read={} loaded={} warnings={} failed={} report_written={}",
            outcome.source_name,
            outcome.stats.read,
            outcome.stats.loaded,
            outcome.stats.warnings,
            outcome.stats.failed,
            outcome.report_written
        );
    } else {
        println!("{}: up to date", outcome.source_name);
    }
    Ok(())
}

async fn check(config: ImportConfig, period: &InvoicePeriod) -> Result<()> {
    let objects = Arc::new(S3ObjectStore::new(&config.s3).await?);
    let store = Arc::new(DynamoDbStore::new(&config.dynamodb).await?);

    let bucket = config.bucket.clone();
    let manager = PipelineManager::new(objects, store, config);
    let source_name = manager.source_name(period);
    let (needed, fingerprint) = manager.check(period, &bucket).await?;

    if needed {
        println!("{}: import needed (fingerprint {})", source_name, fingerprint);
    } else {
        println!("{}: up to date (fingerprint {})", source_name, fingerprint);
    }
    Ok(())
}

fn convert(path: PathBuf, source_name: Option<String>, limit: Option<usize>) -> Result<()> {
    let source_name = source_name.unwrap_or_else(|| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let converter = RecordConverter::open(&path, &source_name)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let (mut converted, mut skipped) = (0usize, 0usize);

    for result in converter {
        if limit.is_some_and(|limit| converted >= limit) {
            break;
        }
        match result {
            Ok(record) => {
                serde_json::to_writer(&mut out, &record).context("Failed to write record")?;
                writeln!(out)?;
                converted += 1;
            }
            Err(e) if e.disposition() == crate::error::Disposition::SkipRow => {
                warn!(error = %e, "Skipping row");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(converted, skipped, "Conversion finished");
    Ok(())
}
