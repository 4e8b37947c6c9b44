//! Configuration management

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::report::DEFAULT_REPORTS_TABLE;
use crate::storage::config::AwsServiceConfig;
use crate::writer::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF};

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default number of scan workers. One worker keeps the file's row order.
pub const DEFAULT_WORKERS: usize = 1;

/// Default capacity of each worker's row channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default table receiving imported records.
pub const DEFAULT_RECORDS_TABLE: &str = "billing-records";

/// Staging directory names under the system temp directory.
pub const DEFAULT_DOWNLOAD_DIR_NAME: &str = "billing-reports-download";
pub const DEFAULT_UNPACK_DIR_NAME: &str = "billing-reports-unzip";

/// Environment prefixes of the two AWS accounts involved.
pub const S3_ENV_PREFIX: &str = "BILLING_S3";
pub const DYNAMODB_ENV_PREFIX: &str = "BILLING_DYNAMODB";

/// Import configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Account whose exports are imported; part of the export object name
    pub account_id: String,
    /// Bucket the exports are published to
    pub bucket: String,
    pub download_dir: PathBuf,
    pub unpack_dir: PathBuf,
    pub workers: usize,
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
    /// Check the download against its ETag when that looks like a content MD5.
    ///
    /// Off by default: ETags of SSE-KMS and SSE-C objects look like MD5s but
    /// are not, so only enable this for buckets without such encryption.
    pub verify_download: bool,
    pub reports_table: String,
    pub records_table: String,
    pub s3: AwsServiceConfig,
    pub dynamodb: AwsServiceConfig,
}

/// Staging directory under the temp dir, written with a trailing separator so
/// it reads as a directory even before it exists.
fn staging_dir(name: &str) -> PathBuf {
    let mut dir = std::env::temp_dir().join(name).into_os_string();
    dir.push("/");
    PathBuf::from(dir)
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ImportConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = ImportConfig {
            account_id: std::env::var("BILLING_ACCOUNT_ID").unwrap_or_default(),
            bucket: std::env::var("BILLING_BUCKET").unwrap_or_default(),
            download_dir: std::env::var("BILLING_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            unpack_dir: std::env::var("BILLING_UNPACK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.unpack_dir),
            workers: env_or("BILLING_WORKERS", DEFAULT_WORKERS),
            channel_capacity: env_or("BILLING_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY),
            retry: RetryPolicy {
                max_attempts: env_or("BILLING_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
                backoff: Duration::from_millis(env_or(
                    "BILLING_RETRY_BACKOFF_MS",
                    DEFAULT_RETRY_BACKOFF.as_millis() as u64,
                )),
            },
            verify_download: env_or("BILLING_VERIFY_DOWNLOAD", false),
            reports_table: std::env::var("BILLING_REPORTS_TABLE")
                .unwrap_or_else(|_| DEFAULT_REPORTS_TABLE.to_string()),
            records_table: std::env::var("BILLING_RECORDS_TABLE")
                .unwrap_or_else(|_| DEFAULT_RECORDS_TABLE.to_string()),
            s3: AwsServiceConfig::from_env(S3_ENV_PREFIX),
            dynamodb: AwsServiceConfig::from_env(DYNAMODB_ENV_PREFIX),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }

        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than 0");
        }

        if self.retry.max_attempts == 0 {
            bail!("retry max_attempts must be greater than 0");
        }

        if self.reports_table.is_empty() || self.records_table.is_empty() {
            bail!("Table names cannot be empty");
        }

        if self.reports_table == self.records_table {
            tracing::warn!(table = %self.reports_table, "Reports and records share one table");
        }

        Ok(())
    }

    /// Fill in the account id from the S3 credentials when none is configured
    pub async fn resolve_account_id(&mut self) -> anyhow::Result<()> {
        if !self.account_id.is_empty() {
            return Ok(());
        }
        self.account_id = self
            .s3
            .caller_account_id()
            .await
            .context("No account id configured (BILLING_ACCOUNT_ID or --account-id) and none could be resolved")?;
        tracing::info!(account = %self.account_id, "Using the account of the S3 credentials");
        Ok(())
    }

    /// Check the settings needed to locate an export
    pub fn require_source(&self) -> anyhow::Result<()> {
        if self.account_id.is_empty() {
            bail!("No account id configured (BILLING_ACCOUNT_ID or --account-id)");
        }
        if self.bucket.is_empty() {
            bail!("No bucket configured (BILLING_BUCKET or --bucket)");
        }
        Ok(())
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            bucket: String::new(),
            download_dir: staging_dir(DEFAULT_DOWNLOAD_DIR_NAME),
            unpack_dir: staging_dir(DEFAULT_UNPACK_DIR_NAME),
            workers: DEFAULT_WORKERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            retry: RetryPolicy::default(),
            verify_download: false,
            reports_table: DEFAULT_REPORTS_TABLE.to_string(),
            records_table: DEFAULT_RECORDS_TABLE.to_string(),
            s3: AwsServiceConfig::default(),
            dynamodb: AwsServiceConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BILLING_ACCOUNT_ID",
        "BILLING_BUCKET",
        "BILLING_WORKERS",
        "BILLING_MAX_ATTEMPTS",
        "BILLING_RETRY_BACKOFF_MS",
        "BILLING_VERIFY_DOWNLOAD",
        "BILLING_RECORDS_TABLE",
        "BILLING_DYNAMODB_ENDPOINT",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ImportConfig::default();
        config.validate().unwrap();
        assert!(config.require_source().is_err());
        assert!(config.download_dir.to_string_lossy().ends_with("billing-reports-download/"));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.verify_download);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear();
        std::env::set_var("BILLING_ACCOUNT_ID", "123456789012");
        std::env::set_var("BILLING_BUCKET", "billing");
        std::env::set_var("BILLING_WORKERS", "4");
        std::env::set_var("BILLING_MAX_ATTEMPTS", "5");
        std::env::set_var("BILLING_RETRY_BACKOFF_MS", "0");
        std::env::set_var("BILLING_VERIFY_DOWNLOAD", "true");
        std::env::set_var("BILLING_RECORDS_TABLE", "records-test");
        std::env::set_var("BILLING_DYNAMODB_ENDPOINT", "http://localhost:8000");

        let config = ImportConfig::from_env().unwrap();
        clear();

        config.validate().unwrap();
        config.require_source().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.retry, RetryPolicy::immediate(5));
        assert!(config.verify_download);
        assert_eq!(config.records_table, "records-test");
        assert_eq!(config.reports_table, DEFAULT_REPORTS_TABLE);
        assert_eq!(config.dynamodb.endpoint.as_deref(), Some("http://localhost:8000"));
        assert_eq!(config.s3.endpoint, None);
    }

    #[test]
    #[serial]
    fn test_unparseable_values_fall_back() {
        clear();
        std::env::set_var("BILLING_WORKERS", "many");
        let config = ImportConfig::from_env().unwrap();
        clear();
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[tokio::test]
    async fn test_configured_account_is_kept() {
        let mut config = ImportConfig {
            account_id: "123456789012".into(),
            s3: AwsServiceConfig::for_local("http://127.0.0.1:1"),
            ..Default::default()
        };
        config.resolve_account_id().await.unwrap();
        assert_eq!(config.account_id, "123456789012");
    }

    #[tokio::test]
    async fn test_unresolvable_account_is_an_error() {
        let mut config = ImportConfig {
            s3: AwsServiceConfig::for_local("http://127.0.0.1:1"),
            ..Default::default()
        };
        let err = config.resolve_account_id().await.unwrap_err();
        assert!(format!("{:#}", err).contains("none could be resolved"));
        assert!(config.account_id.is_empty());
    }

    #[test]
    fn test_validation() {
        let config = ImportConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ImportConfig {
            retry: RetryPolicy::immediate(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ImportConfig {
            records_table: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
