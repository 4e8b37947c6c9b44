use anyhow::{anyhow, Context};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for one AWS service.
///
/// The object store and the key-value store may live in different accounts,
/// so each gets its own block of settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsServiceConfig {
    pub region: String,
    /// Endpoint override for local emulators (localstack, minio, dynamodb-local)
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl Default for AwsServiceConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl AwsServiceConfig {
    /// Read `{prefix}_REGION`, `{prefix}_ENDPOINT`, `{prefix}_ACCESS_KEY`,
    /// `{prefix}_SECRET_KEY` and `{prefix}_PATH_STYLE`
    pub fn from_env(prefix: &str) -> Self {
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();
        Self {
            region: var("REGION")
                .or_else(|| env::var("AWS_REGION").ok())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: var("ENDPOINT"),
            access_key: var("ACCESS_KEY"),
            secret_key: var("SECRET_KEY"),
            path_style: var("PATH_STYLE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_local(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            access_key: Some("test".to_string()),
            secret_key: Some("test".to_string()),
            path_style: true,
            ..Self::default()
        }
    }

    fn static_credentials(&self) -> Option<Credentials> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some(Credentials::new(
                access,
                secret,
                None,
                None,
                "billing-import",
            )),
            _ => None,
        }
    }

    /// Build the shared SDK config; without static keys the default
    /// credential chain is used
    pub async fn load(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()));

        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(credentials) = self.static_credentials() {
            loader = loader.credentials_provider(credentials);
        }

        loader.load().await
    }

    /// Account that owns these credentials, as reported by STS
    pub async fn caller_account_id(&self) -> anyhow::Result<String> {
        let client = aws_sdk_sts::Client::new(&self.load().await);
        let identity = client
            .get_caller_identity()
            .send()
            .await
            .context("Failed to look up the caller identity")?;

        let account = identity
            .account()
            .filter(|account| !account.is_empty())
            .ok_or_else(|| anyhow!("Caller identity has no account id"))?;
        debug!(account, "Resolved caller account");
        Ok(account.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_uses_prefix() {
        env::set_var("BILLING_TEST_REGION", "eu-west-1");
        env::set_var("BILLING_TEST_ACCESS_KEY", "key");
        env::set_var("BILLING_TEST_SECRET_KEY", "secret");
        env::set_var("BILLING_TEST_PATH_STYLE", "true");

        let config = AwsServiceConfig::from_env("BILLING_TEST");
        for name in ["REGION", "ACCESS_KEY", "SECRET_KEY", "PATH_STYLE"] {
            env::remove_var(format!("BILLING_TEST_{}", name));
        }

        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.endpoint, None);
        assert!(config.path_style);
        assert!(config.static_credentials().is_some());
    }

    #[test]
    fn test_partial_keys_fall_back_to_chain() {
        let config = AwsServiceConfig {
            access_key: Some("key".into()),
            ..AwsServiceConfig::default()
        };
        assert!(config.static_credentials().is_none());
    }

    #[test]
    fn test_for_local() {
        let config = AwsServiceConfig::for_local("http://localhost:4566");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(config.region, DEFAULT_REGION);
        assert!(config.path_style);
    }
}
