use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use super::config::AwsServiceConfig;
use super::{ObjectStore, ObjectSummary};

/// Object store backed by Amazon S3
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: &AwsServiceConfig) -> Result<Self> {
        debug!(region = %config.region, endpoint = ?config.endpoint, "Initializing S3 client");

        let sdk_config = config.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut summaries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", bucket, prefix))?;

            summaries.extend(response.contents().iter().map(|object| ObjectSummary {
                key: object.key().unwrap_or_default().to_string(),
                etag: object.e_tag().map(str::to_string),
                size: object.size().unwrap_or(0),
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(count = summaries.len(), "Listed objects");
        Ok(summaries)
    }

    #[instrument(skip(self))]
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download s3://{}/{}", bucket, key))?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .context("Failed to read S3 response body")?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(bytes = written, dest = %dest.display(), "Downloaded s3://{}/{}", bucket, key);
        Ok(written)
    }
}
