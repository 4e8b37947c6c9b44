//! External storage collaborators
//!
//! The pipeline needs two services: an object store that holds the published
//! exports, and a key-value store that receives records and report rows.
//! Both are traits so the pipeline can run against AWS ([`s3`],
//! [`dynamodb`]) or in-process doubles ([`memory`]).

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub mod config;
pub mod dynamodb;
pub mod memory;
pub mod s3;

/// One row of a key-value table
pub type Item = serde_json::Map<String, serde_json::Value>;

/// Listing entry for an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    /// Raw content hash as returned by the store (S3 ETags keep their quotes)
    pub etag: Option<String>,
    pub size: i64,
}

/// Read access to the bucket holding billing exports
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object whose key starts with `prefix`
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>>;

    /// Download an object to `dest`, returning the number of bytes written
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64>;
}

/// Tables holding report rows and imported records
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the item whose `key_field` equals `key`
    async fn get_item(&self, table: &str, key_field: &str, key: &str) -> Result<Option<Item>>;

    async fn put_item(&self, table: &str, item: Item) -> Result<()>;

    /// Write a batch of items in one call.
    ///
    /// Returns the subset the store did not process; an empty vector means
    /// every item was durably written.
    async fn batch_put(&self, table: &str, items: Vec<Item>) -> Result<Vec<Item>>;
}
