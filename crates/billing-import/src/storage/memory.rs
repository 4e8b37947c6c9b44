//! In-process stores for tests and dry runs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use super::{Item, KeyValueStore, ObjectStore, ObjectSummary};

#[derive(Debug, Clone)]
struct StoredObject {
    etag: Option<String>,
    body: Vec<u8>,
}

/// Object store backed by a map of `bucket/key` to bytes
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    fail_listing: Mutex<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, etag: Option<&str>, body: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    etag: etag.map(str::to_string),
                    body,
                },
            );
        }
    }

    /// Make every listing fail with `message`
    pub fn fail_listing(&self, message: &str) {
        if let Ok(mut slot) = self.fail_listing.lock() {
            *slot = Some(message.to_string());
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        if let Some(message) = self.fail_listing.lock().map_err(|_| anyhow!("poisoned"))?.clone() {
            return Err(anyhow!(message));
        }
        let objects = self.objects.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(objects
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                etag: object.etag.clone(),
                size: object.body.len() as i64,
            })
            .collect())
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64> {
        let body = {
            let objects = self.objects.lock().map_err(|_| anyhow!("poisoned"))?;
            objects
                .get(&(bucket.to_string(), key.to_string()))
                .map(|object| object.body.clone())
                .ok_or_else(|| anyhow!("no such object: s3://{}/{}", bucket, key))?
        };
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Scripted response for one `batch_put` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResponse {
    /// Leave the last `n` items of the call unprocessed
    Unprocessed(usize),
    /// Fail the whole call
    Fail(String),
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Item>>,
    script: VecDeque<BatchResponse>,
    batch_calls: Vec<usize>,
    put_calls: usize,
}

/// Key-value store backed by in-memory tables.
///
/// Rows written with `put_item` are keyed by `name` and rows written with
/// `batch_put` by `Id`, the key attributes of the report and record tables.
/// `batch_put` answers from a script of [`BatchResponse`]s first and
/// processes everything once the script is exhausted.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    tables: Mutex<Tables>,
    fail_puts: Mutex<Option<String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, responses: impl IntoIterator<Item = BatchResponse>) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.script.extend(responses);
        }
    }

    /// Make every `put_item` fail with `message`
    pub fn fail_puts(&self, message: &str) {
        if let Ok(mut slot) = self.fail_puts.lock() {
            *slot = Some(message.to_string());
        }
    }

    pub fn seed(&self, table: &str, item: Item) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.rows.entry(table.to_string()).or_default().push(item);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Item> {
        self.tables
            .lock()
            .map(|tables| tables.rows.get(table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of items submitted by each `batch_put` call, in call order
    pub fn batch_calls(&self) -> Vec<usize> {
        self.tables
            .lock()
            .map(|tables| tables.batch_calls.clone())
            .unwrap_or_default()
    }

    pub fn put_calls(&self) -> usize {
        self.tables.lock().map(|tables| tables.put_calls).unwrap_or(0)
    }
}

/// Replace the row with the same `key_field` value, or append
fn upsert(rows: &mut Vec<Item>, key_field: &str, item: Item) {
    let key = item.get(key_field).cloned();
    match rows
        .iter_mut()
        .find(|row| key.is_some() && row.get(key_field) == key.as_ref())
    {
        Some(existing) => *existing = item,
        None => rows.push(item),
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, table: &str, key_field: &str, key: &str) -> Result<Option<Item>> {
        let tables = self.tables.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(tables.rows.get(table).and_then(|rows| {
            rows.iter()
                .find(|row| row.get(key_field).and_then(|v| v.as_str()) == Some(key))
                .cloned()
        }))
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<()> {
        if let Some(message) = self.fail_puts.lock().map_err(|_| anyhow!("poisoned"))?.clone() {
            return Err(anyhow!(message));
        }
        let mut tables = self.tables.lock().map_err(|_| anyhow!("poisoned"))?;
        tables.put_calls += 1;
        let rows = tables.rows.entry(table.to_string()).or_default();
        upsert(rows, "name", item);
        Ok(())
    }

    async fn batch_put(&self, table: &str, mut items: Vec<Item>) -> Result<Vec<Item>> {
        let mut tables = self.tables.lock().map_err(|_| anyhow!("poisoned"))?;
        tables.batch_calls.push(items.len());

        let unprocessed = match tables.script.pop_front() {
            Some(BatchResponse::Fail(message)) => return Err(anyhow!(message)),
            Some(BatchResponse::Unprocessed(n)) => {
                let keep = items.len().saturating_sub(n);
                items.split_off(keep)
            }
            None => Vec::new(),
        };

        let rows = tables.rows.entry(table.to_string()).or_default();
        for item in items {
            upsert(rows, "Id", item);
        }
        Ok(unprocessed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str) -> Item {
        let mut item = Item::new();
        item.insert("Id".into(), json!(id));
        item
    }

    #[tokio::test]
    async fn test_script_leaves_trailing_items_unprocessed() {
        let store = MemoryKeyValueStore::new();
        store.script([BatchResponse::Unprocessed(2)]);

        let left = store
            .batch_put("records", vec![item("a"), item("b"), item("c")])
            .await
            .unwrap();
        assert_eq!(left, vec![item("b"), item("c")]);
        assert_eq!(store.rows("records"), vec![item("a")]);

        let left = store.batch_put("records", left).await.unwrap();
        assert!(left.is_empty());
        assert_eq!(store.rows("records").len(), 3);
        assert_eq!(store.batch_calls(), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_get_item_by_key_field() {
        let store = MemoryKeyValueStore::new();
        let mut report = Item::new();
        report.insert("name".into(), json!("export.csv.zip"));
        report.insert("md5".into(), json!("abc"));
        store.put_item("reports", report.clone()).await.unwrap();

        let found = store.get_item("reports", "name", "export.csv.zip").await.unwrap();
        assert_eq!(found, Some(report));
        assert!(store.get_item("reports", "name", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_object_listing_by_prefix() {
        let store = MemoryObjectStore::new();
        store.insert("bucket", "a-2017-07.csv.zip", Some("\"e1\""), b"zip".to_vec());
        store.insert("bucket", "b-2017-07.csv.zip", Some("\"e2\""), b"zip".to_vec());

        let listed = store.list_objects("bucket", "a-").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].etag.as_deref(), Some("\"e1\""));

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.zip");
        let written = store.download("bucket", "a-2017-07.csv.zip", &dest).await.unwrap();
        assert_eq!(written, 3);
        assert!(store.download("bucket", "missing", &dest).await.is_err());
    }
}
