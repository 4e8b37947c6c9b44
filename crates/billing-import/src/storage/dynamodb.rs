use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::config::AwsServiceConfig;
use super::{Item, KeyValueStore};

/// Key-value store backed by Amazon DynamoDB
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
}

impl DynamoDbStore {
    pub async fn new(config: &AwsServiceConfig) -> Result<Self> {
        debug!(region = %config.region, endpoint = ?config.endpoint, "Initializing DynamoDB client");
        let sdk_config = config.load().await;
        Ok(Self {
            client: Client::new(&sdk_config),
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyValueStore for DynamoDbStore {
    #[instrument(skip(self))]
    async fn get_item(&self, table: &str, key_field: &str, key: &str) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(key_field, AttributeValue::S(key.to_string()))
            .send()
            .await
            .with_context(|| format!("Failed to read {}={} from {}", key_field, key, table))?;

        Ok(output
            .item()
            .filter(|attributes| !attributes.is_empty())
            .map(from_attributes))
    }

    #[instrument(skip(self, item))]
    async fn put_item(&self, table: &str, item: Item) -> Result<()> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_attributes(&item)))
            .send()
            .await
            .with_context(|| format!("Failed to put item into {}", table))?;
        Ok(())
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn batch_put(&self, table: &str, items: Vec<Item>) -> Result<Vec<Item>> {
        let requests = items
            .iter()
            .map(|item| {
                let put = PutRequest::builder()
                    .set_item(Some(to_attributes(item)))
                    .build()?;
                Ok(WriteRequest::builder().put_request(put).build())
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .with_context(|| format!("Batch write to {} failed", table))?;

        let unprocessed = output
            .unprocessed_items()
            .and_then(|tables| tables.get(table))
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(|request| request.put_request())
                    .map(|put| from_attributes(put.item()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(unprocessed)
    }
}

fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(to_attributes(map)),
    }
}

fn to_attributes(item: &Item) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_attribute(value)))
        .collect()
}

fn from_attribute(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => serde_json::from_str::<serde_json::Number>(n)
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(n.clone())),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::L(values) => Value::Array(values.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(from_attributes(map)),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        _ => Value::Null,
    }
}

fn from_attributes(attributes: &HashMap<String, AttributeValue>) -> Item {
    attributes
        .iter()
        .map(|(name, attribute)| (name.clone(), from_attribute(attribute)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_and_maps_map_to_dynamodb_types() {
        let item: Item = json!({
            "RecordId": "35330993584143683082238491",
            "PayerAccountId": 661913936052u64,
            "UsageQuantity": 0.01101368,
            "Tags": {"user_env": "prod"},
        })
        .as_object()
        .cloned()
        .unwrap();

        let attributes = to_attributes(&item);
        assert_eq!(
            attributes["PayerAccountId"],
            AttributeValue::N("661913936052".into())
        );
        assert_eq!(attributes["UsageQuantity"], AttributeValue::N("0.01101368".into()));
        assert!(matches!(attributes["Tags"], AttributeValue::M(_)));
        assert_eq!(from_attributes(&attributes), item);
    }

    #[test]
    fn test_unparseable_number_is_kept_as_text() {
        let value = from_attribute(&AttributeValue::N("1e99999".into()));
        assert_eq!(value, json!("1e99999"));
    }
}
