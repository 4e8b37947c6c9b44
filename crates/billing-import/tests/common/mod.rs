//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use billing_common::fingerprint::compute_md5;
use billing_common::types::InvoicePeriod;
use billing_import::config::ImportConfig;
use billing_import::naming::{export_csv_name, export_object_name};
use billing_import::storage::memory::{MemoryKeyValueStore, MemoryObjectStore};
use billing_import::writer::RetryPolicy;
use billing_import::PipelineManager;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const ACCOUNT: &str = "123456789012";
pub const BUCKET: &str = "billing-exports";
pub const RECORDS: &str = "billing-records";
pub const REPORTS: &str = "billing-reports";

pub const HEADER: &str = "InvoiceID,PayerAccountId,LinkedAccountId,RecordType,RecordId,ProductName,\
RateId,SubscriptionId,PricingPlanId,UsageType,Operation,AvailabilityZone,ReservedInstance,\
ItemDescription,UsageStartDate,UsageEndDate,UsageQuantity,BlendedRate,BlendedCost,UnBlendedRate,\
UnBlendedCost,ResourceId,user:env,aws:createdBy";

/// A well-formed line item with the given RecordId and payer account
pub fn line(record_id: &str, payer_account: &str) -> String {
    format!(
        "52511536,{payer},661913936052,LineItem,{record_id},Amazon Elastic Compute Cloud,\
12,3,4,EU-BoxUsage:t2.micro,RunInstances,eu-west-1a,N,\
$0.0126 per On Demand Linux t2.micro Instance Hour,2017-07-01 00:00:00,2017-07-01 01:00:00,\
1.00000000,0.0126,0.0126,0.0126,0.0126,i-0abc1234,prod,root",
        payer = payer_account,
        record_id = record_id,
    )
}

pub fn csv(lines: &[String]) -> String {
    let mut body = String::from(HEADER);
    body.push('\n');
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body
}

/// `count` well-formed lines with RecordIds starting at 1
pub fn lines(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| line(&i.to_string(), "661913936052"))
        .collect()
}

/// Zip archive holding the given entries
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn period() -> InvoicePeriod {
    "2017-07".parse().unwrap()
}

/// In-memory stores plus scratch directories for one test
pub struct Harness {
    pub dir: TempDir,
    pub objects: Arc<MemoryObjectStore>,
    pub store: Arc<MemoryKeyValueStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            objects: Arc::new(MemoryObjectStore::new()),
            store: Arc::new(MemoryKeyValueStore::new()),
        }
    }

    pub fn source_name(&self) -> String {
        export_object_name(ACCOUNT, &period())
    }

    /// Publish an export archive holding `csv`, with its MD5 as ETag
    pub fn publish(&self, csv: &str) -> String {
        let body = zip_bytes(&[(&export_csv_name(ACCOUNT, &period()), csv)]);
        self.publish_archive(body)
    }

    pub fn publish_archive(&self, body: Vec<u8>) -> String {
        let md5 = compute_md5(&mut body.as_slice()).unwrap();
        self.objects
            .insert(BUCKET, &self.source_name(), Some(&format!("\"{}\"", md5)), body);
        md5
    }

    pub fn config(&self, workers: usize) -> ImportConfig {
        ImportConfig {
            account_id: ACCOUNT.to_string(),
            bucket: BUCKET.to_string(),
            // trailing separator: a directory that does not exist yet
            download_dir: PathBuf::from(format!("{}/download/", self.dir.path().display())),
            unpack_dir: self.dir.path().join("unzip"),
            workers,
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        }
    }

    pub fn manager(&self, workers: usize) -> PipelineManager {
        PipelineManager::new(self.objects.clone(), self.store.clone(), self.config(workers))
    }

    pub fn records(&self) -> Vec<billing_import::storage::Item> {
        self.store.rows(RECORDS)
    }

    pub fn reports(&self) -> Vec<billing_import::storage::Item> {
        self.store.rows(REPORTS)
    }
}
