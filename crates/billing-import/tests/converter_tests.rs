//! Conversion of a recorded export file

use billing_import::converter::RecordConverter;
use billing_import::error::{ConvertError, ImportError};
use std::path::PathBuf;

const EXPORT: &str = "123456789012-aws-billing-detailed-line-items-with-resources-and-tags-2017-07.csv";

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(EXPORT)
}

fn convert_fixture() -> Vec<Result<billing_import::record::Record, ImportError>> {
    RecordConverter::open(fixture_path(), &format!("{}.zip", EXPORT))
        .expect("Failed to open fixture")
        .collect()
}

#[test]
fn test_fixture_row_outcomes() {
    let results = convert_fixture();
    assert_eq!(results.len(), 6);

    let converted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(converted.len(), 3);

    // "n/a" usage quantity
    assert!(matches!(
        &results[4],
        Err(ImportError::Convert(ConvertError::Float { field: "UsageQuantity", .. }))
    ));
    // rounding and invoice total lines carry no real RecordId
    assert!(matches!(
        &results[3],
        Err(ImportError::Convert(ConvertError::MissingRecordId { line: 5 }))
    ));
    assert!(matches!(
        &results[5],
        Err(ImportError::Convert(ConvertError::MissingRecordId { line: 7 }))
    ));
}

#[test]
fn test_fixture_values() {
    let results = convert_fixture();

    let ec2 = results[0].as_ref().unwrap();
    assert_eq!(ec2.invoice_id, "Estimated");
    assert_eq!(ec2.payer_account_id, 123456789012);
    assert_eq!(ec2.rate_id, 17143961);
    assert_eq!(ec2.item_description, "$0.0126 per On Demand Linux t2.micro Instance Hour");
    assert_eq!(ec2.usage_end_date, "2017-07-01T01:00:00Z");
    assert_eq!(ec2.tags.get("aws_createdBy").map(String::as_str), Some("IAMUser:AIDAJ:alice"));
    assert_eq!(ec2.tags.get("user_team").map(String::as_str), Some("billing"));

    let s3 = results[1].as_ref().unwrap();
    assert_eq!(s3.linked_account_id, 210987654321);
    assert_eq!(s3.usage_quantity, 0.01101368);
    assert_eq!(s3.availability_zone, "");
    assert_eq!(s3.tags.get("user_team").map(String::as_str), Some(""));

    // empty usage window falls back to the invoice period
    let dynamodb = results[2].as_ref().unwrap();
    assert_eq!(dynamodb.usage_start_date, "2017-07-01T00:00:00Z");
    assert_eq!(dynamodb.usage_end_date, "2017-07-01T00:00:00Z");

    let mut ids: Vec<&str> = [ec2, s3, dynamodb].iter().map(|r| r.id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
