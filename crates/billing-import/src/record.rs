//! Billing records and the column coercion table
//!
//! Every CSV column is bound once, when the header is read, to a [`Column`]:
//! a typed [`Field`] of [`Record`], a tag, or nothing. Converting a row is
//! then a walk over the bindings where each [`Field`] parses its raw text with
//! its [`Coercion`] and stores the result in the matching struct field.

use billing_common::types::InvoicePeriod;
use chrono::{NaiveDateTime, SecondsFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::ConvertError;
use crate::storage::Item;

/// Layout of date columns in the export
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Namespace for deriving record ids from `(source name, RecordId)`
pub const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x6f0f_3c1e_9a4b_5d27_8e61_b2c4_d5a9_0f13);

/// One converted billing line item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    pub id: String,
    pub report_name: String,
    #[serde(rename = "InvoiceID")]
    pub invoice_id: String,
    pub payer_account_id: u64,
    pub linked_account_id: u64,
    pub record_type: String,
    pub record_id: String,
    pub product_name: String,
    pub rate_id: i64,
    pub subscription_id: i64,
    pub pricing_plan_id: i64,
    pub usage_type: String,
    pub operation: String,
    pub availability_zone: String,
    pub reserved_instance: String,
    pub item_description: String,
    pub usage_start_date: String,
    pub usage_end_date: String,
    pub usage_quantity: f64,
    pub blended_rate: f64,
    pub blended_cost: f64,
    pub un_blended_rate: f64,
    pub un_blended_cost: f64,
    pub resource_id: String,
    pub tags: BTreeMap<String, String>,
}

impl Record {
    /// Rows without a real `RecordId` (empty or the literal "0") are never stored
    pub fn is_importable(&self) -> bool {
        !self.record_id.is_empty() && self.record_id != "0"
    }

    /// Stable storage key for a line item of an export.
    ///
    /// Re-importing the same export yields the same ids, so writes replace
    /// earlier rows instead of duplicating them.
    pub fn derive_id(source_name: &str, record_id: &str) -> String {
        let name = format!("{}/{}", source_name, record_id);
        Uuid::new_v5(&RECORD_NAMESPACE, name.as_bytes()).to_string()
    }

    pub fn to_item(&self) -> serde_json::Result<Item> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// How a column's raw text becomes a field value.
///
/// Blank numeric columns read as zero; any other text that does not parse
/// rejects the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Text,
    Signed,
    Unsigned,
    Float,
    /// `YYYY-MM-DD HH:MM:SS`, or the invoice period when empty
    Date,
}

/// A first-class column of the export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    InvoiceId,
    PayerAccountId,
    LinkedAccountId,
    RecordType,
    RecordId,
    ProductName,
    RateId,
    SubscriptionId,
    PricingPlanId,
    UsageType,
    Operation,
    AvailabilityZone,
    ReservedInstance,
    ItemDescription,
    UsageStartDate,
    UsageEndDate,
    UsageQuantity,
    BlendedRate,
    BlendedCost,
    UnBlendedRate,
    UnBlendedCost,
    ResourceId,
}

impl Field {
    pub const ALL: [Field; 22] = [
        Field::InvoiceId,
        Field::PayerAccountId,
        Field::LinkedAccountId,
        Field::RecordType,
        Field::RecordId,
        Field::ProductName,
        Field::RateId,
        Field::SubscriptionId,
        Field::PricingPlanId,
        Field::UsageType,
        Field::Operation,
        Field::AvailabilityZone,
        Field::ReservedInstance,
        Field::ItemDescription,
        Field::UsageStartDate,
        Field::UsageEndDate,
        Field::UsageQuantity,
        Field::BlendedRate,
        Field::BlendedCost,
        Field::UnBlendedRate,
        Field::UnBlendedCost,
        Field::ResourceId,
    ];

    /// Header name of the column in the export
    pub fn column_name(self) -> &'static str {
        match self {
            Field::InvoiceId => "InvoiceID",
            Field::PayerAccountId => "PayerAccountId",
            Field::LinkedAccountId => "LinkedAccountId",
            Field::RecordType => "RecordType",
            Field::RecordId => "RecordId",
            Field::ProductName => "ProductName",
            Field::RateId => "RateId",
            Field::SubscriptionId => "SubscriptionId",
            Field::PricingPlanId => "PricingPlanId",
            Field::UsageType => "UsageType",
            Field::Operation => "Operation",
            Field::AvailabilityZone => "AvailabilityZone",
            Field::ReservedInstance => "ReservedInstance",
            Field::ItemDescription => "ItemDescription",
            Field::UsageStartDate => "UsageStartDate",
            Field::UsageEndDate => "UsageEndDate",
            Field::UsageQuantity => "UsageQuantity",
            Field::BlendedRate => "BlendedRate",
            Field::BlendedCost => "BlendedCost",
            Field::UnBlendedRate => "UnBlendedRate",
            Field::UnBlendedCost => "UnBlendedCost",
            Field::ResourceId => "ResourceId",
        }
    }

    pub fn from_column(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|field| field.column_name() == name)
    }

    pub fn coercion(self) -> Coercion {
        match self {
            Field::PayerAccountId | Field::LinkedAccountId => Coercion::Unsigned,
            Field::RateId | Field::SubscriptionId | Field::PricingPlanId => Coercion::Signed,
            Field::UsageStartDate | Field::UsageEndDate => Coercion::Date,
            Field::UsageQuantity
            | Field::BlendedRate
            | Field::BlendedCost
            | Field::UnBlendedRate
            | Field::UnBlendedCost => Coercion::Float,
            Field::InvoiceId
            | Field::RecordType
            | Field::RecordId
            | Field::ProductName
            | Field::UsageType
            | Field::Operation
            | Field::AvailabilityZone
            | Field::ReservedInstance
            | Field::ItemDescription
            | Field::ResourceId => Coercion::Text,
        }
    }

    /// Coerce `raw` and store it in the matching field of `record`
    pub fn assign(
        self,
        record: &mut Record,
        raw: &str,
        period: &InvoicePeriod,
    ) -> Result<(), ConvertError> {
        let name = self.column_name();
        match self {
            Field::InvoiceId => record.invoice_id = raw.to_string(),
            Field::PayerAccountId => record.payer_account_id = parse_unsigned(name, raw)?,
            Field::LinkedAccountId => record.linked_account_id = parse_unsigned(name, raw)?,
            Field::RecordType => record.record_type = raw.to_string(),
            Field::RecordId => record.record_id = raw.to_string(),
            Field::ProductName => record.product_name = raw.to_string(),
            Field::RateId => record.rate_id = parse_signed(name, raw)?,
            Field::SubscriptionId => record.subscription_id = parse_signed(name, raw)?,
            Field::PricingPlanId => record.pricing_plan_id = parse_signed(name, raw)?,
            Field::UsageType => record.usage_type = raw.to_string(),
            Field::Operation => record.operation = raw.to_string(),
            Field::AvailabilityZone => record.availability_zone = raw.to_string(),
            Field::ReservedInstance => record.reserved_instance = raw.to_string(),
            Field::ItemDescription => record.item_description = raw.to_string(),
            Field::UsageStartDate => record.usage_start_date = parse_date(name, raw, period)?,
            Field::UsageEndDate => record.usage_end_date = parse_date(name, raw, period)?,
            Field::UsageQuantity => record.usage_quantity = parse_float(name, raw)?,
            Field::BlendedRate => record.blended_rate = parse_float(name, raw)?,
            Field::BlendedCost => record.blended_cost = parse_float(name, raw)?,
            Field::UnBlendedRate => record.un_blended_rate = parse_float(name, raw)?,
            Field::UnBlendedCost => record.un_blended_cost = parse_float(name, raw)?,
            Field::ResourceId => record.resource_id = raw.to_string(),
        }
        Ok(())
    }
}

fn parse_unsigned(field: &'static str, raw: &str) -> Result<u64, ConvertError> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(|source| ConvertError::Unsigned {
        field,
        value: raw.to_string(),
        source,
    })
}

fn parse_signed(field: &'static str, raw: &str) -> Result<i64, ConvertError> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(|source| ConvertError::Signed {
        field,
        value: raw.to_string(),
        source,
    })
}

fn parse_float(field: &'static str, raw: &str) -> Result<f64, ConvertError> {
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse().map_err(|source| ConvertError::Float {
        field,
        value: raw.to_string(),
        source,
    })
}

fn parse_date(field: &'static str, raw: &str, period: &InvoicePeriod) -> Result<String, ConvertError> {
    if raw.is_empty() {
        return Ok(period.to_rfc3339());
    }
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .map(|date| date.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
        .map_err(|source| ConvertError::Date {
            field,
            value: raw.to_string(),
            source,
        })
}

#[allow(clippy::expect_used)]
fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(user|aws):").expect("tag pattern is valid"))
}

/// What a header column binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    Field(Field),
    /// Tag column, holding the normalized key (`user:env` becomes `user_env`)
    Tag(String),
    /// Column the record has no place for
    Ignored(String),
}

impl Column {
    pub fn from_header(name: &str) -> Self {
        if let Some(field) = Field::from_column(name) {
            Column::Field(field)
        } else if tag_pattern().is_match(name) {
            Column::Tag(name.replace(':', "_"))
        } else {
            Column::Ignored(name.to_string())
        }
    }
}

/// Everything known about an export once its header is read
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDescriptor {
    pub source_name: String,
    pub invoice_period: InvoicePeriod,
    pub field_order: Vec<String>,
    pub columns: Vec<Column>,
}

impl ExportDescriptor {
    pub fn new(source_name: impl Into<String>, invoice_period: InvoicePeriod, field_order: Vec<String>) -> Self {
        let columns = field_order.iter().map(|name| Column::from_header(name)).collect();
        Self {
            source_name: source_name.into(),
            invoice_period,
            field_order,
            columns,
        }
    }

    pub fn ignored_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter_map(|column| match column {
            Column::Ignored(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn period() -> InvoicePeriod {
        "2017-07".parse().unwrap()
    }

    #[test]
    fn test_every_field_round_trips_its_column_name() {
        for field in Field::ALL {
            assert_eq!(Field::from_column(field.column_name()), Some(field));
        }
        assert_eq!(Field::from_column("Id"), None);
        assert_eq!(Field::from_column("invoiceid"), None);
    }

    #[test]
    fn test_assign_coerces_values() {
        let mut record = Record::default();
        Field::InvoiceId.assign(&mut record, "52511536", &period()).unwrap();
        Field::UsageQuantity.assign(&mut record, "0.01101368", &period()).unwrap();
        Field::PayerAccountId.assign(&mut record, "661913936052", &period()).unwrap();
        Field::RateId.assign(&mut record, "-7", &period()).unwrap();

        assert_eq!(record.invoice_id, "52511536");
        assert_eq!(record.usage_quantity, 0.01101368);
        assert_eq!(record.payer_account_id, 661913936052);
        assert_eq!(record.rate_id, -7);
    }

    #[test]
    fn test_assign_reports_the_failing_field() {
        let mut record = Record::default();
        let err = Field::LinkedAccountId
            .assign(&mut record, "-1", &period())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Unsigned { field: "LinkedAccountId", .. }));

        let err = Field::PricingPlanId.assign(&mut record, "1.5", &period()).unwrap_err();
        assert!(matches!(err, ConvertError::Signed { field: "PricingPlanId", .. }));

        let err = Field::BlendedCost.assign(&mut record, "1,5", &period()).unwrap_err();
        assert!(matches!(err, ConvertError::Float { .. }));
    }

    #[test]
    fn test_blank_numbers_are_zero() {
        let mut record = Record {
            rate_id: 9,
            blended_cost: 1.5,
            ..Default::default()
        };
        Field::RateId.assign(&mut record, "", &period()).unwrap();
        Field::BlendedCost.assign(&mut record, "", &period()).unwrap();
        assert_eq!(record.rate_id, 0);
        assert_eq!(record.blended_cost, 0.0);
    }

    #[test]
    fn test_dates_render_as_rfc3339() {
        let mut record = Record::default();
        Field::UsageStartDate
            .assign(&mut record, "2017-07-14 13:00:00", &period())
            .unwrap();
        Field::UsageEndDate.assign(&mut record, "", &period()).unwrap();

        assert_eq!(record.usage_start_date, "2017-07-14T13:00:00Z");
        assert_eq!(record.usage_end_date, "2017-07-01T00:00:00Z");

        let err = Field::UsageEndDate
            .assign(&mut record, "14/07/2017", &period())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Date { field: "UsageEndDate", .. }));
    }

    #[test]
    fn test_header_bindings() {
        assert_eq!(Column::from_header("RecordId"), Column::Field(Field::RecordId));
        assert_eq!(Column::from_header("user:env"), Column::Tag("user_env".into()));
        assert_eq!(
            Column::from_header("aws:createdBy"),
            Column::Tag("aws_createdBy".into())
        );
        assert_eq!(
            Column::from_header("superuser:x"),
            Column::Ignored("superuser:x".into())
        );
        assert_eq!(Column::from_header("Id"), Column::Ignored("Id".into()));
    }

    #[test]
    fn test_importable_record_ids() {
        let mut record = Record::default();
        assert!(!record.is_importable());
        record.record_id = "0".into();
        assert!(!record.is_importable());
        record.record_id = "35330993584143683082238491".into();
        assert!(record.is_importable());
    }

    #[test]
    fn test_derived_ids_are_stable_per_source() {
        let a = Record::derive_id("export-2017-07.csv.zip", "1");
        assert_eq!(a, Record::derive_id("export-2017-07.csv.zip", "1"));
        assert_ne!(a, Record::derive_id("export-2017-08.csv.zip", "1"));
        assert_ne!(a, Record::derive_id("export-2017-07.csv.zip", "2"));
    }

    #[test]
    fn test_item_uses_stored_attribute_names() {
        let mut record = Record {
            record_id: "7".into(),
            invoice_id: "52511536".into(),
            ..Default::default()
        };
        record.tags.insert("user_env".into(), "prod".into());

        let item = record.to_item().unwrap();
        assert_eq!(item["InvoiceID"], "52511536");
        assert_eq!(item["RecordId"], "7");
        assert_eq!(item["UnBlendedCost"], 0.0);
        assert_eq!(item["Tags"]["user_env"], "prod");
    }
}
