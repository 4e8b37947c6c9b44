//! Object naming convention for published exports

use billing_common::types::InvoicePeriod;

const EXPORT_INFIX: &str = "aws-billing-detailed-line-items-with-resources-and-tags";

/// Name of the monthly detailed billing export for an account
///
/// ```
/// use billing_common::types::InvoicePeriod;
/// use billing_import::naming::export_object_name;
///
/// let period: InvoicePeriod = "2017-07".parse().unwrap();
/// assert_eq!(
///     export_object_name("123456789012", &period),
///     "123456789012-aws-billing-detailed-line-items-with-resources-and-tags-2017-07.csv.zip"
/// );
/// ```
pub fn export_object_name(account_id: &str, period: &InvoicePeriod) -> String {
    format!("{}-{}-{}.csv.zip", account_id, EXPORT_INFIX, period)
}

/// Name of the CSV file stored inside the export archive
pub fn export_csv_name(account_id: &str, period: &InvoicePeriod) -> String {
    format!("{}-{}-{}.csv", account_id, EXPORT_INFIX, period)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_names_share_the_period() {
        let period = InvoicePeriod::new(2018, 1).unwrap();
        let zip = export_object_name("42", &period);
        let csv = export_csv_name("42", &period);

        assert!(zip.ends_with("-2018-01.csv.zip"));
        assert_eq!(format!("{}.zip", csv), zip);
        assert_eq!(InvoicePeriod::find_in(&zip).unwrap(), period);
    }
}
