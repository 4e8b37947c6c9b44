//! Shared domain types

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{CommonError, Result};

/// Month covered by a billing export, written `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvoicePeriod {
    year: i32,
    month: u32,
}

#[allow(clippy::expect_used)]
fn period_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{4}-\d{2}").expect("period pattern is valid"))
}

impl InvoicePeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(CommonError::InvalidPeriod(format!(
                "month {} is outside 1..=12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Find the first `YYYY-MM` occurrence in a file name or path
    pub fn find_in(text: &str) -> Result<Self> {
        let found = period_pattern()
            .find(text)
            .ok_or_else(|| CommonError::InvalidPeriod(format!("no YYYY-MM in '{}'", text)))?;
        found.as_str().parse()
    }

    /// First second of the month, UTC
    pub fn first_instant(&self) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn to_rfc3339(&self) -> String {
        self.first_instant()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl FromStr for InvoicePeriod {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| CommonError::InvalidPeriod(s.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(CommonError::InvalidPeriod(s.to_string()));
        }
        let year = year
            .parse()
            .map_err(|_| CommonError::InvalidPeriod(s.to_string()))?;
        let month = month
            .parse()
            .map_err(|_| CommonError::InvalidPeriod(s.to_string()))?;
        Self::new(year, month)
    }
}

impl fmt::Display for InvoicePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_period() {
        let period: InvoicePeriod = "2017-07".parse().unwrap();
        assert_eq!(period.year(), 2017);
        assert_eq!(period.month(), 7);
        assert_eq!(period.to_string(), "2017-07");
    }

    #[test]
    fn test_parse_period_rejects_bad_month() {
        assert!("2017-13".parse::<InvoicePeriod>().is_err());
        assert!("2017-00".parse::<InvoicePeriod>().is_err());
        assert!("17-07".parse::<InvoicePeriod>().is_err());
        assert!("july".parse::<InvoicePeriod>().is_err());
    }

    #[test]
    fn test_find_in_file_name() {
        let name = "/tmp/unzip/123456789012-aws-billing-detailed-line-items-with-resources-and-tags-2017-07.csv";
        let period = InvoicePeriod::find_in(name).unwrap();
        assert_eq!(period, InvoicePeriod::new(2017, 7).unwrap());
    }

    #[test]
    fn test_find_in_without_date() {
        assert!(matches!(
            InvoicePeriod::find_in("invalid-name.csv"),
            Err(CommonError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_rfc3339_is_first_of_month() {
        let period = InvoicePeriod::new(2015, 4).unwrap();
        assert_eq!(period.to_rfc3339(), "2015-04-01T00:00:00Z");
    }
}
