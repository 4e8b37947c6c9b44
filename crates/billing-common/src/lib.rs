//! Billing Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the billing import workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Invoice periods**: [`types::InvoicePeriod`], the `YYYY-MM` month an export covers
//! - **Fingerprints**: [`fingerprint::Fingerprint`], content hashes used for change detection
//! - **Logging**: [`logging::init_logging`] for binaries
//!
//! # Example
//!
//! ```no_run
//! use billing_common::fingerprint::Fingerprint;
//! use billing_common::types::InvoicePeriod;
//!
//! fn check(path: &str) -> billing_common::Result<()> {
//!     let period = InvoicePeriod::find_in(path)?;
//!     let fingerprint = Fingerprint::from_etag("\"d41d8cd98f00b204e9800998ecf8427e\"");
//!     fingerprint.verify_file(path)?;
//!     println!("{} verified for {}", fingerprint, period);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
