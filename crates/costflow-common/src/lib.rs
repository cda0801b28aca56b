//! Costflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Costflow workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Digests**: Canonical JSON and SHA-256 helpers used for record identity
//! - **Calendar**: Billing period labels and the date ranges they cover
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use costflow_common::calendar::Period;
//! use costflow_common::Result;
//!
//! fn days() -> Result<()> {
//!     let period: Period = "3d".parse()?;
//!     for range in period.ranges(chrono::Utc::now().date_naive()) {
//!         tracing::info!(start = %range.start, end = %range.end, "range");
//!     }
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod digest;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
