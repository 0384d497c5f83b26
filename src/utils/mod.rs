//! Utility functions for the indexer.
//!
//! - [`conversion`] - decimal-string and fixed-point numeric conversions
//! - [`address`] - address normalization to the canonical `workchain:hex64` form

mod address;
mod conversion;

pub use address::normalize_address;
pub use conversion::str_to_f64_with_decimals;
