//! Testing utilities for hosts embedding linkharvest.
//!
//! This module provides:
//! - A scripted [`StaticFetcher`] serving canned pages, failures and delays
//! - A manual clock re-export for driving session expiry

mod fetchers;

pub use crate::clock::ManualClock;
pub use fetchers::StaticFetcher;
