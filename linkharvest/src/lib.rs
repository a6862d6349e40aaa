//! # Linkharvest
//!
//! Concurrent batch link harvesting with per-user sessions.
//!
//! A user submits a batch of candidate addresses. Valid ones are fetched in
//! parallel by a bounded worker pool, every hyperlink on the returned pages is
//! collected into the user's session, and the session's include/exclude
//! keyword filters decide which links are handed back. Sessions left idle are
//! evicted by a background reaper.
//!
//! - **Validation**: only `http`/`https` addresses with a host are fetched
//! - **Bounded parallelism**: a semaphore-gated task pool with per-fetch timeouts
//! - **Per-user serialization**: one batch per session at a time, others queue
//! - **Progress streaming**: best-effort updates every 20% of a batch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use linkharvest::prelude::*;
//!
//! let harvester = LinkHarvester::new(HarvestConfig::default())?;
//! harvester.start();
//!
//! harvester.set_filters("alice", Some("news, sport"), Some("ads")).await;
//! let report = harvester
//!     .run_batch("alice", ["https://example.com", "not a url"])
//!     .await?;
//! println!("{:?}", report.outcome);
//!
//! harvester.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod address;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod filter;
pub mod harvester;
pub mod orchestrator;
pub mod scrape;
pub mod session;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::address::{
        is_valid_address, parse_address, parse_address_list, AddressList,
        NormalizationPolicy,
    };
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{FetchConfig, HarvestConfig, PoolConfig, SessionConfig};
    pub use crate::delivery::write_link_file;
    pub use crate::errors::{FetchError, FetchErrorKind, HarvestError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::filter::{FilterSet, KeywordSet};
    pub use crate::harvester::{HarvesterBuilder, LinkHarvester};
    pub use crate::orchestrator::{
        BatchEvent, BatchHandle, BatchOrchestrator, BatchOutcome, BatchReport,
    };
    pub use crate::scrape::{
        extract_links, BatchProgress, FetchOutcome, FetchPool, FetchedBody,
        Fetcher, HttpFetcher, LinkExtractor,
    };
    pub use crate::session::{SessionReaper, SessionStatus, SessionStore, UserId};
}
