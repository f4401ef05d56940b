//! # sitekit Service Worker
//!
//! Versioned cache router for the modern-jan static site.
//!
//! ## Features
//!
//! - **Lifecycle**: install (warm the static partition), activate (retire
//!   old versions, claim pages)
//! - **Routing**: ordered rule table, first match wins
//! - **Strategies**: cache-first for images and build assets, network-first
//!   with offline fallback for pages
//! - **Partitions**: static, dynamic and image caches named after the version
//!
//! ## Architecture
//!
//! ```text
//! CacheRouter (one per cache version)
//!     ├── RouterConfig (version, origins, seed routes)
//!     ├── RuleTable ── Request → PassThrough | CacheFirst(kind) | NetworkFirst
//!     ├── Fetcher (network)
//!     └── CacheStorage (shared)
//!             ├── {version}-static
//!             ├── {version}-dynamic
//!             └── {version}-images
//! ```

use sitekit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod router;
pub mod rules;

pub use cache::{Cache, CacheEntry, CacheStorage, RequestKey};
pub use clients::{Client, ClientType, Clients};
pub use config::{PartitionKind, RouterConfig};
pub use router::{
    CacheRouter, FetchOutcome, ResponseSource, RoutedResponse, RouterEvent, WorkerState,
};
pub use rules::{RouteCondition, RouteDecision, RouteOutcome, RouteRule, RuleTable, Strategy};

/// Errors surfaced by the router.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Network fetch failed for a cache-first miss.
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    /// Navigation failed with no cached page and no offline document.
    #[error("Offline and nothing cached for {url}")]
    Offline {
        url: String,
        #[source]
        source: NetError,
    },

    /// A seed route could not be cached during install.
    #[error("Seed error: {0}")]
    Seed(String),
}
