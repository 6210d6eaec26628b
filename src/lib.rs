//! relink - Alias resolution for broken web pages
//!
//! Given a dead URL, find the page's current location after a site
//! reorganization by fusing evidence from independent sources:
//! - URL normalization & generalized pattern matching
//! - Per-token transformation-rule classification
//! - Evidence-weighted cluster ranking & verification
//! - Incremental batch orchestration with structural inference

pub mod types;
pub mod urlnorm;
pub mod patterns;
pub mod rules;
pub mod clusters;
pub mod verifier;
pub mod providers;
pub mod engine;
pub mod http_search;
pub mod wayback_client; // Wayback-backed history provider
pub mod cache_client; // Shared document-store cache client

pub use types::*;
pub use verifier::Verifier;
pub use engine::{AliasFinder, SharedAliasFinder};
pub use providers::{
    HistoryProvider, InferenceProvider, MockHistoryProvider, MockInferenceProvider,
    MockNeighborProvider, MockSearchProvider, NeighborProvider, SearchProvider,
};
pub use http_search::HttpSearchProvider;
pub use wayback_client::WaybackClient;
pub use cache_client::CacheClient;
