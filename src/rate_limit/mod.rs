//! Rate limiting module
//!
//! Fixed-window request quotas in four tiers (global, auth, api, upload),
//! counted either in process or in a shared Redis store.
//!
//! # Store selection
//!
//! The store is chosen once at startup by [`select_store`]. When the shared
//! store is requested but cannot be reached, the gateway logs a warning and
//! counts locally for the rest of its lifetime.
//!
//! # Example
//!
//! ```rust,no_run
//! use edge_gateway::config::RateLimitingConfig;
//! use edge_gateway::rate_limit::{select_store, RateLimiterService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RateLimitingConfig::default();
//!     let store = select_store(&config).await;
//!     let limiter = RateLimiterService::new(store, &config);
//!     println!("counting in {:?}", limiter.store_kind());
//! }
//! ```

pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use middleware::{add_rate_limit_headers, rate_limit_middleware};
pub use service::{RateLimiterService, TierRules};
pub use store::{select_store, CountingStore, StoreKind};
pub use types::{ClientKey, RateLimitResult, RateRule, Tier};
