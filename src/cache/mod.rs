//! Rollcall profile cache.
//!
//! One in-memory map is the source of truth for user profiles during a
//! process lifetime. Around it:
//!
//! - **Coalescer**: at most one remote fetch per profile id at a time
//! - **Subscriptions**: per-profile callbacks, notified on every change
//! - **Snapshots**: TTL-bounded copies in a durable side store, written by an
//!   explicit flush
//! - **Listener**: applies remote change events from the change bus
//! - **Enrichment**: resolves avatar storage keys and backfills legacy avatars
//!   in supervised background tasks
//!
//! ## Configuration
//!
//! Behavior is controlled via the `[cache]` table of `rollcall.toml`:
//!
//! ```toml
//! [cache]
//! fetch_timeout_ms = 8000
//! snapshot_ttl_secs = 86400
//! flush_interval_ms = 1000
//! # ... see config.rs for all options
//! ```

mod clock;
mod config;
mod enrich;
mod flush;
mod inflight;
mod listener;
mod lock;
mod registry;
mod service;
mod snapshot;
mod store;
mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use flush::FlushReport;
pub use registry::{ProfileCallback, Subscription};
pub use service::{ProfileSyncService, ProfileSyncServiceBuilder};
pub use tasks::{ErrorSink, log_only_sink};
