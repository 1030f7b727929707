//! Memoization engine.
//!
//! A [`Cache`] answers `get(key, computation, options)`: the options are
//! completed from the region chain, the store is checked, and on a miss the
//! computation runs under the key's lock and its result is stored with an
//! expiry and an optional etag.
//!
//! ## Configuration
//!
//! Engine-wide behaviour is controlled via `memora.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! lock_timeout_ms = 5000
//!
//! [regions.short]
//! maxage_seconds = 30
//! namespace = "short"
//! ```

mod config;
mod coordinator;
mod engine;
mod entry;
mod error;
mod identity;
mod keys;
mod lifecycle;
mod lock;
mod memoized;
mod options;
mod registry;
mod store;

pub use config::CacheConfig;
pub use engine::{Cache, CacheBuilder};
pub use entry::{CachedValue, Clock, Entry, ManualClock, SystemClock};
pub use error::{CacheError, KeyError, StoreError};
pub use identity::{IdentityArena, InstanceId, Receiver};
pub use keys::{Arg, Args, Signature, derive_key};
pub use lock::{KeyLock, KeyLocks, Lock};
pub use memoized::{Bound, CachedCall, Decorator, Memoized, MemoizedMethod, MethodCall};
pub use options::{CallOptions, Etagger, LockFactory};
pub use registry::{DEFAULT_REGION, Region, RegionRegistry, Resolved};
pub use store::{MemoryStore, Store};

/// Names of the metrics the engine emits, all labelled by `region`.
pub mod metric_names {
    pub use super::coordinator::{METRIC_COMPUTE_MS, METRIC_LOCK_TIMEOUT};
    pub use super::engine::{METRIC_HIT, METRIC_MISS};
    pub use super::lifecycle::METRIC_LAZY_EVICT;
}
