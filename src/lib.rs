//! memora: a memoization engine over pluggable key/value stores.
//!
//! Computations are cached under canonical keys derived from their
//! arguments, with per-region defaults, absolute expiries, etag
//! invalidation and lock-guarded recomputation.

pub mod cache;
pub mod config;
pub mod infra;

pub use cache::{
    Arg, Args, Cache, CacheConfig, CacheError, CachedCall, CallOptions, KeyError, MemoryStore,
    Receiver, Region, Signature, Store, StoreError,
};
