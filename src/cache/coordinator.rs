//! Recomputation coordinator.
//!
//! A miss acquires the call's lock (explicit factory first, then the
//! store's own), re-checks the entry, computes, writes and releases. A lock
//! that cannot be acquired in time is logged and the computation proceeds
//! unguarded.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{debug, warn};

use super::error::CacheError;
use super::lifecycle::Lifecycle;
use super::lock::{Lock, LockGuard};

pub const METRIC_LOCK_TIMEOUT: &str = "memora_lock_timeout_total";
pub const METRIC_COMPUTE_MS: &str = "memora_compute_ms";

/// Recompute the value under `key` and store it.
///
/// `etag` is the tag the caller requested; it is stored with the new entry.
/// A failed computation leaves the store untouched.
pub(crate) fn recompute<T, E, F>(
    lifecycle: &Lifecycle<'_>,
    key: &str,
    etag: Option<String>,
    default_timeout: Duration,
    compute: F,
) -> Result<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: From<CacheError>,
    F: FnOnce() -> Result<T, E>,
{
    let resolved = lifecycle.resolved();
    let options = lifecycle.options();
    let timeout = options.timeout.unwrap_or(default_timeout);

    let lock: Option<Box<dyn Lock>> = match &options.lock {
        Some(factory) => Some(factory(key)),
        None => resolved.store.lock(key),
    };

    let _guard = match lock {
        Some(lock) => match LockGuard::acquire(lock, timeout) {
            Some(guard) => {
                // Another holder may have finished the work while we waited.
                if let Some(value) = lifecycle.fresh::<T>(key, etag.as_deref())? {
                    debug!(key, region = %resolved.region, "Cache filled while waiting for lock");
                    return Ok(value);
                }
                Some(guard)
            }
            None => {
                counter!(METRIC_LOCK_TIMEOUT, "region" => resolved.region.clone()).increment(1);
                warn!(
                    key,
                    region = %resolved.region,
                    timeout_ms = timeout.as_millis() as u64,
                    "Recompute lock timed out; computing without it"
                );
                None
            }
        },
        None => None,
    };

    let started = Instant::now();
    let value = compute()?;
    histogram!(METRIC_COMPUTE_MS, "region" => resolved.region.clone())
        .record(started.elapsed().as_secs_f64() * 1000.0);

    lifecycle.write(key, &value, etag)?;
    Ok(value)
}
