//! Entry lifecycle: freshness, etag checks, writes and lazy eviction.

use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::entry::{CachedValue, Clock, Entry, expiry_after};
use super::error::CacheError;
use super::options::CallOptions;
use super::registry::Resolved;

pub const METRIC_LAZY_EVICT: &str = "memora_lazy_evict_total";

/// Entry operations against one resolved store.
pub(crate) struct Lifecycle<'a> {
    resolved: &'a Resolved,
    clock: &'a dyn Clock,
}

impl<'a> Lifecycle<'a> {
    pub(crate) fn new(resolved: &'a Resolved, clock: &'a dyn Clock) -> Self {
        Self { resolved, clock }
    }

    pub(crate) fn options(&self) -> &CallOptions {
        &self.resolved.options
    }

    pub(crate) fn resolved(&self) -> &Resolved {
        self.resolved
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// The live entry under `key`, deleting it if it has expired.
    pub(crate) fn lookup(&self, key: &str) -> Result<Option<Entry>, CacheError> {
        let Some(entry) = self.resolved.store.get(key)? else {
            return Ok(None);
        };
        if entry.is_live(self.now()) {
            return Ok(Some(entry));
        }

        self.resolved.store.delete(key)?;
        counter!(METRIC_LAZY_EVICT, "region" => self.resolved.region.clone()).increment(1);
        debug!(key, region = %self.resolved.region, "Evicted expired cache entry on lookup");
        Ok(None)
    }

    /// The cached value if the entry is live and satisfies `requested` etag.
    ///
    /// No requested etag means any stored etag is acceptable.
    pub(crate) fn fresh<T: Clone + 'static>(
        &self,
        key: &str,
        requested: Option<&str>,
    ) -> Result<Option<T>, CacheError> {
        let Some(entry) = self.lookup(key)? else {
            return Ok(None);
        };
        if let Some(requested) = requested {
            if entry.etag.as_deref() != Some(requested) {
                debug!(
                    key,
                    stored = ?entry.etag,
                    requested,
                    "Cache entry etag mismatch"
                );
                return Ok(None);
            }
        }
        entry
            .value_as::<T>()
            .map(Some)
            .ok_or_else(|| CacheError::TypeMismatch {
                key: key.to_string(),
                expected: Entry::expected_type::<T>(),
            })
    }

    /// Store a freshly computed value.
    ///
    /// Expiry comes from `expiry`, else `now + maxage`, else never. A maxage
    /// reaching past the representable range also means never.
    pub(crate) fn write<T: Clone + Send + Sync + 'static>(
        &self,
        key: &str,
        value: &T,
        etag: Option<String>,
    ) -> Result<(), CacheError> {
        let options = self.options();
        let expiry = options
            .expiry
            .or_else(|| options.maxage.and_then(|maxage| expiry_after(self.now(), maxage)));
        let entry = Entry::new(CachedValue::new(value.clone()))
            .with_expiry(expiry)
            .with_etag(etag);

        self.resolved.store.set(key, entry)?;
        debug!(key, region = %self.resolved.region, ?expiry, "Cache entry written");
        Ok(())
    }

    pub(crate) fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.resolved.store.delete(key)?;
        debug!(key, region = %self.resolved.region, "Cache entry deleted");
        Ok(())
    }

    /// Move the expiry of a live entry, keeping its value and etag. `None`
    /// makes the entry permanent.
    pub(crate) fn set_expiry(
        &self,
        key: &str,
        expiry: Option<OffsetDateTime>,
    ) -> Result<(), CacheError> {
        let entry = self
            .lookup(key)?
            .ok_or_else(|| CacheError::not_found(key))?;
        self.resolved.store.set(key, entry.with_expiry(expiry))?;
        debug!(key, region = %self.resolved.region, ?expiry, "Cache entry expiry moved");
        Ok(())
    }

    /// Expire a live entry `after` from now.
    pub(crate) fn expire_after(&self, key: &str, after: Duration) -> Result<(), CacheError> {
        self.set_expiry(key, expiry_after(self.now(), after))
    }

    pub(crate) fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        if let Some(native) = self.resolved.store.native_ttl(key) {
            return Ok(native?);
        }
        let now = self.now();
        Ok(self.lookup(key)?.and_then(|entry| entry.remaining(now)))
    }

    pub(crate) fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lookup(key)?.is_some())
    }

    pub(crate) fn etag(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lookup(key)?.and_then(|entry| entry.etag))
    }
}
