//! The cache façade.
//!
//! A [`Cache`] owns its regions, its instance identities and its clock.
//! Cloning is cheap and every clone shares the same state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::config::CacheConfig;
use super::coordinator;
use super::entry::{Clock, SystemClock};
use super::error::CacheError;
use super::identity::IdentityArena;
use super::keys::{Args, Signature};
use super::lifecycle::Lifecycle;
use super::memoized::{Decorator, Memoized};
use super::options::CallOptions;
use super::registry::{DEFAULT_REGION, Region, RegionRegistry, Resolved};
use super::store::Store;
use crate::config::RegionSettings;

pub const METRIC_HIT: &str = "memora_hit_total";
pub const METRIC_MISS: &str = "memora_miss_total";

/// Memoization engine handle.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    regions: RegionRegistry,
    identities: IdentityArena,
    clock: Arc<dyn Clock>,
}

/// Builder for a [`Cache`].
pub struct CacheBuilder {
    defaults: CallOptions,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl CacheBuilder {
    /// Options of the `default` region.
    pub fn defaults(mut self, defaults: CallOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Store of the `default` region.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.defaults.store = Some(store);
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Cache {
        // The default region never has a region of its own to point at.
        let mut defaults = self.defaults;
        defaults.region = None;

        Cache {
            inner: Arc::new(CacheInner {
                config: self.config,
                regions: RegionRegistry::new(defaults),
                identities: IdentityArena::new(),
                clock: self.clock,
            }),
        }
    }
}

impl Cache {
    /// A cache whose `default` region uses `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::builder().store(store).build()
    }

    /// A cache whose `default` region carries `defaults`.
    pub fn with_defaults(defaults: CallOptions) -> Self {
        Self::builder().defaults(defaults).build()
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder {
            defaults: CallOptions::new(),
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn regions(&self) -> &RegionRegistry {
        &self.inner.regions
    }

    pub fn identities(&self) -> &IdentityArena {
        &self.inner.identities
    }

    // ------------------------------------------------------------------
    // Regions
    // ------------------------------------------------------------------

    pub fn set_region(&self, name: impl Into<String>, region: Region) -> Result<(), CacheError> {
        self.inner.regions.set(name, region)
    }

    pub fn remove_region(&self, name: &str) -> Result<Option<Region>, CacheError> {
        self.inner.regions.remove(name)
    }

    pub fn region(&self, name: &str) -> Option<Region> {
        self.inner.regions.get(name)
    }

    pub fn region_names(&self) -> Vec<String> {
        self.inner.regions.names()
    }

    /// Register regions loaded from settings.
    ///
    /// Store names are looked up in `stores`. Settings for a region that
    /// already exists are layered over it, so a `default` entry keeps the
    /// store given at construction unless it names another one.
    pub fn install_regions(
        &self,
        regions: &BTreeMap<String, RegionSettings>,
        stores: &HashMap<String, Arc<dyn Store>>,
    ) -> Result<(), CacheError> {
        for (name, settings) in regions {
            let mut options = settings.call_options();
            if let Some(store_name) = &settings.store {
                let store = stores
                    .get(store_name)
                    .ok_or_else(|| CacheError::UnknownStore {
                        region: name.clone(),
                        store: store_name.clone(),
                    })?;
                options.store = Some(Arc::clone(store));
            }

            let mut region = Region::new(options);
            region.parent = settings.parent.clone();
            if let Some(existing) = self.region(name) {
                region.options.fill_from(&existing.options);
                if region.parent.is_none() {
                    region.parent = existing.parent;
                }
            }

            self.set_region(name.clone(), region)?;
            info!(
                region = %name,
                parent = settings.parent.as_deref().unwrap_or(DEFAULT_REGION),
                store = ?settings.store,
                "Installed cache region"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Return the cached value under `key`, computing and storing it on a miss.
    ///
    /// A computation error is returned as is and nothing is written.
    pub fn get<T, E, F>(&self, key: &str, compute: F, options: &CallOptions) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        if !self.inner.config.enabled {
            return compute();
        }

        let resolved = self.resolve(options)?;
        let key = resolved.namespaced(key);
        let lifecycle = Lifecycle::new(&resolved, self.clock());
        let etag = resolved.options.requested_etag();

        if let Some(value) = lifecycle.fresh::<T>(&key, etag.as_deref())? {
            counter!(METRIC_HIT, "region" => resolved.region.clone()).increment(1);
            debug!(key = %key, region = %resolved.region, "Cache hit");
            return Ok(value);
        }

        counter!(METRIC_MISS, "region" => resolved.region.clone()).increment(1);
        debug!(key = %key, region = %resolved.region, "Cache miss");
        coordinator::recompute(
            &lifecycle,
            &key,
            etag,
            self.inner.config.lock_timeout(),
            compute,
        )
    }

    /// Remove the entry under `key`. Missing entries are not an error.
    pub fn delete(&self, key: &str, options: &CallOptions) -> Result<(), CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.delete(key))
    }

    /// Expire the entry under `key` after `maxage` from now. A `maxage` past
    /// the representable range makes the entry permanent.
    pub fn expire(
        &self,
        key: &str,
        maxage: Duration,
        options: &CallOptions,
    ) -> Result<(), CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.expire_after(key, maxage))
    }

    /// Expire the entry under `key` at `at`.
    pub fn expire_at(
        &self,
        key: &str,
        at: OffsetDateTime,
        options: &CallOptions,
    ) -> Result<(), CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.set_expiry(key, Some(at)))
    }

    /// Time left before the entry under `key` expires.
    pub fn ttl(&self, key: &str, options: &CallOptions) -> Result<Option<Duration>, CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.ttl(key))
    }

    pub fn exists(&self, key: &str, options: &CallOptions) -> Result<bool, CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.exists(key))
    }

    pub fn etag(&self, key: &str, options: &CallOptions) -> Result<Option<String>, CacheError> {
        self.with_lifecycle(key, options, |lifecycle, key| lifecycle.etag(key))
    }

    // ------------------------------------------------------------------
    // Decoration
    // ------------------------------------------------------------------

    /// Bind `function` to this cache with no master key or default options.
    pub fn memoize<F, T, E>(&self, signature: Signature, function: F) -> Memoized<F, T, E>
    where
        F: Fn(&Args) -> Result<T, E>,
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
    {
        self.decorator().memoize(signature, function)
    }

    /// Start a decoration with a master key and default options.
    pub fn decorator(&self) -> Decorator {
        Decorator::new(self.clone())
    }

    fn resolve(&self, options: &CallOptions) -> Result<Resolved, CacheError> {
        self.inner.regions.resolve(options)
    }

    fn with_lifecycle<R>(
        &self,
        key: &str,
        options: &CallOptions,
        op: impl FnOnce(&Lifecycle<'_>, &str) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let resolved = self.resolve(options)?;
        let key = resolved.namespaced(key);
        op(&Lifecycle::new(&resolved, self.clock()), &key)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.inner.config)
            .field("regions", &self.region_names())
            .field("instances", &self.inner.identities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use time::macros::datetime;

    use super::*;
    use crate::cache::entry::ManualClock;
    use crate::cache::store::MemoryStore;

    fn cache_with_clock() -> (Cache, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 0:00 UTC)));
        let cache = Cache::builder()
            .store(Arc::clone(&store) as Arc<dyn Store>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build();
        (cache, store, clock)
    }

    #[test]
    fn hit_skips_the_computation() {
        let (cache, _, _) = cache_with_clock();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, CacheError>(42_u32)
        };

        assert_eq!(cache.get("key", compute, &CallOptions::new()).expect("miss"), 42);
        assert_eq!(cache.get("key", compute, &CallOptions::new()).expect("hit"), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn maxage_expires_and_ttl_decays() {
        let (cache, _, clock) = cache_with_clock();
        let options = CallOptions::new().maxage(Duration::from_secs(30));

        cache
            .get("key", || Ok::<_, CacheError>("v".to_string()), &options)
            .expect("miss");
        assert_eq!(
            cache.ttl("key", &options).expect("ttl"),
            Some(Duration::from_secs(30))
        );

        clock.advance(Duration::from_secs(20));
        assert_eq!(
            cache.ttl("key", &options).expect("ttl"),
            Some(Duration::from_secs(10))
        );

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.ttl("key", &options).expect("ttl"), None);
        assert!(!cache.exists("key", &options).expect("exists"));
    }

    #[test]
    fn namespace_prefixes_stored_keys() {
        let (cache, store, _) = cache_with_clock();
        cache
            .get(
                "key",
                || Ok::<_, CacheError>(1_i32),
                &CallOptions::new().namespace("ns"),
            )
            .expect("miss");
        assert_eq!(store.keys(), vec!["ns:key".to_string()]);
    }

    #[test]
    fn etag_mismatch_forces_recompute() {
        let (cache, _, _) = cache_with_clock();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, CacheError>(calls.get())
        };

        let first = CallOptions::new().etag("a");
        assert_eq!(cache.get("key", compute, &first).expect("miss"), 1);
        assert_eq!(cache.get("key", compute, &first).expect("hit"), 1);
        assert_eq!(cache.get("key", compute, &CallOptions::new()).expect("hit"), 1);

        let second = CallOptions::new().etag("b");
        assert_eq!(cache.get("key", compute, &second).expect("miss"), 2);
        assert_eq!(cache.etag("key", &second).expect("etag").as_deref(), Some("b"));
    }

    #[test]
    fn disabled_cache_never_touches_the_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::builder()
            .store(Arc::clone(&store) as Arc<dyn Store>)
            .config(CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            })
            .build();

        let calls = Cell::new(0);
        for _ in 0..2 {
            cache
                .get(
                    "key",
                    || {
                        calls.set(calls.get() + 1);
                        Ok::<_, CacheError>(())
                    },
                    &CallOptions::new(),
                )
                .expect("compute");
        }
        assert_eq!(calls.get(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn expire_moves_expiry_of_existing_entry() {
        let (cache, _, clock) = cache_with_clock();
        let options = CallOptions::new();
        cache
            .get("key", || Ok::<_, CacheError>(5_u8), &options)
            .expect("miss");
        assert_eq!(cache.ttl("key", &options).expect("ttl"), None);

        cache
            .expire("key", Duration::from_secs(5), &options)
            .expect("expire");
        assert_eq!(
            cache.ttl("key", &options).expect("ttl"),
            Some(Duration::from_secs(5))
        );

        clock.advance(Duration::from_secs(5));
        assert!(matches!(
            cache.expire("key", Duration::from_secs(5), &options),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn unbounded_maxage_stores_a_permanent_entry() {
        let (cache, store, clock) = cache_with_clock();
        let options = CallOptions::new().maxage(Duration::MAX);

        assert_eq!(
            cache
                .get("key", || Ok::<_, CacheError>(7_u8), &options)
                .expect("miss"),
            7
        );
        let entry = store.get("key").expect("get").expect("entry");
        assert_eq!(entry.expiry, None);

        clock.advance(Duration::from_secs(86_400 * 365));
        assert!(cache.exists("key", &options).expect("exists"));
        cache.expire("key", Duration::MAX, &options).expect("expire");
        assert_eq!(cache.ttl("key", &options).expect("ttl"), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let (cache, _, _) = cache_with_clock();
        let options = CallOptions::new();
        cache
            .get("key", || Ok::<_, CacheError>(5_u8), &options)
            .expect("miss");
        cache.delete("key", &options).expect("delete");
        cache.delete("key", &options).expect("delete again");
        assert!(!cache.exists("key", &options).expect("exists"));
    }

    #[test]
    fn unknown_region_fails_before_computing() {
        let (cache, _, _) = cache_with_clock();
        let calls = Cell::new(0);
        let result = cache.get(
            "key",
            || {
                calls.set(calls.get() + 1);
                Ok::<_, CacheError>(0)
            },
            &CallOptions::new().region("missing"),
        );
        assert!(matches!(result, Err(CacheError::UnknownRegion { .. })));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn install_regions_resolves_store_names() {
        let (cache, _, _) = cache_with_clock();
        let other: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let stores = HashMap::from([("other".to_string(), Arc::clone(&other))]);
        let regions = BTreeMap::from([
            (
                "short".to_string(),
                RegionSettings {
                    store: Some("other".to_string()),
                    maxage: Some(Duration::from_secs(5)),
                    ..RegionSettings::default()
                },
            ),
            (
                DEFAULT_REGION.to_string(),
                RegionSettings {
                    namespace: Some(Some("app".to_string())),
                    ..RegionSettings::default()
                },
            ),
        ]);

        cache.install_regions(&regions, &stores).expect("install");

        let short = cache.region("short").expect("short region");
        assert!(Arc::ptr_eq(short.options.store.as_ref().expect("store"), &other));
        assert_eq!(short.options.maxage, Some(Duration::from_secs(5)));

        let default = cache.region(DEFAULT_REGION).expect("default region");
        assert!(default.options.store.is_some());
        assert_eq!(default.options.effective_namespace(), Some("app"));
    }

    #[test]
    fn install_regions_rejects_unknown_store() {
        let (cache, _, _) = cache_with_clock();
        let regions = BTreeMap::from([(
            "broken".to_string(),
            RegionSettings {
                store: Some("redis".to_string()),
                ..RegionSettings::default()
            },
        )]);

        assert!(matches!(
            cache.install_regions(&regions, &HashMap::new()),
            Err(CacheError::UnknownStore { store, .. }) if store == "redis"
        ));
    }
}
