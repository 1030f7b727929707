//! Per-call options and the fill-if-absent merge used by region resolution.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use super::lock::Lock;
use super::store::Store;

/// Produces the comparison etag for a call.
pub type Etagger = Arc<dyn Fn() -> String + Send + Sync>;

/// Produces a recompute lock for a (namespaced) key.
pub type LockFactory = Arc<dyn Fn(&str) -> Box<dyn Lock> + Send + Sync>;

/// Options recognised by every cache operation.
///
/// Every field is optional; unset fields are filled from the region chain.
/// `namespace` is tri-state: `None` is unset, `Some(None)` explicitly clears
/// an inherited namespace.
#[derive(Clone, Default)]
pub struct CallOptions {
    pub region: Option<String>,
    pub namespace: Option<Option<String>>,
    pub store: Option<Arc<dyn Store>>,
    pub maxage: Option<Duration>,
    pub expiry: Option<OffsetDateTime>,
    pub etag: Option<String>,
    pub etagger: Option<Etagger>,
    pub lock: Option<LockFactory>,
    pub timeout: Option<Duration>,
    pub id_field: Option<String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(Some(namespace.into()));
        self
    }

    /// Explicitly store without a namespace, even if a region sets one.
    pub fn no_namespace(mut self) -> Self {
        self.namespace = Some(None);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn maxage(mut self, maxage: Duration) -> Self {
        self.maxage = Some(maxage);
        self
    }

    pub fn expiry(mut self, expiry: OffsetDateTime) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn etagger<F>(mut self, etagger: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.etagger = Some(Arc::new(etagger));
        self
    }

    pub fn lock(mut self, factory: LockFactory) -> Self {
        self.lock = Some(factory);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    /// Fill every unset field from `other`; set fields are never overwritten.
    pub fn fill_from(&mut self, other: &CallOptions) {
        fill(&mut self.region, &other.region);
        fill(&mut self.namespace, &other.namespace);
        fill(&mut self.store, &other.store);
        fill(&mut self.maxage, &other.maxage);
        fill(&mut self.expiry, &other.expiry);
        fill(&mut self.etag, &other.etag);
        fill(&mut self.etagger, &other.etagger);
        fill(&mut self.lock, &other.lock);
        fill(&mut self.timeout, &other.timeout);
        fill(&mut self.id_field, &other.id_field);
    }

    /// `self` layered over `defaults`.
    pub fn over(mut self, defaults: &CallOptions) -> Self {
        self.fill_from(defaults);
        self
    }

    /// The effective namespace after merging, if any.
    pub fn effective_namespace(&self) -> Option<&str> {
        self.namespace.as_ref().and_then(|ns| ns.as_deref())
    }

    /// The etag this call asks for: explicit first, then the etagger.
    pub(crate) fn requested_etag(&self) -> Option<String> {
        self.etag
            .clone()
            .or_else(|| self.etagger.as_ref().map(|etagger| etagger()))
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(fallback);
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("region", &self.region)
            .field("namespace", &self.namespace)
            .field("store", &self.store.as_ref().map(|_| ".."))
            .field("maxage", &self.maxage)
            .field("expiry", &self.expiry)
            .field("etag", &self.etag)
            .field("etagger", &self.etagger.as_ref().map(|_| ".."))
            .field("lock", &self.lock.as_ref().map(|_| ".."))
            .field("timeout", &self.timeout)
            .field("id_field", &self.id_field)
            .finish()
    }
}
