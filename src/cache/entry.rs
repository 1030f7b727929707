//! Stored entries and the clock used to judge their freshness.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::entry";

/// Type-erased cached value.
///
/// Stores never inspect values; the engine downcasts on the way out.
#[derive(Clone)]
pub struct CachedValue(Arc<dyn Any + Send + Sync>);

impl CachedValue {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Clone the inner value out if it has type `T`.
    pub fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.0.downcast_ref::<T>().cloned()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CachedValue(..)")
    }
}

/// One stored `(value, expiry, etag)` record.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: CachedValue,
    /// Absolute expiry instant; `None` never expires.
    pub expiry: Option<OffsetDateTime>,
    pub etag: Option<String>,
}

impl Entry {
    pub fn new(value: CachedValue) -> Self {
        Self {
            value,
            expiry: None,
            etag: None,
        }
    }

    pub fn with_expiry(mut self, expiry: Option<OffsetDateTime>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// An entry is live while it has no expiry or its expiry is still ahead.
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expiry.is_none_or(|expiry| expiry > now)
    }

    /// Remaining lifetime; `None` when there is no expiry or none remains.
    pub fn remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        let expiry = self.expiry?;
        Duration::try_from(expiry - now)
            .ok()
            .filter(|remaining| !remaining.is_zero())
    }

    pub(crate) fn value_as<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast::<T>()
    }

    pub(crate) fn expected_type<T>() -> &'static str {
        type_name::<T>()
    }
}

/// `now + after`, or `None` when that instant is beyond what
/// [`OffsetDateTime`] can represent. Callers treat `None` as "never expires".
pub(crate) fn expiry_after(now: OffsetDateTime, after: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(after)
        .ok()
        .and_then(|after| now.checked_add(after))
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(OffsetDateTime::now_utc())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *mutex_lock(&self.now, SOURCE, "set") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}
