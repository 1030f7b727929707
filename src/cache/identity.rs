//! Instance identities for method-bound computations.
//!
//! Each live instance gets an id the first time it is used with a method
//! handle. Ids come from a counter and are never handed out twice, so an
//! instance allocated where a dropped one used to live starts a fresh
//! partition instead of inheriting the old one's entries.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::error::KeyError;
use super::keys::Arg;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::identity";

/// A type whose instances can receive memoized method calls.
pub trait Receiver: Send + Sync + 'static {
    /// Value of a named attribute, used when `id_field` is configured.
    ///
    /// Returning `None` falls back to the instance's identity.
    fn attribute(&self, _name: &str) -> Option<Arg> {
        None
    }
}

/// Opaque identity token of a live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Slot {
    instance: Weak<dyn Any + Send + Sync>,
    id: InstanceId,
}

/// Assigns stable ids to live instances, keyed by allocation address.
pub struct IdentityArena {
    next: AtomicU64,
    slots: Mutex<HashMap<usize, Slot>>,
}

impl IdentityArena {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Id of `instance`, assigned on first sight.
    pub fn identify<T: Send + Sync + 'static>(&self, instance: &Arc<T>) -> InstanceId {
        let address = Arc::as_ptr(instance) as *const () as usize;
        let mut slots = mutex_lock(&self.slots, SOURCE, "identify");

        if let Some(slot) = slots.get(&address) {
            // A live weak at this address can only be this allocation.
            if slot.instance.strong_count() > 0 {
                return slot.id;
            }
        }

        slots.retain(|_, slot| slot.instance.strong_count() > 0);
        let id = InstanceId(self.next.fetch_add(1, Ordering::Relaxed));
        let weak: Weak<T> = Arc::downgrade(instance);
        let instance: Weak<dyn Any + Send + Sync> = weak;
        slots.insert(address, Slot { instance, id });
        id
    }

    /// Number of tracked live instances. Slots of dropped instances are
    /// released on the way.
    pub fn len(&self) -> usize {
        let mut slots = mutex_lock(&self.slots, SOURCE, "len");
        slots.retain(|_, slot| slot.instance.strong_count() > 0);
        slots.len()
    }

    /// Release slots of dropped instances, returning how many were removed.
    ///
    /// A dead slot's weak reference holds the instance's allocation until it
    /// is released here, by [`Self::len`] or by the next new assignment.
    pub fn prune(&self) -> usize {
        let mut slots = mutex_lock(&self.slots, SOURCE, "prune");
        let before = slots.len();
        slots.retain(|_, slot| slot.instance.strong_count() > 0);
        before - slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Key segment isolating one instance's entries.
pub(crate) fn partition<R: Receiver>(
    arena: &IdentityArena,
    instance: &Arc<R>,
    id_field: Option<&str>,
) -> Result<String, KeyError> {
    if let Some(field) = id_field {
        if let Some(value) = instance.attribute(field) {
            return Ok(format!("{field}={}", value.literal()?));
        }
    }
    Ok(format!("#{}", arena.identify(instance).get()))
}
