//! Region registry.
//!
//! Regions are named option bundles. A call names a region (or gets
//! `default`), and its options are completed by walking the region's parent
//! chain down to `default`, filling only what is still unset.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::error::CacheError;
use super::lock::{rw_read, rw_write};
use super::options::CallOptions;
use super::store::Store;

const SOURCE: &str = "cache::registry";

/// Name of the region every chain ends in.
pub const DEFAULT_REGION: &str = "default";

/// A named bundle of default options.
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub parent: Option<String>,
    pub options: CallOptions,
}

impl Region {
    pub fn new(options: CallOptions) -> Self {
        Self {
            parent: None,
            options,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Options after region resolution, with the store they select.
#[derive(Clone)]
pub struct Resolved {
    pub options: CallOptions,
    pub store: Arc<dyn Store>,
    /// Region the call started from.
    pub region: String,
}

impl Resolved {
    /// Apply the effective namespace to `key`.
    pub fn namespaced(&self, key: &str) -> String {
        match self.options.effective_namespace() {
            Some(namespace) => format!("{namespace}:{key}"),
            None => key.to_string(),
        }
    }
}

/// Regions owned by one cache.
pub struct RegionRegistry {
    regions: RwLock<HashMap<String, Region>>,
}

impl RegionRegistry {
    /// Create a registry whose `default` region carries `defaults`.
    pub fn new(defaults: CallOptions) -> Self {
        let mut regions = HashMap::new();
        regions.insert(DEFAULT_REGION.to_string(), Region::new(defaults));
        Self {
            regions: RwLock::new(regions),
        }
    }

    /// Insert or replace a region.
    pub fn set(&self, name: impl Into<String>, region: Region) -> Result<(), CacheError> {
        let name = name.into();
        if let Some(parent) = region.parent.as_ref().filter(|_| name == DEFAULT_REGION) {
            return Err(CacheError::DefaultRegionParent {
                parent: parent.clone(),
            });
        }
        rw_write(&self.regions, SOURCE, "set").insert(name, region);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Option<Region>, CacheError> {
        if name == DEFAULT_REGION {
            return Err(CacheError::DefaultRegionRemoval);
        }
        Ok(rw_write(&self.regions, SOURCE, "remove").remove(name))
    }

    pub fn get(&self, name: &str) -> Option<Region> {
        rw_read(&self.regions, SOURCE, "get").get(name).cloned()
    }

    /// Registered region names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = rw_read(&self.regions, SOURCE, "names")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Merge the region chain into `call` without requiring a store.
    pub fn merge(&self, call: &CallOptions) -> Result<CallOptions, CacheError> {
        let regions = rw_read(&self.regions, SOURCE, "merge");
        let mut merged = call.clone();
        let mut name = call
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut visited = HashSet::new();

        loop {
            let region = regions
                .get(&name)
                .ok_or_else(|| CacheError::unknown_region(name.as_str()))?;
            if !visited.insert(name.clone()) {
                return Err(CacheError::RegionCycle { name });
            }
            merged.fill_from(&region.options);
            if name == DEFAULT_REGION {
                break;
            }
            name = region
                .parent
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string());
        }

        Ok(merged)
    }

    /// Merge the region chain into `call` and select the store.
    pub fn resolve(&self, call: &CallOptions) -> Result<Resolved, CacheError> {
        let region = call
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let options = self.merge(call)?;
        let store = options
            .store
            .clone()
            .ok_or_else(|| CacheError::missing_store(region.as_str()))?;
        Ok(Resolved {
            options,
            store,
            region,
        })
    }
}
