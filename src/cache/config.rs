//! Cache configuration.
//!
//! Engine-wide knobs, loadable from the `[cache]` table of `memora.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Engine-wide settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every `get` runs its computation and the store is untouched.
    pub enabled: bool,
    /// Default bound on recompute lock waits (ms), used when no `timeout`
    /// option resolves.
    pub lock_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
