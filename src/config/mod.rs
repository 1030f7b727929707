//! Configuration layer: typed settings with layered precedence (file → explicit file → env).

use std::{collections::BTreeMap, path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, CallOptions, DEFAULT_REGION};

const LOCAL_CONFIG_BASENAME: &str = "memora";
const ENV_PREFIX: &str = "MEMORA";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub regions: BTreeMap<String, RegionSettings>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Validated options of one region, with its store referred to by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSettings {
    pub parent: Option<String>,
    pub store: Option<String>,
    /// `Some(None)` stores without a namespace even if a parent sets one.
    pub namespace: Option<Option<String>>,
    pub maxage: Option<Duration>,
    pub expiry: Option<OffsetDateTime>,
    pub timeout: Option<Duration>,
    pub id_field: Option<String>,
}

impl RegionSettings {
    /// Call options carried by this region, without the store.
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            namespace: self.namespace.clone(),
            maxage: self.maxage,
            expiry: self.expiry,
            timeout: self.timeout,
            id_field: self.id_field.clone(),
            ..CallOptions::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
///
/// `memora.toml` in the working directory is optional; an explicit `path`
/// must exist. `MEMORA__SECTION__KEY` environment variables win over both.
pub fn load(path: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: CacheConfig,
    regions: BTreeMap<String, RawRegionSettings>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            regions,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_config(cache)?;
        let regions = regions
            .into_iter()
            .map(|(name, region)| {
                let region = build_region_settings(&name, region)?;
                Ok((name, region))
            })
            .collect::<Result<BTreeMap<_, _>, LoadError>>()?;

        Ok(Self {
            logging,
            cache,
            regions,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_config(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.lock_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.lock_timeout_ms",
            "must be greater than zero",
        ));
    }
    Ok(cache)
}

fn build_region_settings(name: &str, raw: RawRegionSettings) -> Result<RegionSettings, LoadError> {
    if name.trim().is_empty() {
        return Err(LoadError::invalid("regions", "region names must not be empty"));
    }
    if name == DEFAULT_REGION && raw.parent.is_some() {
        return Err(LoadError::invalid(
            "regions.default.parent",
            "the default region cannot have a parent",
        ));
    }

    let namespace = match (raw.namespace, raw.no_namespace.unwrap_or(false)) {
        (Some(_), true) => {
            return Err(LoadError::invalid(
                "regions.*.namespace",
                format!("region `{name}` sets both `namespace` and `no_namespace`"),
            ));
        }
        (Some(namespace), false) => {
            let trimmed = namespace.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(
                    "regions.*.namespace",
                    format!("region `{name}` has an empty namespace; use `no_namespace = true`"),
                ));
            }
            Some(Some(trimmed.to_string()))
        }
        (None, true) => Some(None),
        (None, false) => None,
    };

    let maxage = match raw.maxage_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "regions.*.maxage_seconds",
                format!("region `{name}` must use a maxage greater than zero"),
            ));
        }
        seconds => seconds.map(Duration::from_secs),
    };

    let expiry = raw
        .expiry_unix
        .map(OffsetDateTime::from_unix_timestamp)
        .transpose()
        .map_err(|err| {
            LoadError::invalid(
                "regions.*.expiry_unix",
                format!("region `{name}` has an out of range expiry: {err}"),
            )
        })?;

    let timeout = raw.timeout_ms.map(Duration::from_millis);

    Ok(RegionSettings {
        parent: non_empty(raw.parent),
        store: non_empty(raw.store),
        namespace,
        maxage,
        expiry,
        timeout,
        id_field: non_empty(raw.id_field),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRegionSettings {
    parent: Option<String>,
    store: Option<String>,
    namespace: Option<String>,
    no_namespace: Option<bool>,
    maxage_seconds: Option<u64>,
    expiry_unix: Option<i64>,
    timeout_ms: Option<u64>,
    id_field: Option<String>,
}

#[cfg(test)]
mod tests;
