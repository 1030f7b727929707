//! Error types for the memoization engine.

use thiserror::Error;

/// Failures raised by the cache engine itself.
///
/// Computation failures never appear here: computations return the caller's
/// own error type, which only needs a `From<CacheError>` conversion.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("region `{name}` is not registered")]
    UnknownRegion { name: String },
    #[error("no store configured after resolving region `{region}`")]
    MissingStore { region: String },
    #[error("region `{name}` is part of a parent cycle that never reaches `default`")]
    RegionCycle { name: String },
    #[error("the `default` region cannot have a parent (got `{parent}`)")]
    DefaultRegionParent { parent: String },
    #[error("the `default` region cannot be removed")]
    DefaultRegionRemoval,
    #[error("region `{region}` refers to unknown store `{store}`")]
    UnknownStore { region: String, store: String },
    #[error("no cache entry for key `{key}`")]
    NotFound { key: String },
    #[error("cached value under `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    pub fn unknown_region(name: impl Into<String>) -> Self {
        Self::UnknownRegion { name: name.into() }
    }

    pub fn missing_store(region: impl Into<String>) -> Self {
        Self::MissingStore {
            region: region.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true for errors caused by region or store configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownRegion { .. }
                | Self::MissingStore { .. }
                | Self::RegionCycle { .. }
                | Self::DefaultRegionParent { .. }
                | Self::DefaultRegionRemoval
                | Self::UnknownStore { .. }
        )
    }
}

/// Failures while deriving a canonical key from a call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeyError {
    #[error("value `{value}` has no literal representation: {reason}")]
    Unrenderable { value: String, reason: String },
    #[error("missing value for parameter `{name}` of `{function}`")]
    MissingArgument { function: String, name: String },
    #[error("`{function}` takes {expected} positional arguments but {given} were given")]
    UnexpectedArgument {
        function: String,
        expected: usize,
        given: usize,
    },
    #[error("`{function}` got an unexpected keyword argument `{name}`")]
    UnexpectedKeyword { function: String, name: String },
    #[error("invalid signature for `{function}`: {reason}")]
    InvalidSignature { function: String, reason: String },
}

/// Failure reported by a store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error: {message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
