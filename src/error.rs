//! Error types for the tiered cache.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or operating the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Settings failed validation (range check or the `fsMax/fsFiles >= 100` cross-check).
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// An operation was attempted from a state that doesn't permit it
    /// (e.g. `stop` on a coordinator that isn't `Working`).
    #[error("illegal lifecycle transition: {0}")]
    LifecycleError(String),

    /// L2 replay failed fatally during `start()`.
    #[error("failed to start filesystem cache: {0}")]
    StartError(String),

    /// A record (key + value + framing) is at or above `fsFileMax` bytes.
    #[error("record too big: {size} bytes (limit {limit})")]
    TooBig { size: usize, limit: usize },

    /// The host's value codec refused to serialize a value.
    #[error("value not serializable: {0}")]
    NotSerializable(String),

    /// A record header failed the decode-time sanity check.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `shutdown`'s bounded wait was interrupted before the worker finished.
    #[error("interrupted while waiting for shutdown")]
    Interrupted,
}
