//! Error types for primenet-manager
//!
//! Every component operation returns [`Result`]. Errors carry enough context
//! (file path, byte offsets, endpoint, HTTP status) to diagnose a failed cycle
//! from the log alone. [`Error::class`] maps each variant onto the coarse
//! taxonomy the orchestrator uses to decide between back-off and termination.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for primenet-manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for primenet-manager
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The settings key that caused the error (e.g., "Devices")
        key: Option<String>,
    },

    /// I/O error without a specific file attached
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error on a managed file
    #[error("I/O error on {path}: {source}")]
    FileIo {
        /// The file being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Transport-level HTTP failure (timeout, connection refused, ...)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Lock marker still held by another process after all retries
    #[error("could not lock {path} after {attempts} attempts")]
    Lock {
        /// The resource whose marker could not be created
        path: PathBuf,
        /// Number of creation attempts made
        attempts: u32,
    },

    /// The remote service answered, but not with what we expected
    #[error("{endpoint} rejected request: {reason}")]
    Protocol {
        /// Which remote endpoint answered
        endpoint: String,
        /// Why the answer was not accepted (HTTP status, missing token, ...)
        reason: String,
    },

    /// Login did not produce an authenticated session
    #[error("not authenticated as {user}")]
    NotAuthenticated {
        /// The user name the login was attempted for
        user: String,
    },

    /// No provider returned any usable assignment
    #[error("no assignments fetched (requested {requested})")]
    NoWork {
        /// Number of assignments that were requested
        requested: usize,
    },

    /// A write reported fewer bytes than the buffer held
    #[error("short write to {path}: {written} of {expected} bytes")]
    ShortWrite {
        /// The file being written
        path: PathBuf,
        /// Bytes actually written
        written: usize,
        /// Bytes that should have been written
        expected: usize,
    },

    /// No line break within the payload ceiling, so the blob cannot be split
    #[error("no line break within {limit} bytes at offset {offset} ({remaining} bytes remaining)")]
    RecordTooLarge {
        /// Byte offset into the blob where splitting failed
        offset: usize,
        /// Bytes left to send from that offset
        remaining: usize,
        /// The payload ceiling in effect
        limit: usize,
    },

    /// Settings file could not be (de)serialized
    #[error("settings error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Too many consecutive failed update cycles
    #[error("failed {attempts} update attempts, giving up")]
    CyclesExhausted {
        /// Number of consecutive failed cycles
        attempts: u32,
    },
}

/// Coarse classification of failures
///
/// Component operations never retry on their own (lock acquisition aside);
/// the orchestrator looks at the class to log and decide what happens next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts and connection errors, always retryable at the cycle level
    TransientNetwork,
    /// A lock marker was held by someone else
    TransientLock,
    /// The remote rejected credentials or did not acknowledge a request
    PersistentProtocol,
    /// Local data cannot be processed as-is (unsplittable record, short write)
    LocalStateCorruption,
    /// Everything else: bad settings, unexpected I/O failures, exhausted retries
    Fatal,
}

impl Error {
    /// Shorthand for a configuration error on a given settings key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Attach a path to an I/O error
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a protocol error
    pub fn protocol(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Protocol {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Which taxonomy bucket this error falls into
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_) => ErrorClass::TransientNetwork,
            Error::Lock { .. } => ErrorClass::TransientLock,
            Error::Protocol { .. } | Error::NotAuthenticated { .. } | Error::NoWork { .. } => {
                ErrorClass::PersistentProtocol
            }
            Error::ShortWrite { .. } | Error::RecordTooLarge { .. } => {
                ErrorClass::LocalStateCorruption
            }
            Error::Config { .. }
            | Error::Io(_)
            | Error::FileIo { .. }
            | Error::Yaml(_)
            | Error::CyclesExhausted { .. } => ErrorClass::Fatal,
        }
    }
}
