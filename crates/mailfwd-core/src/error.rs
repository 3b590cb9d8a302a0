//! Error types for the mailfwd reconciler
//!
//! Every failure the engine can observe is one of these variants. The
//! classification helpers at the bottom decide how the engine reacts:
//! throttling is retried, "not found" usually means "absent", validation
//! aborts before any mutation, provider errors isolate a single domain and
//! fatal setup errors abort the whole run.

use std::collections::BTreeSet;

use thiserror::Error;

/// Result type alias for mailfwd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the mailfwd system
#[derive(Error, Debug)]
pub enum Error {
    /// The provider rejected the call because of rate limiting (retryable)
    #[error("Throttled: {0}")]
    Throttled(String),

    /// The requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed configuration or mapping detected before mutation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The forwarding graph does not terminate for these addresses
    #[error("Forwarding cycle detected between: {}", join_addresses(.addresses))]
    ForwardingCycle {
        /// Addresses participating in at least one cycle
        addresses: BTreeSet<String>,
    },

    /// Unexpected provider failure
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// A poll loop ran out of attempts before its condition held
    #[error("Timed out waiting for {what} after {attempts} attempt(s)")]
    ConvergenceTimeout {
        /// What was being waited for
        what: String,
        /// Number of fetch/predicate evaluations performed
        attempts: u32,
    },

    /// Domain registration failed after all attempts; manual check required
    #[error("Fatal setup error for domain {domain}: {message}")]
    FatalSetup {
        /// Domain that could not be registered
        domain: String,
        /// Last error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// HTTP transport errors (from provider APIs)
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn join_addresses(addresses: &BTreeSet<String>) -> String {
    addresses.iter().cloned().collect::<Vec<_>>().join(", ")
}

impl Error {
    /// Create a throttling error
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a fatal setup error
    pub fn fatal_setup(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalSetup {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a rate-limit rejection that may be retried
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// Whether the error means "the entity is absent"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the error must abort the whole run
    ///
    /// Validation and cycle errors abort before mutation; fatal setup and
    /// cancellation abort mid-run. Everything else is domain-scoped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ForwardingCycle { .. }
                | Self::FatalSetup { .. }
                | Self::Cancelled
                | Self::Config(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
