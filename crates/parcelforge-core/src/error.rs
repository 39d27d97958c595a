//! Error types shared by the parcelforge crates.

use thiserror::Error;

/// Errors that can occur while discovering, adapting or driving providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A module could not be loaded or instantiated.
    #[error("Module load failed for {source_id}: {message}")]
    ModuleLoad { source_id: String, message: String },

    /// Failed to parse a module manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The handle has no member with that name in its capability contract.
    #[error("Unknown member '{member}' on {capability}")]
    UnknownMember { capability: String, member: String },

    /// Arguments did not match the member signature.
    #[error("Invalid arguments for '{member}': {reason}")]
    InvalidArguments { member: String, reason: String },

    /// Raised by provider code.
    #[error("Provider error: {0}")]
    Plugin(String),

    /// A provider's one-time setup failed. The provider stays excluded.
    #[error("Provider '{provider}' failed to initialize: {reason}")]
    InitializationFailed { provider: String, reason: String },

    /// The request was cancelled before it produced a result.
    #[error("Request cancelled")]
    Cancelled,

    /// A provider operation faulted.
    #[error("Provider '{provider}' faulted in '{operation}': {message}")]
    Faulted {
        provider: String,
        operation: String,
        message: String,
    },

    /// A missing provider could not be bootstrapped.
    #[error("Bootstrap failed for '{provider}': {reason}")]
    BootstrapFailed { provider: String, reason: String },

    /// No provider with that name is registered.
    #[error("Provider not found: {0}")]
    NotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProviderError {
    /// Shorthand for an error raised inside provider code.
    pub fn plugin(message: impl Into<String>) -> Self {
        ProviderError::Plugin(message.into())
    }

    /// Whether this error is the result of cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
