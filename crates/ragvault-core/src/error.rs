//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant carries a stable machine-readable [`code`](VaultError::code)
//! that frontends (CLI, HTTP) surface alongside the human-readable message.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The call did not complete within the adapter's deadline.
    Timeout,
    /// Network failure, rate limiting, or a 5xx response.
    Transient,
    /// The provider refused the request (auth, quota, bad input).
    Rejected,
    /// The provider answered with something we could not use.
    Malformed,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{provider} {} failure: {message}", .kind.as_str())]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("user {user_id} has reached the limit of {max_documents} documents")]
    LimitExceeded {
        user_id: String,
        max_documents: usize,
    },

    /// An explicit delete named a document that does not exist. The HTTP
    /// delete route reports this as `{"success": false}` instead.
    #[error("document {item_id} not found")]
    NotFound { item_id: String },
}

impl VaultError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::Provider {
                kind: ProviderErrorKind::Timeout,
                ..
            } => "provider_timeout",
            Self::Provider { .. } => "provider_error",
            Self::Validation(_) => "validation_error",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::NotFound { .. } => "not_found",
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                kind: ProviderErrorKind::Timeout | ProviderErrorKind::Transient,
                ..
            }
        )
    }
}
