//! Error taxonomy for provider construction and remote calls.
//!
//! Most functions return `anyhow::Result`; the variants here are raised
//! inside those chains so callers can classify a failure with
//! `err.downcast_ref::<RagError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unrecognized provider/backend selection or missing credential.
    /// Fatal at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A remote embedding or generation call failed permanently.
    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    /// The vector index rejected a request or could not be reached.
    #[error("vector store error: {0}")]
    Store(String),

    /// A caller-supplied request is malformed or over a limit.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        RagError::Config(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        RagError::Store(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        RagError::InvalidInput(message.into())
    }
}

/// Returns true when `err` (or anything in its chain) is a
/// [`RagError::Config`].
pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RagError>(),
            Some(RagError::Config(_))
        )
    })
}

/// Returns true when the failure was caused by the caller (bad input or
/// configuration) rather than by a backend.
pub fn is_client_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RagError>(),
            Some(RagError::Config(_)) | Some(RagError::InvalidInput(_))
        )
    })
}
