//! Error types for the lending API client core.
//!
//! # Design
//! Four variants map one-to-one onto the failure classes callers act on:
//! `Communication` is worth retrying later, `RemoteRejection` is the service
//! saying no, `UnpatchableField` is a schema mismatch on the caller's side and
//! `MalformedResponse` means the body could not be trusted. Two ambient
//! variants cover request encoding and constructor-time validation.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport, the paged fetcher and the patch differ.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every attempt failed transiently (connection error, 429, 502, 503, 504).
    #[error("communication failed after {attempts} attempt(s): {last_error}")]
    Communication { attempts: u32, last_error: String },

    /// The service deterministically rejected the request.
    #[error("service rejected request with HTTP {status} [{code}]: {reason}")]
    RemoteRejection {
        status: u16,
        code: String,
        reason: String,
    },

    /// A field named for diffing has no structural path on the entity.
    #[error("field `{field}` cannot be patched")]
    UnpatchableField { field: String },

    /// A response body was not JSON, or not the expected array/object shape.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// A request body could not be encoded.
    #[error("serialization failed: {message}")]
    Serialization { message: String },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// A string did not name any variant of a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl Error {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedResponse {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }

    /// True when repeating the whole operation later may succeed.
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Error::Communication { .. })
    }

    /// The service's machine-readable error code, for rejections.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Error::RemoteRejection { code, .. } => Some(code),
            _ => None,
        }
    }
}
