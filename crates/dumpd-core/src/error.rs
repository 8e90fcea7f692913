//! Error types for dump management operations.
//!
//! Every failure surfaced to a bus caller maps onto one of these variants;
//! the IPC dispatch layer converts them into wire error kinds.

/// Reason string carried by quota rejections.
pub const QUOTA_EXCEEDED_REASON: &str = "Not enough space: Delete old dumps";

/// Errors raised by dump managers and entries.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// A request parameter is malformed or unknown for the family.
    #[error("invalid argument '{name}': '{value}'")]
    InvalidArgument {
        /// Name of the offending parameter.
        name: String,
        /// Value supplied by the caller.
        value: String,
    },

    /// A mutually-exclusive collection is already in flight.
    #[error("collection unavailable: {0}")]
    Unavailable(String),

    /// The byte cap is reached and rotation is disabled.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Unexpected kernel, filesystem, or spawn failure.
    #[error("internal failure: {0}")]
    Internal(String),

    /// The entry has no payload file to hand out.
    #[error("dump file is not available")]
    NoFile,

    /// The payload file could not be opened.
    #[error("failed to open dump file: {0}")]
    Open(String),

    /// No entry with the given id exists in the catalog.
    #[error("dump entry {0} not found")]
    NotFound(u32),
}

impl DumpError {
    /// Quota rejection with the canonical reason string.
    #[must_use]
    pub fn quota_exceeded() -> Self {
        Self::QuotaExceeded(QUOTA_EXCEEDED_REASON.to_string())
    }

    /// Invalid-argument error from a parameter name/value pair.
    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
        }
    }
}
