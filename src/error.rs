//! Error taxonomy for the request pipeline.
//!
//! Every failure the chat and upload pipelines can produce is a
//! [`DocentError`]. Each variant maps to a stable machine-readable code and an
//! HTTP status (see [`DocentError::code`] and [`DocentError::status`]).
//! Capability and internal failures carry full detail for logs and metrics,
//! but [`DocentError::public_message`] never exposes it to clients.

use thiserror::Error;

/// Errors surfaced by the chat and upload pipelines.
#[derive(Debug, Error)]
pub enum DocentError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// The client exceeded the admission ceiling for the current window.
    #[error("too many requests, please try again later")]
    RateLimited,

    /// No index exists and the request supplied no documents.
    #[error("no documents available to search through")]
    NotFound,

    /// The uploaded file's MIME type has no parser.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// An external capability (embedding, completion, parsing) failed.
    #[error("{capability} failed: {message}")]
    Capability {
        /// `"embedding"`, `"completion"` or `"parse"`.
        capability: &'static str,
        message: String,
    },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, DocentError>;

impl DocentError {
    pub fn embedding(err: impl std::fmt::Display) -> Self {
        DocentError::Capability {
            capability: "embedding",
            message: err.to_string(),
        }
    }

    pub fn completion(err: impl std::fmt::Display) -> Self {
        DocentError::Capability {
            capability: "completion",
            message: err.to_string(),
        }
    }

    pub fn parse(err: impl std::fmt::Display) -> Self {
        DocentError::Capability {
            capability: "parse",
            message: err.to_string(),
        }
    }

    /// Stable category string sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            DocentError::Validation(_) => "bad_request",
            DocentError::RateLimited => "rate_limited",
            DocentError::NotFound => "no_documents",
            DocentError::UnsupportedFormat(_) => "unsupported_format",
            DocentError::Capability { .. } => "capability_error",
            DocentError::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            DocentError::Validation(_)
            | DocentError::NotFound
            | DocentError::UnsupportedFormat(_) => 400,
            DocentError::RateLimited => 429,
            DocentError::Capability { .. } | DocentError::Internal(_) => 500,
        }
    }

    /// Whether this error is a server-side failure (as opposed to a client error).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }

    /// Message safe to return to a client.
    ///
    /// Server-side failures collapse to a generic message; client errors keep
    /// their text since it only echoes what the client sent.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            "error processing request".to_string()
        } else {
            self.to_string()
        }
    }
}
