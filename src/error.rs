//! Error types for meshbox
//!
//! Defines a single error enum covering all failure modes of the client.
//! Uses thiserror for ergonomic error handling.

use crate::chunk::ReassemblyError;
use thiserror::Error;

/// Result type alias for meshbox operations
pub type Result<T> = std::result::Result<T, MeshboxError>;

/// Comprehensive error type for meshbox operations
#[derive(Error, Debug)]
pub enum MeshboxError {
    /// Configuration errors (invalid construction input)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level transport failure (DNS, connect, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Terminal non-2xx HTTP response, with the original body preserved
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Retry policy exhausted; wraps the last underlying error
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<MeshboxError>,
    },

    /// Chunk reassembly invariant violation
    #[error("Reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// Unexpected or missing required response field
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A multi-chunk send failed after at least one chunk was accepted.
    ///
    /// The transfer is in an indeterminate state on the server; callers
    /// should query `track_message` before deciding whether to resend.
    #[error(
        "Partial send of message {message_id}: {chunks_sent}/{total_chunks} chunks accepted: {source}"
    )]
    PartialSend {
        message_id: String,
        chunks_sent: u32,
        total_chunks: u32,
        #[source]
        source: Box<MeshboxError>,
    },

    /// HTTP client plumbing errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshboxError {
    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            MeshboxError::HttpStatus { status, .. } => Some(*status),
            MeshboxError::RetryExhausted { source, .. }
            | MeshboxError::PartialSend { source, .. } => source.status(),
            MeshboxError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True if this error represents a connection-level failure rather
    /// than a response the server actually produced.
    pub fn is_connection_error(&self) -> bool {
        match self {
            MeshboxError::Transport(_) => true,
            MeshboxError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
