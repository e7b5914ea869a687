use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single protocol operation. Every failure is terminal for the
/// operation that hit it; nothing in this crate retries on its own, so the
/// variants exist to let callers decide what is worth retrying.
#[derive(Debug, Error)]
pub enum JpipError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("transport i/o error: {0}")]
    Transport(#[source] io::Error),

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    /// Wrong magic bytes, malformed header, or a stream that ended before the
    /// announced byte count.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A local precondition check failed; no network I/O was attempted.
    #[error("refused locally: {0}")]
    SemanticRefusal(&'static str),
}

impl JpipError {
    pub fn violation(msg: impl Into<String>) -> JpipError {
        JpipError::ProtocolViolation(msg.into())
    }

    /// Transient failures a caller may reasonably retry with the same
    /// parameters. Protocol violations and local refusals are not transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            JpipError::Timeout(_)
            | JpipError::ConnectionRefused(_)
            | JpipError::Transport(_)
            | JpipError::Http(_) => true,
            JpipError::ProtocolViolation(_) | JpipError::SemanticRefusal(_) => false,
        }
    }
}

impl From<io::Error> for JpipError {
    fn from(e: io::Error) -> JpipError {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => JpipError::ConnectionRefused(e.to_string()),
            // a stream that ends mid-header or mid-body is a framing error,
            // not a transport error: whatever was read is discarded
            io::ErrorKind::UnexpectedEof => {
                JpipError::ProtocolViolation(format!("stream ended before expected byte count: {}", e))
            }
            _ => JpipError::Transport(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, JpipError>;
