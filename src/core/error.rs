//! Error types for the surfel index

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    /// A subtree buffer failed structural validation. Construction of that
    /// subtree is aborted; any placeholder for it stays in place.
    #[error("malformed subtree: {0}")]
    MalformedTree(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A subtree fetch failed. The in-flight marker is cleared so a later
    /// traversal can retry the request.
    #[error("streaming unavailable: {0}")]
    StreamingUnavailable(String),

    #[error("config error: {0}")]
    Config(String),
}
