//! Error types for the router.
//!
//! Mirrors the disposition table in the router's error-handling design: a
//! small set of structural failures surface as `Err`, while ordinary data-path
//! outcomes (scope misses, boundary drops, inactive connections) are not
//! errors at all and are only ever traced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid signal path '{0}': expected /device/signal")]
    BadName(String),

    #[error("device name segment too long in path '{0}' (max 255 bytes)")]
    NameTooLong(String),

    #[error("connection has {found} sources, exceeding the configured maximum of {max}")]
    TooManySources { found: usize, max: usize },

    #[error("connection {0:?} not found")]
    UnknownConnection(crate::connection::ConnectionId),

    #[error("link {0:?} not found")]
    UnknownLink(crate::link::LinkId),

    #[error("expression compilation failed: {0}")]
    ExpressionCompile(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("transport error sending to {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type RouterResult<T> = Result<T, RouterError>;
