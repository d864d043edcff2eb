//! Error types for taskq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The broker is known to be unreachable; nothing was attempted.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("broker error: {0}")]
    Broker(#[from] sqlx::Error),

    /// A queue message that can never be processed, regardless of retries.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors caused by losing (or never having) the broker connection.
    ///
    /// Query-level failures (a missing queue, a bad cast) are not: the
    /// connection is fine and re-declaring would not change the outcome.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::BrokerUnavailable(_) => true,
            Error::Broker(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
