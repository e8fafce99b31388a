use uuid::Uuid;

/// Failure modes of [`submit`](crate::NeuralClient::submit).
///
/// Every submit terminates with a response or exactly one of these. All
/// variants are retriable from the caller's point of view except
/// `DuplicateUuid`, which is a logic error in the calling code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No live upstream connection is installed.
    #[error("neural service not available")]
    ServiceUnavailable,
    /// A request with the same UUID is already in flight.
    #[error("uuid already pending: {0}")]
    DuplicateUuid(Uuid),
    /// The bounded write queue is full.
    #[error("write queue is full")]
    Backpressure,
    /// No response arrived before the configured deadline.
    #[error("timeout waiting neural response")]
    Timeout,
    /// The upstream connection failed while the request was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The client was closed.
    #[error("client closed")]
    Closed,
    /// The request could not be serialized.
    #[error("encode request: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
