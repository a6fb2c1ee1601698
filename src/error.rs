use thiserror::Error;

/// Error taxonomy for the middleware.
///
/// The enum is `Clone`/`PartialEq` on purpose: a failed one-shot client
/// initialization is stored on the connector and handed out to every later
/// opener, and the transaction replay log compares recorded statement
/// failures against their replayed counterparts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpannerMiddlewareError {
    /// Malformed descriptor or parameter, or an unbindable value.
    /// Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection is in a state that does not allow the operation
    /// (batch/transaction conflicts, DDL inside a transaction, and so on).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The backing database invalidated the read/write set of a read-write
    /// transaction. Retried internally unless retries are disabled.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// A replayed statement returned a different result than its original
    /// execution. This is a correctness signal and is never retried.
    #[error("transaction aborted due to a concurrent modification")]
    AbortedDueToConcurrentModification,

    /// Sentinel telling the owning pool to discard this connection instead
    /// of reusing it.
    #[error("bad connection: {0}")]
    BadConnection(String),

    /// The caller cancelled the operation through its [`Context`].
    ///
    /// [`Context`]: crate::context::Context
    #[error("operation cancelled")]
    Cancelled,

    /// Any other error reported by the backing client, passed through
    /// without further classification.
    #[error("client error: {0}")]
    Client(String),
}

impl SpannerMiddlewareError {
    /// True for the retryable abort signal (not for the distinguished
    /// concurrent-modification error).
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, SpannerMiddlewareError::Aborted(_))
    }

    #[must_use]
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, SpannerMiddlewareError::BadConnection(_))
    }

    pub(crate) fn bad_connection(msg: impl Into<String>) -> Self {
        SpannerMiddlewareError::BadConnection(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        SpannerMiddlewareError::InvalidArgument(msg.into())
    }

    pub(crate) fn failed_precondition(msg: impl Into<String>) -> Self {
        SpannerMiddlewareError::FailedPrecondition(msg.into())
    }
}
