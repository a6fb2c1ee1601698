use tokio_util::sync::CancellationToken;

use crate::error::SpannerMiddlewareError;

/// Caller-supplied cancellation handle threaded through every operation.
///
/// All database calls are plain request/response awaits on the caller's task;
/// the context exists so a caller can abandon long-running work, most notably
/// an abort-retry replay, which must stop and surface [`Cancelled`] instead of
/// continuing.
///
/// [`Cancelled`]: SpannerMiddlewareError::Cancelled
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// A context that is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Request cancellation of every operation using this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// # Errors
    /// Returns `Cancelled` if the context has been cancelled.
    pub fn ensure_active(&self) -> Result<(), SpannerMiddlewareError> {
        if self.token.is_cancelled() {
            Err(SpannerMiddlewareError::Cancelled)
        } else {
            Ok(())
        }
    }
}
