use std::time::Duration;

use crate::context::Context;
use crate::error::SpannerMiddlewareError;

/// Bounds for the internal abort-retry loop: a capped number of attempts
/// with exponential backoff between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortRetryPolicy {
    /// Maximum number of replay attempts before the abort becomes terminal.
    pub max_attempts: u32,
    /// Delay before the first replay attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling for the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for AbortRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl AbortRetryPolicy {
    /// The backoff delay preceding the given 1-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    /// Sleep out the backoff for the given attempt, racing cancellation.
    ///
    /// # Errors
    /// Returns `Cancelled` if the context is cancelled before the delay
    /// elapses.
    pub(crate) async fn backoff(
        &self,
        attempt: u32,
        ctx: &Context,
    ) -> Result<(), SpannerMiddlewareError> {
        ctx.ensure_active()?;
        let delay = self.delay_for(attempt);
        tokio::select! {
            () = ctx.cancelled() => Err(SpannerMiddlewareError::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = AbortRetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3), Duration::from_millis(80));
        assert_eq!(policy.delay_for(12), Duration::from_secs(1));
    }
}
