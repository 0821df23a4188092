//! Reconnection Policy
//!
//! Fixed backoff ladder for hub reconnection. A reconnect only makes sense
//! while the session can be resumed: the token must still be valid and at
//! least one message must have been received, otherwise the transport
//! closes and the caller starts a fresh session.

use std::time::Duration;

use crate::domain::connection::SessionContext;

/// Delays, in milliseconds, indexed by consecutive attempt count.
pub const RETRY_LADDER_MS: [u64; 5] = [0, 2_000, 3_000, 5_000, 10_000];

/// Decides whether and when to retry a dropped hub connection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    ladder: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RETRY_LADDER_MS.iter().copied().map(Duration::from_millis).collect())
    }
}

impl RetryPolicy {
    /// Create a policy with a custom ladder.
    #[must_use]
    pub const fn new(ladder: Vec<Duration>) -> Self {
        Self { ladder }
    }

    /// Delay before attempt number `previous_retry_count`, or `None` to stop.
    ///
    /// Stops when the token has expired, when nothing has been received in
    /// this session, or when the ladder is exhausted.
    #[must_use]
    pub fn next_retry_delay(
        &self,
        previous_retry_count: u32,
        session: &SessionContext,
        now_ms: i64,
    ) -> Option<Duration> {
        if session.is_token_expired(now_ms) || !session.is_resumable() {
            return None;
        }

        usize::try_from(previous_retry_count)
            .ok()
            .and_then(|index| self.ladder.get(index))
            .copied()
    }
}
