//! Retry pacing for a single logical operation sequence.
//!
//! A [`Backoff`] is owned by one loop (one stream session) and governed by
//! that loop's cancellation scope. The delay starts at
//! [`BackoffConfig::min_backoff`], doubles after every [`Backoff::wait`] up
//! to [`BackoffConfig::max_backoff`], and returns to the minimum on
//! [`Backoff::reset`].
//!
//! ```text
//! min=50ms max=1s:  50ms -> 100ms -> 200ms -> 400ms -> 800ms -> 1s -> 1s ...
//! ```
//!
//! Once the scope is cancelled [`Backoff::ongoing`] is false and
//! [`Backoff::wait`] returns immediately, so callers leave their loop without
//! sleeping again.

use core::time::Duration;
use qf_worker_core::Error;
use tokio_util::sync::CancellationToken;

/// Bounds for a [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay of the first wait, and the delay after a reset.
    pub min_backoff: Duration,
    /// Upper bound for any single wait.
    pub max_backoff: Duration,
    /// Number of waits after which the backoff gives up. `0` retries forever.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    /// `50ms` to `1s`, unlimited retries.
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            max_retries: 0,
        }
    }
}

/// Backoff state for one retry loop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    scope: CancellationToken,
    delay: Duration,
    num_retries: u32,
}

impl Backoff {
    pub fn new(scope: CancellationToken, config: BackoffConfig) -> Self {
        Self {
            config,
            scope,
            delay: config.min_backoff.min(config.max_backoff),
            num_retries: 0,
        }
    }

    /// Whether the loop using this backoff should keep going.
    pub fn ongoing(&self) -> bool {
        !self.scope.is_cancelled()
            && (self.config.max_retries == 0 || self.num_retries < self.config.max_retries)
    }

    /// Why the backoff stopped, or `None` while it is still ongoing.
    pub fn err(&self) -> Option<Error> {
        if self.scope.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.config.max_retries != 0 && self.num_retries >= self.config.max_retries {
            Some(Error::RetriesExhausted {
                retries: self.num_retries,
            })
        } else {
            None
        }
    }

    /// The scope governing this backoff.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    /// The delay the next [`Backoff::wait`] will sleep for.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Returns the delay for this attempt and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        self.num_retries = self.num_retries.saturating_add(1);
        let delay = self.delay;
        self.delay = delay.saturating_mul(2).min(self.config.max_backoff);
        delay
    }

    /// Sleeps for the current delay, then grows it toward the maximum.
    ///
    /// Returns early when the scope is cancelled.
    pub async fn wait(&mut self) {
        if self.scope.is_cancelled() {
            return;
        }

        let delay = self.next_delay();
        tokio::select! {
            biased;
            () = self.scope.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    /// Returns the delay to its minimum and clears the attempt count.
    pub fn reset(&mut self) {
        self.delay = self.config.min_backoff.min(self.config.max_backoff);
        self.num_retries = 0;
    }
}
