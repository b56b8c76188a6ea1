//! Tool loop and retry configuration.

use std::sync::Arc;
use std::time::Duration;

/// Bounds and policy for the engine's tool loop.
///
/// ```rust
/// use parley::tool::ToolLoopConfig;
///
/// let config = ToolLoopConfig {
///     max_tool_turns: 3,
///     ..Default::default()
/// };
/// assert!(config.parallel_tool_execution);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLoopConfig {
    /// How many times one `chat` call may answer tool requests before
    /// failing with [`ToolLimitExceeded`](crate::LlmError::ToolLimitExceeded).
    /// Default: 10.
    pub max_tool_turns: u32,
    /// Run one turn's tool requests concurrently. Only takes effect when
    /// the provider also reports `parallel_tools`. Default: true.
    pub parallel_tool_execution: bool,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_tool_turns: 10,
            parallel_tool_execution: true,
        }
    }
}

/// Retry predicate type. Receives the error message.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Automatic retries for a flaky tool.
///
/// A failed call is retried with exponential backoff and jitter until it
/// succeeds or `max_retries` is spent; only the final error is reported.
#[derive(Clone)]
pub struct ToolRetryConfig {
    /// Maximum retry attempts (not counting the initial try). Default: 3.
    pub max_retries: u32,
    /// Backoff before the first retry. Default: 100ms.
    pub initial_backoff: Duration,
    /// Backoff cap. Default: 5 seconds.
    pub max_backoff: Duration,
    /// Growth factor per attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Jitter factor in `0.0..=1.0`. Default: 0.5.
    pub jitter: f64,
    /// Which errors to retry. `None` retries all of them.
    pub retry_if: Option<RetryPredicate>,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.5,
            retry_if: None,
        }
    }
}

impl std::fmt::Debug for ToolRetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl ToolRetryConfig {
    /// Whether an error with this message should be retried.
    pub(crate) fn should_retry(&self, message: &str) -> bool {
        self.retry_if.as_ref().is_none_or(|p| p(message))
    }

    /// Backoff before retry number `attempt` (0-based).
    ///
    /// `min(initial * multiplier^attempt, max) * random(1 - jitter, 1)`
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        use rand::Rng;

        #[allow(clippy::cast_possible_wrap)]
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rand::rng().random_range((1.0 - self.jitter.min(1.0))..=1.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}
