//! Retry policy for chat-completion requests.
//!
//! Transient failures (429, 5xx, network errors) are retried with
//! exponential backoff plus jitter. A server-provided `Retry-After` wins
//! over the computed delay. Everything else fails immediately.

use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Source of the random component added to each backoff.
pub trait JitterSource: Send + Sync {
    /// A value in `[0, base)`.
    fn jitter(&self, base: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, base: Duration) -> Duration {
        use rand::Rng;
        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..base_ms))
    }
}

/// Constant jitter, for deterministic tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, _base: Duration) -> Duration {
        self.0
    }
}

/// Configuration for retry behavior.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay.
    pub base_delay: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 500)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            jitter: Arc::new(RandomJitter),
        }
    }

    /// Replace the jitter source.
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `retry_after` (from the server) is used verbatim when present.
    /// Otherwise `base * 2^attempt + jitter`. Both are capped at [`MAX_BACKOFF`].
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match retry_after {
            Some(wait) => wait,
            None => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                self.base_delay
                    .saturating_mul(factor)
                    .saturating_add(self.jitter.jitter(self.base_delay))
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429, optionally with a `Retry-After` hint.
    RateLimit { retry_after: Option<Duration> },
    /// HTTP 5xx (and 408), optionally with a `Retry-After` hint.
    ServerError { retry_after: Option<Duration> },
    /// Connection reset, DNS failure, deadline exceeded.
    NetworkError,
    /// Authentication failures and every other 4xx.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ErrorKind::RateLimit { retry_after } | ErrorKind::ServerError { retry_after } => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Classify an HTTP status code.
pub fn classify_http_error(status: u16, retry_after_header: Option<&str>) -> ErrorKind {
    let retry_after = retry_after_header
        .and_then(|h| h.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    match status {
        429 => ErrorKind::RateLimit { retry_after },
        408 | 500..=599 => ErrorKind::ServerError { retry_after },
        _ => ErrorKind::Fatal,
    }
}
