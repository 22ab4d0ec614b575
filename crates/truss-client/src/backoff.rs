use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

type IntervalFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Retry budget plus the backoff schedule between attempts.
///
/// `max_attempts` counts the initial attempt, so `max_attempts = 3`
/// means one call plus up to two retries. The backoff function receives
/// the 1-based index of the attempt that just failed.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: IntervalFn,
}

impl RetryPolicy {
    /// A policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(move |_| delay),
        }
    }

    /// Exponential backoff with full jitter: the delay doubles each
    /// attempt from `initial` and is then randomized within ±20%.
    pub fn exponential(max_attempts: u32, initial: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(move |attempt| {
                let exp = attempt.saturating_sub(1).min(16);
                let base = initial.saturating_mul(1u32 << exp);
                jitter(base)
            }),
        }
    }

    /// A policy with a caller-supplied backoff function.
    pub fn with_backoff<F>(max_attempts: u32, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(f),
        }
    }

    /// Maximum number of attempts, initial call included. Always ≥ 1.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to sleep after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

impl Default for RetryPolicy {
    /// Three attempts with exponential backoff from 100ms.
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

fn jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    base.mul_f64(factor)
}
