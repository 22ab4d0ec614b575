mod breaker;
mod invoke;
mod retry;

use std::time::Duration;

use truss_client::{
    BreakerConfig, InvocationManager, ResilienceConfig, RetryPolicy,
};

/// A manager with fast, deterministic retry/breaker settings for tests.
pub fn test_manager(max_attempts: u32, request_threshold: u32) -> InvocationManager {
    test_manager_with_timeout(max_attempts, request_threshold, Duration::from_secs(45))
}

pub fn test_manager_with_timeout(
    max_attempts: u32,
    request_threshold: u32,
    open_timeout: Duration,
) -> InvocationManager {
    InvocationManager::builder()
        .resilience(
            ResilienceConfig::builder()
                .retry(RetryPolicy::fixed(max_attempts, Duration::from_millis(1)))
                .breaker(BreakerConfig {
                    request_threshold,
                    open_timeout,
                    ..BreakerConfig::default()
                })
                .build(),
        )
        .build()
}
