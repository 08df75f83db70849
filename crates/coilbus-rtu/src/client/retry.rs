// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry and backoff strategies.
//!
//! Transactions themselves are never retried here; a write that may have
//! reached the device must not be repeated blindly. Retry policy covers
//! opening the port and whole multi-register procedures such as reading
//! the device settings.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::RtuResult;

// =============================================================================
// RetryConfig
// =============================================================================

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry strategy to use.
    #[serde(default)]
    pub strategy: RetryStrategy,
}

fn default_max_retries() -> u32 {
    3
}

impl RetryConfig {
    /// Creates a new retry configuration with the given max retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::default(),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            strategy: RetryStrategy::Immediate,
        }
    }

    /// Creates a configuration with exponential backoff.
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Exponential(ExponentialBackoff::new(initial_delay, max_delay)),
        }
    }

    /// Creates a configuration with fixed delay.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Sets the retry strategy.
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Total attempts including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            strategy: RetryStrategy::default(),
        }
    }
}

// =============================================================================
// RetryStrategy
// =============================================================================

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// No delay between retries.
    Immediate,
    /// Fixed delay between retries.
    Fixed(#[serde(with = "humantime_serde")] Duration),
    /// Linear backoff (delay * attempt).
    Linear(LinearBackoff),
    /// Exponential backoff with optional jitter.
    Exponential(ExponentialBackoff),
}

impl RetryStrategy {
    /// Calculates the delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(duration) => *duration,
            Self::Linear(linear) => linear.delay(attempt),
            Self::Exponential(exp) => exp.delay(attempt),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential(ExponentialBackoff::default())
    }
}

// =============================================================================
// LinearBackoff
// =============================================================================

/// Linear backoff strategy.
///
/// Delay increases linearly with each attempt: base_delay * (attempt + 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearBackoff {
    /// Base delay for the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl LinearBackoff {
    /// Creates a new linear backoff.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Calculates the delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(attempt.saturating_add(1));
        delay.min(self.max_delay)
    }
}

// =============================================================================
// ExponentialBackoff
// =============================================================================

/// Exponential backoff strategy with optional jitter.
///
/// Delay doubles with each attempt: initial_delay * 2^attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Initial delay for the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum delay cap.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier for each attempt (default: 2.0).
    pub multiplier: f64,
    /// Jitter factor (0.0 = no jitter, 1.0 = up to 100% jitter).
    pub jitter_factor: f64,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Calculates the delay for the given attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter_factor > 0.0 {
            let jitter_range = capped * self.jitter_factor;
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

// =============================================================================
// with_retry
// =============================================================================

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the configured attempts are used up.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> RtuResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RtuResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() || attempt >= config.max_retries {
                    return Err(error);
                }

                let delay = config.strategy.delay(attempt);
                tracing::debug!(
                    operation = what,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
