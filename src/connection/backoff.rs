// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconnection backoff.

use std::time::Duration;

use rand::Rng;

/// Configuration for automatic reconnection.
///
/// Reconnection never gives up: attempts are unbounded and the delay grows
/// exponentially up to `max_delay`. Many devices tend to drop at the same
/// moment, so every supervisor draws a random jitter factor once and
/// stretches all its delays by it, spreading the reconnect bursts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dyson_link::connection::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::new()
///     .with_initial_delay(Duration::from_millis(500))
///     .with_max_delay(Duration::from_secs(30))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f32,
    /// Maximum jitter as a fraction of the delay (0.25 = up to +25 %).
    pub jitter: f32,
}

impl ReconnectionPolicy {
    /// Creates a new reconnection policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between retry attempts.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum jitter fraction. Negative values are treated as 0.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Calculates the delay for a given retry attempt without jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, 0.0)
    }

    /// Calculates the delay for a given retry attempt, stretched by
    /// `jitter_factor` and capped at `max_delay`.
    ///
    /// For a fixed factor the sequence is non-decreasing in `attempt` and
    /// settles at `max_delay`.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32, jitter_factor: f32) -> Duration {
        let multiplier = self
            .backoff_multiplier
            .max(1.0)
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        // Safe: initial_delay is seconds/minutes, far from f64 precision limits
        #[allow(clippy::cast_precision_loss)]
        let delay_ms = self.initial_delay.as_millis() as f64
            * f64::from(multiplier)
            * (1.0 + f64::from(jitter_factor.max(0.0)));

        // Overflow to infinity is clamped by the ceiling below.
        #[allow(clippy::cast_precision_loss)]
        let ceiling_ms = self.max_delay.as_millis() as f64;
        let capped = if delay_ms.is_finite() {
            delay_ms.min(ceiling_ms)
        } else {
            ceiling_ms
        };

        // Safe: capped is non-negative and bounded by max_delay
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped as u64)
    }

    /// Draws a jitter factor in `[0, jitter]`.
    #[must_use]
    pub fn sample_jitter(&self) -> f32 {
        if self.jitter <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.0..=self.jitter)
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
