// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for the device manager.
//!
//! Everything has a sensible default; builders override single settings.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use dyson_link::config::{CloudPollInterval, IntegrationConfig};
//! use dyson_link::types::Serial;
//!
//! let config = IntegrationConfig::new()
//!     .with_polling(true)
//!     .with_cloud_poll_interval(CloudPollInterval::from_secs(900).unwrap())
//!     .with_static_address(Serial::new("ABC-123").unwrap(), "10.0.0.5".parse().unwrap());
//!
//! assert_eq!(config.cloud_poll_interval.as_duration(), Duration::from_secs(900));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::connection::ReconnectionPolicy;
use crate::error::ValueError;
use crate::types::{DeviceAddress, Serial};

/// Default interval between environmental data requests.
pub const DEFAULT_ENVIRONMENT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for cloud HTTP requests.
pub const DEFAULT_CLOUD_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default margin before token expiry at which a refresh is attempted.
pub const DEFAULT_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Per-connection timing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Deadline for a connection attempt.
    pub connect_timeout: Duration,
    /// Maximum silence on an open connection before it is declared stale.
    pub liveness_window: Duration,
    /// Deadline for publishing a command.
    pub request_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Reconnection backoff.
    pub reconnection: ReconnectionPolicy,
    /// Consecutive failures at the configured address after which a
    /// discovered address is tried in alternation.
    pub fallback_after: u32,
}

impl ConnectionSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection attempt deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the liveness window.
    #[must_use]
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Sets the command publish deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the MQTT keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Sets how many failures at a static address precede a fallback
    /// attempt.
    #[must_use]
    pub fn with_fallback_after(mut self, failures: u32) -> Self {
        self.fallback_after = failures.max(1);
        self
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            liveness_window: Duration::from_secs(90),
            request_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            reconnection: ReconnectionPolicy::default(),
            fallback_after: 3,
        }
    }
}

/// Interval between cloud device listings, bounded to 300..=86400 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CloudPollInterval(Duration);

impl CloudPollInterval {
    /// Shortest allowed interval in seconds.
    pub const MIN_SECS: u64 = 300;
    /// Longest allowed interval in seconds.
    pub const MAX_SECS: u64 = 86_400;
    /// Default interval in seconds.
    pub const DEFAULT_SECS: u64 = 3600;

    /// Creates an interval.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` outside 300..=86400 seconds.
    pub fn from_secs(secs: u64) -> Result<Self, ValueError> {
        if !(Self::MIN_SECS..=Self::MAX_SECS).contains(&secs) {
            return Err(ValueError::OutOfRange {
                min: Self::MIN_SECS,
                max: Self::MAX_SECS,
                actual: secs,
            });
        }
        Ok(Self(Duration::from_secs(secs)))
    }

    /// Returns the interval.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl Default for CloudPollInterval {
    fn default() -> Self {
        Self(Duration::from_secs(Self::DEFAULT_SECS))
    }
}

impl TryFrom<Duration> for CloudPollInterval {
    type Error = ValueError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Self::from_secs(value.as_secs())
    }
}

impl fmt::Display for CloudPollInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// Whether environmental data is polled.
    pub polling_enabled: bool,
    /// Interval between environmental data requests.
    pub environment_poll_interval: Duration,
    /// Addresses that always win over discovered ones.
    pub static_addresses: HashMap<Serial, DeviceAddress>,
    /// Whether devices listed by the cloud account are added automatically.
    pub cloud_auto_discovery: bool,
    /// Interval between cloud device listings.
    pub cloud_poll_interval: CloudPollInterval,
    /// Deadline for a cloud HTTP request.
    pub cloud_request_timeout: Duration,
    /// How long before token expiry a refresh is attempted.
    pub token_refresh_margin: Duration,
    /// Per-connection settings.
    pub connection: ConnectionSettings,
    /// Event bus capacity.
    pub event_capacity: usize,
}

impl IntegrationConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables environmental polling.
    #[must_use]
    pub fn with_polling(mut self, enabled: bool) -> Self {
        self.polling_enabled = enabled;
        self
    }

    /// Sets the environmental poll interval.
    #[must_use]
    pub fn with_environment_poll_interval(mut self, interval: Duration) -> Self {
        self.environment_poll_interval = interval;
        self
    }

    /// Pins a device to an address.
    #[must_use]
    pub fn with_static_address(mut self, serial: Serial, address: DeviceAddress) -> Self {
        self.static_addresses.insert(serial, address);
        self
    }

    /// Enables or disables cloud auto-discovery.
    #[must_use]
    pub fn with_cloud_auto_discovery(mut self, enabled: bool) -> Self {
        self.cloud_auto_discovery = enabled;
        self
    }

    /// Sets the cloud listing interval.
    #[must_use]
    pub fn with_cloud_poll_interval(mut self, interval: CloudPollInterval) -> Self {
        self.cloud_poll_interval = interval;
        self
    }

    /// Sets the cloud request deadline.
    #[must_use]
    pub fn with_cloud_request_timeout(mut self, timeout: Duration) -> Self {
        self.cloud_request_timeout = timeout;
        self
    }

    /// Sets the token refresh margin.
    #[must_use]
    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    /// Sets the per-connection settings.
    #[must_use]
    pub fn with_connection(mut self, settings: ConnectionSettings) -> Self {
        self.connection = settings;
        self
    }

    /// Sets the event bus capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns the pinned address for a device, if any.
    #[must_use]
    pub fn static_address(&self, serial: &Serial) -> Option<&DeviceAddress> {
        self.static_addresses.get(serial)
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            polling_enabled: true,
            environment_poll_interval: DEFAULT_ENVIRONMENT_POLL_INTERVAL,
            static_addresses: HashMap::new(),
            cloud_auto_discovery: true,
            cloud_poll_interval: CloudPollInterval::default(),
            cloud_request_timeout: DEFAULT_CLOUD_REQUEST_TIMEOUT,
            token_refresh_margin: DEFAULT_TOKEN_REFRESH_MARGIN,
            connection: ConnectionSettings::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IntegrationConfig::default();
        assert!(config.polling_enabled);
        assert!(config.cloud_auto_discovery);
        assert_eq!(config.environment_poll_interval, Duration::from_secs(30));
        assert_eq!(
            config.cloud_poll_interval.as_duration(),
            Duration::from_secs(3600)
        );
        assert_eq!(config.connection.liveness_window, Duration::from_secs(90));
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn cloud_poll_interval_bounds() {
        assert!(CloudPollInterval::from_secs(300).is_ok());
        assert!(CloudPollInterval::from_secs(86_400).is_ok());
        assert_eq!(
            CloudPollInterval::from_secs(299),
            Err(ValueError::OutOfRange {
                min: 300,
                max: 86_400,
                actual: 299
            })
        );
        assert!(CloudPollInterval::from_secs(86_401).is_err());
        assert!(CloudPollInterval::try_from(Duration::from_secs(60)).is_err());
    }

    #[test]
    fn static_address_lookup() {
        let serial = Serial::new("abc-123").unwrap();
        let config = IntegrationConfig::new()
            .with_static_address(serial.clone(), "10.0.0.9".parse().unwrap());

        let address = config.static_address(&Serial::new("ABC-123").unwrap()).unwrap();
        assert_eq!(address.host(), "10.0.0.9");
    }

    #[test]
    fn connection_settings_builder() {
        let settings = ConnectionSettings::new()
            .with_liveness_window(Duration::from_secs(20))
            .with_request_timeout(Duration::from_secs(1));
        assert_eq!(settings.liveness_window, Duration::from_secs(20));
        assert_eq!(settings.request_timeout, Duration::from_secs(1));
    }
}
