// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network address of a device's local MQTT broker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Host and port of a device's local MQTT broker.
///
/// Accepts `host`, `host:port`, `[v6]:port` and the `mqtt://` / `tcp://`
/// URL forms. The port defaults to 1883.
///
/// # Examples
///
/// ```
/// use dyson_link::types::DeviceAddress;
///
/// let addr: DeviceAddress = "10.0.0.5".parse().unwrap();
/// assert_eq!(addr.host(), "10.0.0.5");
/// assert_eq!(addr.port(), 1883);
///
/// let addr: DeviceAddress = "mqtt://fan.local:1884".parse().unwrap();
/// assert_eq!(addr.to_string(), "fan.local:1884");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    host: String,
    port: u16,
}

impl DeviceAddress {
    /// Default MQTT port used by the appliances.
    pub const DEFAULT_PORT: u16 = 1883;

    /// Creates an address from a host and port.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidAddress` if the host is empty or contains
    /// whitespace.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ValueError> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(ValueError::InvalidAddress(format!("invalid host: {host:?}")));
        }
        if port == 0 {
            return Err(ValueError::InvalidAddress("port must not be 0".to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Returns the host name or IP address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for DeviceAddress {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("mqtt://")
            .or_else(|| s.strip_prefix("tcp://"))
            .unwrap_or(s);

        // Bracketed IPv6: [fe80::1]:1883
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| ValueError::InvalidAddress(format!("unterminated bracket: {s}")))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p)?,
                None if tail.is_empty() => Self::DEFAULT_PORT,
                None => return Err(ValueError::InvalidAddress(format!("invalid address: {s}"))),
            };
            return Self::new(host, port);
        }

        // A bare IPv6 address has several colons and no port.
        if s.matches(':').count() > 1 {
            return Self::new(s, Self::DEFAULT_PORT);
        }

        match s.rsplit_once(':') {
            Some((host, port)) => Self::new(host, parse_port(port)?),
            None => Self::new(s, Self::DEFAULT_PORT),
        }
    }
}

fn parse_port(port: &str) -> Result<u16, ValueError> {
    port.parse()
        .map_err(|_| ValueError::InvalidAddress(format!("invalid port: {port}")))
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
