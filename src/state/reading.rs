// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environmental sensor readings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single environmental sensor value.
///
/// Devices report sensor values as zero-padded strings and use the
/// sentinels `OFF`, `INIT` and `FAIL` when no measurement is available.
/// Those sentinels are kept apart from real numbers here.
///
/// # Examples
///
/// ```
/// use dyson_link::state::SensorReading;
///
/// assert_eq!(SensorReading::parse("0042"), SensorReading::Value(42));
/// assert_eq!(SensorReading::parse("INIT"), SensorReading::Initializing);
/// assert_eq!(SensorReading::parse("FAIL").as_value(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorReading {
    /// A numeric measurement.
    Value(i64),
    /// The sensor is switched off (the device is in standby).
    Off,
    /// The sensor is warming up.
    Initializing,
    /// The sensor reported a failure.
    Failed,
    /// A non-numeric value (sleep timer `OFF` variants, model-specific flags).
    Text(String),
}

impl SensorReading {
    /// Parses a raw sensor string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "OFF" => Self::Off,
            "INIT" => Self::Initializing,
            "FAIL" => Self::Failed,
            _ => raw
                .parse::<i64>()
                .map_or_else(|_| Self::Text(raw.to_string()), Self::Value),
        }
    }

    /// Converts a JSON value from a sensor payload.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Text(n.to_string()), Self::Value),
            other => Self::Text(other.to_string()),
        }
    }

    /// Returns the numeric value if this is a real measurement.
    #[must_use]
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` if the reading is one of the "no measurement" sentinels.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Off | Self::Initializing | Self::Failed)
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Off => f.write_str("OFF"),
            Self::Initializing => f.write_str("INIT"),
            Self::Failed => f.write_str("FAIL"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Environmental readings keyed by the device's sensor field name
/// (`tact`, `hact`, `pm25`, `va10` ...).
pub type EnvironmentalReadings = BTreeMap<String, SensorReading>;
