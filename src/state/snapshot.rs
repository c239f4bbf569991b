// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Last-known device state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::Serial;

use super::{EnvironmentalReadings, ProductState, SensorReading, StateUpdate};

/// Last-known decoded state of one device.
///
/// Snapshots are values: every decoded message produces a new snapshot
/// and consumers only ever hold frozen copies.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use std::time::Duration;
///
/// use chrono::Utc;
/// use dyson_link::state::{DeviceSnapshot, StateUpdate};
/// use dyson_link::types::Serial;
///
/// let serial = Serial::new("ABC-123").unwrap();
/// let empty = DeviceSnapshot::new(serial, Duration::from_secs(120), Utc::now());
///
/// let full = BTreeMap::from([
///     ("fpwr".to_string(), "OFF".to_string()),
///     ("fnsp".to_string(), "0004".to_string()),
/// ]);
/// let snapshot = empty.apply(StateUpdate::FullState(full), Utc::now());
///
/// let change = BTreeMap::from([("fpwr".to_string(), "ON".to_string())]);
/// let snapshot = snapshot.apply(StateUpdate::StateChange(change), Utc::now());
///
/// assert_eq!(snapshot.product_field("fpwr"), Some("ON"));
/// assert_eq!(snapshot.product_field("fnsp"), Some("0004"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    serial: Serial,
    environmental: EnvironmentalReadings,
    product_state: ProductState,
    faults: BTreeMap<String, String>,
    captured_at: DateTime<Utc>,
    freshness: Duration,
}

impl DeviceSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(serial: Serial, freshness: Duration, captured_at: DateTime<Utc>) -> Self {
        Self {
            serial,
            environmental: EnvironmentalReadings::new(),
            product_state: ProductState::new(),
            faults: BTreeMap::new(),
            captured_at,
            freshness,
        }
    }

    /// Returns the next snapshot after applying `update`.
    ///
    /// A full-state update replaces the product state map. An incremental
    /// update overwrites only the fields it carries. Environmental and fault
    /// updates replace their respective maps and leave product state alone.
    #[must_use]
    pub fn apply(&self, update: StateUpdate, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        match update {
            StateUpdate::FullState(fields) => next.product_state = fields,
            StateUpdate::StateChange(fields) => next.product_state.extend(fields),
            StateUpdate::Environmental(readings) => next.environmental = readings,
            StateUpdate::Faults(faults) => next.faults = faults,
        }
        next.captured_at = at;
        next
    }

    /// Returns the device serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Returns the environmental readings.
    #[must_use]
    pub fn environmental(&self) -> &EnvironmentalReadings {
        &self.environmental
    }

    /// Returns a single sensor reading.
    #[must_use]
    pub fn reading(&self, key: &str) -> Option<&SensorReading> {
        self.environmental.get(key)
    }

    /// Returns the product state map.
    #[must_use]
    pub fn product_state(&self) -> &ProductState {
        &self.product_state
    }

    /// Returns a single product state field.
    #[must_use]
    pub fn product_field(&self, key: &str) -> Option<&str> {
        self.product_state.get(key).map(String::as_str)
    }

    /// Returns the last reported faults.
    #[must_use]
    pub fn faults(&self) -> &BTreeMap<String, String> {
        &self.faults
    }

    /// Returns when the snapshot was last updated.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Returns the freshness threshold for this device.
    #[must_use]
    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Returns `true` if the snapshot is older than its freshness threshold
    /// at the given instant.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.captured_at);
        // A negative age (clock stepped back) counts as fresh.
        age.to_std().is_ok_and(|age| age > self.freshness)
    }

    /// Returns `true` if the snapshot is older than its freshness threshold.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}
