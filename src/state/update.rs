// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Decoded state updates.
//!
//! A [`StateUpdate`] is what a device message decodes into. Updates are
//! applied to a [`DeviceSnapshot`](super::DeviceSnapshot) to produce the
//! next snapshot.
//!
//! # Update Kinds
//!
//! - [`StateUpdate::FullState`] - Complete product state, replaces the map
//! - [`StateUpdate::StateChange`] - Changed fields only, merged into the map
//! - [`StateUpdate::Environmental`] - Complete sensor data, replaces the readings
//! - [`StateUpdate::Faults`] - Complete fault list, replaces the faults

use std::collections::BTreeMap;

use super::EnvironmentalReadings;

/// Product state fields as reported by the device, values kept as strings.
pub type ProductState = BTreeMap<String, String>;

/// A state update decoded from one device message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// A `CURRENT-STATE` message carrying every product state field.
    FullState(ProductState),
    /// A `STATE-CHANGE` message carrying the new values of changed fields.
    StateChange(ProductState),
    /// An environmental sensor data message.
    Environmental(EnvironmentalReadings),
    /// A fault report.
    Faults(BTreeMap<String, String>),
}

impl StateUpdate {
    /// Returns `true` if the update carries only the fields that changed.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::StateChange(_))
    }

    /// Returns the message type name the update was decoded from.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullState(_) => "CURRENT-STATE",
            Self::StateChange(_) => "STATE-CHANGE",
            Self::Environmental(_) => "ENVIRONMENTAL-CURRENT-SENSOR-DATA",
            Self::Faults(_) => "CURRENT-FAULTS",
        }
    }
}
