// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state types.
//!
//! This module provides the last-known-state model for a device. The
//! [`DeviceSnapshot`] struct holds the decoded state, while
//! [`StateUpdate`] represents one decoded device message that can be
//! applied to produce the next snapshot.
//!
//! Only the latest state is kept; there is no history.

mod reading;
mod snapshot;
mod update;

pub use reading::{EnvironmentalReadings, SensorReading};
pub use snapshot::DeviceSnapshot;
pub use update::{ProductState, StateUpdate};
