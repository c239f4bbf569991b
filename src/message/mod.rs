// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device message vocabulary.
//!
//! Devices speak JSON over MQTT. Inbound messages are classified by their
//! `msg` field:
//!
//! | `msg` | Kind |
//! |---|---|
//! | `CURRENT-STATE` | full product state |
//! | `STATE-CHANGE` | incremental product state (`[old, new]` pairs) |
//! | `ENVIRONMENTAL-CURRENT-SENSOR-DATA` | full environmental readings |
//! | `CURRENT-FAULTS` | fault report |
//!
//! Outbound messages are built with [`DeviceCommand`] and published to the
//! command topic from [`Topics`].

mod command;
mod decode;
mod topics;

pub use command::DeviceCommand;
pub use decode::{FanDecoder, MessageDecoder, RobotDecoder, decoder_for};
pub use topics::Topics;
