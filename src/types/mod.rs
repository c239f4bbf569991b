// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types describing devices.
//!
//! This module provides validated representations of the things the rest
//! of the library passes around. Each type checks its invariants at
//! construction time.
//!
//! # Types
//!
//! - [`Serial`] - Vendor serial number, the only deduplication key
//! - [`ProductType`] - Model code including the regional variant
//! - [`Credential`] - Local MQTT secret (redacted in `Debug`)
//! - [`DeviceIdentity`] - Immutable serial/product/credential triple
//! - [`DeviceFamily`] - Capability-tagged product family
//! - [`DeviceAddress`] - Host and port of the device's MQTT broker
//! - [`DeviceEndpoint`] - Registry record: identity, address, source

mod address;
mod endpoint;
mod family;
mod identity;

pub use address::DeviceAddress;
pub use endpoint::{DeviceEndpoint, DiscoverySource};
pub use family::{DeviceFamily, FAN_SERVICE_TYPE, ROBOT_SERVICE_TYPE};
pub use identity::{Credential, DeviceIdentity, ProductType, Serial};
