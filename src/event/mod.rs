// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Notifications for the feature layer.
//!
//! Registry changes, connection state changes, new snapshots and failures
//! are published as [`DeviceEvent`]s on an [`EventBus`], a broadcast channel
//! any number of consumers can subscribe to.
//!
//! # Examples
//!
//! ```
//! use dyson_link::event::{DeviceEvent, EventBus};
//! use dyson_link::types::Serial;
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(DeviceEvent::EndpointRemoved {
//!     serial: Serial::new("ABC-123").unwrap(),
//! });
//! assert!(rx.try_recv().is_ok());
//! ```

mod device_event;
mod event_bus;

pub use device_event::{DeviceEvent, UserAction};
pub use event_bus::EventBus;
