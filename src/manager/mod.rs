// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry point for applications.
//!
//! The [`DeviceManager`] owns everything one integration instance needs:
//!
//! - **Registry**: one endpoint per serial, fed by manual entry, local
//!   advertisements and the cloud account
//! - **Supervision**: one connection supervisor per reachable device
//! - **State**: the last snapshot per device, refreshed by periodic polling
//! - **Events**: a broadcast channel of [`DeviceEvent`](crate::event::DeviceEvent)s
//!
//! # Event Subscription
//!
//! ```no_run
//! use dyson_link::config::IntegrationConfig;
//! use dyson_link::event::DeviceEvent;
//! use dyson_link::manager::DeviceManager;
//!
//! # async fn example() {
//! let manager = DeviceManager::with_mqtt(IntegrationConfig::default());
//! let mut events = manager.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let DeviceEvent::SnapshotChanged { snapshot } = event {
//!             println!("{}: {:?}", snapshot.serial(), snapshot.product_field("fpwr"));
//!         }
//!     }
//! });
//! # }
//! ```

mod device_manager;

pub use device_manager::DeviceManager;
