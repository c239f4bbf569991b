// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device discovery and the device registry.
//!
//! Two independent sources report devices:
//!
//! - [`LocalDiscovery`] listens for service advertisements on the local
//!   network. They carry a serial and an address but no credential. With
//!   the `mdns` feature, `MdnsBrowser` supplies them from multicast DNS.
//! - [`CloudDiscovery`](crate::cloud::CloudDiscovery) lists the devices of
//!   a cloud account. Listings carry the full identity, usually without
//!   an address.
//!
//! Both feed [`Observation`]s into the [`DiscoveryCoordinator`], which
//! deduplicates them by serial into one [`DeviceEndpoint`] per device and
//! drives each device's connection supervisor.
//!
//! [`DeviceEndpoint`]: crate::types::DeviceEndpoint
//!
//! # Examples
//!
//! ```no_run
//! use dyson_link::discovery::{Advertisement, LocalDiscovery, DiscoveryHandle};
//! use tokio::sync::mpsc;
//!
//! # async fn example(registry: DiscoveryHandle) -> dyson_link::Result<()> {
//! // Feed resolved DNS-SD records from any resolver.
//! let (tx, rx) = mpsc::channel(16);
//! let discovery = LocalDiscovery::spawn(rx, registry);
//!
//! tx.send(Advertisement::new(
//!     "438_ABC-123._dyson_mqtt._tcp.local.",
//!     "10.0.0.5".parse()?,
//! ))
//! .await
//! .ok();
//!
//! discovery.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod local;
#[cfg(feature = "mdns")]
mod mdns;
mod observation;

pub use coordinator::{DiscoveryCoordinator, DiscoveryHandle, Registry, RegistryEntry};
pub use local::{Advertisement, AdvertisementSource, LocalDiscovery, parse_service_name};
#[cfg(feature = "mdns")]
pub use mdns::MdnsBrowser;
pub use observation::Observation;
