// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `dyson_link` - Connection, discovery and state coordination for Dyson
//! Wi-Fi appliances.
//!
//! Every appliance runs a small MQTT broker on the local network. This
//! library finds appliances, keeps one supervised connection per device,
//! decodes the JSON messages they publish, and hands the feature layer an
//! up-to-date [`DeviceSnapshot`] together with a stream of events.
//!
//! # Supported Features
//!
//! - **Discovery**: manual entry, local service advertisements, and the
//!   vendor cloud device list, merged into one registry keyed by serial
//! - **Connection supervision**: reconnect with backoff, stale-connection
//!   detection, parking on rejected credentials
//! - **State**: full and incremental product state, environmental
//!   readings, faults, periodic polling
//! - **Cloud account**: one-time-code sign-in, token refresh, reauth
//!
//! # Crate Features
//!
//! - `mqtt` (default): [`protocol::MqttTransport`] on top of `rumqttc`
//! - `cloud` (default): [`cloud::HttpCloudClient`] on top of `reqwest`
//! - `mdns`: `discovery::MdnsBrowser` on top of `mdns-sd`
//!
//! # Quick Start
//!
//! ```no_run
//! use dyson_link::{DeviceManager, IntegrationConfig};
//! use dyson_link::message::DeviceCommand;
//! use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
//!
//! #[tokio::main]
//! async fn main() -> dyson_link::Result<()> {
//!     let manager = DeviceManager::with_mqtt(IntegrationConfig::default());
//!
//!     let identity = DeviceIdentity::new(
//!         Serial::new("ABC-123")?,
//!         ProductType::new("438")?,
//!         Credential::new("local-secret"),
//!     );
//!     let serial = identity.serial().clone();
//!     manager
//!         .add_manual_device(identity, Some("192.168.1.40".parse()?))
//!         .await?;
//!
//!     manager
//!         .send_command(&serial, DeviceCommand::set_state([("fpwr", "ON")]))
//!         .await?;
//!
//!     if let Some(snapshot) = manager.current_snapshot(&serial) {
//!         println!("fan power: {:?}", snapshot.product_field("fpwr"));
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Cloud Account
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dyson_link::cloud::{CloudAccount, HttpCloudClient, Region};
//! use dyson_link::{DeviceManager, IntegrationConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let region = Region::new("GB")?;
//! let client = HttpCloudClient::new(&region)?;
//! let account = Arc::new(CloudAccount::new(Arc::new(client)));
//!
//! account.begin(region)?;
//! account.submit_identifier("user@example.com").await?;
//! account.submit_otp("123456", Some("password")).await?;
//!
//! let manager = DeviceManager::with_mqtt(IntegrationConfig::default());
//! manager.attach_cloud(account).await;
//! # Ok(())
//! # }
//! ```

pub mod cloud;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod event;
pub mod manager;
pub mod message;
pub mod protocol;
pub mod state;
pub mod types;

pub use config::{CloudPollInterval, ConnectionSettings, IntegrationConfig};
pub use connection::{ConnectionState, FailureReason};
pub use error::{CloudError, DecodeError, Error, Result, TransportError, ValueError};
pub use event::{DeviceEvent, EventBus, UserAction};
pub use manager::DeviceManager;
pub use state::DeviceSnapshot;
pub use types::{DeviceEndpoint, DeviceIdentity, DiscoverySource, Serial};
