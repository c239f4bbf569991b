// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! mDNS browser for device advertisements.
//!
//! [`MdnsBrowser`] runs an `mdns-sd` daemon, browses the fan and robot
//! service types and yields every resolved instance as an
//! [`Advertisement`]. Hand it to
//! [`DeviceManager::attach_local_discovery`](crate::DeviceManager::attach_local_discovery).
//!
//! ```no_run
//! use dyson_link::discovery::MdnsBrowser;
//! # fn example(manager: &dyson_link::DeviceManager) -> dyson_link::Result<()> {
//! manager.attach_local_discovery(MdnsBrowser::start()?);
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::types::{DeviceAddress, FAN_SERVICE_TYPE, ROBOT_SERVICE_TYPE};

use super::{Advertisement, AdvertisementSource};

/// Capacity of the channel between the browse tasks and the consumer.
const ADVERTISEMENT_CHANNEL_CAPACITY: usize = 32;

/// Advertisement source backed by the system's multicast DNS.
///
/// Dropping the browser stops the daemon.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    advertisements: mpsc::Receiver<Advertisement>,
    tasks: Vec<JoinHandle<()>>,
}

impl MdnsBrowser {
    /// Starts the daemon and browses for fans and robots.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Mdns` if the daemon cannot open its sockets or
    /// refuses a browse request.
    pub fn start() -> Result<Self> {
        let daemon = ServiceDaemon::new()?;

        let mut receivers = Vec::new();
        for service_type in [FAN_SERVICE_TYPE, ROBOT_SERVICE_TYPE] {
            match daemon.browse(service_type) {
                Ok(receiver) => receivers.push((service_type, receiver)),
                Err(e) => {
                    let _ = daemon.shutdown();
                    return Err(e.into());
                }
            }
        }

        let (tx, advertisements) = mpsc::channel(ADVERTISEMENT_CHANNEL_CAPACITY);
        let tasks = receivers
            .into_iter()
            .map(|(service_type, receiver)| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tracing::debug!(service_type, "Browsing for devices");
                    while let Ok(event) = receiver.recv_async().await {
                        let ServiceEvent::ServiceResolved(info) = event else {
                            continue;
                        };
                        let Some(advertisement) = to_advertisement(
                            info.get_fullname(),
                            info.get_addresses().iter().copied(),
                            info.get_port(),
                        ) else {
                            tracing::debug!(name = info.get_fullname(), "Resolved service has no usable address");
                            continue;
                        };
                        if tx.send(advertisement).await.is_err() {
                            break;
                        }
                    }
                    tracing::debug!(service_type, "mDNS browse ended");
                })
            })
            .collect();

        Ok(Self {
            daemon,
            advertisements,
            tasks,
        })
    }
}

#[async_trait]
impl AdvertisementSource for MdnsBrowser {
    async fn next_advertisement(&mut self) -> Option<Advertisement> {
        self.advertisements.recv().await
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::debug!(error = %e, "mDNS daemon already stopped");
        }
    }
}

/// Builds an advertisement from a resolved service, preferring IPv4.
fn to_advertisement(
    fullname: &str,
    addresses: impl IntoIterator<Item = IpAddr>,
    port: u16,
) -> Option<Advertisement> {
    let ip = addresses.into_iter().min_by_key(|ip| (ip.is_ipv6(), *ip))?;
    let address = DeviceAddress::new(ip.to_string(), port).ok()?;
    Some(Advertisement::new(fullname, address))
}
