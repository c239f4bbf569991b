// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device registry and the merge engine that writes it.
//!
//! [`DiscoveryCoordinator`] is the only writer of the registry. It runs as
//! one task that receives [`Observation`]s from any number of discovery
//! sources, merges them by serial, and starts, redirects or stops each
//! device's [`ConnectionSupervisor`] accordingly. Everyone else reads
//! copies of the registry through a [`DiscoveryHandle`].
//!
//! # Merge rules
//!
//! - The serial is the only deduplication key. Addresses change with DHCP
//!   and never identify a device.
//! - A static address from the configuration always wins over discovered
//!   ones.
//! - An observation only replaces the address if it carries a different
//!   one; the endpoint's source then reflects the observation that
//!   resolved it. Observations without an address never clear one.
//! - Advertisements for serials without a known identity are cached and
//!   used once the identity arrives.
//! - Losing the cloud account parks cloud-sourced endpoints; local and
//!   manual endpoints are left alone.
//! - A removed serial stays removed. Cloud listings and advertisements of
//!   it only produce a setup prompt; a manual observation adds it back.
//! - The latest discovered address of a device with a static address is
//!   kept as its supervisor's fallback.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::IntegrationConfig;
use crate::connection::{
    ConnectionSupervisor, FailureReason, SupervisorContext, SupervisorHandle,
};
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, EventBus};
use crate::types::{DeviceAddress, DeviceEndpoint, DiscoverySource, ProductType, Serial};

use super::Observation;

/// Capacity of the coordinator's request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// One registry record as seen by readers.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Copy of the endpoint.
    pub endpoint: DeviceEndpoint,
    /// Handle to the device's supervisor, if one is running.
    pub supervisor: Option<SupervisorHandle>,
}

/// Read-only view of the registry.
pub type Registry = HashMap<Serial, RegistryEntry>;

enum Request {
    Observe {
        observation: Observation,
        done: oneshot::Sender<()>,
    },
    Remove {
        serial: Serial,
        reply: oneshot::Sender<Result<()>>,
    },
    CloudAvailability {
        available: bool,
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable access to a running [`DiscoveryCoordinator`].
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    requests: mpsc::Sender<Request>,
    registry: watch::Receiver<Registry>,
}

impl DiscoveryHandle {
    /// Feeds an observation to the merge engine and waits until it has
    /// been applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the coordinator has shut down.
    pub async fn observe(&self, observation: Observation) -> Result<()> {
        let (done, applied) = oneshot::channel();
        self.request(Request::Observe { observation, done }).await?;
        applied.await.map_err(|_| closed())
    }

    /// Removes a device, stopping its supervisor.
    ///
    /// Returns once the supervisor has disconnected.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the serial is not registered, or
    /// `Error::ChannelClosed` if the coordinator has shut down.
    pub async fn remove(&self, serial: &Serial) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.request(Request::Remove {
            serial: serial.clone(),
            reply,
        })
        .await?;
        result.await.map_err(|_| closed())?
    }

    /// Reports whether the cloud account is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the coordinator has shut down.
    pub async fn set_cloud_available(&self, available: bool) -> Result<()> {
        let (done, applied) = oneshot::channel();
        self.request(Request::CloudAvailability { available, done })
            .await?;
        applied.await.map_err(|_| closed())
    }

    /// Returns copies of all endpoints, ordered by serial.
    #[must_use]
    pub fn endpoints(&self) -> Vec<DeviceEndpoint> {
        let registry = self.registry.borrow();
        let mut endpoints: Vec<DeviceEndpoint> =
            registry.values().map(|e| e.endpoint.clone()).collect();
        endpoints.sort_by(|a, b| a.serial().cmp(b.serial()));
        endpoints
    }

    /// Returns a copy of one endpoint.
    #[must_use]
    pub fn endpoint(&self, serial: &Serial) -> Option<DeviceEndpoint> {
        self.registry
            .borrow()
            .get(serial)
            .map(|e| e.endpoint.clone())
    }

    /// Returns the supervisor handle for a device, if it has one.
    #[must_use]
    pub fn supervisor(&self, serial: &Serial) -> Option<SupervisorHandle> {
        self.registry
            .borrow()
            .get(serial)
            .and_then(|e| e.supervisor.clone())
    }

    /// Returns handles to every running supervisor.
    #[must_use]
    pub fn supervisors(&self) -> Vec<SupervisorHandle> {
        self.registry
            .borrow()
            .values()
            .filter_map(|e| e.supervisor.clone())
            .collect()
    }

    /// Returns a receiver that observes registry changes.
    #[must_use]
    pub fn watch_registry(&self) -> watch::Receiver<Registry> {
        self.registry.clone()
    }

    async fn request(&self, request: Request) -> Result<()> {
        self.requests.send(request).await.map_err(|_| closed())
    }
}

fn closed() -> Error {
    Error::ChannelClosed("discovery coordinator".to_string())
}

// =============================================================================
// Coordinator
// =============================================================================

/// Owner of the registry task.
///
/// # Examples
///
/// ```no_run
/// use dyson_link::config::IntegrationConfig;
/// use dyson_link::connection::SupervisorContext;
/// use dyson_link::discovery::{DiscoveryCoordinator, Observation};
/// use dyson_link::event::EventBus;
/// use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
///
/// # async fn example(context: SupervisorContext) -> dyson_link::Result<()> {
/// let coordinator =
///     DiscoveryCoordinator::spawn(&IntegrationConfig::default(), context, EventBus::new());
///
/// let identity = DeviceIdentity::new(
///     Serial::new("ABC-123")?,
///     ProductType::new("438")?,
///     Credential::new("secret"),
/// );
/// coordinator
///     .handle()
///     .observe(Observation::manual(identity, Some("10.0.0.5".parse()?)))
///     .await?;
///
/// coordinator.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiscoveryCoordinator {
    handle: DiscoveryHandle,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryCoordinator {
    /// Spawns the registry task.
    #[must_use]
    pub fn spawn(config: &IntegrationConfig, context: SupervisorContext, events: EventBus) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (registry_tx, registry_rx) = watch::channel(Registry::new());

        let registrar = Registrar {
            entries: HashMap::new(),
            address_cache: HashMap::new(),
            removed: HashMap::new(),
            static_addresses: config.static_addresses.clone(),
            context,
            events,
            cloud_available: true,
            registry: registry_tx,
            requests: requests_rx,
        };
        let task = tokio::spawn(registrar.run());

        Self {
            handle: DiscoveryHandle {
                requests: requests_tx,
                registry: registry_rx,
            },
            task: Some(task),
        }
    }

    /// Returns a cloneable handle to the registry.
    #[must_use]
    pub fn handle(&self) -> &DiscoveryHandle {
        &self.handle
    }

    /// Stops every supervisor and the registry task.
    ///
    /// Returns once all supervisors have disconnected.
    pub async fn shutdown(mut self) {
        let (done, stopped) = oneshot::channel();
        if self
            .handle
            .request(Request::Shutdown { done })
            .await
            .is_ok()
        {
            let _ = stopped.await;
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Discovery coordinator task failed");
        }
    }
}

// =============================================================================
// Registry task
// =============================================================================

struct Entry {
    endpoint: DeviceEndpoint,
    supervisor: Option<ConnectionSupervisor>,
    /// Discovered address of a device pinned to a static one.
    fallback: Option<DeviceAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedAdvertisement {
    address: DeviceAddress,
    product_type: Option<ProductType>,
}

struct Registrar {
    entries: HashMap<Serial, Entry>,
    address_cache: HashMap<Serial, CachedAdvertisement>,
    /// Removed serials and the sources that already prompted for them.
    removed: HashMap<Serial, HashSet<DiscoverySource>>,
    static_addresses: HashMap<Serial, DeviceAddress>,
    context: SupervisorContext,
    events: EventBus,
    cloud_available: bool,
    registry: watch::Sender<Registry>,
    requests: mpsc::Receiver<Request>,
}

impl Registrar {
    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            // Readers must see the new registry once the caller resumes.
            match request {
                Request::Observe { observation, done } => {
                    self.observe(observation).await;
                    self.publish_registry();
                    let _ = done.send(());
                }
                Request::Remove { serial, reply } => {
                    let result = self.remove(&serial).await;
                    self.publish_registry();
                    let _ = reply.send(result);
                }
                Request::CloudAvailability { available, done } => {
                    self.set_cloud_available(available).await;
                    self.publish_registry();
                    let _ = done.send(());
                }
                Request::Shutdown { done } => {
                    self.stop_all().await;
                    let _ = done.send(());
                    return;
                }
            }
        }

        self.stop_all().await;
    }

    async fn observe(&mut self, observation: Observation) {
        let serial = observation.serial().clone();
        if let Some(prompted) = self.removed.get_mut(&serial) {
            let source = observation.source();
            if source != DiscoverySource::Manual {
                if prompted.insert(source) {
                    tracing::info!(%serial, %source, "Removed device seen again");
                    self.events.publish(DeviceEvent::RemovedDeviceSeen {
                        serial,
                        source,
                        address: observation.address().cloned(),
                    });
                }
                return;
            }
            tracing::info!(%serial, "Removed device added back manually");
            self.removed.remove(&serial);
        }

        if let Some(mut entry) = self.entries.remove(&serial) {
            self.merge(&mut entry, &observation).await;
            self.entries.insert(serial, entry);
        } else if observation.identity().is_some() {
            self.register(observation).await;
        } else {
            self.cache(observation);
        }
    }

    /// Creates the endpoint for a serial seen with its identity for the
    /// first time.
    async fn register(&mut self, observation: Observation) {
        let Some(identity) = observation.identity().cloned() else {
            return;
        };
        let serial = identity.serial().clone();
        let cached = self.address_cache.remove(&serial);
        let discovered = observation
            .address()
            .cloned()
            .map(|address| (address, observation.source()))
            .or_else(|| cached.map(|c| (c.address, DiscoverySource::LocalDiscovery)));

        let (address, source, fallback) = match (self.static_addresses.get(&serial), discovered) {
            (Some(address), discovered) => (
                Some(address.clone()),
                DiscoverySource::Manual,
                discovered.map(|(address, _)| address),
            ),
            (None, Some((address, source))) => (Some(address), source, None),
            (None, None) => (None, observation.source(), None),
        };

        let mut endpoint = DeviceEndpoint::new(identity.clone(), address.clone(), source);
        if let Some(name) = observation.name() {
            endpoint.set_name(name.to_string());
        }
        endpoint.touch(observation.time());

        tracing::info!(%serial, %source, address = ?address, "Registered device");

        if address.is_none() && observation.source() == DiscoverySource::CloudDiscovery {
            tracing::info!(%serial, "Cloud lists device without a local address");
            self.events.publish(DeviceEvent::CloudDeviceWithoutAddress {
                serial: serial.clone(),
                name: endpoint.name().map(str::to_string),
            });
        }

        let supervisor = endpoint
            .is_connectable()
            .then(|| ConnectionSupervisor::start(identity, address, self.context.clone()));
        if let Some(supervisor) = &supervisor
            && fallback.is_some()
        {
            supervisor.handle().update_fallback(fallback.clone()).await;
        }

        self.events.publish(DeviceEvent::EndpointAdded {
            endpoint: endpoint.clone(),
        });
        self.entries.insert(
            serial,
            Entry {
                endpoint,
                supervisor,
                fallback,
            },
        );
    }

    /// Applies an observation to an existing endpoint.
    async fn merge(&mut self, entry: &mut Entry, observation: &Observation) {
        let serial = observation.serial();
        let endpoint = &mut entry.endpoint;
        let mut changed = false;
        let mut new_identity = None;
        let mut new_address = None;
        let mut new_fallback = None;

        if let Some(identity) = observation.identity()
            && identity != endpoint.identity()
        {
            endpoint.set_identity(identity.clone());
            new_identity = Some(identity.clone());
            changed = true;
        }

        if self.static_addresses.contains_key(serial) {
            if let Some(address) = observation.address()
                && entry.fallback.as_ref() != Some(address)
            {
                tracing::debug!(%serial, %address, "Discovered address kept as fallback");
                entry.fallback = Some(address.clone());
                new_fallback = Some(address.clone());
            }
        } else if let Some(address) = observation.address() {
            if endpoint.address() != Some(address) {
                tracing::info!(
                    %serial,
                    source = %observation.source(),
                    previous = ?endpoint.address(),
                    %address,
                    "Device address changed"
                );
                endpoint.set_address(address.clone(), observation.source());
                new_address = Some(address.clone());
                changed = true;
            } else if endpoint.source() != observation.source() {
                endpoint.set_address(address.clone(), observation.source());
                changed = true;
            }
        }

        if let Some(name) = observation.name()
            && endpoint.name() != Some(name)
        {
            endpoint.set_name(name.to_string());
            changed = true;
        }

        // A local path makes the device independent of the cloud account.
        let recovered = endpoint.is_cloud_degraded()
            && observation.source() != DiscoverySource::CloudDiscovery
            && observation.address().is_some();
        if recovered {
            endpoint.set_cloud_degraded(false);
            changed = true;
        }

        endpoint.touch(observation.time());

        match &entry.supervisor {
            Some(supervisor) => {
                let handle = supervisor.handle();
                if let Some(identity) = new_identity {
                    handle.update_identity(identity).await;
                }
                if let Some(address) = new_address {
                    handle.update_address(address).await;
                }
                if new_fallback.is_some() {
                    handle.update_fallback(new_fallback).await;
                }
                if recovered {
                    handle.retry().await;
                }
            }
            None if entry.endpoint.is_connectable() => {
                let supervisor = ConnectionSupervisor::start(
                    entry.endpoint.identity().clone(),
                    entry.endpoint.address().cloned(),
                    self.context.clone(),
                );
                if entry.fallback.is_some() {
                    supervisor.handle().update_fallback(entry.fallback.clone()).await;
                }
                entry.supervisor = Some(supervisor);
            }
            None => {}
        }

        if observation.source() == DiscoverySource::CloudDiscovery
            && entry.endpoint.address().is_none()
        {
            tracing::debug!(%serial, "Cloud still lists device without a local address");
            self.events.publish(DeviceEvent::CloudDeviceWithoutAddress {
                serial: serial.clone(),
                name: entry.endpoint.name().map(str::to_string),
            });
        }

        if recovered {
            self.events.publish(DeviceEvent::AvailabilityChanged {
                serial: serial.clone(),
                available: true,
            });
        }
        if changed {
            self.events.publish(DeviceEvent::EndpointUpdated {
                endpoint: entry.endpoint.clone(),
            });
        }
    }

    /// Remembers an advertisement for a serial without a known identity.
    fn cache(&mut self, observation: Observation) {
        let Some(address) = observation.address().cloned() else {
            return;
        };
        let serial = observation.serial().clone();
        let advertisement = CachedAdvertisement {
            address: address.clone(),
            product_type: observation.product_type().cloned(),
        };
        if self.address_cache.get(&serial) == Some(&advertisement) {
            return;
        }

        tracing::debug!(%serial, %address, "Caching address of unregistered device");
        self.address_cache.insert(serial.clone(), advertisement);
        self.events.publish(DeviceEvent::UnknownDeviceAdvertised {
            serial,
            product_type: observation.product_type().cloned(),
            address,
        });
    }

    async fn remove(&mut self, serial: &Serial) -> Result<()> {
        let entry = self
            .entries
            .remove(serial)
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))?;
        self.address_cache.remove(serial);
        self.removed.insert(serial.clone(), HashSet::new());

        if let Some(supervisor) = entry.supervisor {
            supervisor.stop().await;
        }

        tracing::info!(%serial, "Removed device");
        self.events.publish(DeviceEvent::EndpointRemoved {
            serial: serial.clone(),
        });
        Ok(())
    }

    async fn set_cloud_available(&mut self, available: bool) {
        if self.cloud_available == available {
            return;
        }
        self.cloud_available = available;
        if available {
            tracing::info!("Cloud account available again");
        } else {
            tracing::warn!("Cloud account unavailable, cloud devices degraded to local-only");
        }

        for entry in self.entries.values_mut() {
            let endpoint = &mut entry.endpoint;
            let affected = if available {
                endpoint.is_cloud_degraded()
            } else {
                endpoint.source() == DiscoverySource::CloudDiscovery
                    && !endpoint.is_cloud_degraded()
            };
            if !affected {
                continue;
            }

            endpoint.set_cloud_degraded(!available);
            match &entry.supervisor {
                Some(supervisor) if available => {
                    if let Some(address) = endpoint.address() {
                        supervisor.handle().update_address(address.clone()).await;
                    }
                    supervisor.handle().retry().await;
                }
                Some(supervisor) => {
                    supervisor
                        .handle()
                        .suspend(FailureReason::CloudUnavailable)
                        .await;
                }
                None if endpoint.is_connectable() => {
                    entry.supervisor = Some(ConnectionSupervisor::start(
                        endpoint.identity().clone(),
                        endpoint.address().cloned(),
                        self.context.clone(),
                    ));
                }
                None => {}
            }

            self.events.publish(DeviceEvent::AvailabilityChanged {
                serial: endpoint.serial().clone(),
                available,
            });
            self.events.publish(DeviceEvent::EndpointUpdated {
                endpoint: endpoint.clone(),
            });
        }
    }

    async fn stop_all(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(supervisor) = entry.supervisor.take() {
                supervisor.stop().await;
            }
        }
        self.publish_registry();
        tracing::debug!("Discovery coordinator stopped");
    }

    fn publish_registry(&self) {
        let registry = self
            .entries
            .iter()
            .map(|(serial, entry)| {
                (
                    serial.clone(),
                    RegistryEntry {
                        endpoint: entry.endpoint.clone(),
                        supervisor: entry.supervisor.as_ref().map(|s| s.handle().clone()),
                    },
                )
            })
            .collect();
        self.registry.send_replace(registry);
    }
}
