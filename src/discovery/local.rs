// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local network service advertisements.
//!
//! Devices announce their MQTT broker as a DNS-SD service named
//! `{productType}_{serial}.{serviceType}`, for example
//! `438_ABC-123._dyson_mqtt._tcp.local.`. [`LocalDiscovery`] turns each
//! advertisement into an [`Observation`] for the coordinator.
//!
//! The network listener itself is behind [`AdvertisementSource`]; an
//! `mpsc::Receiver<Advertisement>` is a ready-made source for callers
//! that already run a resolver, and the `mdns` feature adds one that
//! browses the network itself.
//!
//! Local discovery is advisory: a device that stops advertising is not
//! removed or disconnected. Only its supervisor decides whether it is
//! reachable.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ValueError;
use crate::types::{DeviceAddress, ProductType, Serial};

use super::{DiscoveryHandle, Observation};

/// A resolved service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Full service instance name.
    pub service_name: String,
    /// Resolved broker address.
    pub address: DeviceAddress,
}

impl Advertisement {
    /// Creates an advertisement.
    #[must_use]
    pub fn new(service_name: impl Into<String>, address: DeviceAddress) -> Self {
        Self {
            service_name: service_name.into(),
            address,
        }
    }
}

/// Stream of resolved advertisements.
#[async_trait]
pub trait AdvertisementSource: Send + 'static {
    /// Waits for the next advertisement. `None` ends discovery.
    async fn next_advertisement(&mut self) -> Option<Advertisement>;
}

#[async_trait]
impl AdvertisementSource for mpsc::Receiver<Advertisement> {
    async fn next_advertisement(&mut self) -> Option<Advertisement> {
        self.recv().await
    }
}

/// Extracts product type and serial from a service instance name.
///
/// # Errors
///
/// Returns `ValueError::InvalidSerial` if the name has no
/// `{productType}_{serial}` instance label, or `InvalidProductType` if
/// the product code is malformed.
///
/// # Examples
///
/// ```
/// use dyson_link::discovery::parse_service_name;
///
/// let (product, serial) = parse_service_name("438_ABC-123._dyson_mqtt._tcp.local.").unwrap();
/// assert_eq!(product.as_str(), "438");
/// assert_eq!(serial.as_str(), "ABC-123");
///
/// assert!(parse_service_name("printer._ipp._tcp.local.").is_err());
/// ```
pub fn parse_service_name(name: &str) -> Result<(ProductType, Serial), ValueError> {
    let instance = name.split('.').next().unwrap_or_default();
    let (product, serial) = instance
        .split_once('_')
        .ok_or_else(|| ValueError::InvalidSerial(name.to_string()))?;
    Ok((ProductType::new(product)?, Serial::new(serial)?))
}

/// Background task forwarding advertisements to the coordinator.
#[derive(Debug)]
pub struct LocalDiscovery {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LocalDiscovery {
    /// Starts listening on `source`.
    #[must_use]
    pub fn spawn(source: impl AdvertisementSource, registry: DiscoveryHandle) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(source, registry, cancel.clone()));
        Self { cancel, task }
    }

    /// Returns `true` once the listener has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops listening.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Local discovery task failed");
        }
    }
}

async fn listen(
    mut source: impl AdvertisementSource,
    registry: DiscoveryHandle,
    cancel: CancellationToken,
) {
    tracing::debug!("Local discovery started");
    loop {
        let advertisement = tokio::select! {
            () = cancel.cancelled() => break,
            advertisement = source.next_advertisement() => advertisement,
        };
        let Some(advertisement) = advertisement else {
            tracing::info!("Advertisement source ended, local discovery stopped");
            break;
        };

        let (product_type, serial) = match parse_service_name(&advertisement.service_name) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(
                    service = %advertisement.service_name,
                    error = %e,
                    "Ignoring unrelated advertisement"
                );
                continue;
            }
        };

        tracing::debug!(%serial, address = %advertisement.address, "Device advertised");
        let observation = Observation::local(serial, Some(product_type), advertisement.address);
        if let Err(e) = registry.observe(observation).await {
            tracing::debug!(error = %e, "Registry gone, local discovery stopped");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{ConnectionSettings, IntegrationConfig};
    use crate::connection::SupervisorContext;
    use crate::discovery::DiscoveryCoordinator;
    use crate::event::{DeviceEvent, EventBus};
    use crate::protocol::mock::MockTransport;
    use crate::types::{Credential, DeviceIdentity, DiscoverySource};

    #[test]
    fn parses_fan_and_robot_names() {
        let (product, serial) = parse_service_name("438K_ABC-123._dyson_mqtt._tcp.local.").unwrap();
        assert_eq!(product.as_str(), "438K");
        assert_eq!(serial.as_str(), "ABC-123");

        let (product, serial) =
            parse_service_name("N223_JH1-US-HBB1111A._360eye_mqtt._tcp.local.").unwrap();
        assert_eq!(product.as_str(), "N223");
        assert_eq!(serial.as_str(), "JH1-US-HBB1111A");
    }

    #[test]
    fn rejects_names_without_device_label() {
        assert!(parse_service_name("").is_err());
        assert!(parse_service_name("_dyson_mqtt._tcp.local.").is_err());
        assert!(parse_service_name("438_._dyson_mqtt._tcp.local.").is_err());
    }

    fn coordinator() -> (DiscoveryCoordinator, EventBus) {
        let (sink, _) = mpsc::unbounded_channel();
        let context = SupervisorContext {
            settings: ConnectionSettings::new(),
            transport: Arc::new(MockTransport::new()),
            sink,
        };
        let bus = EventBus::new();
        let coordinator =
            DiscoveryCoordinator::spawn(&IntegrationConfig::default(), context, bus.clone());
        (coordinator, bus)
    }

    #[tokio::test]
    async fn advertisements_become_local_observations() {
        let (coordinator, bus) = coordinator();
        let mut events = bus.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let discovery = LocalDiscovery::spawn(rx, coordinator.handle().clone());

        tx.send(Advertisement::new("printer._ipp._tcp.local.", "10.0.0.2".parse().unwrap()))
            .await
            .unwrap();
        tx.send(Advertisement::new(
            "438_ABC-123._dyson_mqtt._tcp.local.",
            "10.0.0.5".parse().unwrap(),
        ))
        .await
        .unwrap();

        match events.recv().await.unwrap() {
            DeviceEvent::UnknownDeviceAdvertised {
                serial,
                product_type,
                address,
            } => {
                assert_eq!(serial.as_str(), "ABC-123");
                assert_eq!(product_type.unwrap().as_str(), "438");
                assert_eq!(address.to_string(), "10.0.0.5:1883");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Identity from the user picks up the advertised address.
        let identity = DeviceIdentity::new(
            Serial::new("ABC-123").unwrap(),
            ProductType::new("438").unwrap(),
            Credential::new("pw"),
        );
        coordinator
            .handle()
            .observe(Observation::manual(identity, None))
            .await
            .unwrap();
        let endpoint = coordinator
            .handle()
            .endpoint(&Serial::new("ABC-123").unwrap())
            .unwrap();
        assert_eq!(endpoint.source(), DiscoverySource::LocalDiscovery);

        discovery.shutdown().await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn listener_ends_with_its_source() {
        let (coordinator, _bus) = coordinator();
        let (tx, rx) = mpsc::channel::<Advertisement>(1);
        let discovery = LocalDiscovery::spawn(rx, coordinator.handle().clone());

        drop(tx);
        while !discovery.is_finished() {
            tokio::task::yield_now().await;
        }
        discovery.shutdown().await;

        coordinator.shutdown().await;
    }
}
