// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device manager wiring discovery, supervision and state together.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::cloud::{CloudAccount, CloudDiscovery};
use crate::config::IntegrationConfig;
use crate::connection::{ConnectionState, SupervisorContext};
use crate::coordinator::StateCoordinator;
use crate::discovery::{
    AdvertisementSource, DiscoveryCoordinator, DiscoveryHandle, LocalDiscovery, Observation,
};
use crate::error::{Error, Result};
use crate::event::{DeviceEvent, EventBus};
use crate::message::DeviceCommand;
use crate::protocol::Transport;
use crate::state::DeviceSnapshot;
use crate::types::{DeviceAddress, DeviceEndpoint, DeviceIdentity, Serial};

/// Entry point for applications.
///
/// The `DeviceManager` owns the discovery coordinator (the device
/// registry), the state coordinator, and any discovery sources attached
/// to it. Devices are added manually or found by discovery; each gets a
/// connection supervisor that keeps it connected until it is removed.
///
/// Must be created inside a Tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use dyson_link::config::IntegrationConfig;
/// use dyson_link::manager::DeviceManager;
/// use dyson_link::message::DeviceCommand;
/// use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
///
/// #[tokio::main]
/// async fn main() -> dyson_link::Result<()> {
///     let manager = DeviceManager::with_mqtt(IntegrationConfig::default());
///     let mut events = manager.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("Event: {event:?}");
///         }
///     });
///
///     let identity = DeviceIdentity::new(
///         Serial::new("ABC-123")?,
///         ProductType::new("438")?,
///         Credential::new("local-secret"),
///     );
///     let serial = identity.serial().clone();
///     manager
///         .add_manual_device(identity, Some("192.168.1.40".parse()?))
///         .await?;
///
///     manager
///         .send_command(&serial, DeviceCommand::set_state([("fpwr", "ON")]))
///         .await?;
///
///     manager.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct DeviceManager {
    config: IntegrationConfig,
    events: EventBus,
    discovery: DiscoveryCoordinator,
    state: StateCoordinator,
    local: Mutex<Vec<LocalDiscovery>>,
    cloud: Mutex<Option<CloudDiscovery>>,
}

impl DeviceManager {
    /// Creates a manager reaching devices through `transport`.
    #[must_use]
    pub fn new(config: IntegrationConfig, transport: Arc<dyn Transport>) -> Self {
        let events = EventBus::with_capacity(config.event_capacity);
        let (sink, supervisor_events) = mpsc::unbounded_channel();
        let context = SupervisorContext {
            settings: config.connection.clone(),
            transport,
            sink,
        };

        let discovery = DiscoveryCoordinator::spawn(&config, context, events.clone());
        let state = StateCoordinator::spawn(
            supervisor_events,
            discovery.handle().clone(),
            events.clone(),
            &config,
        );

        Self {
            config,
            events,
            discovery,
            state,
            local: Mutex::new(Vec::new()),
            cloud: Mutex::new(None),
        }
    }

    /// Creates a manager using the `rumqttc` transport.
    #[cfg(feature = "mqtt")]
    #[must_use]
    pub fn with_mqtt(config: IntegrationConfig) -> Self {
        Self::new(config, Arc::new(crate::protocol::MqttTransport::new()))
    }

    /// Returns the configuration the manager was created with.
    #[must_use]
    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    /// Subscribes to device events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Returns the number of active event subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registers a device entered by the user.
    ///
    /// Without an address the device waits for discovery to find it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` after shutdown.
    pub async fn add_manual_device(
        &self,
        identity: DeviceIdentity,
        address: Option<DeviceAddress>,
    ) -> Result<()> {
        self.observe(Observation::manual(identity, address)).await
    }

    /// Feeds an observation from a custom discovery source.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` after shutdown.
    pub async fn observe(&self, observation: Observation) -> Result<()> {
        self.discovery.handle().observe(observation).await
    }

    /// Removes a device and tears down its connection.
    ///
    /// Discovery does not bring the device back; it is reported as
    /// [`DeviceEvent::RemovedDeviceSeen`] until [`add_manual_device`]
    /// registers it again.
    ///
    /// [`add_manual_device`]: Self::add_manual_device
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` if the device is not registered.
    pub async fn remove_device(&self, serial: &Serial) -> Result<()> {
        self.discovery.handle().remove(serial).await?;
        self.state.forget(serial);
        Ok(())
    }

    /// Returns copies of all endpoints, ordered by serial.
    #[must_use]
    pub fn endpoints(&self) -> Vec<DeviceEndpoint> {
        self.discovery.handle().endpoints()
    }

    /// Returns a copy of one endpoint.
    #[must_use]
    pub fn endpoint(&self, serial: &Serial) -> Option<DeviceEndpoint> {
        self.discovery.handle().endpoint(serial)
    }

    /// Returns the registry handle, for attaching custom sources.
    #[must_use]
    pub fn registry(&self) -> &DiscoveryHandle {
        self.discovery.handle()
    }

    // =========================================================================
    // Discovery sources
    // =========================================================================

    /// Starts forwarding local service advertisements from `source`.
    pub fn attach_local_discovery(&self, source: impl AdvertisementSource) {
        let discovery = LocalDiscovery::spawn(source, self.discovery.handle().clone());
        self.local.lock().push(discovery);
    }

    /// Starts polling a cloud account, replacing any account attached
    /// before.
    pub async fn attach_cloud(&self, account: Arc<CloudAccount>) {
        let discovery = CloudDiscovery::spawn(
            account,
            self.discovery.handle().clone(),
            self.events.clone(),
            &self.config,
        );
        let previous = self.cloud.lock().replace(discovery);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    /// Stops polling the cloud account. Cloud-sourced devices stay
    /// registered.
    pub async fn detach_cloud(&self) {
        let previous = self.cloud.lock().take();
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    // =========================================================================
    // State and commands
    // =========================================================================

    /// Returns a copy of the device's last-known state.
    #[must_use]
    pub fn current_snapshot(&self, serial: &Serial) -> Option<DeviceSnapshot> {
        self.state.current_snapshot(serial)
    }

    /// Returns the device's connection state.
    ///
    /// Registered devices without a supervisor (no address yet) are
    /// `Disconnected`.
    #[must_use]
    pub fn connection_state(&self, serial: &Serial) -> Option<ConnectionState> {
        let handle = self.discovery.handle();
        match handle.supervisor(serial) {
            Some(supervisor) => Some(supervisor.state()),
            None => handle
                .endpoint(serial)
                .map(|_| ConnectionState::Disconnected),
        }
    }

    /// Sends a command to a device.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceNotFound` for unknown devices,
    /// `Error::NotConnected` unless the device is connected, or
    /// `Error::Rejected` if delivery failed.
    pub async fn send_command(&self, serial: &Serial, command: DeviceCommand) -> Result<()> {
        let handle = self.discovery.handle();
        let Some(supervisor) = handle.supervisor(serial) else {
            return Err(match handle.endpoint(serial) {
                Some(_) => Error::NotConnected,
                None => Error::DeviceNotFound(serial.to_string()),
            });
        };
        supervisor.send(command).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stops every task and disconnects every device.
    ///
    /// Returns once all connections are closed.
    pub async fn shutdown(self) {
        let local = std::mem::take(&mut *self.local.lock());
        for discovery in local {
            discovery.shutdown().await;
        }
        let cloud = self.cloud.lock().take();
        if let Some(cloud) = cloud {
            cloud.shutdown().await;
        }

        self.discovery.shutdown().await;
        self.state.shutdown().await;
        tracing::debug!("Device manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cloud::api::mock::{MockCloudApi, session_for};
    use crate::cloud::{DeviceCloudInfo, Identifier, Region};
    use crate::discovery::Advertisement;
    use crate::protocol::mock::MockTransport;
    use crate::types::{Credential, DiscoverySource, ProductType};

    fn serial() -> Serial {
        Serial::new("ABC-123").unwrap()
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(serial(), ProductType::new("438").unwrap(), Credential::new("pw"))
    }

    fn manager(transport: &MockTransport) -> DeviceManager {
        DeviceManager::new(IntegrationConfig::default(), Arc::new(transport.clone()))
    }

    async fn wait_connected(manager: &DeviceManager) {
        manager
            .registry()
            .supervisor(&serial())
            .unwrap()
            .watch_state()
            .wait_for(ConnectionState::is_connected)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_device_connects_and_reports_state() {
        let transport = MockTransport::new();
        let manager = manager(&transport);
        let mut events = manager.subscribe();

        manager
            .add_manual_device(identity(), Some("10.0.0.5".parse().unwrap()))
            .await
            .unwrap();
        wait_connected(&manager).await;
        assert_eq!(manager.connection_state(&serial()), Some(ConnectionState::Connected));

        transport
            .inject(
                "438/ABC-123/status/current",
                r#"{"msg":"CURRENT-STATE","product-state":{"fpwr":"ON"}}"#,
            )
            .await;
        loop {
            if events.recv().await.unwrap().is_snapshot() {
                break;
            }
        }
        let snapshot = manager.current_snapshot(&serial()).unwrap();
        assert_eq!(snapshot.product_field("fpwr"), Some("ON"));

        manager
            .send_command(&serial(), DeviceCommand::set_state([("fpwr", "OFF")]))
            .await
            .unwrap();
        assert!(
            transport
                .published()
                .iter()
                .any(|(topic, payload)| topic == "438/ABC-123/command"
                    && payload.contains("STATE-SET"))
        );

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_to_unknown_or_unreachable_devices_fail() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        assert!(matches!(
            manager
                .send_command(&serial(), DeviceCommand::RequestCurrentState)
                .await,
            Err(Error::DeviceNotFound(_))
        ));

        manager.add_manual_device(identity(), None).await.unwrap();
        assert_eq!(
            manager.connection_state(&serial()),
            Some(ConnectionState::Disconnected)
        );
        assert!(matches!(
            manager
                .send_command(&serial(), DeviceCommand::RequestCurrentState)
                .await,
            Err(Error::NotConnected)
        ));
        assert_eq!(transport.connect_count(), 0);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_device_is_forgotten() {
        let transport = MockTransport::new();
        let manager = manager(&transport);

        manager
            .add_manual_device(identity(), Some("10.0.0.5".parse().unwrap()))
            .await
            .unwrap();
        wait_connected(&manager).await;

        manager.remove_device(&serial()).await.unwrap();
        assert!(manager.endpoints().is_empty());
        assert_eq!(manager.connection_state(&serial()), None);
        assert_eq!(transport.open_sessions(), 0);
        assert!(matches!(
            manager.remove_device(&serial()).await,
            Err(Error::DeviceNotFound(_))
        ));

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn local_advertisement_completes_a_manual_device() {
        let transport = MockTransport::new();
        let manager = manager(&transport);
        let (tx, rx) = mpsc::channel(4);
        manager.attach_local_discovery(rx);

        manager.add_manual_device(identity(), None).await.unwrap();
        tx.send(Advertisement::new(
            "438_ABC-123._dyson_mqtt._tcp.local.",
            "10.0.0.8".parse().unwrap(),
        ))
        .await
        .unwrap();

        let mut registry = manager.registry().watch_registry();
        registry
            .wait_for(|r| r.get(&serial()).is_some_and(|e| e.supervisor.is_some()))
            .await
            .unwrap();
        wait_connected(&manager).await;

        let endpoint = manager.endpoint(&serial()).unwrap();
        assert_eq!(endpoint.source(), DiscoverySource::LocalDiscovery);
        assert_eq!(transport.addresses(), ["10.0.0.8:1883"]);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cloud_account_populates_the_registry() {
        let transport = MockTransport::new();
        let manager = manager(&transport);
        let region = Region::new("GB").unwrap();
        let identifier = Identifier::Email("user@example.com".to_string());
        let api = MockCloudApi::new();
        api.push_devices(Ok(vec![DeviceCloudInfo {
            serial: serial(),
            name: "Office".to_string(),
            product_type: "438".to_string(),
            variant: None,
            credential: Credential::new("pw"),
            version: None,
            mqtt_root_topic: None,
            address_hint: Some("10.0.0.5".parse().unwrap()),
        }]));
        let account = Arc::new(CloudAccount::with_session(
            Arc::new(api),
            session_for(&region, &identifier, Duration::from_secs(3600)),
        ));

        manager.attach_cloud(account).await;
        let mut registry = manager.registry().watch_registry();
        registry
            .wait_for(|r| r.contains_key(&serial()))
            .await
            .unwrap();
        wait_connected(&manager).await;
        assert_eq!(manager.endpoint(&serial()).unwrap().name(), Some("Office"));

        manager.detach_cloud().await;
        manager.shutdown().await;
        assert_eq!(transport.open_sessions(), 0);
    }
}
