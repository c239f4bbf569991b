// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic cloud device listing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::IntegrationConfig;
use crate::discovery::{DiscoveryHandle, Observation};
use crate::error::{CloudError, Result};
use crate::event::{DeviceEvent, EventBus, UserAction};

use super::{AuthState, CloudAccount, RefreshOutcome};

/// Background task feeding the cloud device directory into the registry.
///
/// Every poll interval (and right after the account signs in) the task
/// renews the token if it is about to expire, lists the account's
/// devices, and reports each one as a cloud [`Observation`]. When the
/// session is lost it tells the registry, which degrades cloud-sourced
/// devices to local-only, and asks the user to sign in again.
#[derive(Debug)]
pub struct CloudDiscovery {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CloudDiscovery {
    /// Starts polling `account`.
    #[must_use]
    pub fn spawn(
        account: Arc<CloudAccount>,
        registry: DiscoveryHandle,
        events: EventBus,
        config: &IntegrationConfig,
    ) -> Self {
        let poller = Poller {
            account,
            registry,
            events,
            refresh_margin: config.token_refresh_margin,
            auto_discovery: config.cloud_auto_discovery,
            available: None,
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_task(
            poller,
            config.cloud_poll_interval.as_duration(),
            cancel.clone(),
        ));
        Self { cancel, task }
    }

    /// Stops polling. An in-flight cloud call is abandoned.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Cloud discovery task failed");
        }
    }
}

async fn poll_task(mut poller: Poller, period: Duration, cancel: CancellationToken) {
    let mut auth = poller.account.watch();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signed_in = auth.borrow_and_update().is_authenticated();

    loop {
        let result = tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = poller.poll_once() => result,
                }
            }
            changed = auth.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = auth.borrow_and_update().clone();
                let was_signed_in = std::mem::replace(&mut signed_in, state.is_authenticated());
                if state.is_authenticated() && !was_signed_in {
                    tracing::info!("Cloud account signed in, listing devices");
                    interval.reset();
                    poller.poll_once().await
                } else if state.is_authenticated() {
                    Ok(())
                } else {
                    poller.on_signed_out(&state).await
                }
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "Registry gone, cloud discovery stopped");
            break;
        }
    }
}

struct Poller {
    account: Arc<CloudAccount>,
    registry: DiscoveryHandle,
    events: EventBus,
    refresh_margin: Duration,
    auto_discovery: bool,
    /// Last availability reported to the registry.
    available: Option<bool>,
}

impl Poller {
    /// One cloud round: token check, then device listing.
    ///
    /// Only registry failures are returned; cloud failures are handled
    /// here and retried on the next tick.
    async fn poll_once(&mut self) -> Result<()> {
        let state = self.account.state();
        if !state.is_authenticated() {
            return self.on_signed_out(&state).await;
        }

        match self.account.refresh_if_needed(self.refresh_margin).await {
            Ok(RefreshOutcome::Deferred) => {
                tracing::debug!("Token refresh deferred, using current token");
            }
            Ok(_) => {}
            Err(e) if e.requires_reauth() => return self.session_lost().await,
            Err(e) => {
                tracing::warn!(error = %e, "Cloud token check failed, retrying next poll");
                return Ok(());
            }
        }

        if !self.auto_discovery {
            return self.set_available(true).await;
        }

        let devices = match self.account.list_devices().await {
            Ok(devices) => devices,
            Err(e) if e.requires_reauth() => return self.session_lost().await,
            Err(e) => {
                log_listing_failure(&e);
                return Ok(());
            }
        };

        self.set_available(true).await?;
        tracing::debug!(count = devices.len(), "Cloud device listing received");
        for info in &devices {
            match Observation::from_cloud_info(info) {
                Ok(observation) => self.registry.observe(observation).await?,
                Err(e) => {
                    tracing::warn!(serial = %info.serial, error = %e, "Skipping unusable cloud device");
                }
            }
        }
        Ok(())
    }

    async fn on_signed_out(&mut self, state: &AuthState) -> Result<()> {
        match state {
            AuthState::ReauthRequired { .. } => self.session_lost().await,
            // Signed out or in the middle of signing in again.
            _ if self.available == Some(true) => self.set_available(false).await,
            _ => Ok(()),
        }
    }

    async fn session_lost(&mut self) -> Result<()> {
        if self.available != Some(false) {
            tracing::error!("Cloud session lost, reauthentication required");
            self.events.publish(DeviceEvent::UserActionRequired {
                serial: None,
                action: UserAction::ReauthenticateCloud,
            });
        }
        self.set_available(false).await
    }

    async fn set_available(&mut self, available: bool) -> Result<()> {
        if self.available == Some(available) {
            return Ok(());
        }
        self.registry.set_cloud_available(available).await?;
        self.available = Some(available);
        Ok(())
    }
}

fn log_listing_failure(error: &CloudError) {
    match error.retry_after() {
        Some(wait) => {
            tracing::warn!(error = %error, ?wait, "Cloud device listing rate limited");
        }
        None => tracing::warn!(error = %error, "Cloud device listing failed, retrying next poll"),
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{broadcast, mpsc};

    use super::*;
    use crate::cloud::api::mock::{MockCloudApi, session_for};
    use crate::cloud::{DeviceCloudInfo, Identifier, Region};
    use crate::config::ConnectionSettings;
    use crate::connection::SupervisorContext;
    use crate::discovery::DiscoveryCoordinator;
    use crate::protocol::mock::MockTransport;
    use crate::types::{Credential, DiscoverySource, Serial};

    fn region() -> Region {
        Region::new("GB").unwrap()
    }

    fn email() -> Identifier {
        Identifier::Email("user@example.com".to_string())
    }

    fn info(serial: &str) -> DeviceCloudInfo {
        DeviceCloudInfo {
            serial: Serial::new(serial).unwrap(),
            name: "Bedroom".to_string(),
            product_type: "438".to_string(),
            variant: None,
            credential: Credential::new("pw"),
            version: None,
            mqtt_root_topic: None,
            address_hint: None,
        }
    }

    struct Harness {
        api: MockCloudApi,
        account: Arc<CloudAccount>,
        coordinator: DiscoveryCoordinator,
        bus: EventBus,
    }

    impl Harness {
        fn new(session_lifetime: Option<Duration>) -> Self {
            let api = MockCloudApi::new();
            let account = Arc::new(match session_lifetime {
                Some(lifetime) => CloudAccount::with_session(
                    Arc::new(api.clone()),
                    session_for(&region(), &email(), lifetime),
                ),
                None => CloudAccount::new(Arc::new(api.clone())),
            });
            let (sink, _) = mpsc::unbounded_channel();
            let context = SupervisorContext {
                settings: ConnectionSettings::new(),
                transport: Arc::new(MockTransport::new()),
                sink,
            };
            let bus = EventBus::new();
            let coordinator =
                DiscoveryCoordinator::spawn(&IntegrationConfig::default(), context, bus.clone());
            Self {
                api,
                account,
                coordinator,
                bus,
            }
        }

        fn spawn(&self, config: &IntegrationConfig) -> CloudDiscovery {
            CloudDiscovery::spawn(
                Arc::clone(&self.account),
                self.coordinator.handle().clone(),
                self.bus.clone(),
                config,
            )
        }

        async fn wait_for_endpoint(&self, serial: &str) {
            let serial = Serial::new(serial).unwrap();
            self.coordinator
                .handle()
                .watch_registry()
                .wait_for(|registry| registry.contains_key(&serial))
                .await
                .unwrap();
        }
    }

    fn user_actions(events: &mut broadcast::Receiver<DeviceEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                DeviceEvent::UserActionRequired {
                    action: UserAction::ReauthenticateCloud,
                    ..
                }
            ) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn listed_devices_enter_the_registry() {
        let harness = Harness::new(Some(Duration::from_secs(3600)));
        harness.api.push_devices(Ok(vec![info("ABC-123")]));

        let discovery = harness.spawn(&IntegrationConfig::default());
        harness.wait_for_endpoint("ABC-123").await;

        let endpoint = harness
            .coordinator
            .handle()
            .endpoint(&Serial::new("ABC-123").unwrap())
            .unwrap();
        assert_eq!(endpoint.source(), DiscoverySource::CloudDiscovery);
        assert_eq!(endpoint.name(), Some("Bedroom"));
        assert!(endpoint.address().is_none());

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn listing_repeats_every_poll_interval() {
        let harness = Harness::new(Some(Duration::from_secs(86_400)));
        let discovery = harness.spawn(&IntegrationConfig::default());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.api.count("list_devices"), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(harness.api.count("list_devices"), 2);
        assert_eq!(harness.api.count("refresh_token"), 0);

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_token_is_refreshed_before_listing() {
        let harness = Harness::new(Some(Duration::from_secs(60)));
        let discovery = harness.spawn(&IntegrationConfig::default());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.api.calls(), ["refresh_token", "list_devices"]);
        assert!(matches!(harness.account.state(), AuthState::Authenticated(_)));

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_degrades_cloud_devices_and_asks_for_reauth() {
        let harness = Harness::new(Some(Duration::from_secs(60)));
        let mut events = harness.bus.subscribe();
        let handle = harness.coordinator.handle().clone();
        handle
            .observe(Observation::cloud(
                info("ABC-123").identity().unwrap(),
                Some("10.0.0.5".parse().unwrap()),
            ))
            .await
            .unwrap();
        harness.api.push_refresh(Err(CloudError::InvalidAuth));

        let discovery = harness.spawn(&IntegrationConfig::default());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(matches!(
            harness.account.state(),
            AuthState::ReauthRequired { .. }
        ));
        let endpoint = handle.endpoint(&Serial::new("ABC-123").unwrap()).unwrap();
        assert!(endpoint.is_cloud_degraded());
        assert_eq!(harness.api.count("list_devices"), 0);

        // Later polls do not repeat the prompt.
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(user_actions(&mut events), 1);

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transient_listing_failure_keeps_devices_available() {
        let harness = Harness::new(Some(Duration::from_secs(86_400)));
        let mut events = harness.bus.subscribe();
        harness
            .api
            .push_devices(Err(CloudError::Network("unreachable".to_string())));

        let discovery = harness.spawn(&IntegrationConfig::default());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(harness.account.state().is_authenticated());
        assert_eq!(user_actions(&mut events), 0);

        harness.api.push_devices(Ok(vec![info("ABC-123")]));
        tokio::time::sleep(Duration::from_secs(3600)).await;
        harness.wait_for_endpoint("ABC-123").await;

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auto_discovery_off_skips_listing() {
        let harness = Harness::new(Some(Duration::from_secs(86_400)));
        let discovery =
            harness.spawn(&IntegrationConfig::default().with_cloud_auto_discovery(false));

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(harness.api.count("list_devices"), 0);

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn signing_in_triggers_an_immediate_listing() {
        let harness = Harness::new(None);
        harness.api.push_devices(Ok(vec![info("ABC-123")]));
        let discovery = harness.spawn(&IntegrationConfig::default());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.api.count("list_devices"), 0);

        harness.account.begin(region()).unwrap();
        harness
            .account
            .submit_identifier("user@example.com")
            .await
            .unwrap();
        harness
            .account
            .submit_otp("123456", Some("password"))
            .await
            .unwrap();

        harness.wait_for_endpoint("ABC-123").await;
        assert_eq!(harness.api.count("list_devices"), 1);

        discovery.shutdown().await;
        harness.coordinator.shutdown().await;
    }
}
