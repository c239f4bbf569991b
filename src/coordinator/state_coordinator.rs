// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Last-known device state and periodic polling.
//!
//! The [`StateCoordinator`] sits between the connection supervisors and
//! the feature layer. It consumes what the supervisors report, keeps the
//! latest [`DeviceSnapshot`] per device for pull-based readers, and
//! republishes everything as [`DeviceEvent`]s.
//!
//! Fans do not push environmental readings on their own. For those
//! families the coordinator requests them on a fixed interval; a failed
//! request is reported and simply retried on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::IntegrationConfig;
use crate::connection::{ConnectionState, FailureReason, SupervisorEvent, SupervisorHandle};
use crate::discovery::DiscoveryHandle;
use crate::event::{DeviceEvent, EventBus, UserAction};
use crate::message::DeviceCommand;
use crate::state::DeviceSnapshot;
use crate::types::Serial;

use super::UpdateFailure;

type Snapshots = Arc<RwLock<HashMap<Serial, DeviceSnapshot>>>;

/// Snapshot table plus the tasks that keep it current.
///
/// Readers get copies; only the coordinator's own task writes the table.
#[derive(Debug)]
pub struct StateCoordinator {
    snapshots: Snapshots,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StateCoordinator {
    /// Starts consuming `supervisor_events` and, if enabled, polling.
    #[must_use]
    pub fn spawn(
        supervisor_events: mpsc::UnboundedReceiver<SupervisorEvent>,
        registry: DiscoveryHandle,
        events: EventBus,
        config: &IntegrationConfig,
    ) -> Self {
        let snapshots = Snapshots::default();
        let cancel = CancellationToken::new();

        let mut tasks = vec![tokio::spawn(forward_task(
            supervisor_events,
            registry.clone(),
            Arc::clone(&snapshots),
            events.clone(),
            cancel.clone(),
        ))];
        if config.polling_enabled {
            tasks.push(tokio::spawn(poll_task(
                registry,
                events,
                config.environment_poll_interval,
                cancel.clone(),
            )));
        } else {
            tracing::debug!("Environmental polling disabled");
        }

        Self {
            snapshots,
            cancel,
            tasks,
        }
    }

    /// Returns a copy of the latest snapshot of a device.
    #[must_use]
    pub fn current_snapshot(&self, serial: &Serial) -> Option<DeviceSnapshot> {
        self.snapshots.read().get(serial).cloned()
    }

    /// Returns copies of all snapshots.
    #[must_use]
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Drops the snapshot of a removed device.
    pub fn forget(&self, serial: &Serial) {
        self.snapshots.write().remove(serial);
    }

    /// Stops both tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "State coordinator task failed");
            }
        }
    }
}

// =============================================================================
// Supervisor events
// =============================================================================

async fn forward_task(
    mut supervisor_events: mpsc::UnboundedReceiver<SupervisorEvent>,
    registry: DiscoveryHandle,
    snapshots: Snapshots,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = supervisor_events.recv() => event,
        };
        let Some(event) = event else { break };

        match event {
            SupervisorEvent::StateChanged { serial, state } => {
                if state == ConnectionState::Failed(FailureReason::AuthRejected) {
                    events.publish(DeviceEvent::UpdateFailed {
                        serial: serial.clone(),
                        failure: UpdateFailure::ConfigEntryAuthFailed(
                            "device rejected the local credential".to_string(),
                        ),
                    });
                    events.publish(DeviceEvent::UserActionRequired {
                        serial: Some(serial.clone()),
                        action: UserAction::ReenterCredential,
                    });
                }
                events.publish(DeviceEvent::ConnectionChanged { serial, state });
            }
            SupervisorEvent::Snapshot(snapshot) => {
                // Checked under the table lock: `forget` runs only after
                // the registry stopped listing the serial.
                let mut table = snapshots.write();
                if registry.endpoint(snapshot.serial()).is_none() {
                    drop(table);
                    tracing::debug!(serial = %snapshot.serial(), "Dropping snapshot of removed device");
                    continue;
                }
                table.insert(snapshot.serial().clone(), snapshot.clone());
                drop(table);
                events.publish(DeviceEvent::SnapshotChanged { snapshot });
            }
            SupervisorEvent::DecodeFailed { serial, error } => {
                events.publish(DeviceEvent::UpdateFailed {
                    serial,
                    failure: UpdateFailure::PermanentDataError(error),
                });
            }
        }
    }
    tracing::debug!("State coordinator stopped");
}

// =============================================================================
// Polling
// =============================================================================

async fn poll_task(
    registry: DiscoveryHandle,
    events: EventBus,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Supervisors request environmental data right after connecting.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = poll_environment(&registry, &events) => {}
                }
            }
        }
    }
}

/// Requests environmental data from every connected device that needs
/// polling. Requests run concurrently so one slow device cannot delay
/// the others.
async fn poll_environment(registry: &DiscoveryHandle, events: &EventBus) {
    let targets: Vec<SupervisorHandle> = registry
        .watch_registry()
        .borrow()
        .values()
        .filter(|entry| entry.endpoint.identity().family().polls_environment())
        .filter_map(|entry| entry.supervisor.clone())
        .filter(|supervisor| supervisor.state().is_connected())
        .collect();
    if targets.is_empty() {
        return;
    }

    tracing::debug!(devices = targets.len(), "Polling environmental data");
    let mut requests = JoinSet::new();
    for supervisor in targets {
        requests.spawn(async move {
            let result = supervisor
                .send(DeviceCommand::RequestEnvironmentalData)
                .await;
            (supervisor.serial().clone(), result)
        });
    }

    while let Some(joined) = requests.join_next().await {
        let Ok((serial, result)) = joined else {
            continue;
        };
        if let Err(e) = result {
            tracing::warn!(%serial, error = %e, "Environmental data request failed");
            events.publish(DeviceEvent::UpdateFailed {
                serial,
                failure: UpdateFailure::classify(&e),
            });
        }
    }
}
