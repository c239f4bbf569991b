// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-device connection supervisor.
//!
//! A [`ConnectionSupervisor`] is a handle to a spawned task that owns one
//! device's connection. The task connects, subscribes, decodes inbound
//! messages into [`DeviceSnapshot`]s, watches for silence, and reconnects
//! with backoff. It keeps going until it is stopped; only an explicit
//! request parks it in [`ConnectionState::Failed`].
//!
//! Commands reach the task over a channel; connection state is published
//! on a `watch` channel and, together with snapshots, on the supervisor's
//! event sink.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConnectionSettings;
use crate::error::{Error, Result, TransportError};
use crate::message::{DeviceCommand, MessageDecoder, Topics, decoder_for};
use crate::protocol::{ConnectOptions, Session, SessionHandle, Transport, TransportEvent};
use crate::state::DeviceSnapshot;
use crate::types::{DeviceAddress, DeviceIdentity, Serial};

use super::{ConnectionState, FailureReason};

/// Capacity of a supervisor's command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Something a supervisor reports to its owner.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The connection state changed.
    StateChanged {
        /// Device serial.
        serial: Serial,
        /// New state.
        state: ConnectionState,
    },
    /// A message was decoded into a new snapshot.
    Snapshot(DeviceSnapshot),
    /// A message could not be decoded and was skipped.
    DecodeFailed {
        /// Device serial.
        serial: Serial,
        /// Decoder error.
        error: String,
    },
}

/// Channel supervisors report on.
pub type EventSink = mpsc::UnboundedSender<SupervisorEvent>;

/// Everything a supervisor needs besides the device itself.
#[derive(Clone)]
pub struct SupervisorContext {
    /// Timing and backoff settings.
    pub settings: ConnectionSettings,
    /// Transport used to reach the device.
    pub transport: Arc<dyn Transport>,
    /// Where events are reported.
    pub sink: EventSink,
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum Command {
    Send {
        command: DeviceCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateAddress(DeviceAddress),
    UpdateFallback(Option<DeviceAddress>),
    UpdateIdentity(DeviceIdentity),
    Suspend(FailureReason),
    Retry,
    Stop,
}

/// Cloneable handle for commanding a running supervisor.
///
/// Handles outlive nothing: once the supervisor stops, commands are
/// dropped and [`send`](Self::send) fails with `ChannelClosed`.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    serial: Serial,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    /// Returns the device serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Publishes a command to the device.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` unless the device is connected; nothing
    /// is sent in that case. Returns `Error::Rejected` if the publish fails
    /// or times out.
    pub async fn send(&self, command: DeviceCommand) -> Result<()> {
        if !self.state.borrow().is_connected() {
            return Err(Error::NotConnected);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed("connection supervisor".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed("connection supervisor".to_string()))?
    }

    /// Points the supervisor at a new address.
    ///
    /// An open connection is only torn down if the address differs.
    pub async fn update_address(&self, address: DeviceAddress) {
        self.command(Command::UpdateAddress(address)).await;
    }

    /// Sets the address tried when the primary one keeps failing.
    ///
    /// After [`ConnectionSettings::fallback_after`] consecutive failures
    /// the supervisor alternates between both addresses. An open
    /// connection is left alone.
    pub async fn update_fallback(&self, address: Option<DeviceAddress>) {
        self.command(Command::UpdateFallback(address)).await;
    }

    /// Replaces the device identity (a new credential or topic root).
    pub async fn update_identity(&self, identity: DeviceIdentity) {
        self.command(Command::UpdateIdentity(identity)).await;
    }

    /// Disconnects and parks the supervisor in `Failed(reason)` until
    /// [`retry`](Self::retry) is called.
    pub async fn suspend(&self, reason: FailureReason) {
        self.command(Command::Suspend(reason)).await;
    }

    /// Leaves a parked or backing-off state and connects immediately.
    pub async fn retry(&self) {
        self.command(Command::Retry).await;
    }

    async fn command(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!(serial = %self.serial, "Connection supervisor already stopped");
        }
    }
}

/// Owner of a running per-device connection task.
///
/// Dropping the supervisor without [`stop`](Self::stop) ends the task
/// too, but nothing waits for it to disconnect.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    handle: SupervisorHandle,
    task: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    /// Spawns the connection task.
    ///
    /// Without an address the supervisor stays `Disconnected` until
    /// [`SupervisorHandle::update_address`] provides one.
    #[must_use]
    pub fn start(
        identity: DeviceIdentity,
        address: Option<DeviceAddress>,
        context: SupervisorContext,
    ) -> Self {
        let serial = identity.serial().clone();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let jitter = context.settings.reconnection.sample_jitter();
        let actor = Actor {
            topics: Topics::for_identity(&identity),
            decoder: decoder_for(identity.family()),
            identity,
            address,
            fallback: None,
            settings: context.settings,
            transport: context.transport,
            sink: context.sink,
            commands: commands_rx,
            state_tx,
            snapshot: None,
            jitter,
        };

        tracing::debug!(%serial, "Starting connection supervisor");
        let task = tokio::spawn(actor.run());

        Self {
            handle: SupervisorHandle {
                serial,
                commands: commands_tx,
                state: state_rx,
            },
            task: Some(task),
        }
    }

    /// Returns a cloneable handle to the task.
    #[must_use]
    pub fn handle(&self) -> &SupervisorHandle {
        &self.handle
    }

    /// Returns the device serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        self.handle.serial()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Stops the task and waits until it has disconnected.
    pub async fn stop(mut self) {
        self.handle.command(Command::Stop).await;
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(serial = %self.handle.serial, error = %e, "Connection supervisor task failed");
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

/// What the actor does next.
enum Phase {
    Connect,
    Backoff,
    Parked(FailureReason),
    Idle,
    Exit,
}

enum Attempt {
    Connected(Session),
    Failed(TransportError),
    Interrupted(Phase),
}

struct Actor {
    identity: DeviceIdentity,
    address: Option<DeviceAddress>,
    fallback: Option<DeviceAddress>,
    topics: Topics,
    decoder: &'static dyn MessageDecoder,
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    sink: EventSink,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot: Option<DeviceSnapshot>,
    jitter: f32,
}

impl Actor {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut phase = Phase::Connect;

        loop {
            phase = match phase {
                Phase::Connect => match self.target(failures) {
                    None => Phase::Idle,
                    Some(address) => match self.connect(address).await {
                        Attempt::Connected(session) => {
                            failures = 0;
                            self.serve(session).await
                        }
                        Attempt::Failed(TransportError::AuthRejected) => {
                            tracing::error!(
                                serial = %self.identity.serial(),
                                "Device rejected the local credential"
                            );
                            Phase::Parked(FailureReason::AuthRejected)
                        }
                        Attempt::Failed(e) => {
                            tracing::debug!(serial = %self.identity.serial(), error = %e, "Connection attempt failed");
                            Phase::Backoff
                        }
                        Attempt::Interrupted(next) => next,
                    },
                },
                Phase::Backoff => {
                    failures = failures.saturating_add(1);
                    self.backoff(failures).await
                }
                Phase::Parked(reason) => {
                    failures = 0;
                    self.park(reason).await
                }
                Phase::Idle => self.idle().await,
                Phase::Exit => break,
            };
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::debug!(serial = %self.identity.serial(), "Connection supervisor stopped");
    }

    // =========================================================================
    // Offline phases
    // =========================================================================

    async fn connect(&mut self, address: DeviceAddress) -> Attempt {
        self.set_state(ConnectionState::Connecting);

        let options = ConnectOptions::for_device(&self.identity, address)
            .with_connect_timeout(self.settings.connect_timeout)
            .with_keep_alive(self.settings.keep_alive);
        let deadline = self.settings.connect_timeout;
        let transport = Arc::clone(&self.transport);
        let connect = tokio::time::timeout(deadline, transport.connect(options));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok(session)) => Attempt::Connected(session),
                        Ok(Err(e)) => Attempt::Failed(e),
                        Err(_) => Attempt::Failed(TransportError::ConnectTimeout(deadline)),
                    };
                }
                command = self.commands.recv() => {
                    if let Some(next) = self.handle_offline(command) {
                        // Dropping `connect` aborts the attempt.
                        return Attempt::Interrupted(next);
                    }
                }
            }
        }
    }

    async fn backoff(&mut self, attempt: u32) -> Phase {
        let delay = self
            .settings
            .reconnection
            .delay_with_jitter(attempt - 1, self.jitter);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.set_state(ConnectionState::Reconnecting {
            attempt,
            next_retry_at,
        });
        tracing::debug!(serial = %self.identity.serial(), attempt, ?delay, "Scheduling reconnect");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Phase::Connect,
                command = self.commands.recv() => {
                    if let Some(next) = self.handle_offline(command) {
                        return next;
                    }
                }
            }
        }
    }

    async fn park(&mut self, reason: FailureReason) -> Phase {
        self.set_state(ConnectionState::Failed(reason));
        loop {
            let command = self.commands.recv().await;
            if let Some(next) = self.handle_offline(command) {
                return next;
            }
        }
    }

    async fn idle(&mut self) -> Phase {
        self.set_state(ConnectionState::Disconnected);
        loop {
            let command = self.commands.recv().await;
            if let Some(next) = self.handle_offline(command) {
                return next;
            }
        }
    }

    /// Handles a command while no session is open. Returns the next phase
    /// if the command ends the current one.
    fn handle_offline(&mut self, command: Option<Command>) -> Option<Phase> {
        match command {
            Some(Command::Send { reply, .. }) => {
                let _ = reply.send(Err(Error::NotConnected));
                None
            }
            Some(Command::UpdateAddress(address)) => {
                let changed = self.address.as_ref() != Some(&address);
                self.address = Some(address);
                changed.then_some(Phase::Connect)
            }
            Some(Command::UpdateFallback(address)) => {
                let wake = self.address.is_none() && address.is_some() && address != self.fallback;
                self.fallback = address;
                wake.then_some(Phase::Connect)
            }
            Some(Command::UpdateIdentity(identity)) => {
                let changed = identity != self.identity;
                self.set_identity(identity);
                changed.then_some(Phase::Connect)
            }
            Some(Command::Suspend(reason)) => Some(Phase::Parked(reason)),
            Some(Command::Retry) => Some(Phase::Connect),
            Some(Command::Stop) | None => Some(Phase::Exit),
        }
    }

    // =========================================================================
    // Online phase
    // =========================================================================

    async fn serve(&mut self, session: Session) -> Phase {
        let Session { handle, mut events } = session;
        let serial = self.identity.serial().clone();

        for topic in self.topics.status().to_vec() {
            if let Err(e) = handle.subscribe(&topic).await {
                tracing::warn!(%serial, %topic, error = %e, "Subscription failed");
                close(handle.as_ref(), &serial).await;
                return Phase::Backoff;
            }
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!(%serial, "Device connected");

        self.request(handle.as_ref(), DeviceCommand::RequestCurrentState)
            .await;
        if self.identity.family().polls_environment() {
            self.request(handle.as_ref(), DeviceCommand::RequestEnvironmentalData)
                .await;
        }

        let window = self.settings.liveness_window;
        let mut last_message = Instant::now();
        let mut probed = false;

        let next = loop {
            let deadline = last_message + window;
            let probe_at = last_message + window / 2;

            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Message { topic, payload }) => {
                        last_message = Instant::now();
                        probed = false;
                        self.handle_message(&topic, &payload);
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        let error = TransportError::ConnectionLost(reason);
                        tracing::info!(%serial, error = %error, "Device connection lost");
                        break Phase::Backoff;
                    }
                    None => {
                        tracing::info!(%serial, "Device event stream ended");
                        break Phase::Backoff;
                    }
                },
                () = tokio::time::sleep_until(probe_at), if !probed => {
                    probed = true;
                    tracing::debug!(%serial, "Device quiet, probing");
                    self.request(handle.as_ref(), DeviceCommand::RequestCurrentState).await;
                }
                () = tokio::time::sleep_until(deadline) => {
                    let error = TransportError::StaleConnection(window);
                    tracing::info!(%serial, error = %error, "Stale connection, reconnecting");
                    break Phase::Backoff;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send { command, reply }) => {
                        let result = self.publish(handle.as_ref(), &command).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::UpdateAddress(address)) => {
                        if self.address.as_ref() != Some(&address) {
                            tracing::info!(%serial, %address, "Device address changed");
                            self.address = Some(address);
                            break Phase::Connect;
                        }
                    }
                    Some(Command::UpdateFallback(address)) => self.fallback = address,
                    Some(Command::UpdateIdentity(identity)) => {
                        if identity != self.identity {
                            self.set_identity(identity);
                            break Phase::Connect;
                        }
                    }
                    Some(Command::Suspend(reason)) => break Phase::Parked(reason),
                    Some(Command::Retry) => {}
                    Some(Command::Stop) | None => break Phase::Exit,
                },
            }
        };

        close(handle.as_ref(), &serial).await;
        next
    }

    fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        if !self.topics.is_status(topic) {
            tracing::trace!(serial = %self.identity.serial(), %topic, "Ignoring message on foreign topic");
            return;
        }

        match self.decoder.decode(payload) {
            Ok(Some(update)) => {
                let now = Utc::now();
                let base = self.snapshot.take().unwrap_or_else(|| {
                    DeviceSnapshot::new(
                        self.identity.serial().clone(),
                        self.identity.family().freshness(),
                        now,
                    )
                });
                tracing::trace!(serial = %self.identity.serial(), kind = update.kind(), "State update");
                let next = base.apply(update, now);
                self.snapshot = Some(next.clone());
                let _ = self.sink.send(SupervisorEvent::Snapshot(next));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(serial = %self.identity.serial(), error = %e, "Skipping malformed payload");
                let _ = self.sink.send(SupervisorEvent::DecodeFailed {
                    serial: self.identity.serial().clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn publish(&self, handle: &dyn SessionHandle, command: &DeviceCommand) -> Result<()> {
        let payload = command.encode(Utc::now());
        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, handle.publish(self.topics.command(), payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Rejected(e.to_string())),
            Err(_) => Err(Error::Rejected(
                TransportError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
                    .to_string(),
            )),
        }
    }

    /// Publishes a state request, logging failures.
    async fn request(&self, handle: &dyn SessionHandle, command: DeviceCommand) {
        if let Err(e) = self.publish(handle, &command).await {
            tracing::warn!(serial = %self.identity.serial(), msg = command.msg(), error = %e, "Request failed");
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Picks the address for the next attempt after `failures`
    /// consecutive failures.
    fn target(&self, failures: u32) -> Option<DeviceAddress> {
        let Some(fallback) = self.fallback.as_ref().filter(|f| self.address.as_ref() != Some(*f))
        else {
            return self.address.clone();
        };
        let after = self.settings.fallback_after;
        if self.address.is_none() || (failures >= after && (failures - after).is_multiple_of(2)) {
            tracing::debug!(serial = %self.identity.serial(), %fallback, failures, "Trying fallback address");
            Some(fallback.clone())
        } else {
            self.address.clone()
        }
    }

    fn set_identity(&mut self, identity: DeviceIdentity) {
        self.topics = Topics::for_identity(&identity);
        self.decoder = decoder_for(identity.family());
        self.identity = identity;
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            tracing::debug!(serial = %self.identity.serial(), %state, "Connection state changed");
            let _ = self.sink.send(SupervisorEvent::StateChanged {
                serial: self.identity.serial().clone(),
                state,
            });
        }
    }
}

async fn close(handle: &dyn SessionHandle, serial: &Serial) {
    if let Err(e) = handle.disconnect().await {
        tracing::debug!(%serial, error = %e, "Disconnect failed");
    }
}
