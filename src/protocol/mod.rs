// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport abstraction for talking to a device's local MQTT broker.
//!
//! Each appliance runs its own MQTT broker. The connection supervisor only
//! sees the [`Transport`] trait: `connect` yields a [`Session`] made of a
//! [`SessionHandle`] for outbound traffic and a channel of inbound
//! [`TransportEvent`]s. Reconnection is not the transport's job; a closed
//! session is reported once and never revived.
//!
//! With the `mqtt` feature enabled, [`MqttTransport`] implements the trait
//! on top of `rumqttc`.

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "mqtt")]
mod mqtt;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{DeviceAddress, DeviceIdentity};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;

/// Parameters of one connection attempt.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Address of the device's broker.
    pub address: DeviceAddress,
    /// MQTT user name (the device serial).
    pub username: String,
    /// MQTT password (the local credential).
    pub password: String,
    /// Deadline for the broker's connection acknowledgement.
    pub connect_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
}

impl ConnectOptions {
    /// Builds the options for connecting to `identity` at `address`.
    #[must_use]
    pub fn for_device(identity: &DeviceIdentity, address: DeviceAddress) -> Self {
        Self {
            address,
            username: identity.serial().to_string(),
            password: identity.credential().expose().to_string(),
            connect_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("connect_timeout", &self.connect_timeout)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Something that happened on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic.
    Message {
        /// Topic the message was published on.
        topic: String,
        /// Raw payload.
        payload: Vec<u8>,
    },
    /// The session ended. No further events follow.
    Closed(String),
}

/// Outbound half of an open session.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Subscribes to a topic.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publishes a payload to a topic.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError>;

    /// Closes the session and releases its socket.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// An open session with a device broker.
pub struct Session {
    /// Outbound handle.
    pub handle: Box<dyn SessionHandle>,
    /// Inbound events, in arrival order.
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Connects to device brokers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectTimeout` if the broker does not
    /// acknowledge in time, `TransportError::AuthRejected` if it refuses
    /// the credential, or another `TransportError` if the connection
    /// cannot be established.
    async fn connect(&self, options: ConnectOptions) -> Result<Session, TransportError>;
}
