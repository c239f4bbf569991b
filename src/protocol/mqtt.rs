// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `rumqttc`-backed transport.
//!
//! Every session owns one `AsyncClient` and a spawned task polling its
//! `EventLoop`. The task stops at the first connection error instead of
//! letting `rumqttc` reconnect on its own, so that reconnection policy
//! stays with the connection supervisor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, EventLoop, MqttOptions, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::TransportError;

use super::{ConnectOptions, Session, SessionHandle, Transport, TransportEvent};

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capacity of the inbound event channel of one session.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the event loop to flush.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Transport connecting to device brokers with `rumqttc`.
///
/// # Examples
///
/// ```no_run
/// use dyson_link::protocol::{ConnectOptions, MqttTransport, Transport};
/// use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
///
/// # async fn example() -> Result<(), dyson_link::error::TransportError> {
/// let identity = DeviceIdentity::new(
///     Serial::new("ABC-123").unwrap(),
///     ProductType::new("438").unwrap(),
///     Credential::new("secret"),
/// );
/// let options = ConnectOptions::for_device(&identity, "10.0.0.5".parse().unwrap());
///
/// let session = MqttTransport::new().connect(options).await?;
/// session.handle.subscribe("438/ABC-123/status/current").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttTransport;

impl MqttTransport {
    /// Creates a transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<Session, TransportError> {
        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!("dyson_link_{}_{}", std::process::id(), counter);

        let mut mqtt_options =
            MqttOptions::new(&client_id, options.address.host(), options.address.port());
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options.set_credentials(&options.username, &options.password);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();

        let task = tokio::spawn(handle_session_events(event_loop, connack_tx, events_tx));
        // Dropping the session aborts the event loop, including when this
        // future is cancelled while waiting for the acknowledgement.
        let session = MqttSession {
            client,
            task: Mutex::new(Some(task)),
        };

        let timeout = options.connect_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(address = %options.address, %client_id, "MQTT session established");
                Ok(Session {
                    handle: Box::new(session),
                    events: events_rx,
                })
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }
}

/// An open `rumqttc` session.
struct MqttSession {
    client: AsyncClient,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl SessionHandle for MqttSession {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        tracing::debug!(%topic, "Subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self.client.disconnect().await;
        let task = self.task.lock().take();
        if let Some(mut task) = task
            && tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err()
        {
            task.abort();
        }
        result.map_err(TransportError::from)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

/// Maps a `rumqttc` connection error to the transport taxonomy.
fn map_connection_error(error: &ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => TransportError::AuthRejected,
        ConnectionError::ConnectionRefused(code) => {
            TransportError::ConnectionFailed(format!("connection refused: {code:?}"))
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

/// Polls the event loop until the connection ends.
async fn handle_session_events(
    mut event_loop: EventLoop,
    connack_tx: oneshot::Sender<Result<(), TransportError>>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connected");
                let result = match connack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(map_connection_error(&ConnectionError::ConnectionRefused(code))),
                };
                let failed = result.is_err();
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(result);
                }
                if failed {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, "MQTT message received");
                let event = TransportEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if events_tx.send(event).await.is_err() {
                    // Session dropped by its owner.
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::debug!("MQTT broker sent disconnect");
                let _ = events_tx
                    .send(TransportEvent::Closed("broker sent disconnect".to_string()))
                    .await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = connack_tx.take() {
                    tracing::debug!(error = %e, "MQTT connection attempt failed");
                    let _ = tx.send(Err(map_connection_error(&e)));
                } else {
                    tracing::debug!(error = %e, "MQTT session closed");
                    let _ = events_tx.send(TransportEvent::Closed(e.to_string())).await;
                }
                break;
            }
        }
    }
}
