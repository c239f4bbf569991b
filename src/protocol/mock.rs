// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;

use super::{ConnectOptions, Session, SessionHandle, Transport, TransportEvent};

/// Outcome of one scripted connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockConnect {
    Accept,
    /// Never answers; the caller's deadline fires.
    Hang,
    AuthRejected,
    Refused,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockConnect>,
    published: Vec<(String, String)>,
    subscribed: Vec<String>,
    addresses: Vec<String>,
    sessions: Vec<(String, mpsc::Sender<TransportEvent>)>,
}

/// Transport whose connection attempts follow a script.
///
/// Attempts beyond the script are accepted.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
    connects: Arc<AtomicUsize>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn scripted(outcomes: impl IntoIterator<Item = MockConnect>) -> Self {
        let transport = Self::new();
        transport.state.lock().script.extend(outcomes);
        transport
    }

    pub(crate) fn push_outcome(&self, outcome: MockConnect) {
        self.state.lock().script.push_back(outcome);
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn published(&self) -> Vec<(String, String)> {
        self.state.lock().published.clone()
    }

    pub(crate) fn published_msgs(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .filter_map(|(_, payload)| {
                serde_json::from_str::<serde_json::Value>(&payload)
                    .ok()
                    .and_then(|v| v["msg"].as_str().map(str::to_string))
            })
            .collect()
    }

    pub(crate) fn subscribed(&self) -> Vec<String> {
        self.state.lock().subscribed.clone()
    }

    pub(crate) fn addresses(&self) -> Vec<String> {
        self.state.lock().addresses.clone()
    }

    /// Delivers a message on the most recent open session.
    pub(crate) async fn inject(&self, topic: &str, payload: &str) {
        let sender = self.state.lock().sessions.last().map(|(_, tx)| tx.clone());
        if let Some(sender) = sender {
            let _ = sender
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.as_bytes().to_vec(),
                })
                .await;
        }
    }

    /// Returns the number of sessions not yet closed.
    pub(crate) fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Closes the most recent session from the "network" side.
    pub(crate) async fn drop_connection(&self) {
        let sender = self.state.lock().sessions.pop().map(|(_, tx)| tx);
        if let Some(sender) = sender {
            let _ = sender
                .send(TransportEvent::Closed("connection reset".to_string()))
                .await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, options: ConnectOptions) -> Result<Session, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut state = self.state.lock();
            state.addresses.push(options.address.to_string());
            state.script.pop_front().unwrap_or(MockConnect::Accept)
        };

        match outcome {
            MockConnect::Accept => {
                let (tx, rx) = mpsc::channel(64);
                let address = options.address.to_string();
                self.state.lock().sessions.push((address.clone(), tx));
                Ok(Session {
                    handle: Box::new(MockSession {
                        state: Arc::clone(&self.state),
                        address,
                    }),
                    events: rx,
                })
            }
            MockConnect::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::ConnectTimeout(options.connect_timeout))
            }
            MockConnect::AuthRejected => Err(TransportError::AuthRejected),
            MockConnect::Refused => Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            )),
        }
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    address: String,
}

#[async_trait]
impl SessionHandle for MockSession {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.state.lock().subscribed.push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.state
            .lock()
            .published
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.lock().sessions.retain(|(a, _)| a != &self.address);
        Ok(())
    }
}
