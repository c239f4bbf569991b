// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast bus for device events.

use tokio::sync::broadcast;

use crate::config::DEFAULT_EVENT_CAPACITY;

use super::DeviceEvent;

/// Event bus broadcasting device events to any number of subscribers.
///
/// Each subscriber gets its own copy of every event published after it
/// subscribed. A subscriber that falls more than `capacity` events behind
/// loses the oldest ones and sees `RecvError::Lagged`; publishers are never
/// blocked by slow consumers.
///
/// # Examples
///
/// ```
/// use dyson_link::event::{DeviceEvent, EventBus};
/// use dyson_link::types::Serial;
///
/// let bus = EventBus::with_capacity(16);
/// let mut first = bus.subscribe();
/// let mut second = bus.subscribe();
///
/// let delivered = bus.publish_counted(DeviceEvent::EndpointRemoved {
///     serial: Serial::new("ABC-123").unwrap(),
/// });
/// assert_eq!(delivered, 2);
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event to all subscribers.
    ///
    /// Without subscribers the event is dropped.
    pub fn publish(&self, event: DeviceEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Publishes an event and returns how many subscribers received it.
    #[must_use]
    pub fn publish_counted(&self, event: DeviceEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
