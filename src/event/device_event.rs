// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device event types.

use std::fmt;

use crate::connection::ConnectionState;
use crate::coordinator::UpdateFailure;
use crate::state::DeviceSnapshot;
use crate::types::{DeviceAddress, DeviceEndpoint, DiscoverySource, ProductType, Serial};

/// Something only the user can fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAction {
    /// The device rejected its local credential; a new one is needed.
    ReenterCredential,
    /// The cloud session is gone; the account has to sign in again.
    ReauthenticateCloud,
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReenterCredential => f.write_str("re-enter the device credential"),
            Self::ReauthenticateCloud => f.write_str("sign in to the cloud account again"),
        }
    }
}

/// Events emitted by the device manager.
///
/// # Examples
///
/// ```
/// use dyson_link::connection::ConnectionState;
/// use dyson_link::event::DeviceEvent;
/// use dyson_link::types::Serial;
///
/// let serial = Serial::new("ABC-123").unwrap();
/// let event = DeviceEvent::ConnectionChanged {
///     serial: serial.clone(),
///     state: ConnectionState::Connected,
/// };
///
/// assert!(event.is_connection());
/// assert_eq!(event.serial(), Some(&serial));
/// ```
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A device entered the registry.
    EndpointAdded {
        /// Copy of the new endpoint.
        endpoint: DeviceEndpoint,
    },

    /// A registered endpoint changed (address, source, identity, name).
    EndpointUpdated {
        /// Copy of the updated endpoint.
        endpoint: DeviceEndpoint,
    },

    /// A device was removed from the registry.
    EndpointRemoved {
        /// Serial of the removed device.
        serial: Serial,
    },

    /// A device's connection state changed.
    ConnectionChanged {
        /// Device serial.
        serial: Serial,
        /// New state.
        state: ConnectionState,
    },

    /// A device reported new state.
    SnapshotChanged {
        /// The complete new snapshot.
        snapshot: DeviceSnapshot,
    },

    /// A device became usable or unusable for reasons other than its own
    /// connection, such as losing the cloud account it depends on.
    AvailabilityChanged {
        /// Device serial.
        serial: Serial,
        /// Whether the device is usable.
        available: bool,
    },

    /// The cloud lists a device that has no known local address.
    CloudDeviceWithoutAddress {
        /// Device serial.
        serial: Serial,
        /// Name from the cloud listing.
        name: Option<String>,
    },

    /// A device advertised itself locally but is not registered.
    UnknownDeviceAdvertised {
        /// Advertised serial.
        serial: Serial,
        /// Advertised product type, if the service name carried one.
        product_type: Option<ProductType>,
        /// Advertised address.
        address: DeviceAddress,
    },

    /// A removed device showed up again. It stays removed until it is
    /// added back manually.
    RemovedDeviceSeen {
        /// Serial of the removed device.
        serial: Serial,
        /// Where it was seen.
        source: DiscoverySource,
        /// Address it was seen at, if any.
        address: Option<DeviceAddress>,
    },

    /// A state update for a device failed.
    UpdateFailed {
        /// Device serial.
        serial: Serial,
        /// Classified failure.
        failure: UpdateFailure,
    },

    /// The user has to act before things can recover.
    UserActionRequired {
        /// The affected device, or `None` for the cloud account.
        serial: Option<Serial>,
        /// What the user has to do.
        action: UserAction,
    },
}

impl DeviceEvent {
    /// Returns the serial of the device this event is about, if any.
    #[must_use]
    pub fn serial(&self) -> Option<&Serial> {
        match self {
            Self::EndpointAdded { endpoint } | Self::EndpointUpdated { endpoint } => {
                Some(endpoint.serial())
            }
            Self::SnapshotChanged { snapshot } => Some(snapshot.serial()),
            Self::EndpointRemoved { serial }
            | Self::ConnectionChanged { serial, .. }
            | Self::AvailabilityChanged { serial, .. }
            | Self::CloudDeviceWithoutAddress { serial, .. }
            | Self::UnknownDeviceAdvertised { serial, .. }
            | Self::RemovedDeviceSeen { serial, .. }
            | Self::UpdateFailed { serial, .. } => Some(serial),
            Self::UserActionRequired { serial, .. } => serial.as_ref(),
        }
    }

    /// Returns `true` for registry lifecycle events.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::EndpointAdded { .. } | Self::EndpointUpdated { .. } | Self::EndpointRemoved { .. }
        )
    }

    /// Returns `true` if this is a connection event.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionChanged { .. })
    }

    /// Returns `true` if this is a snapshot event.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::SnapshotChanged { .. })
    }

    /// Returns `true` if the event asks for user involvement.
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        match self {
            Self::UserActionRequired { .. }
            | Self::CloudDeviceWithoutAddress { .. }
            | Self::RemovedDeviceSeen { .. } => true,
            Self::UpdateFailed { failure, .. } => failure.requires_user_action(),
            _ => false,
        }
    }
}
