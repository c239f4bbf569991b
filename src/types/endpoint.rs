// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device reachability records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceAddress, DeviceIdentity, Serial};

/// Where the most recent information about an endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoverySource {
    /// Entered by the user.
    Manual,
    /// Seen in a local network service advertisement.
    LocalDiscovery,
    /// Listed by the cloud account.
    CloudDiscovery,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::LocalDiscovery => "local",
            Self::CloudDiscovery => "cloud",
        };
        f.write_str(s)
    }
}

/// The registry record describing how to reach one device.
///
/// Exactly one endpoint exists per serial. Values handed out by the
/// registry are copies; only the discovery coordinator changes the
/// originals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    identity: DeviceIdentity,
    address: Option<DeviceAddress>,
    source: DiscoverySource,
    last_seen_at: DateTime<Utc>,
    name: Option<String>,
    cloud_degraded: bool,
}

impl DeviceEndpoint {
    /// Creates an endpoint seen now.
    #[must_use]
    pub fn new(
        identity: DeviceIdentity,
        address: Option<DeviceAddress>,
        source: DiscoverySource,
    ) -> Self {
        Self {
            identity,
            address,
            source,
            last_seen_at: Utc::now(),
            name: None,
            cloud_degraded: false,
        }
    }

    /// Sets a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the device identity.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Returns the serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        self.identity.serial()
    }

    /// Returns the last known address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&DeviceAddress> {
        self.address.as_ref()
    }

    /// Returns the source of the most recent resolving observation.
    #[must_use]
    pub fn source(&self) -> DiscoverySource {
        self.source
    }

    /// Returns when the device was last observed by any source.
    #[must_use]
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    /// Returns the display name, if known.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns `true` if the endpoint depends on cloud metadata that is
    /// currently unavailable.
    #[must_use]
    pub fn is_cloud_degraded(&self) -> bool {
        self.cloud_degraded
    }

    /// Returns `true` if a connection can be attempted.
    #[must_use]
    pub fn is_connectable(&self) -> bool {
        self.address.is_some() && !self.cloud_degraded
    }

    pub(crate) fn set_identity(&mut self, identity: DeviceIdentity) {
        self.identity = identity;
    }

    pub(crate) fn set_address(&mut self, address: DeviceAddress, source: DiscoverySource) {
        self.address = Some(address);
        self.source = source;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub(crate) fn set_cloud_degraded(&mut self, degraded: bool) {
        self.cloud_degraded = degraded;
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen_at {
            self.last_seen_at = at;
        }
    }
}
