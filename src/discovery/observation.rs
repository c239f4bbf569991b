// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! "Device observed" records fed to the discovery coordinator.

use chrono::{DateTime, Utc};

use crate::cloud::DeviceCloudInfo;
use crate::error::ValueError;
use crate::types::{DeviceAddress, DeviceIdentity, DiscoverySource, ProductType, Serial};

/// One sighting of a device by one discovery source.
///
/// Local advertisements know the serial and an address but not the
/// credential; cloud listings know the full identity but often no
/// address. The coordinator merges both by serial.
///
/// # Examples
///
/// ```
/// use dyson_link::discovery::Observation;
/// use dyson_link::types::{DiscoverySource, Serial};
///
/// let observation = Observation::local(
///     Serial::new("ABC-123").unwrap(),
///     None,
///     "10.0.0.5".parse().unwrap(),
/// );
///
/// assert_eq!(observation.source(), DiscoverySource::LocalDiscovery);
/// assert!(observation.identity().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    serial: Serial,
    identity: Option<DeviceIdentity>,
    product_type: Option<ProductType>,
    address: Option<DeviceAddress>,
    source: DiscoverySource,
    name: Option<String>,
    observed_at: DateTime<Utc>,
}

impl Observation {
    /// A local network advertisement.
    #[must_use]
    pub fn local(serial: Serial, product_type: Option<ProductType>, address: DeviceAddress) -> Self {
        Self {
            serial,
            identity: None,
            product_type,
            address: Some(address),
            source: DiscoverySource::LocalDiscovery,
            name: None,
            observed_at: Utc::now(),
        }
    }

    /// A device listed by the cloud account.
    #[must_use]
    pub fn cloud(identity: DeviceIdentity, address_hint: Option<DeviceAddress>) -> Self {
        Self {
            serial: identity.serial().clone(),
            product_type: Some(identity.product_type().clone()),
            identity: Some(identity),
            address: address_hint,
            source: DiscoverySource::CloudDiscovery,
            name: None,
            observed_at: Utc::now(),
        }
    }

    /// Builds a cloud observation from a device listing entry.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidProductType` if the listing carries an
    /// unusable product code.
    pub fn from_cloud_info(info: &DeviceCloudInfo) -> Result<Self, ValueError> {
        let observation = Self::cloud(info.identity()?, info.address_hint.clone());
        Ok(if info.name.trim().is_empty() {
            observation
        } else {
            observation.with_name(info.name.trim())
        })
    }

    /// A device entered by the user.
    #[must_use]
    pub fn manual(identity: DeviceIdentity, address: Option<DeviceAddress>) -> Self {
        Self {
            serial: identity.serial().clone(),
            product_type: Some(identity.product_type().clone()),
            identity: Some(identity),
            address,
            source: DiscoverySource::Manual,
            name: None,
            observed_at: Utc::now(),
        }
    }

    /// Sets a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Overrides the observation time.
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Returns the observed serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Returns the full identity, if the source knows it.
    #[must_use]
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Returns the product type, if known.
    #[must_use]
    pub fn product_type(&self) -> Option<&ProductType> {
        self.product_type.as_ref()
    }

    /// Returns the observed address, if any.
    #[must_use]
    pub fn address(&self) -> Option<&DeviceAddress> {
        self.address.as_ref()
    }

    /// Returns which source made the observation.
    #[must_use]
    pub fn source(&self) -> DiscoverySource {
        self.source
    }

    /// Returns the display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns when the device was observed.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Credential;

    fn info() -> DeviceCloudInfo {
        DeviceCloudInfo {
            serial: Serial::new("ABC-123").unwrap(),
            name: " Bedroom ".to_string(),
            product_type: "438".to_string(),
            variant: Some("K".to_string()),
            credential: Credential::new("pw"),
            version: None,
            mqtt_root_topic: None,
            address_hint: None,
        }
    }

    #[test]
    fn cloud_listing_carries_identity_and_name() {
        let observation = Observation::from_cloud_info(&info()).unwrap();

        assert_eq!(observation.source(), DiscoverySource::CloudDiscovery);
        assert_eq!(observation.name(), Some("Bedroom"));
        assert!(observation.address().is_none());
        let identity = observation.identity().unwrap();
        assert_eq!(identity.product_type().as_str(), "438K");
        assert_eq!(identity.serial().as_str(), "ABC-123");
    }

    #[test]
    fn blank_cloud_name_is_dropped() {
        let mut info = info();
        info.name = "  ".to_string();
        let observation = Observation::from_cloud_info(&info).unwrap();
        assert_eq!(observation.name(), None);
    }

    #[test]
    fn manual_observation_keeps_optional_address() {
        let identity = info().identity().unwrap();
        let observation = Observation::manual(identity, None);
        assert_eq!(observation.source(), DiscoverySource::Manual);
        assert!(observation.address().is_none());
    }
}
