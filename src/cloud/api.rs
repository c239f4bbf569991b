// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud account API contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CloudError, ValueError};
use crate::types::{Credential, DeviceAddress, DeviceIdentity, ProductType, Serial};

use super::{CloudSession, Identifier, Region};

/// One device as listed by the cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCloudInfo {
    /// Device serial.
    pub serial: Serial,
    /// Name the user gave the device.
    pub name: String,
    /// Base product type code.
    pub product_type: String,
    /// Regional variant letter, if any.
    pub variant: Option<String>,
    /// Local MQTT credential.
    pub credential: Credential,
    /// Firmware version.
    pub version: Option<String>,
    /// MQTT root topic, when it differs from the product type.
    pub mqtt_root_topic: Option<String>,
    /// Last address the cloud knows for the device.
    pub address_hint: Option<DeviceAddress>,
}

impl DeviceCloudInfo {
    /// Builds the device identity described by this listing.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidProductType` if the product code is unusable.
    pub fn identity(&self) -> Result<DeviceIdentity, ValueError> {
        let product_type = ProductType::with_variant(&self.product_type, self.variant.as_deref())?;
        let identity =
            DeviceIdentity::new(self.serial.clone(), product_type, self.credential.clone());
        Ok(match &self.mqtt_root_topic {
            Some(root) => identity.with_topic_root(root.as_str()),
            None => identity,
        })
    }
}

/// Calls made against the vendor cloud.
///
/// Implementations perform one request per call and never retry on their
/// own; retry policy belongs to [`CloudAccount`](super::CloudAccount) and
/// [`CloudDiscovery`](super::CloudDiscovery).
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    /// Asks the cloud to send a one-time code and returns the challenge id.
    ///
    /// # Errors
    ///
    /// `IdentifierNotRegistered`, `RateLimited`, or a network error.
    async fn request_otp(&self, region: &Region, identifier: &Identifier)
    -> Result<String, CloudError>;

    /// Exchanges a one-time code (and, for e-mail accounts, the password)
    /// for a session.
    ///
    /// # Errors
    ///
    /// `InvalidOtp`, `InvalidAuth`, `RateLimited`, or a network error.
    async fn verify_otp(
        &self,
        region: &Region,
        identifier: &Identifier,
        challenge_id: &str,
        code: &str,
        password: Option<&str>,
    ) -> Result<CloudSession, CloudError>;

    /// Lists the devices registered to the account.
    ///
    /// # Errors
    ///
    /// `ReauthRequired` if the session was rejected, or a network error.
    async fn list_devices(&self, session: &CloudSession)
    -> Result<Vec<DeviceCloudInfo>, CloudError>;

    /// Renews a session before it expires.
    ///
    /// # Errors
    ///
    /// `ReauthRequired` if the session can no longer be renewed, or a
    /// network error.
    async fn refresh_token(&self, session: &CloudSession) -> Result<CloudSession, CloudError>;
}
