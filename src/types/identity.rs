// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity types.
//!
//! A [`DeviceIdentity`] is the immutable serial / product type / credential
//! triple that identifies one physical appliance. The serial is the only
//! key used for deduplication anywhere in the library.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

use super::DeviceFamily;

/// Vendor-assigned serial number of a device.
///
/// Serials are trimmed and upper-cased on construction so that the same
/// device reported by different sources compares equal.
///
/// # Examples
///
/// ```
/// use dyson_link::types::Serial;
///
/// let serial = Serial::new(" abc-123 ").unwrap();
/// assert_eq!(serial.as_str(), "ABC-123");
///
/// // Topic separators and wildcards are rejected
/// assert!(Serial::new("ABC/123").is_err());
/// assert!(Serial::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Serial(String);

impl Serial {
    /// Creates a validated serial.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidSerial` if the value is empty or contains
    /// whitespace or MQTT topic metacharacters (`/`, `+`, `#`).
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValueError> {
        let trimmed = value.as_ref().trim();
        let valid = !trimmed.is_empty()
            && !trimmed
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '+' | '#'));
        if !valid {
            return Err(ValueError::InvalidSerial(value.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Returns the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Serial {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Serial {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Serial> for String {
    fn from(serial: Serial) -> Self {
        serial.0
    }
}

/// Model code of a device, including the regional variant suffix if any.
///
/// The full code (`438K`) is what the device uses as its MQTT topic root;
/// the family is resolved from the numeric base (`438`).
///
/// # Examples
///
/// ```
/// use dyson_link::types::{DeviceFamily, ProductType};
///
/// let product = ProductType::with_variant("438", Some("k")).unwrap();
/// assert_eq!(product.as_str(), "438K");
/// assert_eq!(product.family(), DeviceFamily::PureCool);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductType(String);

impl ProductType {
    /// Creates a validated product type code.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidProductType` if the code is empty or not
    /// ASCII alphanumeric.
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValueError> {
        let trimmed = code.as_ref().trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValueError::InvalidProductType(code.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Creates a product type from a base code and an optional regional
    /// variant, as reported by the cloud account listing.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidProductType` if the combined code is invalid.
    pub fn with_variant(base: &str, variant: Option<&str>) -> Result<Self, ValueError> {
        match variant.map(str::trim).filter(|v| !v.is_empty()) {
            Some(variant) => Self::new(format!("{}{variant}", base.trim())),
            None => Self::new(base),
        }
    }

    /// Returns the full code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the family this product belongs to.
    #[must_use]
    pub fn family(&self) -> DeviceFamily {
        DeviceFamily::from_product_code(&self.0)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProductType {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProductType {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProductType> for String {
    fn from(product: ProductType) -> Self {
        product.0
    }
}

/// Shared secret used as the MQTT password on the device's local broker.
///
/// The value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a local credential.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Immutable identity of one physical device.
///
/// A changed credential produces a new identity that replaces the old one;
/// an existing identity is never mutated.
///
/// # Examples
///
/// ```
/// use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
///
/// let identity = DeviceIdentity::new(
///     Serial::new("ABC-123").unwrap(),
///     ProductType::new("438").unwrap(),
///     Credential::new("secret"),
/// );
///
/// assert_eq!(identity.topic_root(), "438");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    serial: Serial,
    product_type: ProductType,
    credential: Credential,
    topic_root: Option<String>,
}

impl DeviceIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(serial: Serial, product_type: ProductType, credential: Credential) -> Self {
        Self {
            serial,
            product_type,
            credential,
            topic_root: None,
        }
    }

    /// Sets the MQTT root topic supplied by the cloud listing.
    ///
    /// Without a hint the full product type code is used.
    #[must_use]
    pub fn with_topic_root(mut self, root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim();
        self.topic_root = (!root.is_empty()).then(|| root.to_string());
        self
    }

    /// Returns the serial.
    #[must_use]
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    /// Returns the product type.
    #[must_use]
    pub fn product_type(&self) -> &ProductType {
        &self.product_type
    }

    /// Returns the local credential.
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Returns the device family.
    #[must_use]
    pub fn family(&self) -> DeviceFamily {
        self.product_type.family()
    }

    /// Returns the root segment of the device's MQTT topics.
    #[must_use]
    pub fn topic_root(&self) -> &str {
        self.topic_root
            .as_deref()
            .unwrap_or_else(|| self.product_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_normalizes_case_and_whitespace() {
        let a = Serial::new("abc-123").unwrap();
        let b = Serial::new("  ABC-123\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serial_rejects_topic_metacharacters() {
        for bad in ["", "   ", "AB/C", "AB+C", "AB#C", "AB C"] {
            assert!(Serial::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn serial_serde_roundtrip_validates() {
        let serial: Serial = serde_json::from_str("\"nk6-eu-abc\"").unwrap();
        assert_eq!(serial.as_str(), "NK6-EU-ABC");
        assert!(serde_json::from_str::<Serial>("\"a/b\"").is_err());
    }

    #[test]
    fn product_type_with_variant() {
        let product = ProductType::with_variant("527", Some(" e ")).unwrap();
        assert_eq!(product.as_str(), "527E");

        let product = ProductType::with_variant("739", None).unwrap();
        assert_eq!(product.as_str(), "739");

        let product = ProductType::with_variant("358", Some("")).unwrap();
        assert_eq!(product.as_str(), "358");
    }

    #[test]
    fn product_type_rejects_garbage() {
        assert!(ProductType::new("").is_err());
        assert!(ProductType::new("43-8").is_err());
    }

    #[test]
    fn credential_is_redacted() {
        let credential = Credential::new("hunter2");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "hunter2");
    }

    #[test]
    fn topic_root_prefers_hint() {
        let identity = DeviceIdentity::new(
            Serial::new("ABC-123").unwrap(),
            ProductType::new("438K").unwrap(),
            Credential::new("pw"),
        );
        assert_eq!(identity.topic_root(), "438K");

        let identity = identity.with_topic_root("438M");
        assert_eq!(identity.topic_root(), "438M");
    }

    #[test]
    fn blank_topic_root_hint_is_ignored() {
        let identity = DeviceIdentity::new(
            Serial::new("ABC-123").unwrap(),
            ProductType::new("475").unwrap(),
            Credential::new("pw"),
        )
        .with_topic_root("  ");
        assert_eq!(identity.topic_root(), "475");
    }
}
