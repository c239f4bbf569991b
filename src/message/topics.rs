// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic layout of a device.

use crate::types::DeviceIdentity;

/// The topics one device publishes and listens on.
///
/// # Examples
///
/// ```
/// use dyson_link::message::Topics;
/// use dyson_link::types::{Credential, DeviceIdentity, ProductType, Serial};
///
/// let identity = DeviceIdentity::new(
///     Serial::new("ABC-123").unwrap(),
///     ProductType::new("438K").unwrap(),
///     Credential::new("pw"),
/// );
/// let topics = Topics::for_identity(&identity);
///
/// assert_eq!(topics.command(), "438K/ABC-123/command");
/// assert_eq!(topics.status(), ["438K/ABC-123/status/current", "438K/ABC-123/status/faults"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    command: String,
    status: Vec<String>,
}

impl Topics {
    /// Builds the topic set from an identity's topic root, serial and family.
    #[must_use]
    pub fn for_identity(identity: &DeviceIdentity) -> Self {
        let prefix = format!("{}/{}", identity.topic_root(), identity.serial());
        let status = identity
            .family()
            .status_suffixes()
            .iter()
            .map(|suffix| format!("{prefix}/{suffix}"))
            .collect();
        Self {
            command: format!("{prefix}/command"),
            status,
        }
    }

    /// Topic commands are published to.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Topics the device publishes state on.
    #[must_use]
    pub fn status(&self) -> &[String] {
        &self.status
    }

    /// Returns `true` if `topic` is one of the device's status topics.
    #[must_use]
    pub fn is_status(&self, topic: &str) -> bool {
        self.status.iter().any(|t| t == topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credential, ProductType, Serial};

    fn identity(product: &str) -> DeviceIdentity {
        DeviceIdentity::new(
            Serial::new("ABC-123").unwrap(),
            ProductType::new(product).unwrap(),
            Credential::new("pw"),
        )
    }

    #[test]
    fn robot_has_single_status_topic() {
        let topics = Topics::for_identity(&identity("N223"));
        assert_eq!(topics.status(), ["N223/ABC-123/status"]);
        assert_eq!(topics.command(), "N223/ABC-123/command");
    }

    #[test]
    fn topic_root_hint_is_used() {
        let topics = Topics::for_identity(&identity("438").with_topic_root("438M"));
        assert_eq!(topics.command(), "438M/ABC-123/command");
        assert!(topics.is_status("438M/ABC-123/status/current"));
        assert!(!topics.is_status("438/ABC-123/status/current"));
    }
}
