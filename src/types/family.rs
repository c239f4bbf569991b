// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device families and the behavior tagged onto each of them.
//!
//! Every product type code resolves to exactly one [`DeviceFamily`]. The
//! family decides how the device is advertised on the network, which MQTT
//! topics carry its status, whether environmental data has to be polled,
//! and how long a snapshot stays fresh. Adding support for a new product
//! line means adding a variant here and, if its payloads differ, a
//! decoder in [`crate::message`].

use std::fmt;
use std::time::Duration;

/// mDNS service type advertised by fans, purifiers and heaters.
pub const FAN_SERVICE_TYPE: &str = "_dyson_mqtt._tcp.local.";

/// mDNS service type advertised by robot vacuums.
pub const ROBOT_SERVICE_TYPE: &str = "_360eye_mqtt._tcp.local.";

const FAN_FRESHNESS: Duration = Duration::from_secs(120);
const LEGACY_FRESHNESS: Duration = Duration::from_secs(180);
const ROBOT_FRESHNESS: Duration = Duration::from_secs(300);

/// Product family of a device.
///
/// # Examples
///
/// ```
/// use dyson_link::types::DeviceFamily;
///
/// let family = DeviceFamily::from_product_code("527E");
/// assert_eq!(family, DeviceFamily::PureHotCool);
/// assert!(family.polls_environment());
///
/// let robot = DeviceFamily::from_product_code("N223");
/// assert!(robot.is_robot());
/// assert!(!robot.polls_environment());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Pure Cool Link tower (475).
    PureCoolLink,
    /// Pure Cool Link desk (469).
    PureCoolLinkDesk,
    /// Pure Cool desk fan (520).
    PureCoolDesk,
    /// Pure Hot+Cool Link (455).
    PureHotCoolLink,
    /// Pure Cool purifier tower (438 and its regional variants).
    PureCool,
    /// Pure Hot+Cool purifier (527 and its regional variants).
    PureHotCool,
    /// Pure Humidify+Cool (358 and its regional variants).
    PureHumidifyCool,
    /// Purifier Big+Quiet (664).
    BigQuiet,
    /// Cool desktop tower (739).
    CoolTower,
    /// 360 Eye robot vacuum (N223).
    Eye360,
    /// 360 Heurist robot vacuum (276).
    Heurist360,
    /// 360 Vis Nav robot vacuum (277).
    VisNav360,
    /// A product code this library does not recognize.
    ///
    /// Handled like a current-generation fan.
    Other,
}

impl DeviceFamily {
    /// Resolves a product type code, ignoring a regional variant suffix.
    #[must_use]
    pub fn from_product_code(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        match code.as_str() {
            "N223" => return Self::Eye360,
            "276" => return Self::Heurist360,
            "277" => return Self::VisNav360,
            _ => {}
        }

        // Regional variants append a single letter: 438K, 527E, 358E.
        let base = code.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        match base {
            "475" => Self::PureCoolLink,
            "469" => Self::PureCoolLinkDesk,
            "520" => Self::PureCoolDesk,
            "455" => Self::PureHotCoolLink,
            "438" => Self::PureCool,
            "527" => Self::PureHotCool,
            "358" => Self::PureHumidifyCool,
            "664" => Self::BigQuiet,
            "739" => Self::CoolTower,
            _ => Self::Other,
        }
    }

    /// Returns `true` for robot vacuums.
    #[must_use]
    pub const fn is_robot(self) -> bool {
        matches!(self, Self::Eye360 | Self::Heurist360 | Self::VisNav360)
    }

    /// Returns `true` for first-generation "Link" devices.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(
            self,
            Self::PureCoolLink | Self::PureCoolLinkDesk | Self::PureCoolDesk | Self::PureHotCoolLink
        )
    }

    /// Returns `true` if environmental sensor data has to be requested
    /// explicitly. Robot vacuums push everything unsolicited.
    #[must_use]
    pub const fn polls_environment(self) -> bool {
        !self.is_robot()
    }

    /// Maximum age of a snapshot before it is reported stale.
    #[must_use]
    pub const fn freshness(self) -> Duration {
        if self.is_robot() {
            ROBOT_FRESHNESS
        } else if self.is_legacy() {
            LEGACY_FRESHNESS
        } else {
            FAN_FRESHNESS
        }
    }

    /// mDNS service type this family advertises.
    #[must_use]
    pub const fn service_type(self) -> &'static str {
        if self.is_robot() {
            ROBOT_SERVICE_TYPE
        } else {
            FAN_SERVICE_TYPE
        }
    }

    /// Topic suffixes (below `{root}/{serial}/`) the device publishes status on.
    #[must_use]
    pub const fn status_suffixes(self) -> &'static [&'static str] {
        if self.is_robot() {
            &["status"]
        } else {
            &["status/current", "status/faults"]
        }
    }

    /// Human-readable model name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PureCoolLink => "Pure Cool Link",
            Self::PureCoolLinkDesk => "Pure Cool Link Desk",
            Self::PureCoolDesk => "Pure Cool Desk",
            Self::PureHotCoolLink => "Pure Hot+Cool Link",
            Self::PureCool => "Pure Cool",
            Self::PureHotCool => "Pure Hot+Cool",
            Self::PureHumidifyCool => "Pure Humidify+Cool",
            Self::BigQuiet => "Purifier Big+Quiet",
            Self::CoolTower => "Cool Tower",
            Self::Eye360 => "360 Eye",
            Self::Heurist360 => "360 Heurist",
            Self::VisNav360 => "360 Vis Nav",
            Self::Other => "Unknown model",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_variants_resolve_to_base_family() {
        for code in ["438", "438K", "438E", "438M", "438k"] {
            assert_eq!(DeviceFamily::from_product_code(code), DeviceFamily::PureCool);
        }
        for code in ["527", "527E", "527K", "527M"] {
            assert_eq!(DeviceFamily::from_product_code(code), DeviceFamily::PureHotCool);
        }
        for code in ["358", "358K", "358E"] {
            assert_eq!(
                DeviceFamily::from_product_code(code),
                DeviceFamily::PureHumidifyCool
            );
        }
    }

    #[test]
    fn robot_codes() {
        assert_eq!(DeviceFamily::from_product_code("n223"), DeviceFamily::Eye360);
        assert_eq!(DeviceFamily::from_product_code("276"), DeviceFamily::Heurist360);
        assert_eq!(DeviceFamily::from_product_code("277"), DeviceFamily::VisNav360);
    }

    #[test]
    fn unknown_code_is_other() {
        assert_eq!(DeviceFamily::from_product_code("999"), DeviceFamily::Other);
        assert!(DeviceFamily::Other.polls_environment());
    }

    #[test]
    fn robots_are_not_polled() {
        assert!(!DeviceFamily::Eye360.polls_environment());
        assert_eq!(DeviceFamily::Eye360.service_type(), ROBOT_SERVICE_TYPE);
        assert_eq!(DeviceFamily::Eye360.status_suffixes(), &["status"]);
    }

    #[test]
    fn fans_subscribe_to_current_and_faults() {
        assert_eq!(
            DeviceFamily::PureCool.status_suffixes(),
            &["status/current", "status/faults"]
        );
        assert_eq!(DeviceFamily::PureCool.service_type(), FAN_SERVICE_TYPE);
    }

    #[test]
    fn legacy_devices_have_longer_freshness() {
        assert!(DeviceFamily::PureCoolLink.is_legacy());
        assert!(DeviceFamily::PureCoolLink.freshness() > DeviceFamily::PureCool.freshness());
    }
}
