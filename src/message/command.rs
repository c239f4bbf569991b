// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound device commands.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

/// Reason code the device records for settings changed by an app.
const MODE_REASON: &str = "LAPP";

/// A command published to a device's command topic.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
///
/// use chrono::{TimeZone, Utc};
/// use dyson_link::message::DeviceCommand;
///
/// let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
///
/// let payload = DeviceCommand::RequestCurrentState.encode(at);
/// assert_eq!(
///     payload,
///     r#"{"msg":"REQUEST-CURRENT-STATE","time":"2024-05-01T12:00:00Z"}"#
/// );
///
/// let set = DeviceCommand::set_state([("fpwr", "ON")]);
/// assert!(set.encode(at).contains(r#""data":{"fpwr":"ON"}"#));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Ask for a full `CURRENT-STATE` message.
    RequestCurrentState,
    /// Ask for an environmental sensor data message.
    RequestEnvironmentalData,
    /// Change product state fields (`STATE-SET`).
    SetState(BTreeMap<String, String>),
    /// Any other message type, with its fields placed at the top level.
    ///
    /// Robot vacuums use this form (`START`, `PAUSE`, `ABORT` ...).
    Custom {
        /// Message type.
        msg: String,
        /// Additional top-level fields.
        fields: Map<String, Value>,
    },
}

impl DeviceCommand {
    /// Creates a `STATE-SET` command from field/value pairs.
    #[must_use]
    pub fn set_state<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::SetState(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the message type name.
    #[must_use]
    pub fn msg(&self) -> &str {
        match self {
            Self::RequestCurrentState => "REQUEST-CURRENT-STATE",
            Self::RequestEnvironmentalData => "REQUEST-PRODUCT-ENVIRONMENT-CURRENT-SENSOR-DATA",
            Self::SetState(_) => "STATE-SET",
            Self::Custom { msg, .. } => msg,
        }
    }

    /// Returns `true` for read-only requests that only trigger a state report.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Self::RequestCurrentState | Self::RequestEnvironmentalData)
    }

    /// Encodes the command as a JSON payload stamped with `at`.
    #[must_use]
    pub fn encode(&self, at: DateTime<Utc>) -> String {
        let time = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let value = match self {
            Self::RequestCurrentState | Self::RequestEnvironmentalData => {
                json!({ "msg": self.msg(), "time": time })
            }
            Self::SetState(data) => json!({
                "msg": self.msg(),
                "time": time,
                "mode-reason": MODE_REASON,
                "data": data,
            }),
            Self::Custom { msg, fields } => {
                let mut object = fields.clone();
                object.insert("msg".to_string(), Value::String(msg.clone()));
                object.insert("time".to_string(), Value::String(time));
                Value::Object(object)
            }
        };
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn parse(payload: &str) -> Value {
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn environmental_request() {
        let value = parse(&DeviceCommand::RequestEnvironmentalData.encode(at()));
        assert_eq!(
            value["msg"],
            "REQUEST-PRODUCT-ENVIRONMENT-CURRENT-SENSOR-DATA"
        );
        assert_eq!(value["time"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn state_set_carries_mode_reason_and_data() {
        let value = parse(&DeviceCommand::set_state([("fpwr", "ON"), ("fnsp", "0005")]).encode(at()));
        assert_eq!(value["msg"], "STATE-SET");
        assert_eq!(value["mode-reason"], "LAPP");
        assert_eq!(value["data"]["fpwr"], "ON");
        assert_eq!(value["data"]["fnsp"], "0005");
    }

    #[test]
    fn custom_command_fields_are_top_level() {
        let mut fields = Map::new();
        fields.insert("fullCleanType".to_string(), json!("immediate"));
        let command = DeviceCommand::Custom {
            msg: "START".to_string(),
            fields,
        };

        let value = parse(&command.encode(at()));
        assert_eq!(value["msg"], "START");
        assert_eq!(value["fullCleanType"], "immediate");
        assert!(!command.is_request());
    }

    #[test]
    fn requests_are_flagged() {
        assert!(DeviceCommand::RequestCurrentState.is_request());
        assert!(DeviceCommand::RequestEnvironmentalData.is_request());
        assert!(!DeviceCommand::set_state([("fpwr", "OFF")]).is_request());
    }
}
