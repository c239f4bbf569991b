// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound payload decoding.
//!
//! Every device message is a JSON object with a `msg` field naming its
//! type. Fans nest their fields under `product-state` / `data`; robot
//! vacuums put them at the top level. Each payload layout has its own
//! [`MessageDecoder`], selected per [`DeviceFamily`] by [`decoder_for`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::state::{EnvironmentalReadings, ProductState, SensorReading, StateUpdate};
use crate::types::DeviceFamily;

/// Decodes raw payloads of one device family.
pub trait MessageDecoder: Send + Sync {
    /// Decodes a payload.
    ///
    /// Returns `Ok(None)` for well-formed messages that carry no state
    /// (greetings, map data, acknowledgements).
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the payload is not a JSON object with a
    /// `msg` field or a known message lacks its body.
    fn decode(&self, payload: &[u8]) -> Result<Option<StateUpdate>, DecodeError>;
}

/// Returns the decoder for a device family.
#[must_use]
pub fn decoder_for(family: DeviceFamily) -> &'static dyn MessageDecoder {
    if family.is_robot() {
        &RobotDecoder
    } else {
        &FanDecoder
    }
}

/// Decoder for fans, purifiers, heaters and humidifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanDecoder;

impl MessageDecoder for FanDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Option<StateUpdate>, DecodeError> {
        let (kind, body) = parse_envelope(payload)?;
        let update = match kind.as_str() {
            "CURRENT-STATE" => {
                let state = object_field(&body, "product-state")?;
                StateUpdate::FullState(flatten_values(state))
            }
            "STATE-CHANGE" => {
                let state = object_field(&body, "product-state")?;
                StateUpdate::StateChange(
                    state
                        .iter()
                        .map(|(k, v)| (k.clone(), value_to_string(new_value(v))))
                        .collect(),
                )
            }
            "ENVIRONMENTAL-CURRENT-SENSOR-DATA" => {
                let data = object_field(&body, "data")?;
                StateUpdate::Environmental(
                    data.iter()
                        .map(|(k, v)| (k.clone(), SensorReading::from_json(v)))
                        .collect::<EnvironmentalReadings>(),
                )
            }
            "CURRENT-FAULTS" => StateUpdate::Faults(collect_faults(&body)),
            _ => return Ok(None),
        };
        Ok(Some(update))
    }
}

/// Decoder for robot vacuums.
#[derive(Debug, Clone, Copy, Default)]
pub struct RobotDecoder;

impl MessageDecoder for RobotDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Option<StateUpdate>, DecodeError> {
        let (kind, body) = parse_envelope(payload)?;
        let update = match kind.as_str() {
            "CURRENT-STATE" => StateUpdate::FullState(flatten_values(&body)),
            "STATE-CHANGE" => {
                let mut fields = ProductState::new();
                for (key, value) in &body {
                    match key.as_str() {
                        "oldstate" => {}
                        "newstate" => {
                            fields.insert("state".to_string(), value_to_string(value));
                        }
                        _ => {
                            fields.insert(key.clone(), value_to_string(value));
                        }
                    }
                }
                StateUpdate::StateChange(fields)
            }
            _ => return Ok(None),
        };
        Ok(Some(update))
    }
}

/// Splits a payload into its message type and remaining fields.
fn parse_envelope(payload: &[u8]) -> Result<(String, Map<String, Value>), DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut body) = value else {
        return Err(DecodeError::UnexpectedFormat(
            "payload is not a JSON object".to_string(),
        ));
    };
    let kind = match body.remove("msg") {
        Some(Value::String(kind)) => kind,
        Some(_) => {
            return Err(DecodeError::UnexpectedFormat(
                "msg is not a string".to_string(),
            ));
        }
        None => return Err(DecodeError::MissingField("msg".to_string())),
    };
    body.remove("time");
    Ok((kind, body))
}

fn object_field<'a>(
    body: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>, DecodeError> {
    match body.get(key) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(DecodeError::UnexpectedFormat(format!(
            "{key} is not an object"
        ))),
        None => Err(DecodeError::MissingField(key.to_string())),
    }
}

/// State-change values are `[old, new]` pairs; anything else is taken as-is.
fn new_value(value: &Value) -> &Value {
    match value {
        Value::Array(pair) if pair.len() == 2 => &pair[1],
        other => other,
    }
}

fn flatten_values(map: &Map<String, Value>) -> ProductState {
    map.iter()
        .map(|(k, v)| (k.clone(), value_to_string(v)))
        .collect()
}

fn collect_faults(body: &Map<String, Value>) -> BTreeMap<String, String> {
    // Faults are grouped (product-errors, product-warnings, module-errors...).
    let mut faults = BTreeMap::new();
    for value in body.values() {
        if let Value::Object(group) = value {
            for (code, state) in group {
                faults.insert(code.clone(), value_to_string(state));
            }
        }
    }
    faults
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
