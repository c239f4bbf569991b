// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `dyson_link` library.
//!
//! The hierarchy mirrors the layers of the library: value validation,
//! transport (local MQTT), cloud account calls, and payload decoding.
//! Connection-layer transient errors are normally absorbed by the
//! connection supervisor and only show up as a
//! [`ConnectionState`](crate::connection::ConnectionState) change; the
//! variants here are what callers of the public API can observe.

use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred on the local device transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error occurred while talking to the cloud account.
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// A device payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Device is not known to the registry.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// A command was attempted while the device connection is not established.
    ///
    /// This is retryable: the supervisor keeps reconnecting in the background.
    #[error("device is not connected")]
    NotConnected,

    /// A command was accepted by the API but could not be delivered.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// A background task is gone (the manager was shut down).
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The mDNS daemon failed.
    #[cfg(feature = "mdns")]
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

impl Error {
    /// Returns `true` if retrying the same operation later may succeed
    /// without any user involvement.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected | Self::Rejected(_) => true,
            Self::Transport(e) => e.is_transient(),
            Self::Cloud(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the error can only be resolved by the user
    /// (re-entering a device credential or reauthenticating the cloud account).
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        match self {
            Self::Transport(TransportError::AuthRejected) => true,
            Self::Cloud(e) => e.requires_reauth(),
            _ => false,
        }
    }
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
        /// The actual value that was provided.
        actual: u64,
    },

    /// A serial number is empty or malformed.
    #[error("invalid serial: {0:?}")]
    InvalidSerial(String),

    /// A product type code is empty or malformed.
    #[error("invalid product type: {0:?}")]
    InvalidProductType(String),

    /// An address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A cloud region code is not recognized.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
}

/// Errors raised by the local MQTT transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// MQTT client call failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The device did not accept the connection before the deadline.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The device refused the local credential.
    #[error("device rejected the local credential")]
    AuthRejected,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was closed by the peer or the network.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The device went silent for longer than the liveness window.
    #[error("no message received for {0:?}")]
    StaleConnection(Duration),

    /// A publish did not complete before the deadline.
    #[error("request timed out after {0} ms")]
    Timeout(u64),
}

impl TransportError {
    /// Returns `true` for failures the reconnect loop recovers from on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthRejected)
    }
}

/// Errors raised by the cloud account client and authentication flow.
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request failed.
    #[cfg(feature = "cloud")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The cloud could not be reached or answered with a server error.
    #[error("cloud unreachable: {0}")]
    Network(String),

    /// The cloud call did not complete before the deadline.
    #[error("cloud request timed out after {0:?}")]
    Timeout(Duration),

    /// The e-mail address or phone number has no account.
    #[error("identifier is not registered")]
    IdentifierNotRegistered,

    /// Too many requests; the caller must wait before retrying.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Minimum wait before the next attempt.
        retry_after: Duration,
    },

    /// The one-time code was wrong or expired.
    #[error("invalid one-time code")]
    InvalidOtp,

    /// The password (or other secret) was rejected.
    #[error("invalid credentials")]
    InvalidAuth,

    /// No usable session exists; the user must sign in.
    #[error("cloud authentication required")]
    CloudAuthRequired,

    /// The session could not be refreshed; the user must sign in again.
    #[error("cloud reauthentication required")]
    ReauthRequired,

    /// The response did not have the expected shape.
    #[error("unexpected cloud response: {0}")]
    UnexpectedResponse(String),

    /// The authentication flow received an input its current step does not accept.
    #[error("operation not allowed while {state}")]
    InvalidTransition {
        /// Name of the state the flow was in.
        state: &'static str,
    },
}

impl CloudError {
    /// Returns `true` when only a fresh sign-in can clear the error.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::ReauthRequired | Self::CloudAuthRequired | Self::InvalidAuth
        )
    }

    /// Returns `true` for failures worth retrying on the next poll.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "cloud")]
            Self::Http(_) => true,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Returns the minimum wait demanded by the server, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Errors related to decoding device payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// JSON parsing failed.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is not UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
