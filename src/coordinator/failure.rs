// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Classification of failed state updates.

use std::fmt;

use crate::error::{Error, TransportError};

/// Why a state update for a device failed.
///
/// # Examples
///
/// ```
/// use dyson_link::coordinator::UpdateFailure;
/// use dyson_link::error::{Error, TransportError};
///
/// let failure = UpdateFailure::classify(&Error::NotConnected);
/// assert!(matches!(failure, UpdateFailure::UpdateFailed(_)));
///
/// let failure = UpdateFailure::classify(&Error::Transport(TransportError::AuthRejected));
/// assert!(failure.requires_user_action());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateFailure {
    /// Transient: the device is unreachable. Retried on the next interval.
    UpdateFailed(String),
    /// The credential was rejected; the user has to reauthenticate.
    ConfigEntryAuthFailed(String),
    /// The device sent something unusable. Only this cycle is skipped.
    PermanentDataError(String),
}

impl UpdateFailure {
    /// Classifies an error raised while updating a device.
    #[must_use]
    pub fn classify(error: &Error) -> Self {
        let message = error.to_string();
        match error {
            Error::Decode(_) => Self::PermanentDataError(message),
            Error::Transport(TransportError::AuthRejected) => Self::ConfigEntryAuthFailed(message),
            Error::Cloud(e) if e.requires_reauth() => Self::ConfigEntryAuthFailed(message),
            _ => Self::UpdateFailed(message),
        }
    }

    /// Returns `true` if only the user can resolve the failure.
    #[must_use]
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Self::ConfigEntryAuthFailed(_))
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::UpdateFailed(m) | Self::ConfigEntryAuthFailed(m) | Self::PermanentDataError(m) => m,
        }
    }
}

impl fmt::Display for UpdateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::UpdateFailed(_) => "update failed",
            Self::ConfigEntryAuthFailed(_) => "authentication failed",
            Self::PermanentDataError(_) => "malformed data",
        };
        write!(f, "{kind}: {}", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CloudError, DecodeError};

    #[test]
    fn transient_errors_are_update_failures() {
        for error in [
            Error::NotConnected,
            Error::Rejected("publish timed out".to_string()),
            Error::Transport(TransportError::ConnectionLost("reset".to_string())),
            Error::Cloud(CloudError::Network("unreachable".to_string())),
        ] {
            let failure = UpdateFailure::classify(&error);
            assert!(matches!(failure, UpdateFailure::UpdateFailed(_)), "{error}");
            assert!(!failure.requires_user_action());
        }
    }

    #[test]
    fn auth_errors_need_the_user() {
        for error in [
            Error::Transport(TransportError::AuthRejected),
            Error::Cloud(CloudError::ReauthRequired),
        ] {
            assert!(matches!(
                UpdateFailure::classify(&error),
                UpdateFailure::ConfigEntryAuthFailed(_)
            ));
        }
    }

    #[test]
    fn decode_errors_are_permanent() {
        let error = Error::Decode(DecodeError::MissingField("msg".to_string()));
        let failure = UpdateFailure::classify(&error);
        assert!(matches!(failure, UpdateFailure::PermanentDataError(_)));
        assert!(failure.to_string().starts_with("malformed data: "));
    }
}
