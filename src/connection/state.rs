// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection state of a supervised device.

use std::fmt;

use chrono::{DateTime, Utc};

/// Why a supervisor stopped trying to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The device refused the local credential. The user has to supply a
    /// new one (or request a retry).
    AuthRejected,
    /// The device's identity came from the cloud account, which is
    /// currently not signed in.
    CloudUnavailable,
}

impl FailureReason {
    /// Returns `true` if the user has to act before the device can reconnect.
    #[must_use]
    pub fn requires_user_action(self) -> bool {
        matches!(self, Self::AuthRejected)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRejected => f.write_str("device rejected the local credential"),
            Self::CloudUnavailable => f.write_str("cloud account unavailable"),
        }
    }
}

/// Connection state for a supervised device.
///
/// Only the device's own supervisor changes it; everyone else observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Device is not connected and no attempt is scheduled.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Device is connected and operational.
    Connected,
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Number of consecutive failed attempts so far.
        attempt: u32,
        /// When the next attempt starts.
        next_retry_at: DateTime<Utc>,
    },
    /// Not retrying until asked to.
    Failed(FailureReason),
}

impl ConnectionState {
    /// Returns true if the device is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true if the device is in a failed state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true if the supervisor is waiting to retry.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt, .. } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Failed(FailureReason::AuthRejected).is_failed());
        assert!(
            ConnectionState::Reconnecting {
                attempt: 1,
                next_retry_at: Utc::now()
            }
            .is_reconnecting()
        );
    }

    #[test]
    fn only_auth_rejection_needs_the_user() {
        assert!(FailureReason::AuthRejected.requires_user_action());
        assert!(!FailureReason::CloudUnavailable.requires_user_action());
    }

    #[test]
    fn display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed(FailureReason::AuthRejected).to_string(),
            "failed: device rejected the local credential"
        );
    }
}
