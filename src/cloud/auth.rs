// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud sign-in state machine.
//!
//! [`AuthState`] is a plain value and [`AuthState::transition`] a pure
//! function of the current state and an [`AuthEvent`]. The network calls
//! that produce the events live in [`CloudAccount`](super::CloudAccount).
//!
//! ```text
//! Anonymous ──Begin──▶ AwaitingIdentifier ──OtpSent──▶ AwaitingOtp ──Verified──▶ Authenticated
//!                          ▲     │ OtpRequestFailed         │ OtpRejected (stays)     │ ExpiryApproaching
//!                          │     ▼ (stays, maybe cooling)   ▼                         ▼
//!                          │                                                    TokenExpiring
//!                          │                                                          │ RefreshStarted
//!                          │                                                          ▼
//!                          └──Reauthenticate── ReauthRequired ◀──RefreshFailed── Refreshing ──Refreshed──▶ Authenticated
//! ```
//!
//! A `RefreshDeferred` event returns `Refreshing` to `TokenExpiring` when a
//! refresh failed for a transient reason and the token is still valid.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CloudError;

use super::{CloudSession, Identifier, Region};

/// Cool-down applied when the cloud rate-limits without saying for how long.
pub const DEFAULT_RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// A one-time code that has been sent to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Account region.
    pub region: Region,
    /// Identifier the code was sent to.
    pub identifier: Identifier,
    /// Server-side handle of the challenge.
    pub challenge_id: String,
    /// When the code was requested.
    pub requested_at: DateTime<Utc>,
}

/// Where the sign-in flow currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// No account configured.
    Anonymous,
    /// Waiting for the user's e-mail address or phone number.
    AwaitingIdentifier {
        /// Account region.
        region: Region,
        /// Identifier to pre-fill, when reauthenticating.
        previous: Option<Identifier>,
        /// Earliest time another code may be requested.
        retry_not_before: Option<DateTime<Utc>>,
    },
    /// A code was sent; waiting for the user to enter it.
    AwaitingOtp {
        /// The outstanding challenge.
        challenge: OtpChallenge,
        /// Earliest time another verification may be attempted.
        retry_not_before: Option<DateTime<Utc>>,
    },
    /// Signed in.
    Authenticated(CloudSession),
    /// Signed in, but the token is about to expire.
    TokenExpiring(CloudSession),
    /// A token refresh is in flight.
    Refreshing(CloudSession),
    /// The session is gone; the user has to sign in again.
    ReauthRequired {
        /// Account region.
        region: Region,
        /// Identifier of the lost session.
        previous: Identifier,
    },
}

/// Input to the sign-in state machine.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// The user picked a region and starts signing in.
    Begin(Region),
    /// A one-time code was sent.
    OtpSent(OtpChallenge),
    /// Requesting a code failed.
    OtpRequestFailed {
        /// Wait demanded by the cloud, if rate limited.
        retry_after: Option<Duration>,
        /// When the failure happened.
        at: DateTime<Utc>,
    },
    /// The code (or password) was wrong.
    OtpRejected {
        /// Wait demanded by the cloud, if rate limited.
        retry_after: Option<Duration>,
        /// When the failure happened.
        at: DateTime<Utc>,
    },
    /// Verification succeeded.
    Verified(CloudSession),
    /// A stored session is being resumed.
    Restore(CloudSession),
    /// The token will expire within the refresh margin.
    ExpiryApproaching,
    /// A refresh call was started.
    RefreshStarted,
    /// The refresh produced a new session.
    Refreshed(CloudSession),
    /// The refresh failed transiently while the token is still valid.
    RefreshDeferred,
    /// The refresh failed, or the cloud rejected the session.
    RefreshFailed,
    /// The user restarts sign-in after losing the session.
    Reauthenticate,
    /// Abandon the current flow or session.
    SignOut,
}

impl AuthState {
    /// Applies an event.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::InvalidTransition` if the event is not accepted
    /// in the current state. The state is left as it was.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use dyson_link::cloud::{AuthEvent, AuthState, Region};
    ///
    /// let state = AuthState::Anonymous
    ///     .transition(AuthEvent::Begin(Region::new("GB").unwrap()))
    ///     .unwrap();
    /// assert_eq!(state.name(), "awaiting identifier");
    ///
    /// // A code can only be verified after one was sent.
    /// assert!(state.transition(AuthEvent::Refreshed(
    ///     dyson_link::cloud::CloudSession::new(
    ///         "t",
    ///         Utc::now(),
    ///         Region::new("GB").unwrap(),
    ///         dyson_link::cloud::Identifier::Email("a@b.c".into()),
    ///     )
    /// )).is_err());
    /// ```
    pub fn transition(&self, event: AuthEvent) -> Result<AuthState, CloudError> {
        use AuthEvent as E;

        let next = match (self, event) {
            (_, E::SignOut) => Self::Anonymous,

            (Self::Anonymous | Self::AwaitingIdentifier { .. } | Self::AwaitingOtp { .. }, E::Begin(region)) => {
                Self::AwaitingIdentifier {
                    region,
                    previous: None,
                    retry_not_before: None,
                }
            }
            (Self::Anonymous, E::Restore(session)) => Self::Authenticated(session),

            (Self::AwaitingIdentifier { .. }, E::OtpSent(challenge)) => Self::AwaitingOtp {
                challenge,
                retry_not_before: None,
            },
            (
                Self::AwaitingIdentifier {
                    region, previous, ..
                },
                E::OtpRequestFailed { retry_after, at },
            ) => Self::AwaitingIdentifier {
                region: region.clone(),
                previous: previous.clone(),
                retry_not_before: retry_after.map(|wait| deadline(at, wait)),
            },

            (Self::AwaitingOtp { challenge, .. }, E::OtpRejected { retry_after, at }) => {
                Self::AwaitingOtp {
                    challenge: challenge.clone(),
                    retry_not_before: retry_after.map(|wait| deadline(at, wait)),
                }
            }
            (Self::AwaitingOtp { .. }, E::Verified(session)) => Self::Authenticated(session),

            (Self::Authenticated(session), E::ExpiryApproaching) => {
                Self::TokenExpiring(session.clone())
            }
            (Self::Authenticated(session) | Self::TokenExpiring(session), E::RefreshStarted) => {
                Self::Refreshing(session.clone())
            }
            (Self::Refreshing(_), E::Refreshed(session)) => Self::Authenticated(session),
            (Self::Refreshing(session), E::RefreshDeferred) => Self::TokenExpiring(session.clone()),
            (
                Self::Authenticated(session)
                | Self::TokenExpiring(session)
                | Self::Refreshing(session),
                E::RefreshFailed,
            ) => Self::ReauthRequired {
                region: session.region().clone(),
                previous: session.identifier().clone(),
            },

            (Self::ReauthRequired { region, previous }, E::Reauthenticate) => {
                Self::AwaitingIdentifier {
                    region: region.clone(),
                    previous: Some(previous.clone()),
                    retry_not_before: None,
                }
            }

            (state, _) => {
                return Err(CloudError::InvalidTransition {
                    state: state.name(),
                });
            }
        };
        Ok(next)
    }

    /// Short human-readable name of the state.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::AwaitingIdentifier { .. } => "awaiting identifier",
            Self::AwaitingOtp { .. } => "awaiting one-time code",
            Self::Authenticated(_) => "authenticated",
            Self::TokenExpiring(_) => "token expiring",
            Self::Refreshing(_) => "refreshing",
            Self::ReauthRequired { .. } => "reauthentication required",
        }
    }

    /// Returns the session, in the states that hold a usable one.
    #[must_use]
    pub fn session(&self) -> Option<&CloudSession> {
        match self {
            Self::Authenticated(s) | Self::TokenExpiring(s) | Self::Refreshing(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if a session is available for API calls.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    /// Returns the remaining cool-down at `now`, if one is active.
    #[must_use]
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = match self {
            Self::AwaitingIdentifier {
                retry_not_before, ..
            }
            | Self::AwaitingOtp {
                retry_not_before, ..
            } => (*retry_not_before)?,
            _ => return None,
        };
        (until - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

fn deadline(at: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    at + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn region() -> Region {
        Region::new("GB").unwrap()
    }

    fn identifier() -> Identifier {
        Identifier::Email("user@example.com".to_string())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn session() -> CloudSession {
        CloudSession::new("token", now() + chrono::Duration::hours(1), region(), identifier())
    }

    fn challenge() -> OtpChallenge {
        OtpChallenge {
            region: region(),
            identifier: identifier(),
            challenge_id: "c-1".to_string(),
            requested_at: now(),
        }
    }

    fn awaiting_otp() -> AuthState {
        AuthState::Anonymous
            .transition(AuthEvent::Begin(region()))
            .unwrap()
            .transition(AuthEvent::OtpSent(challenge()))
            .unwrap()
    }

    #[test]
    fn happy_path_reaches_authenticated() {
        let state = awaiting_otp()
            .transition(AuthEvent::Verified(session()))
            .unwrap();
        assert_eq!(state, AuthState::Authenticated(session()));
        assert!(state.is_authenticated());
    }

    #[test]
    fn wrong_code_stays_awaiting_otp() {
        let state = awaiting_otp()
            .transition(AuthEvent::OtpRejected {
                retry_after: None,
                at: now(),
            })
            .unwrap();

        match &state {
            AuthState::AwaitingOtp { challenge: c, .. } => assert_eq!(c, &challenge()),
            other => panic!("unexpected state {other:?}"),
        }
        // The same challenge can still be verified.
        assert!(state.transition(AuthEvent::Verified(session())).is_ok());
    }

    #[test]
    fn rate_limit_sets_cooldown() {
        let state = AuthState::Anonymous
            .transition(AuthEvent::Begin(region()))
            .unwrap()
            .transition(AuthEvent::OtpRequestFailed {
                retry_after: Some(Duration::from_secs(30)),
                at: now(),
            })
            .unwrap();

        assert_eq!(
            state.cooldown_remaining(now()),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            state.cooldown_remaining(now() + chrono::Duration::seconds(10)),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            state.cooldown_remaining(now() + chrono::Duration::seconds(30)),
            None
        );
    }

    #[test]
    fn unregistered_identifier_keeps_waiting_without_cooldown() {
        let state = AuthState::Anonymous
            .transition(AuthEvent::Begin(region()))
            .unwrap()
            .transition(AuthEvent::OtpRequestFailed {
                retry_after: None,
                at: now(),
            })
            .unwrap();
        assert_eq!(state.name(), "awaiting identifier");
        assert_eq!(state.cooldown_remaining(now()), None);
    }

    #[test]
    fn refresh_cycle() {
        let state = AuthState::Authenticated(session())
            .transition(AuthEvent::ExpiryApproaching)
            .unwrap()
            .transition(AuthEvent::RefreshStarted)
            .unwrap();
        assert_eq!(state.name(), "refreshing");
        assert!(state.is_authenticated());

        let renewed = CloudSession::new("new", now() + chrono::Duration::hours(2), region(), identifier());
        let state = state.transition(AuthEvent::Refreshed(renewed.clone())).unwrap();
        assert_eq!(state.session(), Some(&renewed));
    }

    #[test]
    fn deferred_refresh_returns_to_token_expiring() {
        let state = AuthState::Refreshing(session())
            .transition(AuthEvent::RefreshDeferred)
            .unwrap();
        assert_eq!(state, AuthState::TokenExpiring(session()));
    }

    #[test]
    fn failed_refresh_requires_reauth_with_prefill() {
        let state = AuthState::Refreshing(session())
            .transition(AuthEvent::RefreshFailed)
            .unwrap();
        assert!(!state.is_authenticated());

        let state = state.transition(AuthEvent::Reauthenticate).unwrap();
        assert_eq!(
            state,
            AuthState::AwaitingIdentifier {
                region: region(),
                previous: Some(identifier()),
                retry_not_before: None,
            }
        );
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let err = AuthState::Anonymous
            .transition(AuthEvent::Verified(session()))
            .unwrap_err();
        assert!(matches!(
            err,
            CloudError::InvalidTransition { state: "anonymous" }
        ));

        assert!(
            AuthState::Authenticated(session())
                .transition(AuthEvent::OtpSent(challenge()))
                .is_err()
        );
        assert!(
            AuthState::Refreshing(session())
                .transition(AuthEvent::ExpiryApproaching)
                .is_err()
        );
    }

    #[test]
    fn sign_out_from_anywhere() {
        for state in [
            awaiting_otp(),
            AuthState::Authenticated(session()),
            AuthState::ReauthRequired {
                region: region(),
                previous: identifier(),
            },
        ] {
            assert_eq!(
                state.transition(AuthEvent::SignOut).unwrap(),
                AuthState::Anonymous
            );
        }
    }
}
