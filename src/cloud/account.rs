// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud account: drives the sign-in state machine against a [`CloudApi`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::error::CloudError;

use super::{
    AuthEvent, AuthState, CloudApi, CloudSession, DeviceCloudInfo, Identifier, OtpChallenge, Region,
};

/// Outcome of [`CloudAccount::refresh_if_needed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The token is not close to expiry.
    NotNeeded,
    /// The token was renewed.
    Refreshed,
    /// The refresh failed transiently; it is retried on the next check.
    Deferred,
}

/// A cloud account and its sign-in flow.
///
/// The current [`AuthState`] is published on a `watch` channel so that
/// background tasks and UIs observe every transition.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use dyson_link::cloud::{CloudAccount, HttpCloudClient, Region};
///
/// # async fn example() -> Result<(), dyson_link::error::CloudError> {
/// let region = Region::new("GB").unwrap();
/// let account = CloudAccount::new(Arc::new(HttpCloudClient::new(&region)?));
///
/// account.begin(region)?;
/// account.submit_identifier("user@example.com").await?;
/// // ... the user reads the code from their inbox ...
/// account.submit_otp("123456", Some("password")).await?;
/// assert!(account.state().is_authenticated());
/// # Ok(())
/// # }
/// ```
pub struct CloudAccount {
    api: Arc<dyn CloudApi>,
    state: watch::Sender<AuthState>,
}

impl std::fmt::Debug for CloudAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudAccount")
            .field("state", &self.state.borrow().name())
            .finish_non_exhaustive()
    }
}

impl CloudAccount {
    /// Creates a signed-out account.
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        let (state, _) = watch::channel(AuthState::Anonymous);
        Self { api, state }
    }

    /// Creates an account resuming a stored session.
    #[must_use]
    pub fn with_session(api: Arc<dyn CloudApi>, session: CloudSession) -> Self {
        let (state, _) = watch::channel(AuthState::Authenticated(session));
        Self { api, state }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Returns a receiver observing state transitions.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Returns the session, if signed in.
    #[must_use]
    pub fn session(&self) -> Option<CloudSession> {
        self.state.borrow().session().cloned()
    }

    /// Starts signing in to an account in `region`.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::InvalidTransition` while signed in.
    pub fn begin(&self, region: Region) -> Result<(), CloudError> {
        self.apply(AuthEvent::Begin(region)).map(drop)
    }

    /// Requests a one-time code for the user's e-mail address or phone number.
    ///
    /// Phone numbers without a country prefix are taken as Chinese numbers.
    ///
    /// # Errors
    ///
    /// - `RateLimited` if a cool-down is still running (no request is made)
    ///   or the cloud rate-limited this request
    /// - `IdentifierNotRegistered` if the account does not exist
    /// - `InvalidTransition` unless waiting for an identifier
    pub async fn submit_identifier(&self, input: &str) -> Result<(), CloudError> {
        let region = match &*self.state.borrow() {
            state @ AuthState::AwaitingIdentifier { region, .. } => {
                if let Some(retry_after) = state.cooldown_remaining(Utc::now()) {
                    return Err(CloudError::RateLimited { retry_after });
                }
                region.clone()
            }
            state => {
                return Err(CloudError::InvalidTransition {
                    state: state.name(),
                });
            }
        };

        let identifier = Identifier::for_region(&region, input);
        match self.api.request_otp(&region, &identifier).await {
            Ok(challenge_id) => {
                tracing::info!(%region, "One-time code sent");
                self.apply(AuthEvent::OtpSent(OtpChallenge {
                    region,
                    identifier,
                    challenge_id,
                    requested_at: Utc::now(),
                }))
                .map(drop)
            }
            Err(e) => {
                tracing::warn!(%region, error = %e, "Requesting one-time code failed");
                self.apply(AuthEvent::OtpRequestFailed {
                    retry_after: e.retry_after(),
                    at: Utc::now(),
                })?;
                Err(e)
            }
        }
    }

    /// Verifies the one-time code. E-mail accounts also need the password.
    ///
    /// A wrong code leaves the flow waiting for a code, so the user can
    /// simply try again.
    ///
    /// # Errors
    ///
    /// - `InvalidOtp` / `InvalidAuth` if the code or password is wrong
    /// - `RateLimited` during a cool-down
    /// - `InvalidTransition` unless a code was sent
    pub async fn submit_otp(&self, code: &str, password: Option<&str>) -> Result<(), CloudError> {
        let challenge = match &*self.state.borrow() {
            state @ AuthState::AwaitingOtp { challenge, .. } => {
                if let Some(retry_after) = state.cooldown_remaining(Utc::now()) {
                    return Err(CloudError::RateLimited { retry_after });
                }
                challenge.clone()
            }
            state => {
                return Err(CloudError::InvalidTransition {
                    state: state.name(),
                });
            }
        };

        if challenge.identifier.needs_password() && password.is_none_or(str::is_empty) {
            return Err(CloudError::InvalidAuth);
        }

        let result = self
            .api
            .verify_otp(
                &challenge.region,
                &challenge.identifier,
                &challenge.challenge_id,
                code.trim(),
                password,
            )
            .await;

        match result {
            Ok(session) => {
                tracing::info!(region = %challenge.region, "Cloud account signed in");
                self.apply(AuthEvent::Verified(session)).map(drop)
            }
            Err(
                e @ (CloudError::InvalidOtp | CloudError::InvalidAuth | CloudError::RateLimited { .. }),
            ) => {
                tracing::warn!(error = %e, "One-time code rejected");
                self.apply(AuthEvent::OtpRejected {
                    retry_after: e.retry_after(),
                    at: Utc::now(),
                })?;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Verifying one-time code failed");
                Err(e)
            }
        }
    }

    /// Restarts sign-in after the session was lost, pre-filling the
    /// previous identifier.
    ///
    /// # Errors
    ///
    /// Returns `CloudError::InvalidTransition` unless reauthentication is required.
    pub fn reauthenticate(&self) -> Result<(), CloudError> {
        self.apply(AuthEvent::Reauthenticate).map(drop)
    }

    /// Drops the session or abandons the sign-in flow.
    pub fn sign_out(&self) {
        let _ = self.apply(AuthEvent::SignOut);
    }

    /// Lists the account's devices.
    ///
    /// A rejected session moves the account to `ReauthRequired`.
    ///
    /// # Errors
    ///
    /// `CloudAuthRequired` when not signed in, `ReauthRequired` if the
    /// session was rejected, or a transient error.
    pub async fn list_devices(&self) -> Result<Vec<DeviceCloudInfo>, CloudError> {
        let session = self.session().ok_or(CloudError::CloudAuthRequired)?;
        match self.api.list_devices(&session).await {
            Err(e) if e.requires_reauth() => {
                tracing::error!(error = %e, "Cloud session rejected");
                let _ = self.apply(AuthEvent::RefreshFailed);
                Err(CloudError::ReauthRequired)
            }
            other => other,
        }
    }

    /// Renews the token if it expires within `margin`.
    ///
    /// A transient failure while the token is still valid is retried on the
    /// next call; any other failure moves the account to `ReauthRequired`.
    ///
    /// # Errors
    ///
    /// `CloudAuthRequired` when not signed in, `ReauthRequired` if the
    /// session could not be renewed.
    pub async fn refresh_if_needed(&self, margin: Duration) -> Result<RefreshOutcome, CloudError> {
        let now = Utc::now();
        let state = self.state();
        let session = state.session().ok_or(CloudError::CloudAuthRequired)?;
        if !session.expires_within(margin, now) {
            return Ok(RefreshOutcome::NotNeeded);
        }

        if matches!(state, AuthState::Authenticated(_)) {
            self.apply(AuthEvent::ExpiryApproaching)?;
        }
        let session = session.clone();
        self.apply(AuthEvent::RefreshStarted)?;
        tracing::debug!(expires_at = %session.expires_at(), "Refreshing cloud token");

        match self.api.refresh_token(&session).await {
            Ok(renewed) => {
                tracing::info!(expires_at = %renewed.expires_at(), "Cloud token refreshed");
                self.apply(AuthEvent::Refreshed(renewed))?;
                Ok(RefreshOutcome::Refreshed)
            }
            Err(e) if e.is_transient() && !session.is_expired_at(Utc::now()) => {
                tracing::warn!(error = %e, "Cloud token refresh failed, retrying later");
                self.apply(AuthEvent::RefreshDeferred)?;
                Ok(RefreshOutcome::Deferred)
            }
            Err(e) => {
                tracing::error!(error = %e, "Cloud token refresh failed");
                self.apply(AuthEvent::RefreshFailed)?;
                Err(CloudError::ReauthRequired)
            }
        }
    }

    /// Applies an event to the published state.
    fn apply(&self, event: AuthEvent) -> Result<AuthState, CloudError> {
        let mut outcome = Err(CloudError::InvalidTransition { state: "unknown" });
        self.state.send_if_modified(|state| match state.transition(event) {
            Ok(next) => {
                let changed = *state != next;
                if changed {
                    tracing::debug!(from = state.name(), to = next.name(), "Cloud auth state changed");
                }
                *state = next.clone();
                outcome = Ok(next);
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}
