// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud account sign-in and device directory.
//!
//! The vendor cloud knows every device registered to an account together
//! with its local MQTT credential. This module signs in with a one-time
//! code, keeps the session fresh, and lists the account's devices.
//!
//! # Sign-in flow
//!
//! ```text
//! Anonymous -> AwaitingIdentifier -> AwaitingOtp -> Authenticated
//! Authenticated -> TokenExpiring -> Refreshing -> Authenticated
//! Refreshing -> ReauthRequired -> AwaitingIdentifier (identifier pre-filled)
//! ```
//!
//! The transitions are a pure function ([`AuthState::transition`]),
//! driven against a [`CloudApi`] by [`CloudAccount`]. [`CloudDiscovery`]
//! polls a signed-in account and feeds the registry.
//!
//! The `cloud` feature adds [`HttpCloudClient`], the `reqwest`-backed
//! implementation of [`CloudApi`].

mod account;
pub(crate) mod api;
mod auth;
mod discovery;
#[cfg(feature = "cloud")]
mod http;
mod session;

pub use account::{CloudAccount, RefreshOutcome};
pub use api::{CloudApi, DeviceCloudInfo};
pub use auth::{AuthEvent, AuthState, DEFAULT_RATE_LIMIT_COOLDOWN, OtpChallenge};
pub use discovery::CloudDiscovery;
#[cfg(feature = "cloud")]
pub use http::{CHINA_API_HOST, GLOBAL_API_HOST, HttpCloudClient, HttpCloudConfig};
pub use session::{CloudSession, Identifier, Region};
