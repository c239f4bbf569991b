// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cloud account regions, sign-in identifiers and sessions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Country code of the cloud account.
///
/// The region decides both the API host and how the user signs in:
/// `CN` accounts use a mobile number, all others an e-mail address plus
/// password.
///
/// # Examples
///
/// ```
/// use dyson_link::cloud::Region;
///
/// let region = Region::new("gb").unwrap();
/// assert_eq!(region.as_str(), "GB");
/// assert!(!region.uses_mobile());
/// assert!(Region::new("CN").unwrap().uses_mobile());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Region code of mainland China accounts.
    pub const CHINA: &'static str = "CN";

    /// Creates a region from a two-letter country code.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::UnknownRegion` unless the code is two ASCII letters.
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValueError> {
        let code = code.as_ref().trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValueError::UnknownRegion(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Returns the country code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if accounts in this region sign in with a mobile number.
    #[must_use]
    pub fn uses_mobile(&self) -> bool {
        self.0 == Self::CHINA
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Region {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}

/// What the user signs in with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    /// E-mail address (all regions except China).
    Email(String),
    /// Mobile number in international form (China).
    Mobile(String),
}

impl Identifier {
    /// Interprets user input for a region.
    ///
    /// Mobile numbers without a leading `+` get the `+86` country prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use dyson_link::cloud::{Identifier, Region};
    ///
    /// let cn = Region::new("CN").unwrap();
    /// assert_eq!(
    ///     Identifier::for_region(&cn, "13800000000"),
    ///     Identifier::Mobile("+8613800000000".to_string())
    /// );
    ///
    /// let us = Region::new("US").unwrap();
    /// assert_eq!(
    ///     Identifier::for_region(&us, " user@example.com "),
    ///     Identifier::Email("user@example.com".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn for_region(region: &Region, input: &str) -> Self {
        let input = input.trim();
        if region.uses_mobile() {
            if input.starts_with('+') {
                Self::Mobile(input.to_string())
            } else {
                Self::Mobile(format!("+86{input}"))
            }
        } else {
            Self::Email(input.to_string())
        }
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email(s) | Self::Mobile(s) => s,
        }
    }

    /// Returns `true` for the e-mail flow, which also needs a password.
    #[must_use]
    pub fn needs_password(&self) -> bool {
        matches!(self, Self::Email(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated cloud account session.
///
/// Tokens are redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSession {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
    region: Region,
    identifier: Identifier,
}

impl CloudSession {
    /// Creates a session.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        region: Region,
        identifier: Identifier,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
            region,
            identifier,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Returns the bearer token for API calls.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the refresh token, if the cloud issued one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns when the access token expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the account region.
    #[must_use]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Returns the identifier the session was opened with.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Returns `true` if the token expires within `margin` of `now`.
    #[must_use]
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(margin)
            .is_none_or(|limit| limit >= self.expires_at)
    }

    /// Returns `true` if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSession")
            .field("expires_at", &self.expires_at)
            .field("region", &self.region)
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}
