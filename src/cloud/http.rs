// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `reqwest`-backed cloud API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::CloudError;
use crate::types::{Credential, DeviceAddress, Serial};

use super::auth::DEFAULT_RATE_LIMIT_COOLDOWN;
use super::{CloudApi, CloudSession, DeviceCloudInfo, Identifier, Region};

/// API host for accounts outside China.
pub const GLOBAL_API_HOST: &str = "https://appapi.cp.dyson.com";
/// API host for China accounts.
pub const CHINA_API_HOST: &str = "https://appapi.cp.dyson.cn";

/// Token lifetime assumed when the cloud does not state one.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

// ============================================================================
// HttpCloudConfig
// ============================================================================

/// Configuration for the cloud HTTP client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dyson_link::cloud::{HttpCloudConfig, Region};
///
/// let config = HttpCloudConfig::new(&Region::new("CN").unwrap());
/// assert_eq!(config.base_url(), "https://appapi.cp.dyson.cn");
///
/// let config = HttpCloudConfig::new(&Region::new("GB").unwrap())
///     .with_base_url("http://127.0.0.1:8080/")
///     .with_timeout(Duration::from_secs(5));
/// assert_eq!(config.base_url(), "http://127.0.0.1:8080");
/// ```
#[derive(Debug, Clone)]
pub struct HttpCloudConfig {
    base_url: String,
    timeout: Duration,
    culture: String,
}

impl HttpCloudConfig {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a configuration for the API host serving `region`.
    #[must_use]
    pub fn new(region: &Region) -> Self {
        let host = if region.uses_mobile() {
            CHINA_API_HOST
        } else {
            GLOBAL_API_HOST
        };
        Self {
            base_url: host.to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
            culture: "en-US".to_string(),
        }
    }

    /// Overrides the API host.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the language of OTP e-mails.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = culture.into();
        self
    }

    /// Returns the API host.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates an `HttpCloudClient` from this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn into_client(self) -> Result<HttpCloudClient, CloudError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("dyson_link/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(CloudError::Http)?;

        Ok(HttpCloudClient {
            base_url: self.base_url,
            timeout: self.timeout,
            culture: self.culture,
            client,
        })
    }
}

// ============================================================================
// HttpCloudClient
// ============================================================================

/// Cloud account client speaking the vendor's REST API.
#[derive(Debug, Clone)]
pub struct HttpCloudClient {
    base_url: String,
    timeout: Duration,
    culture: String,
    client: Client,
}

/// Which call a response belongs to, for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    UserStatus,
    RequestOtp,
    Verify,
    Manifest,
    Refresh,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStatus {
    account_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Challenge {
    challenge_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    serial_number: String,
    name: Option<String>,
    #[serde(rename = "type")]
    product_type: String,
    variant: Option<String>,
    ip_address: Option<String>,
    connected_configuration: Option<ConnectedConfiguration>,
}

#[derive(Deserialize)]
struct ConnectedConfiguration {
    firmware: Option<Firmware>,
    mqtt: Option<MqttConfiguration>,
}

#[derive(Deserialize)]
struct Firmware {
    version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttConfiguration {
    local_broker_credentials: String,
    mqtt_root_topic_level: Option<String>,
}

impl HttpCloudClient {
    /// Creates a client for `region` with default settings.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(region: &Region) -> Result<Self, CloudError> {
        HttpCloudConfig::new(region).into_client()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, call: Call, request: RequestBuilder) -> Result<Response, CloudError> {
        let response = request.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        tracing::debug!(?call, status = status.as_u16(), "Cloud response");
        if status.is_success() {
            return Ok(response);
        }
        Err(map_status(call, status, retry_after(&response)))
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T, CloudError> {
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        serde_json::from_str(&body).map_err(|e| CloudError::UnexpectedResponse(e.to_string()))
    }

    fn map_transport(&self, error: reqwest::Error) -> CloudError {
        if error.is_timeout() {
            CloudError::Timeout(self.timeout)
        } else if error.is_connect() {
            CloudError::Network(error.to_string())
        } else {
            CloudError::Http(error)
        }
    }

    fn session_from(
        token: TokenResponse,
        region: &Region,
        identifier: &Identifier,
    ) -> CloudSession {
        let lifetime = token
            .expires_in
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::days(1));
        let session = CloudSession::new(token.token, expires_at, region.clone(), identifier.clone());
        match token.refresh_token {
            Some(refresh) => session.with_refresh_token(refresh),
            None => session,
        }
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn request_otp(
        &self,
        region: &Region,
        identifier: &Identifier,
    ) -> Result<String, CloudError> {
        let request = match identifier {
            Identifier::Email(email) => {
                let status: UserStatus = {
                    let response = self
                        .send(
                            Call::UserStatus,
                            self.client
                                .post(self.url("/v3/userregistration/email/userstatus"))
                                .query(&[("country", region.as_str())])
                                .json(&json!({ "email": email })),
                        )
                        .await?;
                    self.json(response).await?
                };
                if !status.account_status.eq_ignore_ascii_case("ACTIVE") {
                    tracing::debug!(status = %status.account_status, "Cloud account not active");
                    return Err(CloudError::IdentifierNotRegistered);
                }
                self.client
                    .post(self.url("/v3/userregistration/email/auth"))
                    .query(&[("country", region.as_str()), ("culture", self.culture.as_str())])
                    .json(&json!({ "email": email }))
            }
            Identifier::Mobile(mobile) => self
                .client
                .post(self.url("/v3/userregistration/mobile/auth"))
                .json(&json!({ "mobile": mobile })),
        };

        let response = self.send(Call::RequestOtp, request).await?;
        let challenge: Challenge = self.json(response).await?;
        tracing::debug!(%region, "One-time code requested");
        Ok(challenge.challenge_id)
    }

    async fn verify_otp(
        &self,
        region: &Region,
        identifier: &Identifier,
        challenge_id: &str,
        code: &str,
        password: Option<&str>,
    ) -> Result<CloudSession, CloudError> {
        let request = match identifier {
            Identifier::Email(email) => self
                .client
                .post(self.url("/v3/userregistration/email/verify"))
                .json(&json!({
                    "email": email,
                    "password": password.unwrap_or_default(),
                    "challengeId": challenge_id,
                    "otpCode": code,
                })),
            Identifier::Mobile(mobile) => self
                .client
                .post(self.url("/v3/userregistration/mobile/verify"))
                .json(&json!({
                    "mobile": mobile,
                    "challengeId": challenge_id,
                    "otpCode": code,
                })),
        };

        let response = self.send(Call::Verify, request).await?;
        let token: TokenResponse = self.json(response).await?;
        Ok(Self::session_from(token, region, identifier))
    }

    async fn list_devices(
        &self,
        session: &CloudSession,
    ) -> Result<Vec<DeviceCloudInfo>, CloudError> {
        let request = self
            .client
            .get(self.url("/v3/manifest"))
            .bearer_auth(session.access_token());
        let response = self.send(Call::Manifest, request).await?;
        let entries: Vec<ManifestEntry> = self.json(response).await?;

        let mut devices = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(mqtt) = entry.connected_configuration.as_ref().and_then(|c| c.mqtt.as_ref())
            else {
                tracing::debug!(serial = %entry.serial_number, "Skipping device without local broker");
                continue;
            };
            let serial = match Serial::new(&entry.serial_number) {
                Ok(serial) => serial,
                Err(e) => {
                    tracing::warn!(serial = %entry.serial_number, error = %e, "Skipping device with invalid serial");
                    continue;
                }
            };
            let address_hint = entry
                .ip_address
                .as_deref()
                .and_then(|ip| ip.parse::<DeviceAddress>().ok());
            devices.push(DeviceCloudInfo {
                name: entry.name.clone().unwrap_or_else(|| serial.to_string()),
                serial,
                product_type: entry.product_type.clone(),
                variant: entry.variant.clone(),
                credential: Credential::new(mqtt.local_broker_credentials.clone()),
                version: entry
                    .connected_configuration
                    .as_ref()
                    .and_then(|c| c.firmware.as_ref())
                    .and_then(|f| f.version.clone()),
                mqtt_root_topic: mqtt.mqtt_root_topic_level.clone(),
                address_hint,
            });
        }
        Ok(devices)
    }

    async fn refresh_token(&self, session: &CloudSession) -> Result<CloudSession, CloudError> {
        let Some(refresh) = session.refresh_token() else {
            return Err(CloudError::ReauthRequired);
        };
        let request = self
            .client
            .post(self.url("/v3/userregistration/token/refresh"))
            .json(&json!({ "refreshToken": refresh }));
        let response = self.send(Call::Refresh, request).await?;
        let token: TokenResponse = self.json(response).await?;
        Ok(Self::session_from(
            token,
            session.region(),
            session.identifier(),
        ))
    }
}

/// Reads a `Retry-After` header given in seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps an unsuccessful status to the cloud error taxonomy.
fn map_status(call: Call, status: StatusCode, retry_after: Option<Duration>) -> CloudError {
    match (call, status) {
        (_, StatusCode::TOO_MANY_REQUESTS) => CloudError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_COOLDOWN),
        },
        (Call::Manifest | Call::Refresh, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            CloudError::ReauthRequired
        }
        (_, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => CloudError::InvalidAuth,
        (Call::Verify, StatusCode::BAD_REQUEST) => CloudError::InvalidOtp,
        (Call::UserStatus | Call::RequestOtp, StatusCode::NOT_FOUND) => {
            CloudError::IdentifierNotRegistered
        }
        (_, status) if status.is_server_error() => CloudError::Network(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )),
        (_, status) => CloudError::UnexpectedResponse(format!("HTTP {}", status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_selects_host() {
        assert_eq!(
            HttpCloudConfig::new(&Region::new("US").unwrap()).base_url(),
            GLOBAL_API_HOST
        );
        assert_eq!(
            HttpCloudConfig::new(&Region::new("CN").unwrap()).base_url(),
            CHINA_API_HOST
        );
    }

    #[test]
    fn rate_limit_uses_server_wait_or_default() {
        let err = map_status(
            Call::RequestOtp,
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(120)),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));

        let err = map_status(Call::Verify, StatusCode::TOO_MANY_REQUESTS, None);
        assert_eq!(err.retry_after(), Some(DEFAULT_RATE_LIMIT_COOLDOWN));
    }

    #[test]
    fn unauthorized_depends_on_call() {
        assert!(matches!(
            map_status(Call::Manifest, StatusCode::UNAUTHORIZED, None),
            CloudError::ReauthRequired
        ));
        assert!(matches!(
            map_status(Call::Verify, StatusCode::UNAUTHORIZED, None),
            CloudError::InvalidAuth
        ));
        assert!(matches!(
            map_status(Call::Verify, StatusCode::BAD_REQUEST, None),
            CloudError::InvalidOtp
        ));
        assert!(matches!(
            map_status(Call::UserStatus, StatusCode::NOT_FOUND, None),
            CloudError::IdentifierNotRegistered
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = map_status(Call::Manifest, StatusCode::SERVICE_UNAVAILABLE, None);
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "cloud unreachable: HTTP 503 - Service Unavailable");
    }
}
