// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the cloud HTTP client using wiremock.

#![cfg(feature = "cloud")]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dyson_link::cloud::{
    AuthState, CloudAccount, CloudApi, CloudSession, HttpCloudClient, HttpCloudConfig, Identifier,
    RefreshOutcome, Region,
};
use dyson_link::error::CloudError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, region: &Region) -> HttpCloudClient {
    HttpCloudConfig::new(region)
        .with_base_url(server.uri())
        .with_timeout(Duration::from_secs(5))
        .into_client()
        .unwrap()
}

fn gb() -> Region {
    Region::new("GB").unwrap()
}

fn session(expires_in: chrono::Duration) -> CloudSession {
    CloudSession::new(
        "token-1",
        Utc::now() + expires_in,
        gb(),
        Identifier::Email("user@example.com".to_string()),
    )
    .with_refresh_token("refresh-1")
}

async fn mount_active_user(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v3/userregistration/email/userstatus"))
        .and(query_param("country", "GB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accountStatus": "ACTIVE",
            "authenticationMethod": "EMAIL_PWD_2FA"
        })))
        .mount(server)
        .await;
}

// ============================================================================
// Sign-in
// ============================================================================

mod sign_in {
    use super::*;

    #[tokio::test]
    async fn email_flow_signs_in() {
        let server = MockServer::start().await;
        mount_active_user(&server).await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/auth"))
            .and(body_partial_json(json!({ "email": "user@example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "challengeId": "challenge-7"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/verify"))
            .and(body_partial_json(json!({
                "challengeId": "challenge-7",
                "otpCode": "123456",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "token-1",
                "refreshToken": "refresh-1",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let account = CloudAccount::new(Arc::new(client(&server, &gb())));
        account.begin(gb()).unwrap();
        account.submit_identifier(" user@example.com ").await.unwrap();
        assert!(matches!(account.state(), AuthState::AwaitingOtp { .. }));

        account.submit_otp(" 123456 ", Some("hunter2")).await.unwrap();
        assert!(account.state().is_authenticated());

        let session = account.session().unwrap();
        assert_eq!(session.access_token(), "token-1");
        assert_eq!(session.refresh_token(), Some("refresh-1"));
        assert!(session.expires_at() > Utc::now() + chrono::Duration::minutes(59));
    }

    #[tokio::test]
    async fn mobile_flow_uses_prefixed_number() {
        let server = MockServer::start().await;
        let cn = Region::new("CN").unwrap();
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/mobile/auth"))
            .and(body_partial_json(json!({ "mobile": "+8613800000000" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "challengeId": "challenge-cn"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/mobile/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "token-cn"
            })))
            .mount(&server)
            .await;

        let account = CloudAccount::new(Arc::new(client(&server, &cn)));
        account.begin(cn).unwrap();
        account.submit_identifier("13800000000").await.unwrap();
        account.submit_otp("654321", None).await.unwrap();

        let session = account.session().unwrap();
        assert_eq!(session.access_token(), "token-cn");
        assert_eq!(session.refresh_token(), None);
        assert_eq!(
            session.identifier(),
            &Identifier::Mobile("+8613800000000".to_string())
        );
    }

    #[tokio::test]
    async fn inactive_account_is_not_registered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/userstatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accountStatus": "UNREGISTERED"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/auth"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let account = CloudAccount::new(Arc::new(client(&server, &gb())));
        account.begin(gb()).unwrap();
        let result = account.submit_identifier("nobody@example.com").await;

        assert!(matches!(result, Err(CloudError::IdentifierNotRegistered)));
        assert!(matches!(account.state(), AuthState::AwaitingIdentifier { .. }));
    }

    #[tokio::test]
    async fn rate_limit_blocks_further_requests() {
        let server = MockServer::start().await;
        mount_active_user(&server).await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/auth"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
            .expect(1)
            .mount(&server)
            .await;

        let account = CloudAccount::new(Arc::new(client(&server, &gb())));
        account.begin(gb()).unwrap();

        let first = account.submit_identifier("user@example.com").await;
        let Err(CloudError::RateLimited { retry_after }) = first else {
            panic!("expected rate limit, got {first:?}");
        };
        assert_eq!(retry_after, Duration::from_secs(120));

        // Answered locally during the cool-down.
        let second = account.submit_identifier("user@example.com").await;
        assert!(matches!(second, Err(CloudError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn wrong_code_can_be_retried() {
        let server = MockServer::start().await;
        mount_active_user(&server).await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "challengeId": "challenge-7"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/verify"))
            .and(body_partial_json(json!({ "otpCode": "000000" })))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/email/verify"))
            .and(body_partial_json(json!({ "otpCode": "123456" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "token-1"
            })))
            .mount(&server)
            .await;

        let account = CloudAccount::new(Arc::new(client(&server, &gb())));
        account.begin(gb()).unwrap();
        account.submit_identifier("user@example.com").await.unwrap();

        let wrong = account.submit_otp("000000", Some("pw")).await;
        assert!(matches!(wrong, Err(CloudError::InvalidOtp)));
        assert!(matches!(account.state(), AuthState::AwaitingOtp { .. }));

        account.submit_otp("123456", Some("pw")).await.unwrap();
        assert!(account.state().is_authenticated());
    }
}

// ============================================================================
// Device manifest
// ============================================================================

mod manifest {
    use super::*;

    #[tokio::test]
    async fn lists_devices_with_local_brokers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/manifest"))
            .and(header("Authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "serialNumber": "ABC-123",
                    "name": "Office",
                    "type": "438",
                    "variant": "K",
                    "ipAddress": "192.168.1.40",
                    "connectedConfiguration": {
                        "firmware": { "version": "0.9.1" },
                        "mqtt": {
                            "localBrokerCredentials": "local-secret",
                            "mqttRootTopicLevel": "438K"
                        }
                    }
                },
                {
                    "serialNumber": "LEGACY-1",
                    "name": "Old fan",
                    "type": "475"
                }
            ])))
            .mount(&server)
            .await;

        let client = client(&server, &gb());
        let devices = client.list_devices(&session(chrono::Duration::hours(1))).await.unwrap();

        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.serial.as_str(), "ABC-123");
        assert_eq!(device.name, "Office");
        assert_eq!(device.credential.expose(), "local-secret");
        assert_eq!(device.version.as_deref(), Some("0.9.1"));
        assert_eq!(device.mqtt_root_topic.as_deref(), Some("438K"));
        assert_eq!(device.address_hint.as_ref().unwrap().host(), "192.168.1.40");

        let identity = device.identity().unwrap();
        assert_eq!(identity.product_type().as_str(), "438K");
        assert_eq!(identity.topic_root(), "438K");
    }

    #[tokio::test]
    async fn rejected_token_requires_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/manifest"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let account = CloudAccount::with_session(
            Arc::new(client(&server, &gb())),
            session(chrono::Duration::hours(1)),
        );
        let result = account.list_devices().await;

        assert!(matches!(result, Err(CloudError::ReauthRequired)));
        assert!(matches!(account.state(), AuthState::ReauthRequired { .. }));
        account.reauthenticate().unwrap();
        assert!(matches!(
            account.state(),
            AuthState::AwaitingIdentifier { previous: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/manifest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let account = CloudAccount::with_session(
            Arc::new(client(&server, &gb())),
            session(chrono::Duration::hours(1)),
        );
        let error = account.list_devices().await.unwrap_err();

        assert!(error.is_transient());
        assert!(account.state().is_authenticated());
    }
}

// ============================================================================
// Token refresh
// ============================================================================

mod refresh {
    use super::*;

    #[tokio::test]
    async fn expiring_token_is_renewed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/token/refresh"))
            .and(body_partial_json(json!({ "refreshToken": "refresh-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "token-2",
                "refreshToken": "refresh-2",
                "expiresIn": 86400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let account = CloudAccount::with_session(
            Arc::new(client(&server, &gb())),
            session(chrono::Duration::minutes(2)),
        );
        let margin = Duration::from_secs(600);

        let outcome = account.refresh_if_needed(margin).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(account.session().unwrap().access_token(), "token-2");

        let outcome = account.refresh_if_needed(margin).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::NotNeeded);
    }

    #[tokio::test]
    async fn refused_refresh_requires_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/token/refresh"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let account = CloudAccount::with_session(
            Arc::new(client(&server, &gb())),
            session(chrono::Duration::minutes(2)),
        );
        let result = account.refresh_if_needed(Duration::from_secs(600)).await;

        assert!(matches!(result, Err(CloudError::ReauthRequired)));
        assert!(account.session().is_none());
    }

    #[tokio::test]
    async fn unreachable_cloud_defers_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/userregistration/token/refresh"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let account = CloudAccount::with_session(
            Arc::new(client(&server, &gb())),
            session(chrono::Duration::minutes(2)),
        );
        let outcome = account.refresh_if_needed(Duration::from_secs(600)).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Deferred);
        assert!(matches!(account.state(), AuthState::TokenExpiring(_)));
        assert_eq!(account.session().unwrap().access_token(), "token-1");
    }
}
