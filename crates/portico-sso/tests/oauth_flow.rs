//! OAuth2/OIDC flow tests against a mock token/userinfo server.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portico_sso::{Credentials, ProviderConfig, RegistryBuilder, SsoError};
use portico_store::MemoryStore;

fn oidc_config(server_uri: &str) -> ProviderConfig {
    serde_json::from_value(json!({
        "name": "acme-oidc",
        "type": "oidc",
        "priority": 5,
        "role_mapping": { "platform-admins": "admin" },
        "auto_create_groups": true,
        "connection": {
            "client_id": "client-id",
            "client_secret": "client-secret",
            "authorization_url": format!("{server_uri}/authorize"),
            "token_url": format!("{server_uri}/token"),
            "userinfo_url": format!("{server_uri}/userinfo"),
            "scope": "openid profile email groups",
            "timeout_secs": 2
        }
    }))
    .unwrap()
}

fn code_credentials() -> Credentials {
    Credentials::AuthorizationCode {
        code: "abc".to_string(),
        redirect_uri: "https://app.example.com/cb".to_string(),
        state: Some("xyzzy".to_string()),
    }
}

async fn mount_token_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-123",
            "refresh_token": "rt-456",
            "id_token": "idt-789",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

async fn mount_userinfo(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn authenticate_creates_user_and_maps_groups() {
    let server = MockServer::start().await;
    mount_token_success(&server).await;
    mount_userinfo(
        &server,
        json!({
            "sub": "ext-42",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "given_name": "Alice",
            "family_name": "Anderson",
            "groups": ["platform-admins", "engineering"]
        }),
    )
    .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let outcome = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap();

    assert_eq!(outcome.user.username, "alice");
    assert_eq!(outcome.user.email, "alice@example.com");
    assert_eq!(outcome.user.full_name.as_deref(), Some("Alice Anderson"));
    assert_eq!(outcome.user.auth_provider, "acme-oidc");
    assert!(outcome.user.email_verified);
    // Role mapping applied from the groups claim.
    assert_eq!(outcome.user.role, "admin");
    // Groups auto-provisioned in claim order.
    assert_eq!(outcome.groups, vec!["platform-admins", "engineering"]);
    assert_eq!(store.group_count().await, 2);
    // Tokens surfaced to the transport layer, never persisted.
    assert_eq!(outcome.additional["access_token"], "at-123");
    assert_eq!(outcome.additional["refresh_token"], "rt-456");
    assert_eq!(outcome.additional["raw_groups"], json!(["platform-admins", "engineering"]));
}

#[tokio::test]
async fn second_login_updates_profile_but_keeps_role() {
    let server = MockServer::start().await;
    mount_token_success(&server).await;
    mount_userinfo(
        &server,
        json!({
            "sub": "ext-42",
            "preferred_username": "alice",
            "email": "alice@new.example.com",
            "given_name": "Alice",
            "family_name": "Anderson",
            "groups": []
        }),
    )
    .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let first = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap();
    let second = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_eq!(store.user_count().await, 1);
    assert_eq!(second.user.email, "alice@new.example.com");
    // No group claim matched a role mapping, so the role stays put.
    assert_eq!(second.user.role, "user");
}

#[tokio::test]
async fn missing_access_token_fails_without_creating_a_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let err = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::AuthenticationFailed { .. }));
    assert_eq!(store.user_count().await, 0);
}

#[tokio::test]
async fn failed_exchange_fails_without_creating_a_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "The authorization code has expired"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let err = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, SsoError::AuthenticationFailed { .. }));
    assert_eq!(store.user_count().await, 0);
}

#[tokio::test]
async fn missing_username_claim_fails_without_creating_a_user() {
    let server = MockServer::start().await;
    mount_token_success(&server).await;
    mount_userinfo(
        &server,
        json!({
            "sub": "ext-42",
            "email": "alice@example.com"
        }),
    )
    .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let err = registry
        .authenticate("acme-oidc", &code_credentials())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SsoError::AuthenticationFailed { ref message } if message == "username not found"
    ));
    assert_eq!(store.user_count().await, 0);
}

#[tokio::test]
async fn github_preset_uses_login_and_yields_no_groups() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-123",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;
    mount_userinfo(
        &server,
        json!({
            "id": 12345678,
            "login": "octocat",
            "name": "Mona Lisa Octocat",
            "email": "octocat@example.com"
        }),
    )
    .await;

    let config: ProviderConfig = serde_json::from_value(json!({
        "name": "github",
        "type": "oauth",
        "connection": {
            "client_id": "client-id",
            "client_secret": "client-secret",
            "vendor": "github",
            "token_url": format!("{}/token", server.uri()),
            "userinfo_url": format!("{}/userinfo", server.uri()),
            "timeout_secs": 2
        }
    }))
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store.clone())
        .with_provider(config)
        .build()
        .unwrap();

    let outcome = registry
        .authenticate("github", &code_credentials())
        .await
        .unwrap();

    assert_eq!(outcome.user.username, "octocat");
    assert_eq!(outcome.user.full_name.as_deref(), Some("Mona Lisa Octocat"));
    // GitHub exposes no group claim; deterministically empty, not an error.
    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.additional["vendor"], "github");
}

#[tokio::test]
async fn validate_token_probes_userinfo() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "ext-42"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let registry = RegistryBuilder::new(store)
        .with_provider(oidc_config(&server.uri()))
        .build()
        .unwrap();

    let valid = registry
        .validate_token("acme-oidc", "good-token")
        .await
        .unwrap();
    assert!(valid.valid);

    let invalid = registry
        .validate_token("acme-oidc", "expired-token")
        .await
        .unwrap();
    assert!(!invalid.valid);
    assert!(invalid.detail.unwrap().contains("401"));
}
