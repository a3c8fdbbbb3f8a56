//! OAuth2 / OIDC provider.
//!
//! One generic authorization-code flow; Google, Microsoft, and GitHub are
//! configuration presets (endpoint URLs, default scope, claim mapping) fed
//! into it, not separate implementations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use portico_store::{IdentityStore, User};

use crate::config::{OAuthSettings, ProviderConfig, ProviderType};
use crate::credentials::Credentials;
use crate::error::{SsoError, SsoResult};
use crate::identity::{ExternalIdentity, Reconciler};
use crate::providers::{AuthOutcome, IdentityProvider, TokenValidation};

/// Vendor preset selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthVendor {
    Google,
    Microsoft,
    Github,
}

impl std::fmt::Display for OAuthVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthVendor::Google => write!(f, "google"),
            OAuthVendor::Microsoft => write!(f, "microsoft"),
            OAuthVendor::Github => write!(f, "github"),
        }
    }
}

/// Endpoint and claim-mapping data for one vendor.
#[derive(Debug, Clone)]
pub struct VendorPreset {
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub default_scope: String,
    /// Logical field → claim name.
    pub attribute_mapping: &'static [(&'static str, &'static str)],
}

impl OAuthVendor {
    /// Resolve the preset. `azure_tenant` only affects Microsoft endpoints
    /// (defaults to the `common` multi-tenant endpoint).
    #[must_use]
    pub fn preset(&self, azure_tenant: Option<&str>) -> VendorPreset {
        match self {
            OAuthVendor::Google => VendorPreset {
                authorization_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                default_scope: "openid email profile".to_string(),
                attribute_mapping: &[
                    ("external_id", "sub"),
                    ("username", "email"),
                    ("email", "email"),
                    ("first_name", "given_name"),
                    ("last_name", "family_name"),
                ],
            },
            OAuthVendor::Microsoft => {
                let tenant = azure_tenant.unwrap_or("common");
                VendorPreset {
                    authorization_url: format!(
                        "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/authorize"
                    ),
                    token_url: format!(
                        "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"
                    ),
                    userinfo_url: "https://graph.microsoft.com/v1.0/me".to_string(),
                    default_scope: "openid email profile User.Read".to_string(),
                    attribute_mapping: &[
                        ("external_id", "id"),
                        ("username", "userPrincipalName"),
                        ("email", "mail"),
                        ("first_name", "givenName"),
                        ("last_name", "surname"),
                        ("display_name", "displayName"),
                    ],
                }
            }
            OAuthVendor::Github => VendorPreset {
                authorization_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                userinfo_url: "https://api.github.com/user".to_string(),
                default_scope: "read:user user:email".to_string(),
                attribute_mapping: &[
                    ("external_id", "id"),
                    ("username", "login"),
                    ("email", "email"),
                    ("display_name", "name"),
                ],
            },
        }
    }
}

/// Generic OIDC claim mapping used when no vendor preset is selected.
const OIDC_ATTRIBUTE_MAPPING: &[(&str, &str)] = &[
    ("external_id", "sub"),
    ("username", "preferred_username"),
    ("email", "email"),
    ("first_name", "given_name"),
    ("last_name", "family_name"),
    ("groups", "groups"),
];

/// Token endpoint response. `access_token` stays optional so a 200 response
/// without one is handled as an exchange failure, not a decode error.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<i64>,
}

/// OAuth2/OIDC identity provider.
pub struct OAuthProvider {
    config: ProviderConfig,
    settings: OAuthSettings,
    display_name: String,
    authorization_url: String,
    token_url: String,
    userinfo_url: String,
    scope: String,
    attribute_mapping: HashMap<String, String>,
    http_client: Client,
}

impl OAuthProvider {
    /// Construct from validated configuration, resolving the vendor preset
    /// and explicit overrides into fixed endpoints.
    pub fn new(config: ProviderConfig) -> SsoResult<Self> {
        config.validate()?;
        let settings = config.oauth_settings()?.clone();
        let display_name = config.effective_display_name();

        let preset = settings
            .vendor
            .map(|v| v.preset(settings.azure_tenant.as_deref()));

        let pick = |explicit: &str, preset_value: Option<String>| -> String {
            if explicit.is_empty() {
                preset_value.unwrap_or_default()
            } else {
                explicit.to_string()
            }
        };

        let authorization_url = pick(
            &settings.authorization_url,
            preset.as_ref().map(|p| p.authorization_url.clone()),
        );
        let token_url = pick(
            &settings.token_url,
            preset.as_ref().map(|p| p.token_url.clone()),
        );
        let userinfo_url = pick(
            &settings.userinfo_url,
            preset.as_ref().map(|p| p.userinfo_url.clone()),
        );
        let scope = pick(
            &settings.scope,
            preset.as_ref().map(|p| p.default_scope.clone()),
        );

        let mut attribute_mapping: HashMap<String, String> = preset
            .as_ref()
            .map_or(OIDC_ATTRIBUTE_MAPPING, |p| p.attribute_mapping)
            .iter()
            .map(|(field, claim)| ((*field).to_string(), (*claim).to_string()))
            .collect();
        for (field, claim) in &config.attribute_mapping {
            attribute_mapping.insert(field.clone(), claim.clone());
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            config,
            settings,
            display_name,
            authorization_url,
            token_url,
            userinfo_url,
            scope,
            attribute_mapping,
            http_client,
        })
    }

    /// Authorization redirect URL for the transport layer to send the
    /// browser to.
    #[must_use]
    pub fn authorization_redirect(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.authorization_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state),
        )
    }

    fn mapped(&self, field: &str) -> &str {
        self.attribute_mapping
            .get(field)
            .map_or("", String::as_str)
    }

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> SsoResult<TokenEndpointResponse> {
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            // GitHub answers with urlencoded unless asked for JSON.
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.config.name, error = %e, "token exchange request failed");
                SsoError::auth_failed("token exchange failed")
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                provider = %self.config.name,
                status = %status,
                "token endpoint returned an error"
            );
            return Err(SsoError::auth_failed("token exchange failed"));
        }

        response.json().await.map_err(|e| {
            warn!(provider = %self.config.name, error = %e, "token response decode failed");
            SsoError::auth_failed("token exchange failed")
        })
    }

    /// Fetch userinfo claims with a bearer token.
    async fn fetch_claims(&self, access_token: &str) -> SsoResult<Value> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .header("Accept", "application/json")
            .header("User-Agent", "portico")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = %self.config.name, error = %e, "userinfo request failed");
                SsoError::auth_failed("userinfo fetch failed")
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                provider = %self.config.name,
                status = %status,
                "userinfo endpoint returned an error"
            );
            return Err(SsoError::auth_failed("userinfo fetch failed"));
        }

        response.json().await.map_err(|e| {
            warn!(provider = %self.config.name, error = %e, "userinfo decode failed");
            SsoError::auth_failed("userinfo fetch failed")
        })
    }

    /// Claim lookup that stringifies scalar values (GitHub ids are numbers).
    fn claim_string(&self, claims: &Value, field: &str) -> String {
        let claim = self.mapped(field);
        if claim.is_empty() {
            return String::new();
        }
        match claims.get(claim) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn claim_groups(&self, claims: &Value) -> Vec<String> {
        let claim = self.mapped("groups");
        if claim.is_empty() {
            // Vendor presets carry no groups claim; known limitation.
            return Vec::new();
        }
        claims
            .get(claim)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    fn provider_type(&self) -> ProviderType {
        self.config.provider_type
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        store: &dyn IdentityStore,
    ) -> SsoResult<AuthOutcome> {
        let Credentials::AuthorizationCode {
            code,
            redirect_uri,
            state: _,
        } = credentials
        else {
            return Err(SsoError::InvalidCredentials {
                expected: "an authorization code",
            });
        };

        let tokens = self.exchange_code(code, redirect_uri).await?;
        let Some(access_token) = tokens.access_token else {
            warn!(
                provider = %self.config.name,
                "token endpoint answered without an access token"
            );
            return Err(SsoError::auth_failed("token exchange failed"));
        };

        let claims = self.fetch_claims(&access_token).await?;

        let username = self.claim_string(&claims, "username");
        if username.is_empty() {
            debug!(provider = %self.config.name, "userinfo carried no username claim");
            return Err(SsoError::auth_failed("username not found"));
        }

        let raw_groups = self.claim_groups(&claims);
        let display_name = {
            let name = self.claim_string(&claims, "display_name");
            (!name.is_empty()).then_some(name)
        };

        let identity = ExternalIdentity {
            external_id: self.claim_string(&claims, "external_id"),
            username,
            email: self.claim_string(&claims, "email"),
            first_name: self.claim_string(&claims, "first_name"),
            last_name: self.claim_string(&claims, "last_name"),
            display_name,
            raw_groups: raw_groups.clone(),
        };

        let reconciler = Reconciler::for_config(&self.config);
        let mut user = reconciler.get_or_create_user(&identity, store).await?;

        let groups = match reconciler
            .map_groups_and_roles(&user, &raw_groups, store)
            .await
        {
            Ok(mapping) => {
                if let Some(role) = mapping.role {
                    user.role = role;
                }
                mapping.groups
            }
            Err(e) => {
                warn!(
                    provider = %self.config.name,
                    username = %user.username,
                    error = %e,
                    "group mapping failed after successful login"
                );
                Vec::new()
            }
        };

        let mut additional = Map::new();
        additional.insert(
            "access_token".to_string(),
            Value::String(access_token),
        );
        if let Some(refresh_token) = tokens.refresh_token {
            additional.insert("refresh_token".to_string(), Value::String(refresh_token));
        }
        if let Some(id_token) = tokens.id_token {
            additional.insert("id_token".to_string(), Value::String(id_token));
        }
        if let Some(expires_in) = tokens.expires_in {
            additional.insert("expires_in".to_string(), json!(expires_in));
        }
        if let Some(vendor) = self.settings.vendor {
            additional.insert("vendor".to_string(), Value::String(vendor.to_string()));
        }
        additional.insert("raw_groups".to_string(), json!(raw_groups));

        Ok(AuthOutcome {
            user,
            groups,
            additional,
        })
    }

    async fn sync_groups(
        &self,
        user: &User,
        raw_groups: Option<&[String]>,
        store: &dyn IdentityStore,
    ) -> SsoResult<Vec<String>> {
        // Group claims only arrive with the identity token/userinfo during
        // authentication; there is no separate membership query.
        let Some(raw_groups) = raw_groups else {
            debug!(
                provider = %self.config.name,
                username = %user.username,
                "no claim groups supplied, nothing to sync"
            );
            return Ok(Vec::new());
        };

        let reconciler = Reconciler::for_config(&self.config);
        let mapping = reconciler
            .map_groups_and_roles(user, raw_groups, store)
            .await
            .map_err(SsoError::into_group_sync)?;
        Ok(mapping.groups)
    }

    /// Probe the userinfo endpoint with the token as bearer; HTTP 200 means
    /// valid, anything else is invalid with the status captured.
    async fn validate_token(&self, token: &str) -> SsoResult<TokenValidation> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .header("Accept", "application/json")
            .header("User-Agent", "portico")
            .bearer_auth(token)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => Ok(TokenValidation::valid()),
            Ok(response) => Ok(TokenValidation::invalid(format!(
                "userinfo returned HTTP {}",
                response.status().as_u16()
            ))),
            Err(e) => {
                debug!(provider = %self.config.name, error = %e, "token validation probe failed");
                Ok(TokenValidation::invalid("userinfo request failed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_for(vendor: &str) -> OAuthProvider {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": vendor,
            "type": "oauth",
            "connection": {
                "client_id": "client-id",
                "client_secret": "client-secret",
                "vendor": vendor
            }
        }))
        .unwrap();
        OAuthProvider::new(config).unwrap()
    }

    #[test]
    fn test_google_preset_endpoints() {
        let provider = provider_for("google");
        assert_eq!(provider.token_url, "https://oauth2.googleapis.com/token");
        assert_eq!(
            provider.userinfo_url,
            "https://openidconnect.googleapis.com/v1/userinfo"
        );
        assert_eq!(provider.mapped("external_id"), "sub");
        assert_eq!(provider.mapped("username"), "email");
    }

    #[test]
    fn test_microsoft_preset_tenant_template() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "entra",
            "type": "oauth",
            "connection": {
                "client_id": "client-id",
                "client_secret": "client-secret",
                "vendor": "microsoft",
                "azure_tenant": "contoso.onmicrosoft.com"
            }
        }))
        .unwrap();
        let provider = OAuthProvider::new(config).unwrap();
        assert_eq!(
            provider.token_url,
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );

        let default_tenant = provider_for("microsoft");
        assert_eq!(
            default_tenant.token_url,
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_github_preset_username_is_login() {
        let provider = provider_for("github");
        assert_eq!(provider.mapped("username"), "login");
        assert_eq!(
            provider.token_url,
            "https://github.com/login/oauth/access_token"
        );
    }

    #[test]
    fn test_explicit_urls_override_preset() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "google-proxy",
            "type": "oauth",
            "connection": {
                "client_id": "client-id",
                "client_secret": "client-secret",
                "vendor": "google",
                "token_url": "https://proxy.internal/token"
            }
        }))
        .unwrap();
        let provider = OAuthProvider::new(config).unwrap();
        assert_eq!(provider.token_url, "https://proxy.internal/token");
        assert_eq!(
            provider.userinfo_url,
            "https://openidconnect.googleapis.com/v1/userinfo"
        );
    }

    #[test]
    fn test_authorization_redirect_url() {
        let provider = provider_for("google");
        let url = provider.authorization_redirect("state-token", "https://app.example.com/cb");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb"));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_vendor_presets_have_no_groups_claim() {
        for vendor in ["google", "microsoft", "github"] {
            let provider = provider_for(vendor);
            assert_eq!(provider.mapped("groups"), "", "vendor {vendor}");
            assert!(provider.claim_groups(&json!({"groups": ["a"]})).is_empty());
        }
    }

    #[test]
    fn test_generic_oidc_groups_claim() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "sso",
            "type": "oidc",
            "connection": {
                "client_id": "client-id",
                "client_secret": "client-secret",
                "token_url": "https://idp.example.com/token",
                "userinfo_url": "https://idp.example.com/userinfo",
                "authorization_url": "https://idp.example.com/authorize",
                "scope": "openid profile groups"
            }
        }))
        .unwrap();
        let provider = OAuthProvider::new(config).unwrap();

        let groups =
            provider.claim_groups(&json!({"groups": ["engineering", "admins", 7]}));
        assert_eq!(groups, vec!["engineering", "admins"]);
    }

    #[test]
    fn test_numeric_claims_are_stringified() {
        let provider = provider_for("github");
        let claims = json!({"id": 12345678, "login": "octocat"});
        assert_eq!(provider.claim_string(&claims, "external_id"), "12345678");
        assert_eq!(provider.claim_string(&claims, "username"), "octocat");
    }
}
