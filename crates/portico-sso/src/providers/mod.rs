//! Identity provider implementations.
//!
//! One variant per supported protocol: LDAP/Active Directory, SAML 2.0, and
//! OAuth2/OIDC (with Google, Microsoft, and GitHub presets). New providers
//! are added as new variants here, not discovered at runtime.

pub mod ldap;
pub mod oauth;
pub mod saml;

pub use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use portico_store::{IdentityStore, User};

use crate::config::ProviderType;
use crate::credentials::Credentials;
use crate::error::{SsoError, SsoResult};

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// The reconciled local user.
    pub user: User,
    /// Local group names mapped from the external group list.
    pub groups: Vec<String>,
    /// Provider-specific context (tokens, session index, raw group list).
    /// The transport layer may expose it to the client; the core never
    /// persists it.
    pub additional: Map<String, Value>,
}

/// Outcome of a token validation probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidation {
    pub valid: bool,
    pub detail: Option<String>,
}

impl TokenValidation {
    /// Fixed shape for protocols without a token concept (LDAP, SAML).
    #[must_use]
    pub fn not_supported() -> Self {
        Self {
            valid: false,
            detail: Some("not supported".to_string()),
        }
    }

    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            detail: None,
        }
    }

    #[must_use]
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self {
            valid: false,
            detail: Some(detail.into()),
        }
    }
}

/// Trait implemented by every identity provider variant.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Protocol of this provider.
    fn provider_type(&self) -> ProviderType;

    /// Configured provider name (the dispatch key).
    fn name(&self) -> &str;

    /// Human-readable name for discovery listings.
    fn display_name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn priority(&self) -> i32;

    /// Run the protocol exchange, reconcile the external identity, and sync
    /// groups. A failed exchange never creates or mutates a local record; a
    /// group-sync failure after a successful exchange degrades to an empty
    /// group list rather than failing the login.
    async fn authenticate(
        &self,
        credentials: &Credentials,
        store: &dyn IdentityStore,
    ) -> SsoResult<AuthOutcome>;

    /// Profile projection for a known local user.
    async fn get_user_info(
        &self,
        user_id: Uuid,
        store: &dyn IdentityStore,
    ) -> SsoResult<Map<String, Value>> {
        let user = store
            .find_user_by_id(user_id)
            .await?
            .ok_or(SsoError::UserNotFound { id: user_id })?;
        Ok(user_info_map(&user, self.display_name()))
    }

    /// Synchronize the user's groups.
    ///
    /// LDAP queries the directory; SAML and OAuth providers receive group
    /// claims bundled with the identity assertion, so they consume
    /// `raw_groups` from the authenticate call and cannot re-query. Direct
    /// calls propagate [`SsoError::GroupSyncFailed`]; the registry wrapper
    /// applies the degrade-to-empty policy instead.
    async fn sync_groups(
        &self,
        user: &User,
        raw_groups: Option<&[String]>,
        store: &dyn IdentityStore,
    ) -> SsoResult<Vec<String>>;

    /// Check whether a provider-issued token is still valid.
    async fn validate_token(&self, token: &str) -> SsoResult<TokenValidation>;
}

/// Standard profile projection shared by all providers.
pub(crate) fn user_info_map(user: &User, provider_display_name: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::String(user.id.to_string()));
    map.insert(
        "username".to_string(),
        Value::String(user.username.clone()),
    );
    map.insert("email".to_string(), Value::String(user.email.clone()));
    map.insert(
        "full_name".to_string(),
        user.full_name
            .clone()
            .map_or(Value::Null, Value::String),
    );
    map.insert(
        "auth_provider".to_string(),
        Value::String(user.auth_provider.clone()),
    );
    map.insert("role".to_string(), Value::String(user.role.clone()));
    map.insert(
        "status".to_string(),
        Value::String(user.status.to_string()),
    );
    map.insert(
        "email_verified".to_string(),
        Value::Bool(user.email_verified),
    );
    map.insert(
        "last_login".to_string(),
        user.last_login
            .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
    );
    map.insert(
        "provider_display_name".to_string(),
        Value::String(provider_display_name.to_string()),
    );
    map
}
