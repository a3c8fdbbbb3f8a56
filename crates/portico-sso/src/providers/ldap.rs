//! LDAP / Active Directory provider.
//!
//! Authentication is a two-bind exchange: a service-account bind resolves the
//! user's DN and attributes, then a second bind *as that DN* with the
//! caller's password is the sole proof of the credential. The two binds never
//! share a connection, and every call opens fresh connections so concurrent
//! requests cannot bleed state into each other.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use portico_store::{IdentityStore, User};

use crate::config::{LdapSettings, ProviderConfig, ProviderType};
use crate::credentials::Credentials;
use crate::error::{SsoError, SsoResult};
use crate::identity::{ExternalIdentity, Reconciler};
use crate::providers::{AuthOutcome, IdentityProvider, TokenValidation};

/// LDAP result code for invalid credentials (RFC 4511).
const RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP identity provider.
pub struct LdapProvider {
    config: ProviderConfig,
    settings: LdapSettings,
    display_name: String,
}

impl LdapProvider {
    /// Construct from validated configuration. Missing connection fields are
    /// fatal here, never deferred to the first call.
    pub fn new(config: ProviderConfig) -> SsoResult<Self> {
        config.validate()?;
        let settings = config.ldap_settings()?.clone();
        let display_name = config.effective_display_name();
        Ok(Self {
            config,
            settings,
            display_name,
        })
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Open a fresh connection to the directory.
    async fn connect(&self) -> SsoResult<Ldap> {
        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(self.op_timeout())
            .set_starttls(self.settings.use_tls);

        let (conn, ldap) =
            LdapConnAsync::with_settings(conn_settings, &self.settings.server_url)
                .await
                .map_err(|e| {
                    warn!(
                        provider = %self.config.name,
                        url = %self.settings.server_url,
                        error = %e,
                        "directory connection failed"
                    );
                    SsoError::auth_failed("directory unavailable")
                })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(ldap)
    }

    /// Bind as the configured service account.
    async fn service_bind(&self, ldap: &mut Ldap) -> SsoResult<()> {
        let result = ldap
            .simple_bind(&self.settings.bind_dn, &self.settings.bind_password)
            .await
            .map_err(|e| {
                warn!(provider = %self.config.name, error = %e, "service bind failed");
                SsoError::auth_failed("directory unavailable")
            })?;

        if result.rc != 0 {
            warn!(
                provider = %self.config.name,
                rc = result.rc,
                "service account bind rejected"
            );
            return Err(SsoError::auth_failed("directory unavailable"));
        }
        Ok(())
    }

    /// Resolve the user's entry (DN and attributes) via the service account.
    async fn resolve_user(&self, ldap: &mut Ldap, username: &str) -> SsoResult<SearchEntry> {
        let filter = self
            .settings
            .user_search_filter
            .replace("{username}", &escape_filter_value(username));

        let attrs = vec![
            self.settings.email_attribute.as_str(),
            self.settings.display_name_attribute.as_str(),
            self.settings.first_name_attribute.as_str(),
            self.settings.last_name_attribute.as_str(),
        ];

        let (entries, _res) = ldap
            .with_timeout(self.op_timeout())
            .search(
                &self.settings.user_search_base,
                Scope::Subtree,
                &filter,
                attrs,
            )
            .await
            .and_then(|result| result.success())
            .map_err(|e| {
                warn!(provider = %self.config.name, error = %e, "user search failed");
                SsoError::auth_failed("directory unavailable")
            })?;

        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| SsoError::auth_failed("user not found"))?;

        Ok(SearchEntry::construct(entry))
    }

    /// Verify the caller's password by binding as the resolved DN on a
    /// dedicated connection. Success of this bind is the only credential
    /// proof; the service account never sees the password.
    async fn verify_password(&self, user_dn: &str, password: &str) -> SsoResult<()> {
        let mut ldap = self.connect().await?;

        let result = ldap.simple_bind(user_dn, password).await.map_err(|e| {
            warn!(provider = %self.config.name, error = %e, "verification bind failed");
            SsoError::auth_failed("invalid credentials")
        })?;
        let _ = ldap.unbind().await;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                debug!(provider = %self.config.name, dn = %user_dn, "password rejected");
            } else {
                warn!(
                    provider = %self.config.name,
                    rc = result.rc,
                    "verification bind returned unexpected result code"
                );
            }
            return Err(SsoError::auth_failed("invalid credentials"));
        }
        Ok(())
    }

    /// Enumerate group names for a user DN via the service connection.
    async fn search_groups(&self, ldap: &mut Ldap, user_dn: &str) -> SsoResult<Vec<String>> {
        if self.settings.group_search_base.is_empty() {
            return Ok(Vec::new());
        }

        let filter = self
            .settings
            .group_search_filter
            .replace("{user_dn}", &escape_filter_value(user_dn));

        let (entries, _res) = ldap
            .with_timeout(self.op_timeout())
            .search(
                &self.settings.group_search_base,
                Scope::Subtree,
                &filter,
                vec![self.settings.group_name_attribute.as_str()],
            )
            .await
            .and_then(|result| result.success())
            .map_err(|e| {
                warn!(provider = %self.config.name, error = %e, "group search failed");
                SsoError::auth_failed("directory unavailable")
            })?;

        let mut groups = Vec::new();
        for entry in entries {
            let entry = SearchEntry::construct(entry);
            if let Some(value) = entry
                .attrs
                .get(&self.settings.group_name_attribute)
                .and_then(|values| values.first())
            {
                groups.push(value.clone());
            }
        }
        Ok(groups)
    }

    async fn fetch_and_map_groups(
        &self,
        user: &User,
        store: &dyn IdentityStore,
    ) -> SsoResult<Vec<String>> {
        let mut ldap = self.connect().await?;
        self.service_bind(&mut ldap).await?;
        let entry = self.resolve_user(&mut ldap, &user.username).await?;
        let raw_groups = self.search_groups(&mut ldap, &entry.dn).await?;
        let _ = ldap.unbind().await;

        let reconciler = Reconciler::for_config(&self.config);
        let mapping = reconciler
            .map_groups_and_roles(user, &raw_groups, store)
            .await?;
        Ok(mapping.groups)
    }
}

#[async_trait]
impl IdentityProvider for LdapProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ldap
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
        let Credentials::Password { username, password } = credentials else {
            return Err(SsoError::InvalidCredentials {
                expected: "username and password",
            });
        };

        // An empty password would be an unauthenticated bind, which
        // directories accept without checking anything.
        if username.is_empty() || password.is_empty() {
            return Err(SsoError::auth_failed("invalid credentials"));
        }

        let mut service = self.connect().await?;
        self.service_bind(&mut service).await?;

        let entry = self.resolve_user(&mut service, username).await?;
        let user_dn = entry.dn.clone();

        self.verify_password(&user_dn, password).await?;

        let display_name = attr_first(&entry, &self.settings.display_name_attribute);
        let identity = ExternalIdentity {
            external_id: user_dn.clone(),
            username: username.clone(),
            email: attr_first(&entry, &self.settings.email_attribute),
            first_name: attr_first(&entry, &self.settings.first_name_attribute),
            last_name: attr_first(&entry, &self.settings.last_name_attribute),
            display_name: (!display_name.is_empty()).then_some(display_name),
            raw_groups: Vec::new(),
        };

        let reconciler = Reconciler::for_config(&self.config);
        let mut user = reconciler.get_or_create_user(&identity, store).await?;

        // The login has succeeded; group sync from here on is best-effort.
        let raw_groups = match self.search_groups(&mut service, &user_dn).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(
                    provider = %self.config.name,
                    username = %username,
                    error = %e,
                    "group search failed after successful login"
                );
                Vec::new()
            }
        };
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
                    username = %username,
                    error = %e,
                    "group mapping failed after successful login"
                );
                Vec::new()
            }
        };
        let _ = service.unbind().await;

        let mut additional = Map::new();
        additional.insert("dn".to_string(), Value::String(user_dn));
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
        _raw_groups: Option<&[String]>,
        store: &dyn IdentityStore,
    ) -> SsoResult<Vec<String>> {
        self.fetch_and_map_groups(user, store)
            .await
            .map_err(SsoError::into_group_sync)
    }

    /// LDAP has no token concept; deterministically not supported.
    async fn validate_token(&self, _token: &str) -> SsoResult<TokenValidation> {
        Ok(TokenValidation::not_supported())
    }
}

/// Escape special characters in LDAP filter values (RFC 4515).
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

fn attr_first(entry: &SearchEntry, name: &str) -> String {
    entry
        .attrs
        .get(name)
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_store::MemoryStore;

    fn provider() -> LdapProvider {
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "corp",
            "type": "ldap",
            "connection": {
                "server_url": "ldap://ds.example.com:389",
                "use_tls": false,
                "timeout_secs": 2,
                "bind_dn": "cn=service,dc=example,dc=com",
                "bind_password": "secret",
                "user_search_base": "ou=people,dc=example,dc=com",
                "group_search_base": "ou=groups,dc=example,dc=com"
            }
        }))
        .unwrap();
        LdapProvider::new(config).unwrap()
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("alice"), "alice");
        assert_eq!(escape_filter_value("a*b"), "a\\2ab");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("back\\slash"), "back\\5cslash");
    }

    #[test]
    fn test_filter_template_substitution() {
        let provider = provider();
        let filter = provider
            .settings
            .user_search_filter
            .replace("{username}", &escape_filter_value("al(ice)"));
        assert_eq!(filter, "(uid=al\\28ice\\29)");
    }

    #[tokio::test]
    async fn test_validate_token_not_supported() {
        let provider = provider();
        let validation = provider.validate_token("anything").await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.detail.as_deref(), Some("not supported"));
    }

    #[tokio::test]
    async fn test_wrong_credential_shape_is_input_error() {
        let provider = provider();
        let store = MemoryStore::new();
        let err = provider
            .authenticate(
                &Credentials::AuthorizationCode {
                    code: "abc".to_string(),
                    redirect_uri: "https://app/cb".to_string(),
                    state: None,
                },
                &store,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SsoError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn test_empty_password_rejected_before_any_io() {
        let provider = provider();
        let store = MemoryStore::new();
        let err = provider
            .authenticate(
                &Credentials::Password {
                    username: "alice".to_string(),
                    password: String::new(),
                },
                &store,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SsoError::AuthenticationFailed { ref message } if message == "invalid credentials"
        ));
        assert_eq!(store.user_count().await, 0);
    }
}
