//! Provider configuration.
//!
//! Configuration is loaded once at process start (or on explicit reload) from
//! a nested map keyed by provider name, validated eagerly, and immutable
//! afterwards. Providers never re-validate at call time.

use std::collections::HashMap;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SsoError, SsoResult};
use crate::providers::oauth::OAuthVendor;

/// Fixed sentinel substituted for secret values in redacted projections.
///
/// The exact literal is part of the external contract; existing consumers
/// match on it.
pub const SECRET_SENTINEL: &str = "***HIDDEN***";

/// Settings keys whose values are replaced by [`SECRET_SENTINEL`].
const SECRET_KEYS: &[&str] = &[
    "client_secret",
    "bind_password",
    "key_file",
    "cert_file",
    "idp_certificate",
];

/// Kind of identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Ldap,
    Saml,
    OAuth,
    Oidc,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Ldap => write!(f, "ldap"),
            ProviderType::Saml => write!(f, "saml"),
            ProviderType::OAuth => write!(f, "oauth"),
            ProviderType::Oidc => write!(f, "oidc"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = SsoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ldap" => Ok(ProviderType::Ldap),
            "saml" => Ok(ProviderType::Saml),
            "oauth" => Ok(ProviderType::OAuth),
            "oidc" => Ok(ProviderType::Oidc),
            other => Err(SsoError::configuration(format!(
                "unknown provider type: {other}"
            ))),
        }
    }
}

/// Connection settings for an LDAP/Active Directory provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Directory URL, e.g. `ldap://ds.example.com:389` or `ldaps://...:636`.
    #[serde(default)]
    pub server_url: String,

    /// Upgrade plain connections with STARTTLS. `ldaps://` URLs are already
    /// encrypted and must leave this off. Required, no default.
    pub use_tls: bool,

    /// Connect and per-operation timeout in seconds. Required, no default.
    pub timeout_secs: u64,

    /// Service account DN used for user/group searches.
    #[serde(default)]
    pub bind_dn: String,

    /// Service account password. May be empty for anonymous binds.
    #[serde(default)]
    pub bind_password: String,

    /// Search base for user entries, e.g. `ou=people,dc=example,dc=com`.
    #[serde(default)]
    pub user_search_base: String,

    /// Filter template for resolving a user; `{username}` is substituted
    /// with the (escaped) login name.
    #[serde(default = "default_user_search_filter")]
    pub user_search_filter: String,

    /// Search base for group entries. Empty disables group sync.
    #[serde(default)]
    pub group_search_base: String,

    /// Filter template for enumerating a user's groups; `{user_dn}` is
    /// substituted with the (escaped) resolved user DN.
    #[serde(default = "default_group_search_filter")]
    pub group_search_filter: String,

    #[serde(default = "default_email_attribute")]
    pub email_attribute: String,

    #[serde(default = "default_display_name_attribute")]
    pub display_name_attribute: String,

    #[serde(default = "default_first_name_attribute")]
    pub first_name_attribute: String,

    #[serde(default = "default_last_name_attribute")]
    pub last_name_attribute: String,

    #[serde(default = "default_group_name_attribute")]
    pub group_name_attribute: String,
}

impl std::fmt::Debug for LdapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSettings")
            .field("server_url", &self.server_url)
            .field("use_tls", &self.use_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"***")
            .field("user_search_base", &self.user_search_base)
            .field("user_search_filter", &self.user_search_filter)
            .field("group_search_base", &self.group_search_base)
            .field("group_search_filter", &self.group_search_filter)
            .finish_non_exhaustive()
    }
}

fn default_user_search_filter() -> String {
    "(uid={username})".to_string()
}

fn default_group_search_filter() -> String {
    "(member={user_dn})".to_string()
}

fn default_email_attribute() -> String {
    "mail".to_string()
}

fn default_display_name_attribute() -> String {
    "displayName".to_string()
}

fn default_first_name_attribute() -> String {
    "givenName".to_string()
}

fn default_last_name_attribute() -> String {
    "sn".to_string()
}

fn default_group_name_attribute() -> String {
    "cn".to_string()
}

impl LdapSettings {
    fn validate(&self) -> SsoResult<()> {
        if self.server_url.is_empty() {
            return Err(SsoError::configuration("ldap: server_url is required"));
        }
        if !self.server_url.starts_with("ldap://") && !self.server_url.starts_with("ldaps://") {
            return Err(SsoError::configuration(
                "ldap: server_url must start with ldap:// or ldaps://",
            ));
        }
        if self.use_tls && self.server_url.starts_with("ldaps://") {
            return Err(SsoError::configuration(
                "ldap: use_tls (STARTTLS) cannot be combined with an ldaps:// URL",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(SsoError::configuration("ldap: timeout_secs must be > 0"));
        }
        if self.bind_dn.is_empty() {
            return Err(SsoError::configuration("ldap: bind_dn is required"));
        }
        if self.user_search_base.is_empty() {
            return Err(SsoError::configuration("ldap: user_search_base is required"));
        }
        if !self.user_search_filter.contains("{username}") {
            return Err(SsoError::configuration(
                "ldap: user_search_filter must contain the {username} placeholder",
            ));
        }
        if !self.group_search_base.is_empty() && !self.group_search_filter.contains("{user_dn}") {
            return Err(SsoError::configuration(
                "ldap: group_search_filter must contain the {user_dn} placeholder",
            ));
        }
        Ok(())
    }
}

/// Connection settings for a SAML 2.0 service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlSettings {
    /// Our own entity id, asserted as the audience by the IdP.
    #[serde(default)]
    pub sp_entity_id: String,

    /// Assertion consumer service URL (HTTP-POST binding).
    #[serde(default)]
    pub acs_url: String,

    /// Entity id of the identity provider.
    #[serde(default)]
    pub idp_entity_id: String,

    /// IdP single-sign-on endpoint, used by the transport layer to initiate
    /// logins and published in metadata.
    #[serde(default)]
    pub idp_sso_url: String,

    /// IdP signing certificate (PEM), handed to the assertion validator.
    #[serde(default)]
    pub idp_certificate: String,

    /// Optional SP signing key path (for signed AuthnRequests).
    #[serde(default)]
    pub key_file: String,

    /// Optional SP certificate path.
    #[serde(default)]
    pub cert_file: String,

    /// Allowed clock skew when the validator checks assertion timing.
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,
}

fn default_clock_skew_secs() -> i64 {
    300
}

impl SamlSettings {
    fn validate(&self) -> SsoResult<()> {
        if self.sp_entity_id.is_empty() {
            return Err(SsoError::configuration("saml: sp_entity_id is required"));
        }
        if self.acs_url.is_empty() {
            return Err(SsoError::configuration("saml: acs_url is required"));
        }
        if self.idp_sso_url.is_empty() {
            return Err(SsoError::configuration("saml: idp_sso_url is required"));
        }
        if self.idp_certificate.is_empty() {
            return Err(SsoError::configuration("saml: idp_certificate is required"));
        }
        Ok(())
    }
}

/// Connection settings for an OAuth2/OIDC provider.
///
/// Endpoint URLs may be omitted when a [`OAuthVendor`] preset supplies them;
/// explicit URLs override the preset.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    /// Vendor preset (google, microsoft, github). `None` means a generic
    /// OIDC provider with explicit endpoints.
    #[serde(default)]
    pub vendor: Option<OAuthVendor>,

    #[serde(default)]
    pub authorization_url: String,

    #[serde(default)]
    pub token_url: String,

    #[serde(default)]
    pub userinfo_url: String,

    /// Space-separated scope string; falls back to the vendor default.
    #[serde(default)]
    pub scope: String,

    /// Azure AD tenant for the Microsoft preset; defaults to `common`.
    #[serde(default)]
    pub azure_tenant: Option<String>,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("vendor", &self.vendor)
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl OAuthSettings {
    fn validate(&self) -> SsoResult<()> {
        if self.client_id.is_empty() {
            return Err(SsoError::configuration("oauth: client_id is required"));
        }
        if self.client_secret.is_empty() {
            return Err(SsoError::configuration("oauth: client_secret is required"));
        }
        if self.timeout_secs == 0 {
            return Err(SsoError::configuration("oauth: timeout_secs must be > 0"));
        }
        if self.vendor.is_none()
            && (self.token_url.is_empty() || self.userinfo_url.is_empty())
        {
            return Err(SsoError::configuration(
                "oauth: token_url and userinfo_url are required without a vendor preset",
            ));
        }
        Ok(())
    }
}

/// Typed per-protocol connection settings.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    Ldap(LdapSettings),
    Saml(SamlSettings),
    OAuth(OAuthSettings),
}

impl ProviderSettings {
    fn validate(&self) -> SsoResult<()> {
        match self {
            ProviderSettings::Ldap(s) => s.validate(),
            ProviderSettings::Saml(s) => s.validate(),
            ProviderSettings::OAuth(s) => s.validate(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let value = match self {
            ProviderSettings::Ldap(s) => serde_json::to_value(s),
            ProviderSettings::Saml(s) => serde_json::to_value(s),
            ProviderSettings::OAuth(s) => serde_json::to_value(s),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Static configuration for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub priority: i32,
    pub display_name: Option<String>,
    pub settings: ProviderSettings,
    /// Logical field name → external attribute/claim name overrides.
    pub attribute_mapping: HashMap<String, String>,
    /// External group name → local role.
    pub role_mapping: HashMap<String, String>,
    /// External group name → local group name override.
    pub group_mapping: HashMap<String, String>,
    pub default_role: String,
    pub auto_create_groups: bool,
}

/// Wire shape for one provider entry; `connection` is parsed per type.
#[derive(Deserialize)]
struct RawProviderConfig {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    provider_type: ProviderType,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    display_name: Option<String>,
    connection: serde_json::Value,
    #[serde(default)]
    attribute_mapping: HashMap<String, String>,
    #[serde(default)]
    role_mapping: HashMap<String, String>,
    #[serde(default)]
    group_mapping: HashMap<String, String>,
    #[serde(default = "default_role")]
    default_role: String,
    #[serde(default)]
    auto_create_groups: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_role() -> String {
    "user".to_string()
}

impl<'de> Deserialize<'de> for ProviderConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawProviderConfig::deserialize(deserializer)?;

        let settings = match raw.provider_type {
            ProviderType::Ldap => ProviderSettings::Ldap(
                serde_json::from_value(raw.connection).map_err(DeError::custom)?,
            ),
            ProviderType::Saml => ProviderSettings::Saml(
                serde_json::from_value(raw.connection).map_err(DeError::custom)?,
            ),
            ProviderType::OAuth | ProviderType::Oidc => ProviderSettings::OAuth(
                serde_json::from_value(raw.connection).map_err(DeError::custom)?,
            ),
        };

        Ok(ProviderConfig {
            name: raw.name,
            provider_type: raw.provider_type,
            enabled: raw.enabled,
            priority: raw.priority,
            display_name: raw.display_name,
            settings,
            attribute_mapping: raw.attribute_mapping,
            role_mapping: raw.role_mapping,
            group_mapping: raw.group_mapping,
            default_role: raw.default_role,
            auto_create_groups: raw.auto_create_groups,
        })
    }
}

impl ProviderConfig {
    /// Validate required fields for this provider's type.
    pub fn validate(&self) -> SsoResult<()> {
        if self.name.is_empty() {
            return Err(SsoError::configuration("provider name is required"));
        }
        self.settings.validate()
    }

    /// Effective display name shown in discovery listings.
    #[must_use]
    pub fn effective_display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| self.name.clone())
    }

    /// Connection settings with secret values replaced by
    /// [`SECRET_SENTINEL`]. Pure transformation over the loaded config; never
    /// consults a secret store.
    #[must_use]
    pub fn redacted_settings(&self) -> serde_json::Value {
        let mut value = self.settings.to_json();
        if let serde_json::Value::Object(ref mut map) = value {
            for key in SECRET_KEYS {
                if let Some(entry) = map.get_mut(*key) {
                    if entry.as_str().is_some_and(|s| !s.is_empty()) {
                        *entry = serde_json::Value::String(SECRET_SENTINEL.to_string());
                    }
                }
            }
        }
        value
    }

    pub(crate) fn ldap_settings(&self) -> SsoResult<&LdapSettings> {
        match &self.settings {
            ProviderSettings::Ldap(s) => Ok(s),
            _ => Err(SsoError::configuration(format!(
                "provider '{}' does not carry LDAP settings",
                self.name
            ))),
        }
    }

    pub(crate) fn saml_settings(&self) -> SsoResult<&SamlSettings> {
        match &self.settings {
            ProviderSettings::Saml(s) => Ok(s),
            _ => Err(SsoError::configuration(format!(
                "provider '{}' does not carry SAML settings",
                self.name
            ))),
        }
    }

    pub(crate) fn oauth_settings(&self) -> SsoResult<&OAuthSettings> {
        match &self.settings {
            ProviderSettings::OAuth(s) => Ok(s),
            _ => Err(SsoError::configuration(format!(
                "provider '{}' does not carry OAuth settings",
                self.name
            ))),
        }
    }
}

/// The full provider configuration surface: a nested map keyed by provider
/// name. Insertion order is preserved and becomes the registration order
/// (the tie-breaker for equal priorities).
#[derive(Debug, Clone, Default)]
pub struct SsoConfig {
    pub providers: Vec<ProviderConfig>,
}

impl SsoConfig {
    /// Load from a JSON-shaped nested map. Enabled entries are validated
    /// here, once; nothing is re-validated at call time.
    pub fn from_value(value: serde_json::Value) -> SsoResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(SsoError::configuration(
                "provider configuration must be a map keyed by provider name",
            ));
        };

        let mut providers = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let mut config: ProviderConfig = serde_json::from_value(entry).map_err(|e| {
                SsoError::configuration(format!("provider '{name}': {e}"))
            })?;
            config.name = name;
            if config.enabled {
                config.validate()?;
            }
            providers.push(config);
        }

        Ok(SsoConfig { providers })
    }
}
