//! Provider registry.
//!
//! The single entry point for the transport layer: owns the constructed,
//! enabled providers, dispatches calls by name, and aggregates provider
//! metadata for discovery endpoints. Built once at the composition root and
//! immutable afterwards, so it is shared across concurrent requests without
//! locking. There is no global instance.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use portico_store::{IdentityStore, User};

use crate::config::{ProviderConfig, ProviderType, SsoConfig};
use crate::credentials::Credentials;
use crate::error::{SsoError, SsoResult};
use crate::providers::ldap::LdapProvider;
use crate::providers::oauth::OAuthProvider;
use crate::providers::saml::{AssertionValidator, SamlProvider};
use crate::providers::{AuthOutcome, IdentityProvider, TokenValidation};

/// One row of the discovery listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub priority: i32,
}

/// Builder for [`ProviderRegistry`].
pub struct RegistryBuilder {
    store: Arc<dyn IdentityStore>,
    saml_validator: Option<Arc<dyn AssertionValidator>>,
    configs: Vec<ProviderConfig>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            saml_validator: None,
            configs: Vec::new(),
        }
    }

    /// Register one provider configuration. Registration order is the
    /// tie-breaker for equal priorities in the discovery listing.
    #[must_use]
    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Register every provider from a loaded configuration surface.
    #[must_use]
    pub fn with_config(mut self, config: SsoConfig) -> Self {
        self.configs.extend(config.providers);
        self
    }

    /// Inject the assertion validator required by SAML providers.
    #[must_use]
    pub fn with_saml_validator(mut self, validator: Arc<dyn AssertionValidator>) -> Self {
        self.saml_validator = Some(validator);
        self
    }

    /// Validate configurations and construct the enabled providers. Disabled
    /// entries are kept (unconstructed) so they can be distinguished from
    /// unknown names.
    pub fn build(self) -> SsoResult<ProviderRegistry> {
        let mut providers: HashMap<String, Arc<dyn IdentityProvider>> = HashMap::new();
        let mut configs: HashMap<String, ProviderConfig> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for config in self.configs {
            if configs.contains_key(&config.name) {
                return Err(SsoError::configuration(format!(
                    "duplicate provider name: {}",
                    config.name
                )));
            }

            if config.enabled {
                let provider: Arc<dyn IdentityProvider> = match config.provider_type {
                    ProviderType::Ldap => Arc::new(LdapProvider::new(config.clone())?),
                    ProviderType::Saml => {
                        let validator = self.saml_validator.clone().ok_or_else(|| {
                            SsoError::configuration(format!(
                                "provider '{}' requires a SAML assertion validator",
                                config.name
                            ))
                        })?;
                        Arc::new(SamlProvider::new(config.clone(), validator)?)
                    }
                    ProviderType::OAuth | ProviderType::Oidc => {
                        Arc::new(OAuthProvider::new(config.clone())?)
                    }
                };
                info!(
                    provider = %config.name,
                    provider_type = %config.provider_type,
                    priority = config.priority,
                    "registered identity provider"
                );
                providers.insert(config.name.clone(), provider);
            }

            order.push(config.name.clone());
            configs.insert(config.name.clone(), config);
        }

        Ok(ProviderRegistry {
            providers,
            configs,
            order,
            store: self.store,
        })
    }
}

/// Immutable registry of constructed providers.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
    configs: HashMap<String, ProviderConfig>,
    order: Vec<String>,
    store: Arc<dyn IdentityStore>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.order)
            .field("configs", &self.configs)
            .finish()
    }
}

impl ProviderRegistry {
    /// Resolve a provider by name, distinguishing unknown from disabled.
    fn provider(&self, name: &str) -> SsoResult<&Arc<dyn IdentityProvider>> {
        match self.providers.get(name) {
            Some(provider) => Ok(provider),
            None if self.configs.contains_key(name) => Err(SsoError::ProviderDisabled {
                name: name.to_string(),
            }),
            None => Err(SsoError::ProviderNotConfigured {
                name: name.to_string(),
            }),
        }
    }

    /// Authenticate against a named provider. A failed exchange never
    /// creates or mutates a local record.
    pub async fn authenticate(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> SsoResult<AuthOutcome> {
        let provider = self.provider(name)?;
        let outcome = provider
            .authenticate(credentials, self.store.as_ref())
            .await?;
        info!(
            provider = %name,
            username = %outcome.user.username,
            user_id = %outcome.user.id,
            "authentication succeeded"
        );
        Ok(outcome)
    }

    /// Profile projection for a local user via a named provider.
    pub async fn get_user_info(&self, name: &str, user_id: Uuid) -> SsoResult<Map<String, Value>> {
        let provider = self.provider(name)?;
        provider.get_user_info(user_id, self.store.as_ref()).await
    }

    /// Synchronize a user's groups, degrading to an empty list on provider
    /// failure.
    ///
    /// Group sync is best-effort and must never block a login that already
    /// succeeded, so this wrapper applies the degrade-to-empty policy: any
    /// provider-side error is logged and converted to `[]`. Direct
    /// [`IdentityProvider::sync_groups`] calls propagate instead; the
    /// asymmetry is deliberate and pinned by tests.
    pub async fn sync_user_groups(&self, name: &str, user: &User) -> SsoResult<Vec<String>> {
        let provider = self.provider(name)?;
        match provider.sync_groups(user, None, self.store.as_ref()).await {
            Ok(groups) => Ok(groups),
            Err(e) => {
                warn!(
                    provider = %name,
                    username = %user.username,
                    error = %e,
                    "group sync failed, degrading to empty list"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Validate a provider-issued token.
    pub async fn validate_token(&self, name: &str, token: &str) -> SsoResult<TokenValidation> {
        let provider = self.provider(name)?;
        provider.validate_token(token).await
    }

    /// Discovery listing: all configured providers (enabled or not), sorted
    /// by priority descending with ties in registration order. The ordering
    /// is part of the contract; discovery endpoints surface it verbatim.
    #[must_use]
    pub fn list_providers(&self) -> Vec<ProviderSummary> {
        let mut summaries: Vec<ProviderSummary> = self
            .order
            .iter()
            .filter_map(|name| self.configs.get(name))
            .map(|config| ProviderSummary {
                name: config.name.clone(),
                display_name: config.effective_display_name(),
                provider_type: config.provider_type,
                enabled: config.enabled,
                priority: config.priority,
            })
            .collect();
        // Stable sort keeps registration order within equal priorities.
        summaries.sort_by_key(|s| std::cmp::Reverse(s.priority));
        summaries
    }

    /// Redacted configuration summary for a named provider. Secrets are
    /// replaced by the fixed sentinel; this never consults a live secret
    /// store.
    pub fn provider_config(&self, name: &str) -> SsoResult<Value> {
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| SsoError::ProviderNotConfigured {
                name: name.to_string(),
            })?;

        Ok(json!({
            "name": config.name,
            "type": config.provider_type,
            "enabled": config.enabled,
            "priority": config.priority,
            "display_name": config.effective_display_name(),
            "default_role": config.default_role,
            "auto_create_groups": config.auto_create_groups,
            "role_mapping": config.role_mapping,
            "group_mapping": config.group_mapping,
            "connection": config.redacted_settings(),
        }))
    }
}
