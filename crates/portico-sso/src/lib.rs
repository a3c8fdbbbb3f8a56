//! Federated authentication core for portico.
//!
//! Authenticates users against external identity sources — LDAP/Active
//! Directory, SAML 2.0 IdPs, and OAuth2/OIDC providers (with Google,
//! Microsoft, and GitHub presets) — and reconciles each external identity
//! with a local account record, including role and group provisioning.
//!
//! The transport layer talks to one [`ProviderRegistry`], built once at the
//! composition root:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use portico_sso::{RegistryBuilder, SsoConfig};
//!
//! let config = SsoConfig::from_value(raw_config)?;
//! let registry = RegistryBuilder::new(store)
//!     .with_config(config)
//!     .with_saml_validator(validator)
//!     .build()?;
//!
//! let outcome = registry.authenticate("corp-ldap", &credentials).await?;
//! ```
//!
//! Persistent storage is consumed through the `portico-store`
//! [`IdentityStore`](portico_store::IdentityStore) trait; SAML signature
//! verification sits behind the
//! [`AssertionValidator`](providers::saml::AssertionValidator) boundary.

pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod manager;
pub mod providers;

pub use config::{
    LdapSettings, OAuthSettings, ProviderConfig, ProviderSettings, ProviderType, SamlSettings,
    SsoConfig, SECRET_SENTINEL,
};
pub use credentials::Credentials;
pub use error::{SsoError, SsoResult};
pub use identity::{ExternalIdentity, GroupMapping, Reconciler};
pub use manager::{ProviderRegistry, ProviderSummary, RegistryBuilder};
pub use providers::ldap::LdapProvider;
pub use providers::oauth::{OAuthProvider, OAuthVendor, VendorPreset};
pub use providers::saml::{
    AssertionError, AssertionExpectations, AssertionValidator, ParsedAssertion, SamlProvider,
};
pub use providers::{AuthOutcome, IdentityProvider, TokenValidation};
