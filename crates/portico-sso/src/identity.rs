//! Identity reconciliation.
//!
//! Shared by every provider: turn a normalized external identity into a
//! local user record (get-or-create) and map the external group list onto
//! local roles and groups.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, warn};

use portico_store::{
    IdentityStore, NewGroup, NewUser, StoreError, User, UserStatus, UserUpdate,
};

use crate::config::{ProviderConfig, ProviderType};
use crate::error::SsoResult;

/// Normalized result of a successful protocol exchange. Ephemeral; never
/// persisted as-is.
#[derive(Debug, Clone, Default)]
pub struct ExternalIdentity {
    /// Stable identifier at the external source (DN, SAML NameID, OIDC sub).
    pub external_id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Pre-composed display name, preferred over first/last when present.
    pub display_name: Option<String>,
    /// Group names as returned by the provider, in provider order.
    pub raw_groups: Vec<String>,
}

impl ExternalIdentity {
    /// Full name for the local record: the display name when the source
    /// provides one, otherwise first and last joined.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        if let Some(name) = &self.display_name {
            if !name.is_empty() {
                return Some(name.clone());
            }
        }
        let joined = format!("{} {}", self.first_name, self.last_name);
        let joined = joined.trim();
        if joined.is_empty() {
            None
        } else {
            Some(joined.to_string())
        }
    }
}

/// Result of applying role and group mappings.
#[derive(Debug, Clone, Default)]
pub struct GroupMapping {
    /// Local group names, in the order the provider returned the externals.
    pub groups: Vec<String>,
    /// New role, when a role mapping changed it.
    pub role: Option<String>,
}

/// Per-provider reconciliation logic, borrowed from the provider's config.
pub struct Reconciler<'a> {
    provider_name: &'a str,
    provider_type: ProviderType,
    default_role: &'a str,
    role_mapping: &'a HashMap<String, String>,
    group_mapping: &'a HashMap<String, String>,
    auto_create_groups: bool,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn for_config(config: &'a ProviderConfig) -> Self {
        Self {
            provider_name: &config.name,
            provider_type: config.provider_type,
            default_role: &config.default_role,
            role_mapping: &config.role_mapping,
            group_mapping: &config.group_mapping,
            auto_create_groups: config.auto_create_groups,
        }
    }

    /// Get or create the local user for an external identity.
    ///
    /// First login creates the record with the provider's default role and an
    /// active, pre-verified status (federated identities are trusted for
    /// email). Subsequent logins refresh email, full name, and last login but
    /// never touch role or status. Race-safe: losing a concurrent create is
    /// absorbed by re-fetching the winner's record.
    pub async fn get_or_create_user(
        &self,
        identity: &ExternalIdentity,
        store: &dyn IdentityStore,
    ) -> SsoResult<User> {
        if let Some(existing) = store.find_user_by_username(&identity.username).await? {
            return self.refresh_user(existing, identity, store).await;
        }

        let new_user = NewUser {
            username: identity.username.clone(),
            email: identity.email.clone(),
            full_name: identity.full_name(),
            auth_provider: self.provider_name.to_string(),
            role: self.default_role.to_string(),
            status: UserStatus::Active,
            email_verified: true,
            last_login: Some(Utc::now()),
        };

        match store.create_user(new_user).await {
            Ok(user) => {
                info!(
                    provider = %self.provider_name,
                    username = %user.username,
                    user_id = %user.id,
                    "provisioned local user from external identity"
                );
                Ok(user)
            }
            Err(StoreError::Duplicate { .. }) => {
                // Lost a concurrent create; the winner's record is authoritative.
                debug!(
                    provider = %self.provider_name,
                    username = %identity.username,
                    "create raced an existing user, re-fetching"
                );
                let existing = store
                    .find_user_by_username(&identity.username)
                    .await?
                    .ok_or(StoreError::NotFound)?;
                self.refresh_user(existing, identity, store).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Update mutable profile fields on login; role and status stay as-is.
    async fn refresh_user(
        &self,
        existing: User,
        identity: &ExternalIdentity,
        store: &dyn IdentityStore,
    ) -> SsoResult<User> {
        let mut update = UserUpdate {
            last_login: Some(Utc::now()),
            ..UserUpdate::default()
        };
        if !identity.email.is_empty() && existing.email != identity.email {
            update.email = Some(identity.email.clone());
        }
        let full_name = identity.full_name();
        if full_name.is_some() && existing.full_name != full_name {
            update.full_name = full_name;
        }

        let user = store.update_user(existing.id, update).await?;
        Ok(user)
    }

    /// Apply role and group mappings for a raw external group list.
    ///
    /// Groups are processed in provider order, which makes the outcome
    /// deterministic for a fixed input list. Role writes happen only when
    /// the mapped role differs from the current one.
    pub async fn map_groups_and_roles(
        &self,
        user: &User,
        raw_groups: &[String],
        store: &dyn IdentityStore,
    ) -> SsoResult<GroupMapping> {
        let mut mapping = GroupMapping::default();
        let mut current_role = user.role.clone();

        for external in raw_groups {
            if let Some(role) = self.role_mapping.get(external) {
                if *role != current_role {
                    store
                        .update_user(
                            user.id,
                            UserUpdate {
                                role: Some(role.clone()),
                                ..UserUpdate::default()
                            },
                        )
                        .await?;
                    info!(
                        provider = %self.provider_name,
                        username = %user.username,
                        group = %external,
                        role = %role,
                        "role updated from external group mapping"
                    );
                    current_role = role.clone();
                    mapping.role = Some(role.clone());
                }
            }

            if let Some(local) = self.resolve_group(external, store).await? {
                mapping.groups.push(local);
            }
        }

        Ok(mapping)
    }

    /// Look up (and, when auto-provisioning is on, lazily create) the local
    /// group for an external group name. Re-lookup before create keeps
    /// concurrent logins from producing duplicate groups.
    async fn resolve_group(
        &self,
        external: &str,
        store: &dyn IdentityStore,
    ) -> SsoResult<Option<String>> {
        let external_id = format!("{}:{}", self.provider_type, external);

        if let Some(group) = store.find_group_by_external_id(&external_id).await? {
            return Ok(Some(group.name));
        }

        if !self.auto_create_groups {
            debug!(
                provider = %self.provider_name,
                group = %external,
                "no local group for external group and auto-create is off"
            );
            return Ok(None);
        }

        let name = self
            .group_mapping
            .get(external)
            .cloned()
            .unwrap_or_else(|| external.to_string());

        match store
            .create_group(NewGroup {
                name,
                external_id: external_id.clone(),
            })
            .await
        {
            Ok(group) => {
                info!(
                    provider = %self.provider_name,
                    group = %group.name,
                    external_id = %group.external_id,
                    "auto-provisioned local group"
                );
                Ok(Some(group.name))
            }
            Err(StoreError::Duplicate { .. }) => {
                // Another login created it first.
                let group = store.find_group_by_external_id(&external_id).await?;
                if group.is_none() {
                    warn!(
                        provider = %self.provider_name,
                        external_id = %external_id,
                        "group create raced but re-lookup found nothing"
                    );
                }
                Ok(group.map(|g| g.name))
            }
            Err(e) => Err(e.into()),
        }
    }
}
