//! In-memory identity store.
//!
//! Reference implementation used by tests and by embedders without durable
//! storage. Uniqueness constraints (username, group external id) are enforced
//! under a write lock, so concurrent duplicate creates surface as
//! [`StoreError::Duplicate`] exactly like a database unique index would.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{GroupRef, NewGroup, NewUser, User, UserUpdate};
use crate::store::IdentityStore;

/// In-memory [`IdentityStore`] backed by `RwLock<HashMap>` maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    groups: RwLock<HashMap<Uuid, GroupRef>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users currently stored.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Number of groups currently stored.
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate { field: "username" });
        }

        let record = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            auth_provider: user.auth_provider,
            role: user.role,
            status: user.status,
            email_verified: user.email_verified,
            last_login: user.last_login,
            created_at: Utc::now(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> StoreResult<User> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;

        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(full_name) = update.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(last_login) = update.last_login {
            user.last_login = Some(last_login);
        }

        Ok(user.clone())
    }

    async fn find_group_by_external_id(&self, external_id: &str) -> StoreResult<Option<GroupRef>> {
        let groups = self.groups.read().await;
        Ok(groups.values().find(|g| g.external_id == external_id).cloned())
    }

    async fn create_group(&self, group: NewGroup) -> StoreResult<GroupRef> {
        let mut groups = self.groups.write().await;

        if groups.values().any(|g| g.external_id == group.external_id) {
            return Err(StoreError::Duplicate {
                field: "external_id",
            });
        }

        let record = GroupRef {
            id: Uuid::new_v4(),
            name: group.name,
            external_id: group.external_id,
        };
        groups.insert(record.id, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            full_name: Some("Test User".to_string()),
            auth_provider: "ldap".to_string(),
            role: "user".to_string(),
            status: UserStatus::Active,
            email_verified: true,
            last_login: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryStore::new();
        let created = store.create_user(new_user("alice")).await.unwrap();

        let by_username = store.find_user_by_username("alice").await.unwrap();
        assert_eq!(by_username.unwrap().id, created.id);

        let by_id = store.find_user_by_id(created.id).await.unwrap();
        assert_eq!(by_id.unwrap().username, "alice");

        let by_email = store.find_user_by_email("alice@example.com").await.unwrap();
        assert_eq!(by_email.unwrap().id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).await.unwrap();

        let err = store.create_user(new_user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "username" }));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_partial_update_leaves_other_fields() {
        let store = MemoryStore::new();
        let created = store.create_user(new_user("alice")).await.unwrap();

        let updated = store
            .update_user(
                created.id,
                UserUpdate {
                    email: Some("new@example.com".to_string()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.email, "new@example.com");
        assert_eq!(updated.role, "user");
        assert_eq!(updated.full_name, Some("Test User".to_string()));
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = MemoryStore::new();
        let err = store
            .update_user(Uuid::new_v4(), UserUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_duplicate_group_external_id_rejected() {
        let store = MemoryStore::new();
        store
            .create_group(NewGroup {
                name: "Engineering".to_string(),
                external_id: "ldap:engineering".to_string(),
            })
            .await
            .unwrap();

        let err = store
            .create_group(NewGroup {
                name: "Engineering Again".to_string(),
                external_id: "ldap:engineering".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "external_id" }));
        assert_eq!(store.group_count().await, 1);
    }
}
