//! Local account models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a local user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Suspended => write!(f, "suspended"),
            UserStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A local user account.
///
/// Created on first successful login from an external provider and updated
/// (email, name, last login) on every subsequent login. One record exists per
/// username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    /// Name of the provider that first authenticated this user.
    pub auth_provider: String,
    pub role: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub auth_provider: String,
    pub role: String,
    pub status: UserStatus,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

/// Partial update for a user. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserUpdate {
    /// True when the update would not change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.full_name.is_none()
            && self.role.is_none()
            && self.last_login.is_none()
    }
}

/// A local group provisioned from an external identity source.
///
/// `external_id` has the shape `"<provider_type>:<external_group_name>"` and
/// is unique across the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: Uuid,
    pub name: String,
    pub external_id: String,
}

/// Input for creating a group.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub external_id: String,
}
