//! The identity store trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{GroupRef, NewGroup, NewUser, User, UserUpdate};

/// Persistence interface consumed by the authentication core.
///
/// All operations are synchronous request/response with no streaming. Each
/// call must be atomic on its own; callers do not expect cross-call
/// transactions (a user create may succeed even if a later group create
/// fails).
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up a user by username.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Look up a user by id.
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Look up a user by email address.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Create a user. Returns [`crate::StoreError::Duplicate`] if the
    /// username is already taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Apply a partial update to a user and return the updated record.
    async fn update_user(&self, id: Uuid, update: UserUpdate) -> StoreResult<User>;

    /// Look up a group by its external id.
    async fn find_group_by_external_id(&self, external_id: &str) -> StoreResult<Option<GroupRef>>;

    /// Create a group. Returns [`crate::StoreError::Duplicate`] if the
    /// external id is already taken.
    async fn create_group(&self, group: NewGroup) -> StoreResult<GroupRef>;
}
