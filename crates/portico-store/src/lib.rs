//! Identity store interface for portico.
//!
//! This crate defines the local account records (users, groups) that the
//! authentication core reconciles external identities against, together with
//! the [`IdentityStore`] trait that persistence backends implement. A
//! reference [`MemoryStore`] implementation is included for tests and for
//! embedders that do not need durable storage.

pub mod error;
pub mod memory;
pub mod models;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{GroupRef, NewGroup, NewUser, User, UserStatus, UserUpdate};
pub use store::IdentityStore;
