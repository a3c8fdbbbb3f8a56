//! SSO error types.
//!
//! Authentication failures carry a generic, client-safe message; protocol
//! detail (bind result codes, IdP error bodies) is logged by the provider
//! before converting, never embedded in the error itself.

use thiserror::Error;
use uuid::Uuid;

use portico_store::StoreError;

/// Errors surfaced by the authentication core.
#[derive(Debug, Error)]
pub enum SsoError {
    /// Provider configuration failed validation at load time.
    #[error("provider configuration error: {message}")]
    Configuration { message: String },

    /// No provider with this name is configured.
    #[error("provider '{name}' is not configured")]
    ProviderNotConfigured { name: String },

    /// The provider exists but is disabled.
    #[error("provider '{name}' is disabled")]
    ProviderDisabled { name: String },

    /// The credential shape does not match the provider's protocol.
    #[error("invalid credentials for this provider: expected {expected}")]
    InvalidCredentials { expected: &'static str },

    /// Wrong credentials, invalid assertion/token, missing required
    /// attribute, exchange failure, or timeout.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A lookup-style call referenced an unknown local user.
    #[error("user {id} not found")]
    UserNotFound { id: Uuid },

    /// Group synchronization failed on a direct provider call.
    #[error("group synchronization failed: {message}")]
    GroupSyncFailed { message: String },

    /// The identity store failed.
    #[error("identity store error: {0}")]
    Store(#[from] StoreError),
}

impl SsoError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SsoError::Configuration {
            message: message.into(),
        }
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        SsoError::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub fn group_sync(message: impl Into<String>) -> Self {
        SsoError::GroupSyncFailed {
            message: message.into(),
        }
    }

    /// Re-tag an error raised inside a group synchronization path.
    #[must_use]
    pub fn into_group_sync(self) -> Self {
        match self {
            SsoError::GroupSyncFailed { .. } => self,
            SsoError::AuthenticationFailed { message } => SsoError::GroupSyncFailed { message },
            other => SsoError::GroupSyncFailed {
                message: other.to_string(),
            },
        }
    }

    /// Stable code for transport layers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SsoError::Configuration { .. }
            | SsoError::ProviderNotConfigured { .. }
            | SsoError::ProviderDisabled { .. } => "configuration_error",
            SsoError::InvalidCredentials { .. } => "invalid_credentials",
            SsoError::AuthenticationFailed { .. } => "authentication_failed",
            SsoError::UserNotFound { .. } => "user_not_found",
            SsoError::GroupSyncFailed { .. } => "group_sync_failed",
            SsoError::Store(_) => "store_error",
        }
    }

    /// True for the configuration family (missing, disabled, invalid).
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SsoError::Configuration { .. }
                | SsoError::ProviderNotConfigured { .. }
                | SsoError::ProviderDisabled { .. }
        )
    }
}

/// Result type alias for SSO operations.
pub type SsoResult<T> = Result<T, SsoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SsoError::ProviderNotConfigured {
                name: "ldap".to_string()
            }
            .error_code(),
            "configuration_error"
        );
        assert_eq!(
            SsoError::auth_failed("invalid credentials").error_code(),
            "authentication_failed"
        );
        assert_eq!(
            SsoError::group_sync("search failed").error_code(),
            "group_sync_failed"
        );
    }

    #[test]
    fn test_configuration_family() {
        assert!(SsoError::ProviderDisabled {
            name: "saml".to_string()
        }
        .is_configuration());
        assert!(!SsoError::auth_failed("nope").is_configuration());
    }

    #[test]
    fn test_into_group_sync_preserves_message() {
        let err = SsoError::auth_failed("directory unavailable").into_group_sync();
        assert!(matches!(
            err,
            SsoError::GroupSyncFailed { ref message } if message == "directory unavailable"
        ));
    }
}
