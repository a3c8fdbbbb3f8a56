//! Provider-specific credential shapes.

use serde::Deserialize;

/// Credentials presented to a provider. Exactly one shape is valid per
/// provider type; a mismatch is an input error
/// ([`crate::SsoError::InvalidCredentials`]), not an authentication failure.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// Username/password login (LDAP, local-style).
    Password { username: String, password: String },

    /// Inbound SAML response (HTTP-POST binding, base64-encoded XML).
    SamlResponse {
        saml_response: String,
        #[serde(default)]
        relay_state: Option<String>,
    },

    /// OAuth2 authorization-code grant callback.
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        #[serde(default)]
        state: Option<String>,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::SamlResponse { relay_state, .. } => f
                .debug_struct("SamlResponse")
                .field("relay_state", relay_state)
                .finish_non_exhaustive(),
            Credentials::AuthorizationCode {
                redirect_uri,
                state,
                ..
            } => f
                .debug_struct("AuthorizationCode")
                .field("redirect_uri", redirect_uri)
                .field("state", state)
                .finish_non_exhaustive(),
        }
    }
}
