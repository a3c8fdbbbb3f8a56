//! SAML 2.0 service-provider side.
//!
//! Cryptographic validation of inbound assertions (signature, audience,
//! timing) is delegated to an [`AssertionValidator`] implementation injected
//! at the composition root; this module owns the rest of the exchange:
//! decoding, attribute extraction by OID, reconciliation, and the SP
//! metadata document.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Duration;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use portico_store::{IdentityStore, User};

use crate::config::{ProviderConfig, ProviderType, SamlSettings};
use crate::credentials::Credentials;
use crate::error::{SsoError, SsoResult};
use crate::identity::{ExternalIdentity, Reconciler};
use crate::providers::{AuthOutcome, IdentityProvider, TokenValidation};

/// Maximum accepted size for a base64-encoded SAMLResponse (HTTP-POST
/// binding). Oversized input is rejected before decoding.
const MAX_ENCODED_SIZE: usize = 512 * 1024;

/// Supported NameID formats.
pub const NAMEID_FORMAT_EMAIL: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const NAMEID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";

/// Default attribute mapping: logical field → assertion attribute name
/// (eduPerson / LDAP-schema OIDs).
const DEFAULT_ATTRIBUTE_MAPPING: &[(&str, &str)] = &[
    ("username", "urn:oid:0.9.2342.19200300.100.1.1"),
    ("email", "urn:oid:0.9.2342.19200300.100.1.3"),
    ("first_name", "urn:oid:2.5.4.42"),
    ("last_name", "urn:oid:2.5.4.4"),
    ("display_name", "urn:oid:2.16.840.1.113730.3.1.241"),
    ("groups", "urn:oid:1.3.6.1.4.1.5923.1.5.1.1"),
];

/// Failure reported by an [`AssertionValidator`].
#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("signature validation failed: {0}")]
    Signature(String),

    #[error("audience mismatch: {0}")]
    Audience(String),

    #[error("assertion expired or not yet valid: {0}")]
    Timing(String),

    #[error("malformed assertion: {0}")]
    Malformed(String),
}

/// What the validator must check the assertion against.
#[derive(Debug)]
pub struct AssertionExpectations<'a> {
    /// Our SP entity id; must appear in the audience restriction.
    pub audience: &'a str,
    /// IdP signing certificate (PEM).
    pub idp_certificate: &'a str,
    /// Allowed clock skew for NotBefore/NotOnOrAfter checks.
    pub clock_skew: Duration,
}

/// Boundary to the XML-DSig implementation.
///
/// Implementations verify the assertion's signature, audience restriction,
/// and validity window. This crate deliberately does not implement signature
/// verification or canonicalization itself.
pub trait AssertionValidator: Send + Sync {
    fn validate(
        &self,
        assertion_xml: &str,
        expected: &AssertionExpectations<'_>,
    ) -> Result<(), AssertionError>;
}

/// Structural content of a (validated) assertion.
#[derive(Debug, Clone, Default)]
pub struct ParsedAssertion {
    pub name_id: Option<String>,
    pub session_index: Option<String>,
    pub audiences: Vec<String>,
    /// Attribute values keyed by Name, and additionally by FriendlyName
    /// where that does not collide.
    pub attributes: HashMap<String, Vec<String>>,
}

impl ParsedAssertion {
    /// First value of an attribute, if present.
    #[must_use]
    pub fn first_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of an attribute; empty when absent.
    #[must_use]
    pub fn attr_values(&self, name: &str) -> Vec<String> {
        self.attributes.get(name).cloned().unwrap_or_default()
    }
}

/// Decode a base64 SAMLResponse (HTTP-POST binding) into XML.
fn decode_response(encoded: &str) -> SsoResult<String> {
    if encoded.len() > MAX_ENCODED_SIZE {
        warn!(
            size = encoded.len(),
            "SAMLResponse exceeds maximum encoded size"
        );
        return Err(SsoError::auth_failed("invalid SAML response"));
    }

    let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
        debug!(error = %e, "SAMLResponse base64 decode failed");
        SsoError::auth_failed("invalid SAML response")
    })?;

    String::from_utf8(decoded).map_err(|e| {
        debug!(error = %e, "SAMLResponse is not valid UTF-8");
        SsoError::auth_failed("invalid SAML response")
    })
}

/// Pull-parse the assertion's NameID, SessionIndex, audiences, and
/// attribute statements.
fn parse_assertion(xml: &str) -> SsoResult<ParsedAssertion> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedAssertion::default();
    let mut in_name_id = false;
    let mut in_audience = false;
    let mut in_attribute_value = false;
    let mut current_attr: Option<(String, Option<String>)> = None;
    let mut current_values: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"NameID" => in_name_id = true,
                    b"Audience" => in_audience = true,
                    b"AttributeValue" => in_attribute_value = true,
                    b"Attribute" => {
                        let mut attr_name = None;
                        let mut friendly = None;
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value().unwrap_or_default().to_string();
                            match attr.key.as_ref() {
                                b"Name" => attr_name = Some(value),
                                b"FriendlyName" => friendly = Some(value),
                                _ => {}
                            }
                        }
                        if let Some(attr_name) = attr_name {
                            current_attr = Some((attr_name, friendly));
                            current_values.clear();
                        }
                    }
                    b"AuthnStatement" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"SessionIndex" {
                                parsed.session_index = Some(
                                    attr.unescape_value().unwrap_or_default().to_string(),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                if in_name_id {
                    parsed.name_id = Some(text);
                } else if in_audience {
                    parsed.audiences.push(text);
                } else if in_attribute_value {
                    current_values.push(text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"NameID" => in_name_id = false,
                b"Audience" => in_audience = false,
                b"AttributeValue" => in_attribute_value = false,
                b"Attribute" => {
                    if let Some((name, friendly)) = current_attr.take() {
                        let values = std::mem::take(&mut current_values);
                        if let Some(friendly) = friendly {
                            parsed
                                .attributes
                                .entry(friendly)
                                .or_insert_with(|| values.clone());
                        }
                        parsed.attributes.insert(name, values);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "assertion XML parse error");
                return Err(SsoError::auth_failed("invalid SAML response"));
            }
        }
    }

    Ok(parsed)
}

/// SAML identity provider (SP role).
pub struct SamlProvider {
    config: ProviderConfig,
    settings: SamlSettings,
    display_name: String,
    validator: Arc<dyn AssertionValidator>,
    attribute_mapping: HashMap<String, String>,
}

impl SamlProvider {
    /// Construct from validated configuration and an injected assertion
    /// validator.
    pub fn new(config: ProviderConfig, validator: Arc<dyn AssertionValidator>) -> SsoResult<Self> {
        config.validate()?;
        let settings = config.saml_settings()?.clone();
        let display_name = config.effective_display_name();

        let mut attribute_mapping: HashMap<String, String> = DEFAULT_ATTRIBUTE_MAPPING
            .iter()
            .map(|(field, attr)| ((*field).to_string(), (*attr).to_string()))
            .collect();
        for (field, attr) in &config.attribute_mapping {
            attribute_mapping.insert(field.clone(), attr.clone());
        }

        Ok(Self {
            config,
            settings,
            display_name,
            validator,
            attribute_mapping,
        })
    }

    fn mapped(&self, field: &str) -> &str {
        self.attribute_mapping
            .get(field)
            .map_or("", String::as_str)
    }

    /// Our SP metadata document for IdP registration. Pure read, no side
    /// effects.
    #[must_use]
    pub fn sp_metadata(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:NameIDFormat>{nameid_format}</md:NameIDFormat>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{acs_url}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>
"#,
            entity_id = xml_escape(&self.settings.sp_entity_id),
            nameid_format = NAMEID_FORMAT_EMAIL,
            acs_url = xml_escape(&self.settings.acs_url),
        )
    }
}

#[async_trait]
impl IdentityProvider for SamlProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Saml
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn priority(&self) -> i32 {
        self.config.priority
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
        store: &dyn IdentityStore,
    ) -> SsoResult<AuthOutcome> {
        let Credentials::SamlResponse {
            saml_response,
            relay_state,
        } = credentials
        else {
            return Err(SsoError::InvalidCredentials {
                expected: "a SAML response",
            });
        };

        let xml = decode_response(saml_response)?;

        let expectations = AssertionExpectations {
            audience: &self.settings.sp_entity_id,
            idp_certificate: &self.settings.idp_certificate,
            clock_skew: Duration::seconds(self.settings.clock_skew_secs),
        };
        self.validator.validate(&xml, &expectations).map_err(|e| {
            warn!(provider = %self.config.name, error = %e, "assertion validation failed");
            SsoError::auth_failed("invalid SAML response")
        })?;

        let assertion = parse_assertion(&xml)?;

        let username = assertion
            .first_attr(self.mapped("username"))
            .unwrap_or_default()
            .to_string();
        if username.is_empty() {
            return Err(SsoError::auth_failed("username not found"));
        }

        let raw_groups = assertion.attr_values(self.mapped("groups"));
        let display_name = assertion
            .first_attr(self.mapped("display_name"))
            .map(ToString::to_string);

        let identity = ExternalIdentity {
            external_id: assertion
                .name_id
                .clone()
                .unwrap_or_else(|| username.clone()),
            username,
            email: assertion
                .first_attr(self.mapped("email"))
                .unwrap_or_default()
                .to_string(),
            first_name: assertion
                .first_attr(self.mapped("first_name"))
                .unwrap_or_default()
                .to_string(),
            last_name: assertion
                .first_attr(self.mapped("last_name"))
                .unwrap_or_default()
                .to_string(),
            display_name,
            raw_groups: raw_groups.clone(),
        };

        let reconciler = Reconciler::for_config(&self.config);
        let mut user = reconciler.get_or_create_user(&identity, store).await?;

        let groups = match reconciler
            .map_groups_and_roles(&user, &raw_groups, store)
            .await
        {
            Ok(mapping) => {
                if let Some(role) = mapping.role {
                    user.role = role;
                }
                mapping.groups
            }
            Err(e) => {
                warn!(
                    provider = %self.config.name,
                    username = %user.username,
                    error = %e,
                    "group mapping failed after successful login"
                );
                Vec::new()
            }
        };

        let mut additional = Map::new();
        if let Some(name_id) = &assertion.name_id {
            additional.insert("name_id".to_string(), Value::String(name_id.clone()));
        }
        if let Some(session_index) = &assertion.session_index {
            additional.insert(
                "session_index".to_string(),
                Value::String(session_index.clone()),
            );
        }
        if let Some(relay_state) = relay_state {
            additional.insert(
                "relay_state".to_string(),
                Value::String(relay_state.clone()),
            );
        }
        additional.insert("raw_groups".to_string(), json!(raw_groups));

        Ok(AuthOutcome {
            user,
            groups,
            additional,
        })
    }

    async fn sync_groups(
        &self,
        user: &User,
        raw_groups: Option<&[String]>,
        store: &dyn IdentityStore,
    ) -> SsoResult<Vec<String>> {
        // Group claims arrive bundled with the assertion; without a raw list
        // from an authenticate call there is nothing to query.
        let Some(raw_groups) = raw_groups else {
            debug!(
                provider = %self.config.name,
                username = %user.username,
                "no assertion groups supplied, nothing to sync"
            );
            return Ok(Vec::new());
        };

        let reconciler = Reconciler::for_config(&self.config);
        let mapping = reconciler
            .map_groups_and_roles(user, raw_groups, store)
            .await
            .map_err(SsoError::into_group_sync)?;
        Ok(mapping.groups)
    }

    /// SAML has no bearer-token concept; deterministically not supported.
    async fn validate_token(&self, _token: &str) -> SsoResult<TokenValidation> {
        Ok(TokenValidation::not_supported())
    }
}

/// Escape a value for embedding in XML attribute/text content.
fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
