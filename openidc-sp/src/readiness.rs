// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness evaluation
//!
//! Decides, from whatever data has arrived so far, whether enough is known to
//! render the location configuration. Two mutually exclusive endpoint modes
//! exist:
//!
//! * **discovery**: `oidc-provider-metadata-url` is set and the provider
//!   metadata document is fetched to check it
//! * **manual**: an issuer (or any endpoint) is configured by hand and every
//!   endpoint key is required individually
//!
//! When neither mode is chosen the metadata URL is reported missing.
//! Structurally invalid combinations fail with
//! [`OpenidcError::Configuration`], which always wins over a missing-key
//! report.

use reqwest::Url;
use std::fmt;

use tracing::debug;

use crate::config::{OidcOptions, Settings};
use crate::error::{OpenidcError, Result};
use crate::metadata::{MetadataSource, ProviderMetadata};
use crate::principal::{PrincipalData, Scheme};
use crate::relation::RelationState;
use crate::secret;

/// A key that may have to be set before rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequiredKey {
    OidcCryptoPassphrase,
    OidcClientId,
    Hostname,
    Port,
    Scheme,
    OidcProviderMetadataUrl,
    OidcProviderAuthEndpoint,
    OidcProviderTokenEndpoint,
    OidcProviderTokenEndpointAuth,
    OidcProviderUserInfoEndpoint,
    OidcProviderJwksUri,
}

impl RequiredKey {
    /// Keys required in every mode, in reporting order
    pub const BASE: [RequiredKey; 5] = [
        RequiredKey::OidcCryptoPassphrase,
        RequiredKey::OidcClientId,
        RequiredKey::Hostname,
        RequiredKey::Port,
        RequiredKey::Scheme,
    ];

    /// Keys required in manual mode, in reporting order
    pub const MANUAL: [RequiredKey; 5] = [
        RequiredKey::OidcProviderAuthEndpoint,
        RequiredKey::OidcProviderTokenEndpoint,
        RequiredKey::OidcProviderTokenEndpointAuth,
        RequiredKey::OidcProviderUserInfoEndpoint,
        RequiredKey::OidcProviderJwksUri,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredKey::OidcCryptoPassphrase => "oidc_crypto_passphrase",
            RequiredKey::OidcClientId => "oidc_client_id",
            RequiredKey::Hostname => "hostname",
            RequiredKey::Port => "port",
            RequiredKey::Scheme => "scheme",
            RequiredKey::OidcProviderMetadataUrl => "oidc_provider_metadata_url",
            RequiredKey::OidcProviderAuthEndpoint => "oidc_provider_auth_endpoint",
            RequiredKey::OidcProviderTokenEndpoint => "oidc_provider_token_endpoint",
            RequiredKey::OidcProviderTokenEndpointAuth => "oidc_provider_token_endpoint_auth",
            RequiredKey::OidcProviderUserInfoEndpoint => "oidc_provider_user_info_endpoint",
            RequiredKey::OidcProviderJwksUri => "oidc_provider_jwks_uri",
        }
    }
}

impl fmt::Display for RequiredKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// How the provider endpoints are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    Discovery,
    Manual,
    Undecided,
}

/// Inputs of one evaluation, gathered fresh from settings and relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSnapshot {
    pub options: OidcOptions,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    pub crypto_passphrase: Option<String>,
    pub auth_path: String,
    /// Provider metadata, filled in once discovery has fetched it
    pub metadata: Option<ProviderMetadata>,
}

impl ConfigurationSnapshot {
    /// Gather the current inputs
    pub fn collect(settings: &Settings, relations: &RelationState) -> Self {
        let principal = PrincipalData::new(relations);
        Self {
            options: settings.options.clone(),
            hostname: principal.hostname(),
            port: principal.port(),
            scheme: principal.scheme(),
            crypto_passphrase: secret::read_secret(relations),
            auth_path: settings.oidc_auth_path(),
            metadata: None,
        }
    }

    /// Introspection endpoint in effect: the option, else the one the provider advertises
    pub fn introspection_endpoint(&self) -> Option<&str> {
        resolve_introspection_endpoint(&self.options, self.metadata.as_ref())
    }

    /// Resolved value for `key`; `None` when absent or empty
    pub fn resolve(&self, key: RequiredKey) -> Option<String> {
        let options = &self.options;
        let value = match key {
            RequiredKey::OidcCryptoPassphrase => self.crypto_passphrase.clone(),
            RequiredKey::OidcClientId => Some(options.oidc_client_id.clone()),
            RequiredKey::Hostname => self.hostname.clone(),
            RequiredKey::Port => self.port.map(|port| port.to_string()),
            RequiredKey::Scheme => self.scheme.map(|scheme| scheme.to_string()),
            RequiredKey::OidcProviderMetadataUrl => {
                Some(options.oidc_provider_metadata_url.clone())
            }
            RequiredKey::OidcProviderAuthEndpoint => {
                Some(options.oidc_provider_auth_endpoint.clone())
            }
            RequiredKey::OidcProviderTokenEndpoint => {
                Some(options.oidc_provider_token_endpoint.clone())
            }
            RequiredKey::OidcProviderTokenEndpointAuth => {
                Some(options.oidc_provider_token_endpoint_auth.clone())
            }
            RequiredKey::OidcProviderUserInfoEndpoint => {
                Some(options.oidc_provider_user_info_endpoint.clone())
            }
            RequiredKey::OidcProviderJwksUri => Some(options.oidc_provider_jwks_uri.clone()),
        };
        value.filter(|value| !value.is_empty())
    }

    /// Endpoint mode selected by the options
    pub fn endpoint_mode(&self) -> EndpointMode {
        if !self.options.oidc_provider_metadata_url.is_empty() {
            return EndpointMode::Discovery;
        }

        let manual = !self.options.oidc_provider_issuer.is_empty()
            || RequiredKey::MANUAL
                .iter()
                .any(|key| self.resolve(*key).is_some());

        if manual {
            EndpointMode::Manual
        } else {
            EndpointMode::Undecided
        }
    }

    /// Keys required for the current mode, in reporting order
    pub fn required_keys(&self) -> Vec<RequiredKey> {
        let mut keys = RequiredKey::BASE.to_vec();
        match self.endpoint_mode() {
            EndpointMode::Discovery => {}
            EndpointMode::Manual => keys.extend(RequiredKey::MANUAL),
            EndpointMode::Undecided => keys.push(RequiredKey::OidcProviderMetadataUrl),
        }
        keys
    }
}

/// Outcome of a successful evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// Required keys without a value, in reporting order
    pub missing: Vec<RequiredKey>,
    /// Provider metadata, when discovery mode fetched it
    pub metadata: Option<ProviderMetadata>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Evaluate `snapshot`, fetching provider metadata in discovery mode
pub async fn evaluate(
    snapshot: &ConfigurationSnapshot,
    source: &dyn MetadataSource,
) -> Result<Readiness> {
    validate_options(snapshot)?;

    let metadata = match snapshot.endpoint_mode() {
        EndpointMode::Discovery => {
            let metadata = source
                .fetch(&snapshot.options.oidc_provider_metadata_url)
                .await?;
            validate_metadata(&snapshot.options, &metadata)?;
            Some(metadata)
        }
        EndpointMode::Manual | EndpointMode::Undecided => None,
    };

    let missing: Vec<RequiredKey> = snapshot
        .required_keys()
        .into_iter()
        .filter(|key| snapshot.resolve(*key).is_none())
        .collect();

    if !missing.is_empty() {
        debug!(
            "Incomplete data: {}",
            missing
                .iter()
                .map(RequiredKey::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    Ok(Readiness { missing, metadata })
}

/// Required keys currently without a value
pub async fn find_missing_keys(
    snapshot: &ConfigurationSnapshot,
    source: &dyn MetadataSource,
) -> Result<Vec<RequiredKey>> {
    Ok(evaluate(snapshot, source).await?.missing)
}

fn validate_options(snapshot: &ConfigurationSnapshot) -> Result<()> {
    let options = &snapshot.options;

    if !options.oidc_oauth_verify_jwks_uri.is_empty() {
        require_https("oidc-oauth-verify-jwks-uri", &options.oidc_oauth_verify_jwks_uri)?;

        if let Some(scheme) = snapshot.scheme.filter(|scheme| !scheme.is_secure()) {
            return Err(OpenidcError::configuration(format!(
                "oidc-oauth-verify-jwks-uri requires the principal to serve https, not {}",
                scheme
            )));
        }
    }

    if !options.oidc_oauth_introspection_endpoint.is_empty() {
        require_https(
            "oidc-oauth-introspection-endpoint",
            &options.oidc_oauth_introspection_endpoint,
        )?;
    }

    Ok(())
}

fn resolve_introspection_endpoint<'a>(
    options: &'a OidcOptions,
    metadata: Option<&'a ProviderMetadata>,
) -> Option<&'a str> {
    if !options.oidc_oauth_introspection_endpoint.is_empty() {
        return Some(&options.oidc_oauth_introspection_endpoint);
    }
    metadata
        .and_then(|metadata| metadata.introspection_endpoint.as_deref())
        .filter(|endpoint| !endpoint.is_empty())
}

fn validate_metadata(options: &OidcOptions, metadata: &ProviderMetadata) -> Result<()> {
    // an explicit option was already checked and replaces the advertised endpoint
    if options.oidc_oauth_introspection_endpoint.is_empty() {
        if let Some(endpoint) = resolve_introspection_endpoint(options, Some(metadata)) {
            require_https("introspection_endpoint", endpoint)?;
        }
    }
    Ok(())
}

fn require_https(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| {
        OpenidcError::configuration(format!("{} is not a valid URL ({}): {}", name, e, value))
    })?;

    if url.scheme() != "https" {
        return Err(OpenidcError::configuration(format!(
            "{} must use https: {}",
            name, value
        )));
    }
    Ok(())
}
