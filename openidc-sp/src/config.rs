// SPDX-License-Identifier: AGPL-3.0-or-later
//! Settings management for openidc-sp
//!
//! A single TOML file carries both the local deployment settings (where to
//! render, where relation state lives, how to log) and the declared operator
//! options under `[options]`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OpenidcError, Result};

/// Identity provider id; fixed for this integration
pub const IDP_ID: &str = "openid";

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application name, used to build the federation auth path
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory the location configuration is rendered into
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// JSON file holding relation data and private unit state
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Apache integration settings
    #[serde(default)]
    pub apache: ApacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Declared operator options
    #[serde(default)]
    pub options: OidcOptions,
}

/// Apache web server integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApacheConfig {
    /// Apache module providing OpenID Connect support
    #[serde(default = "default_module")]
    pub module: String,

    /// Owner applied to the rendered file (left untouched when unset)
    #[serde(default)]
    pub owner_uid: Option<u32>,

    /// Group applied to the rendered file (left untouched when unset)
    #[serde(default)]
    pub group_gid: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Declared operator options, named as an operator sets them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OidcOptions {
    pub oidc_provider_metadata_url: String,
    pub oidc_provider_issuer: String,
    pub oidc_client_id: String,
    pub oidc_client_secret: String,
    pub oidc_provider_auth_endpoint: String,
    pub oidc_provider_token_endpoint: String,
    pub oidc_provider_token_endpoint_auth: String,
    pub oidc_provider_user_info_endpoint: String,
    pub oidc_provider_jwks_uri: String,
    /// JWKS endpoint used to verify OAuth bearer tokens
    pub oidc_oauth_verify_jwks_uri: String,
    /// Overrides the introspection endpoint advertised in provider metadata
    pub oidc_oauth_introspection_endpoint: String,
    pub oidc_remote_user_claim: String,
    pub oidc_scopes: String,
    /// Attribute Keystone uses to map the remote identity provider
    pub remote_id_attribute: String,
    /// Accept OAuth 2.0 bearer tokens in addition to the browser flow
    pub enable_oauth: bool,
    pub debug: bool,
}

impl Default for OidcOptions {
    fn default() -> Self {
        Self {
            oidc_provider_metadata_url: String::new(),
            oidc_provider_issuer: String::new(),
            oidc_client_id: String::new(),
            oidc_client_secret: String::new(),
            oidc_provider_auth_endpoint: String::new(),
            oidc_provider_token_endpoint: String::new(),
            oidc_provider_token_endpoint_auth: String::new(),
            oidc_provider_user_info_endpoint: String::new(),
            oidc_provider_jwks_uri: String::new(),
            oidc_oauth_verify_jwks_uri: String::new(),
            oidc_oauth_introspection_endpoint: String::new(),
            oidc_remote_user_claim: "sub".to_string(),
            oidc_scopes: "openid email profile".to_string(),
            remote_id_attribute: "HTTP_OIDC_ISS".to_string(),
            enable_oauth: false,
            debug: false,
        }
    }
}

impl Default for ApacheConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            owner_uid: None,
            group_gid: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: default_name(),
            config_dir: default_config_dir(),
            state_file: default_state_file(),
            apache: ApacheConfig::default(),
            logging: LoggingConfig::default(),
            options: OidcOptions::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    ///
    /// The parsed and validated settings or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(OpenidcError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(OpenidcError::InvalidConfig {
                message: "Application name cannot be empty".to_string(),
            });
        }

        if self.config_dir.as_os_str().is_empty() {
            return Err(OpenidcError::InvalidConfig {
                message: "config_dir cannot be empty".to_string(),
            });
        }

        if self.apache.module.is_empty() {
            return Err(OpenidcError::InvalidConfig {
                message: "apache.module cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Path of the rendered location configuration
    pub fn location_config_path(&self) -> PathBuf {
        self.config_dir.join(format!("openidc-location.{}.conf", IDP_ID))
    }

    /// Federation auth path protected by mod_auth_openidc
    pub fn oidc_auth_path(&self) -> String {
        format!(
            "/v3/OS-FEDERATION/identity_providers/{}/protocols/{}/auth",
            self.name, IDP_ID
        )
    }
}

// Default value functions

fn default_name() -> String {
    "keystone-openidc".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/apache2/openidc")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/openidc-sp/state.json")
}

fn default_module() -> String {
    "auth_openidc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
