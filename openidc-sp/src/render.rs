// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rendering of the Apache location configuration
//!
//! [`render_location_config`] is a pure function of the snapshot; the
//! [`FileRenderer`] materialises its output on disk.

use handlebars::Handlebars;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{Settings, IDP_ID};
use crate::error::{OpenidcError, Result};
use crate::readiness::ConfigurationSnapshot;

const TEMPLATE_NAME: &str = "apache-openidc-location.conf";
const TEMPLATE: &str = include_str!("../templates/apache-openidc-location.conf.hbs");

const DIR_MODE: u32 = 0o750;
const FILE_MODE: u32 = 0o440;

/// Values exposed to the template
#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    idp_id: &'a str,
    auth_path: &'a str,
    redirect_uri: String,
    crypto_passphrase: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    metadata_url: &'a str,
    issuer: &'a str,
    auth_endpoint: &'a str,
    token_endpoint: &'a str,
    token_endpoint_auth: &'a str,
    user_info_endpoint: &'a str,
    jwks_uri: &'a str,
    remote_user_claim: &'a str,
    scopes: &'a str,
    enable_oauth: bool,
    verify_jwks_uri: &'a str,
    introspection_endpoint: &'a str,
    debug: bool,
}

impl<'a> TemplateContext<'a> {
    fn new(snapshot: &'a ConfigurationSnapshot) -> Self {
        let options = &snapshot.options;
        let redirect_uri = format!(
            "{}://{}:{}{}",
            snapshot.scheme.map(|scheme| scheme.as_str()).unwrap_or_default(),
            snapshot.hostname.as_deref().unwrap_or_default(),
            snapshot.port.map(|port| port.to_string()).unwrap_or_default(),
            snapshot.auth_path
        );

        Self {
            idp_id: IDP_ID,
            auth_path: &snapshot.auth_path,
            redirect_uri,
            crypto_passphrase: snapshot.crypto_passphrase.as_deref().unwrap_or_default(),
            client_id: &options.oidc_client_id,
            client_secret: &options.oidc_client_secret,
            metadata_url: &options.oidc_provider_metadata_url,
            issuer: &options.oidc_provider_issuer,
            auth_endpoint: &options.oidc_provider_auth_endpoint,
            token_endpoint: &options.oidc_provider_token_endpoint,
            token_endpoint_auth: &options.oidc_provider_token_endpoint_auth,
            user_info_endpoint: &options.oidc_provider_user_info_endpoint,
            jwks_uri: &options.oidc_provider_jwks_uri,
            remote_user_claim: &options.oidc_remote_user_claim,
            scopes: &options.oidc_scopes,
            enable_oauth: options.enable_oauth,
            verify_jwks_uri: &options.oidc_oauth_verify_jwks_uri,
            introspection_endpoint: snapshot.introspection_endpoint().unwrap_or_default(),
            debug: options.debug,
        }
    }
}

/// Render the location configuration for `snapshot`
pub fn render_location_config(snapshot: &ConfigurationSnapshot) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .render_template(TEMPLATE, &TemplateContext::new(snapshot))
        .map_err(|e| OpenidcError::Template {
            name: TEMPLATE_NAME.to_string(),
            message: e.to_string(),
        })
}

/// SHA-256 of `contents`, hex encoded
pub fn content_digest(contents: &[u8]) -> String {
    format!("{:x}", Sha256::digest(contents))
}

/// Result of materialising the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub path: PathBuf,
    pub digest: String,
    /// Whether the file content differs from what was on disk before
    pub changed: bool,
}

/// Templating collaborator of the reconciler
pub trait ConfigRenderer {
    fn render(&self, snapshot: &ConfigurationSnapshot) -> Result<RenderOutcome>;
}

/// Writes the rendered configuration to a fixed path
#[derive(Debug, Clone)]
pub struct FileRenderer {
    path: PathBuf,
    owner_uid: Option<u32>,
    group_gid: Option<u32>,
}

impl FileRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner_uid: None,
            group_gid: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            path: settings.location_config_path(),
            owner_uid: settings.apache.owner_uid,
            group_gid: settings.apache.group_gid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_ownership(&self, path: &Path) -> Result<()> {
        if self.owner_uid.is_some() || self.group_gid.is_some() {
            std::os::unix::fs::chown(path, self.owner_uid, self.group_gid)?;
        }
        Ok(())
    }

    fn prepare_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
            fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))?;
            self.apply_ownership(dir)?;
        }
        Ok(())
    }
}

impl ConfigRenderer for FileRenderer {
    fn render(&self, snapshot: &ConfigurationSnapshot) -> Result<RenderOutcome> {
        let contents = render_location_config(snapshot)?;
        let digest = content_digest(contents.as_bytes());

        let previous = fs::read(&self.path).ok().map(|old| content_digest(&old));
        let changed = previous.as_deref() != Some(digest.as_str());

        self.prepare_dir()?;

        // write a sibling then rename so readers never see a partial file
        let tmp = self.path.with_extension("conf.tmp");
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        fs::write(&tmp, &contents)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE))?;
        self.apply_ownership(&tmp)?;
        fs::rename(&tmp, &self.path)?;

        if changed {
            info!(path = %self.path.display(), digest = %digest, "Rendered configuration");
        } else {
            debug!(path = %self.path.display(), "Configuration unchanged");
        }

        Ok(RenderOutcome {
            path: self.path.clone(),
            digest,
            changed,
        })
    }
}
