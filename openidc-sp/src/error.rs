// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for openidc-sp

use thiserror::Error;

/// Result type alias for openidc-sp operations
pub type Result<T> = std::result::Result<T, OpenidcError>;

/// Errors that can occur while reconciling the OpenID Connect configuration
#[derive(Error, Debug)]
pub enum OpenidcError {
    /// Settings file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid settings file contents
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Structurally invalid option combination or unusable provider metadata.
    ///
    /// Distinct from missing data: the operator has to change something.
    #[error("Invalid operator configuration: {message}")]
    Configuration { message: String },

    /// The peer relation has not been formed yet
    #[error("Peer relation not found")]
    PeerRelationAbsent,

    /// A relation needed for a write is not present
    #[error("Relation not found: {name}")]
    RelationNotFound { name: String },

    /// Unknown event name
    #[error("Invalid event: {name}")]
    InvalidEvent { name: String },

    /// Template rendering failed
    #[error("Failed to render template '{name}': {message}")]
    Template { name: String, message: String },

    /// a2enmod/a2dismod failed
    #[error("Module command '{command}' failed: {message}")]
    ModuleCommand { command: String, message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OpenidcError {
    /// Shorthand for a [`OpenidcError::Configuration`] error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error reports misconfiguration rather than a failed side effect
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
