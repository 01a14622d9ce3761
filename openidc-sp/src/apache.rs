// SPDX-License-Identifier: AGPL-3.0-or-later
//! Apache module management
//!
//! Enables and disables the OpenID Connect module through the Debian
//! `a2enmod`/`a2dismod` helpers. Failures are fatal to the caller; nothing
//! here retries.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use crate::error::{OpenidcError, Result};

/// Web server module collaborator
#[async_trait]
pub trait ModuleManager: Send + Sync {
    /// Enable `module`
    async fn enable(&self, module: &str) -> Result<Option<String>>;

    /// Disable `module`
    async fn disable(&self, module: &str) -> Result<Option<String>>;
}

/// [`ModuleManager`] shelling out to `a2enmod` / `a2dismod`
#[derive(Debug, Clone)]
pub struct A2Module {
    /// Whether to run in dry-run mode (no actual execution)
    dry_run: bool,
    enable_command: String,
    disable_command: String,
}

impl A2Module {
    /// Create a manager using the standard Debian helpers
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            enable_command: "a2enmod".to_string(),
            disable_command: "a2dismod".to_string(),
        }
    }

    /// Override the helper commands (e.g. for a non-Debian layout)
    pub fn with_commands(mut self, enable: impl Into<String>, disable: impl Into<String>) -> Self {
        self.enable_command = enable.into();
        self.disable_command = disable.into();
        self
    }

    async fn run(&self, command: &str, module: &str) -> Result<Option<String>> {
        info!(command = %command, module = %module, "Running apache2 module helper");

        if self.dry_run {
            return Ok(Some(format!("[DRY RUN] Would execute: {} {}", command, module)));
        }

        let output = Command::new(command)
            .arg(module)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| OpenidcError::ModuleCommand {
                command: command.to_string(),
                message: format!("Failed to execute command: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(Some(stdout))
        } else {
            Err(OpenidcError::ModuleCommand {
                command: command.to_string(),
                message: format!("Command failed with status {}: {}", output.status, stderr),
            })
        }
    }
}

#[async_trait]
impl ModuleManager for A2Module {
    async fn enable(&self, module: &str) -> Result<Option<String>> {
        info!("Enabling apache2 module: {}", module);
        self.run(&self.enable_command, module).await
    }

    async fn disable(&self, module: &str) -> Result<Option<String>> {
        info!("Disabling apache2 module: {}", module);
        self.run(&self.disable_command, module).await
    }
}
