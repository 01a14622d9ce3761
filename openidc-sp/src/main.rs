// SPDX-License-Identifier: AGPL-3.0-or-later
//! openidc-sp: OpenID Connect service provider glue for identity federation
//!
//! Command-line front end. Each `event` invocation is one run-to-completion
//! reconciliation pass; a pass deferred on missing data exits with
//! `EX_TEMPFAIL` so the dispatcher delivers the event again later, while
//! misconfiguration exits with `EX_CONFIG` and waits for the operator.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use openidc_sp::{
    apache::{A2Module, ModuleManager},
    config::LoggingConfig,
    metadata::HttpMetadataFetcher,
    readiness::{self, ConfigurationSnapshot},
    reconciler::{NonceRestartTrigger, NotReady},
    render::FileRenderer,
    Decision, Event, Reconciler, RelationState, Settings,
};

/// sysexits.h EX_TEMPFAIL: not ready yet, deliver the event again later
const EX_TEMPFAIL: u8 = 75;

/// sysexits.h EX_CONFIG: options are inconsistent, retrying will not help
const EX_CONFIG: u8 = 78;

/// openidc-sp: OpenID Connect service provider glue
///
/// Renders the Apache mod_auth_openidc configuration for identity federation
/// once all relation and configuration data is available.
#[derive(Parser, Debug)]
#[command(name = "openidc-sp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = "openidc-sp.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Dry run mode (module helpers are logged, not executed)
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Handle one event (one reconciliation pass)
    Event {
        /// Event name, e.g. config-changed
        event: String,

        /// This unit is the leader
        #[arg(long)]
        leader: bool,
    },

    /// Show the health indicator
    Status,

    /// List required keys that have no value
    MissingKeys,

    /// Enable the Apache OpenID Connect module
    Install,

    /// Disable the Apache OpenID Connect module
    Remove,

    /// Inspect or update relation data on behalf of the hosting environment
    #[command(subcommand)]
    Relation(RelationCommand),

    /// Show settings
    Config,

    /// Initialize a new settings file
    Init {
        /// Force overwrite existing settings
        #[arg(short, long)]
        force: bool,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum RelationCommand {
    /// Form the peer relation
    JoinPeer,

    /// Remove the peer relation
    LeavePeer,

    /// Add a principal unit
    JoinPrincipal {
        /// Unit name, e.g. keystone/0
        unit: String,
    },

    /// Record data published by a principal unit
    SetPrincipal {
        /// Unit name, e.g. keystone/0
        unit: String,

        /// key=value pairs; values are JSON-encoded scalars
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Form the web SSO relation
    JoinWebsso,

    /// Print the relation state
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = load_settings(&cli.config);
    let logging = settings
        .as_ref()
        .map(|settings| settings.logging.clone())
        .unwrap_or_default();
    init_tracing(&cli, &logging);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Error: failed to create runtime: {}", error);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, settings)) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) {
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(cli.debug)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Load settings, falling back to defaults when the file does not exist
fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    Settings::from_file(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

async fn run(cli: Cli, settings: anyhow::Result<Settings>) -> anyhow::Result<ExitCode> {
    // commands that work without (or replace) a readable settings file
    match cli.command {
        Commands::Version => {
            println!("openidc-sp v{}", env!("CARGO_PKG_VERSION"));
            println!("OpenID Connect service provider glue for Apache mod_auth_openidc");
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Init { force } => return init_settings(&cli.config, force),
        _ => {}
    }

    let settings = settings?;
    match cli.command {
        Commands::Version | Commands::Init { .. } => unreachable!("handled above"),

        Commands::Config => show_config(&cli.config, &settings),

        Commands::Event { event, leader } => handle_event(&settings, &event, leader).await,

        Commands::Status => show_status(&settings).await,

        Commands::MissingKeys => show_missing_keys(&settings).await,

        Commands::Install => {
            let output = A2Module::new(cli.dry_run)
                .enable(&settings.apache.module)
                .await?;
            print_output(output);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Remove => {
            let output = A2Module::new(cli.dry_run)
                .disable(&settings.apache.module)
                .await?;
            print_output(output);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Relation(command) => update_relations(&settings, command),
    }
}

fn print_output(output: Option<String>) {
    if let Some(output) = output.filter(|output| !output.trim().is_empty()) {
        println!("{}", output.trim_end());
    }
}

/// Initialize a new settings file
fn init_settings(config_path: &Path, force: bool) -> anyhow::Result<ExitCode> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let default_settings = r#"# SPDX-License-Identifier: AGPL-3.0-or-later
# openidc-sp settings

name = "keystone-openidc"
config_dir = "/etc/apache2/openidc"
state_file = "/var/lib/openidc-sp/state.json"

[apache]
module = "auth_openidc"
# owner_uid = 0
# group_gid = 33

[logging]
level = "info"
format = "text"

[options]
oidc-provider-metadata-url = ""
oidc-provider-issuer = ""
oidc-client-id = ""
oidc-client-secret = ""
# manual endpoints, used when no metadata URL is set
oidc-provider-auth-endpoint = ""
oidc-provider-token-endpoint = ""
oidc-provider-token-endpoint-auth = ""
oidc-provider-user-info-endpoint = ""
oidc-provider-jwks-uri = ""
oidc-oauth-verify-jwks-uri = ""
oidc-oauth-introspection-endpoint = ""
oidc-remote-user-claim = "sub"
oidc-scopes = "openid email profile"
remote-id-attribute = "HTTP_OIDC_ISS"
enable-oauth = false
debug = false
"#;

    std::fs::write(config_path, default_settings)?;
    info!("Created configuration file: {}", config_path.display());
    println!("Created configuration file: {}", config_path.display());
    Ok(ExitCode::SUCCESS)
}

/// Show the current settings
fn show_config(config_path: &Path, settings: &Settings) -> anyhow::Result<ExitCode> {
    if !config_path.exists() {
        println!("No configuration file found. Using defaults:");
        println!();
    }
    println!("{}", toml::to_string_pretty(settings)?);
    Ok(ExitCode::SUCCESS)
}

fn load_relations(settings: &Settings) -> anyhow::Result<RelationState> {
    RelationState::load(&settings.state_file).with_context(|| {
        format!(
            "Failed to load relation state from {}",
            settings.state_file.display()
        )
    })
}

/// Run one reconciliation pass for `name`
async fn handle_event(settings: &Settings, name: &str, leader: bool) -> anyhow::Result<ExitCode> {
    let event: Event = name.parse()?;
    let mut relations = load_relations(settings)?;
    let before = relations.clone();

    let metadata = HttpMetadataFetcher::new();
    let renderer = FileRenderer::from_settings(settings);
    let restart = NonceRestartTrigger;
    let reconciler = Reconciler::new(settings, &metadata, &renderer, &restart).leader(leader);

    let decision = reconciler.on_event(event, &mut relations).await?;

    if relations != before {
        relations.save(&settings.state_file).with_context(|| {
            format!("Failed to save relation state to {}", settings.state_file.display())
        })?;
    }

    match decision {
        Decision::Deferred(NotReady::Misconfigured(message)) => {
            println!("misconfigured: {}", message);
            Ok(ExitCode::from(EX_CONFIG))
        }
        Decision::Deferred(reason) => {
            println!("deferred: {}", reason);
            Ok(ExitCode::from(EX_TEMPFAIL))
        }
        Decision::Rendered { restart_requested } => {
            println!("rendered: {}", renderer.path().display());
            if restart_requested {
                println!("restart requested");
            }
            Ok(ExitCode::SUCCESS)
        }
        Decision::Skipped => {
            println!("skipped: {}", event);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn show_status(settings: &Settings) -> anyhow::Result<ExitCode> {
    let relations = load_relations(settings)?;
    let metadata = HttpMetadataFetcher::new();
    let renderer = FileRenderer::from_settings(settings);
    let restart = NonceRestartTrigger;

    let status = Reconciler::new(settings, &metadata, &renderer, &restart)
        .status(&relations)
        .await?;
    println!("{}", status);
    Ok(ExitCode::SUCCESS)
}

async fn show_missing_keys(settings: &Settings) -> anyhow::Result<ExitCode> {
    let relations = load_relations(settings)?;
    let snapshot = ConfigurationSnapshot::collect(settings, &relations);

    let missing = readiness::find_missing_keys(&snapshot, &HttpMetadataFetcher::new()).await?;
    if missing.is_empty() {
        println!("No missing keys");
    }
    for key in missing {
        println!("{}", key);
    }
    Ok(ExitCode::SUCCESS)
}

fn update_relations(settings: &Settings, command: RelationCommand) -> anyhow::Result<ExitCode> {
    let mut relations = load_relations(settings)?;

    match command {
        RelationCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&relations)?);
            return Ok(ExitCode::SUCCESS);
        }
        RelationCommand::JoinPeer => relations.join_peer(),
        RelationCommand::LeavePeer => relations.leave_peer(),
        RelationCommand::JoinPrincipal { unit } => relations.join_principal(&unit),
        RelationCommand::SetPrincipal { unit, pairs } => {
            for pair in &pairs {
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("Expected key=value, got '{}'", pair))?;
                relations.set_principal(&unit, key, value);
            }
        }
        RelationCommand::JoinWebsso => relations.join_websso(),
    }

    relations
        .save(&settings.state_file)
        .with_context(|| format!("Failed to save relation state to {}", settings.state_file.display()))?;
    Ok(ExitCode::SUCCESS)
}
