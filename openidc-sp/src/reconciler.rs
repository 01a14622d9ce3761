// SPDX-License-Identifier: AGPL-3.0-or-later
//! Level-triggered reconciliation
//!
//! Every relevant event re-evaluates readiness from scratch. When the data is
//! incomplete or inconsistent the event is deferred and nothing is touched;
//! otherwise the configuration is rendered, a restart is requested if the
//! content differs from what the last restart was requested for, and the
//! identity provider attributes are republished to the principal.
//!
//! ```text
//! Unconfigured --peer relation--> AwaitingData --ready--> Ready
//!                                      ^                    |
//!                                      +---input change-----+
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Settings, IDP_ID};
use crate::error::{OpenidcError, Result};
use crate::metadata::MetadataSource;
use crate::readiness::{self, ConfigurationSnapshot, RequiredKey};
use crate::relation::{RelationBag, RelationState};
use crate::render::ConfigRenderer;
use crate::secret::{self, SecretOutcome};

/// Outbound key naming the federation protocol
pub const PROTOCOL_NAME_KEY: &str = "protocol-name";

/// Outbound key naming the remote id attribute
pub const REMOTE_ID_ATTRIBUTE_KEY: &str = "remote-id-attribute";

/// Outbound key the principal watches to restart the web server
pub const RESTART_NONCE_KEY: &str = "restart-nonce";

/// Events delivered by the hosting environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    ConfigChanged,
    PeerRelationCreated,
    PeerRelationChanged,
    PrincipalRelationJoined,
    PrincipalRelationChanged,
    WebssoRelationJoined,
    WebssoRelationChanged,
}

impl Event {
    /// Every event, in hook order
    pub const ALL: [Event; 8] = [
        Event::Start,
        Event::ConfigChanged,
        Event::PeerRelationCreated,
        Event::PeerRelationChanged,
        Event::PrincipalRelationJoined,
        Event::PrincipalRelationChanged,
        Event::WebssoRelationJoined,
        Event::WebssoRelationChanged,
    ];

    /// Hook name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::ConfigChanged => "config-changed",
            Event::PeerRelationCreated => "cluster-relation-created",
            Event::PeerRelationChanged => "cluster-relation-changed",
            Event::PrincipalRelationJoined => "keystone-fid-service-provider-relation-joined",
            Event::PrincipalRelationChanged => "keystone-fid-service-provider-relation-changed",
            Event::WebssoRelationJoined => "websso-fid-service-provider-relation-joined",
            Event::WebssoRelationChanged => "websso-fid-service-provider-relation-changed",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

impl FromStr for Event {
    type Err = OpenidcError;

    fn from_str(name: &str) -> Result<Self> {
        Event::ALL
            .into_iter()
            .find(|event| event.name() == name)
            .ok_or_else(|| OpenidcError::InvalidEvent {
                name: name.to_string(),
            })
    }
}

/// Why a pass could not render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    /// The peer group has not formed
    PeerRelationAbsent,
    /// Required keys without a value
    MissingData(Vec<RequiredKey>),
    /// Invalid option combination or unusable provider metadata
    Misconfigured(String),
}

impl fmt::Display for NotReady {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReady::PeerRelationAbsent => {
                write!(formatter, "incomplete data: peer relation not formed")
            }
            NotReady::MissingData(keys) => {
                let names: Vec<&str> = keys.iter().map(RequiredKey::as_str).collect();
                write!(formatter, "incomplete data: {}", names.join(", "))
            }
            NotReady::Misconfigured(message) => formatter.write_str(message),
        }
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not ready; the dispatcher should deliver the event again later
    Deferred(NotReady),
    /// Configuration rendered
    Rendered { restart_requested: bool },
    /// Event needs no reconciliation
    Skipped,
}

/// Externally observable reconciliation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unconfigured,
    AwaitingData,
    Ready,
}

/// Two-valued health indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Active,
    Blocked(String),
}

impl Status {
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => formatter.write_str("active"),
            Status::Blocked(message) => write!(formatter, "blocked: {}", message),
        }
    }
}

/// Outcome of evaluating the current inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Ready(ConfigurationSnapshot),
    NotReady(NotReady),
}

impl Evaluation {
    pub fn phase(&self) -> Phase {
        match self {
            Evaluation::Ready(_) => Phase::Ready,
            Evaluation::NotReady(NotReady::PeerRelationAbsent) => Phase::Unconfigured,
            Evaluation::NotReady(_) => Phase::AwaitingData,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Evaluation::Ready(_) => Status::Active,
            Evaluation::NotReady(reason) => Status::Blocked(reason.to_string()),
        }
    }
}

/// Process-management collaborator asked to restart the web server
pub trait RestartTrigger {
    fn request_restart(&self, outbound: &mut RelationBag) -> Result<()>;
}

/// Requests a restart by publishing a fresh nonce to the principal
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceRestartTrigger;

impl RestartTrigger for NonceRestartTrigger {
    fn request_restart(&self, outbound: &mut RelationBag) -> Result<()> {
        info!("Requesting a restart to the principal");
        let nonce = Uuid::new_v4().to_string();
        outbound.set(RESTART_NONCE_KEY, serde_json::to_string(&nonce)?);
        Ok(())
    }
}

/// Drives rendering from events
pub struct Reconciler<'a> {
    settings: &'a Settings,
    metadata: &'a dyn MetadataSource,
    renderer: &'a dyn ConfigRenderer,
    restart: &'a dyn RestartTrigger,
    is_leader: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        settings: &'a Settings,
        metadata: &'a dyn MetadataSource,
        renderer: &'a dyn ConfigRenderer,
        restart: &'a dyn RestartTrigger,
    ) -> Self {
        Self {
            settings,
            metadata,
            renderer,
            restart,
            is_leader: false,
        }
    }

    /// Set whether this unit currently holds leadership
    pub fn leader(mut self, is_leader: bool) -> Self {
        self.is_leader = is_leader;
        self
    }

    /// Evaluate readiness of the current inputs.
    ///
    /// Misconfiguration is folded into [`NotReady::Misconfigured`]; only
    /// unexpected failures are returned as errors.
    pub async fn evaluate(&self, relations: &RelationState) -> Result<Evaluation> {
        if !relations.has_peer() {
            return Ok(Evaluation::NotReady(NotReady::PeerRelationAbsent));
        }

        let mut snapshot = ConfigurationSnapshot::collect(self.settings, relations);
        let result = readiness::evaluate(&snapshot, self.metadata).await;
        match result {
            Ok(readiness) if readiness.is_ready() => {
                snapshot.metadata = readiness.metadata;
                Ok(Evaluation::Ready(snapshot))
            }
            Ok(readiness) => Ok(Evaluation::NotReady(NotReady::MissingData(readiness.missing))),
            Err(e) if e.is_configuration() => {
                Ok(Evaluation::NotReady(NotReady::Misconfigured(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Health of the current inputs
    pub async fn status(&self, relations: &RelationState) -> Result<Status> {
        Ok(self.evaluate(relations).await?.status())
    }

    /// Handle one event
    pub async fn on_event(&self, event: Event, relations: &mut RelationState) -> Result<Decision> {
        debug!(event = %event, "Handling event");

        match event {
            Event::Start | Event::WebssoRelationJoined | Event::WebssoRelationChanged => {
                Ok(Decision::Skipped)
            }
            Event::PeerRelationCreated => {
                if secret::ensure_secret(relations, self.is_leader)? == SecretOutcome::Generated {
                    info!("Published a new {}", secret::PASSPHRASE_KEY);
                }
                Ok(Decision::Skipped)
            }
            Event::ConfigChanged
            | Event::PeerRelationChanged
            | Event::PrincipalRelationJoined
            | Event::PrincipalRelationChanged => self.reconcile(event, relations).await,
        }
    }

    async fn reconcile(&self, event: Event, relations: &mut RelationState) -> Result<Decision> {
        let snapshot = match self.evaluate(relations).await? {
            Evaluation::Ready(snapshot) => snapshot,
            Evaluation::NotReady(reason) => {
                debug!(event = %event, reason = %reason, "Relation data is not ready yet, deferring");
                return Ok(Decision::Deferred(reason));
            }
        };

        let outcome = self.renderer.render(&snapshot)?;

        let restart_requested =
            relations.unit.last_restart_digest.as_deref() != Some(outcome.digest.as_str());
        if restart_requested {
            self.restart.request_restart(relations.outbound_mut()?)?;
            relations.unit.last_restart_digest = Some(outcome.digest);
        }

        // the principal may have restarted and lost what we told it
        self.publish_identity(relations)?;

        info!(event = %event, restart_requested, "Reconciliation complete");
        Ok(Decision::Rendered { restart_requested })
    }

    fn publish_identity(&self, relations: &mut RelationState) -> Result<()> {
        let remote_id_attribute =
            serde_json::to_string(&self.settings.options.remote_id_attribute)?;
        let outbound = relations.outbound_mut()?;
        outbound.set(PROTOCOL_NAME_KEY, serde_json::to_string(IDP_ID)?);
        outbound.set(REMOTE_ID_ATTRIBUTE_KEY, remote_id_attribute);
        Ok(())
    }
}
