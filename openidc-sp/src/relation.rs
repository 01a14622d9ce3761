// SPDX-License-Identifier: AGPL-3.0-or-later
//! Relation data model
//!
//! Each relation scope is an explicit key-value bag. Who may write to which
//! bag is fixed by the accessors:
//!
//! * the peer application bag is written by the leader only (see [`crate::secret`])
//! * remote principal unit bags are read-only to this crate
//! * the local outbound bag on the principal relation is written by the reconciler
//!
//! The hosting environment populates remote data through the `join_*` and
//! `set_principal` helpers; the CLI exposes them under `relation`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{OpenidcError, Result};

/// Name of the peer relation
pub const PEER_RELATION: &str = "cluster";

/// Name of the upstream principal relation
pub const PRINCIPAL_RELATION: &str = "keystone-fid-service-provider";

/// Name of the web single sign-on relation
pub const WEBSSO_RELATION: &str = "websso-fid-service-provider";

/// A flat key-value bag of relation data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationBag(BTreeMap<String, String>);

impl RelationBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value for `key`, empty strings included
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set `key` to `value`, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove `key`, returning the old value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RelationBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The principal relation as seen from this unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRelation {
    /// Data published by each remote principal unit
    #[serde(default)]
    pub units: BTreeMap<String, RelationBag>,

    /// Data this unit publishes to the principal
    #[serde(default)]
    pub local: RelationBag,
}

impl PrincipalRelation {
    /// Bag of the first related unit, if any unit has joined
    pub fn first_unit(&self) -> Option<&RelationBag> {
        self.units.values().next()
    }
}

/// State private to this unit, never shared over a relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    /// Digest of the content the last restart was requested for
    #[serde(default)]
    pub last_restart_digest: Option<String>,
}

/// Everything this unit knows about its relations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationState {
    /// Application bag of the peer relation; `None` until the peer group forms
    #[serde(default)]
    peer: Option<RelationBag>,

    /// Principal relation; `None` until related
    #[serde(default)]
    principal: Option<PrincipalRelation>,

    /// Whether the web SSO relation exists
    #[serde(default)]
    websso: bool,

    #[serde(default)]
    pub unit: UnitState,
}

impl RelationState {
    /// Load state from a JSON file; a missing file is the empty state
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            debug!(path = %path.display(), "No relation state yet, starting empty");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Persist state as pretty JSON, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    // Peer relation

    /// Form the peer relation (no-op when already formed)
    pub fn join_peer(&mut self) {
        self.peer.get_or_insert_with(RelationBag::new);
    }

    /// Tear the peer relation down
    pub fn leave_peer(&mut self) {
        self.peer = None;
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Read-only view of the peer application bag
    pub fn peer(&self) -> Option<&RelationBag> {
        self.peer.as_ref()
    }

    pub(crate) fn peer_mut(&mut self) -> Option<&mut RelationBag> {
        self.peer.as_mut()
    }

    // Principal relation

    /// Add a principal unit, forming the relation if needed
    pub fn join_principal(&mut self, unit: &str) {
        self.principal
            .get_or_insert_with(PrincipalRelation::default)
            .units
            .entry(unit.to_string())
            .or_default();
    }

    /// Record data published by a principal unit
    pub fn set_principal(&mut self, unit: &str, key: &str, value: &str) {
        self.join_principal(unit);
        if let Some(bag) = self
            .principal
            .as_mut()
            .and_then(|relation| relation.units.get_mut(unit))
        {
            bag.set(key, value);
        }
    }

    pub fn principal(&self) -> Option<&PrincipalRelation> {
        self.principal.as_ref()
    }

    /// Data of the first principal unit
    pub fn principal_unit(&self) -> Option<&RelationBag> {
        self.principal.as_ref().and_then(PrincipalRelation::first_unit)
    }

    /// Outbound bag this unit publishes to the principal
    pub fn outbound(&self) -> Option<&RelationBag> {
        self.principal.as_ref().map(|relation| &relation.local)
    }

    pub(crate) fn outbound_mut(&mut self) -> Result<&mut RelationBag> {
        self.principal
            .as_mut()
            .map(|relation| &mut relation.local)
            .ok_or_else(|| OpenidcError::RelationNotFound {
                name: PRINCIPAL_RELATION.to_string(),
            })
    }

    // Web SSO relation

    pub fn join_websso(&mut self) {
        self.websso = true;
    }

    pub fn has_websso(&self) -> bool {
        self.websso
    }
}
