// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared crypto passphrase kept in the peer relation
//!
//! The leader generates the passphrase once, when the peer group forms. It
//! is never regenerated while a non-empty value exists, and non-leaders
//! never write it.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OpenidcError, Result};
use crate::relation::RelationState;

/// Peer relation key holding the passphrase
pub const PASSPHRASE_KEY: &str = "oidc-crypto-passphrase";

/// What [`ensure_secret`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOutcome {
    /// A new passphrase was generated and published
    Generated,
    /// A passphrase already existed and was left alone
    AlreadySet,
    /// This unit is not the leader; nothing was written
    NotLeader,
}

/// Make sure a crypto passphrase exists in the peer application bag
pub fn ensure_secret(relations: &mut RelationState, is_leader: bool) -> Result<SecretOutcome> {
    if !is_leader {
        debug!("Not leader, skipping {} generation", PASSPHRASE_KEY);
        return Ok(SecretOutcome::NotLeader);
    }

    let peer = relations
        .peer_mut()
        .ok_or(OpenidcError::PeerRelationAbsent)?;

    if peer.get(PASSPHRASE_KEY).is_some_and(|value| !value.is_empty()) {
        debug!("{} already set, leaving it untouched", PASSPHRASE_KEY);
        return Ok(SecretOutcome::AlreadySet);
    }

    info!("Generating {}", PASSPHRASE_KEY);
    peer.set(PASSPHRASE_KEY, Uuid::new_v4().to_string());
    Ok(SecretOutcome::Generated)
}

/// Current passphrase, if the peer group has one
pub fn read_secret(relations: &RelationState) -> Option<String> {
    let passphrase = relations
        .peer()
        .and_then(|peer| peer.get(PASSPHRASE_KEY))
        .filter(|value| !value.is_empty());

    match passphrase {
        Some(value) => {
            debug!("Using {} from peer application data", PASSPHRASE_KEY);
            Some(value.to_string())
        }
        None => {
            warn!("The {} has not been set", PASSPHRASE_KEY);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formed() -> RelationState {
        let mut state = RelationState::default();
        state.join_peer();
        state
    }

    #[test]
    fn test_leader_generates_once() {
        let mut state = formed();
        assert_eq!(ensure_secret(&mut state, true).unwrap(), SecretOutcome::Generated);

        let first = read_secret(&state).unwrap();
        assert!(Uuid::parse_str(&first).is_ok());

        for _ in 0..5 {
            assert_eq!(
                ensure_secret(&mut state, true).unwrap(),
                SecretOutcome::AlreadySet
            );
        }
        assert_eq!(read_secret(&state).unwrap(), first);
    }

    #[test]
    fn test_non_leader_never_writes() {
        let mut state = formed();
        assert_eq!(ensure_secret(&mut state, false).unwrap(), SecretOutcome::NotLeader);
        assert_eq!(read_secret(&state), None);
        assert!(state.peer().unwrap().is_empty());
    }

    #[test]
    fn test_existing_secret_kept() {
        let mut state = formed();
        state
            .peer_mut()
            .unwrap()
            .set(PASSPHRASE_KEY, "1e19bb8a-a92d-4377-8226-5e8fc475822c");

        ensure_secret(&mut state, true).unwrap();
        assert_eq!(
            read_secret(&state).as_deref(),
            Some("1e19bb8a-a92d-4377-8226-5e8fc475822c")
        );
    }

    #[test]
    fn test_empty_value_is_replaced() {
        let mut state = formed();
        state.peer_mut().unwrap().set(PASSPHRASE_KEY, "");
        assert_eq!(read_secret(&state), None);
        assert_eq!(ensure_secret(&mut state, true).unwrap(), SecretOutcome::Generated);
        assert!(read_secret(&state).is_some());
    }

    #[test]
    fn test_leader_without_peer_relation() {
        let mut state = RelationState::default();
        assert!(matches!(
            ensure_secret(&mut state, true),
            Err(OpenidcError::PeerRelationAbsent)
        ));
    }
}
