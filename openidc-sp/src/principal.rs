// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only view over the data published by the principal
//!
//! The principal publishes JSON-encoded scalars. Every accessor returns
//! `None` when the unit is absent, the key was never published, or the value
//! does not decode as the expected type.

use serde::de::DeserializeOwned;
use std::fmt;

use tracing::debug;

use crate::relation::{RelationBag, RelationState};

/// URL scheme the principal serves on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Projection of the first principal unit's relation data
#[derive(Debug, Clone, Copy)]
pub struct PrincipalData<'a> {
    unit: Option<&'a RelationBag>,
}

impl<'a> PrincipalData<'a> {
    /// View the principal data held in `relations`
    pub fn new(relations: &'a RelationState) -> Self {
        let unit = relations.principal_unit();
        if unit.is_none() {
            debug!("There are no related units via the principal relation");
        }
        Self { unit }
    }

    /// View a single unit bag directly
    pub fn from_bag(unit: Option<&'a RelationBag>) -> Self {
        Self { unit }
    }

    /// Hostname advertised by the principal
    pub fn hostname(&self) -> Option<String> {
        self.decode("hostname")
    }

    /// Port advertised by the principal
    pub fn port(&self) -> Option<u16> {
        self.decode("port")
    }

    /// Scheme derived from the principal's `tls-enabled` flag
    pub fn scheme(&self) -> Option<Scheme> {
        self.decode::<bool>("tls-enabled")
            .map(|tls_enabled| if tls_enabled { Scheme::Https } else { Scheme::Http })
    }

    fn decode<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.unit?.get(key)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Ignoring undecodable principal data");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> RelationBag {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_all_fields_decoded() {
        let data = bag(&[
            ("hostname", "\"10.5.250.250\""),
            ("port", "5000"),
            ("tls-enabled", "true"),
        ]);
        let view = PrincipalData::from_bag(Some(&data));
        assert_eq!(view.hostname().as_deref(), Some("10.5.250.250"));
        assert_eq!(view.port(), Some(5000));
        assert_eq!(view.scheme(), Some(Scheme::Https));
    }

    #[test]
    fn test_tls_disabled_is_http() {
        let data = bag(&[("tls-enabled", "false")]);
        let view = PrincipalData::from_bag(Some(&data));
        assert_eq!(view.scheme(), Some(Scheme::Http));
        assert!(!view.scheme().unwrap().is_secure());
    }

    #[test]
    fn test_absent_unit() {
        let view = PrincipalData::from_bag(None);
        assert_eq!(view.hostname(), None);
        assert_eq!(view.port(), None);
        assert_eq!(view.scheme(), None);
    }

    #[test]
    fn test_missing_keys() {
        let data = bag(&[("hostname", "\"keystone.local\"")]);
        let view = PrincipalData::from_bag(Some(&data));
        assert!(view.hostname().is_some());
        assert_eq!(view.port(), None);
        assert_eq!(view.scheme(), None);
    }

    #[test]
    fn test_undecodable_values_are_unavailable() {
        let data = bag(&[
            // not JSON-quoted
            ("hostname", "10.5.250.250"),
            ("port", "\"five thousand\""),
            ("tls-enabled", "yes"),
        ]);
        let view = PrincipalData::from_bag(Some(&data));
        assert_eq!(view.hostname(), None);
        assert_eq!(view.port(), None);
        assert_eq!(view.scheme(), None);
    }

    #[test]
    fn test_view_over_relation_state() {
        let mut state = RelationState::default();
        assert_eq!(PrincipalData::new(&state).port(), None);

        state.set_principal("keystone/0", "port", "35357");
        assert_eq!(PrincipalData::new(&state).port(), Some(35357));
    }
}
