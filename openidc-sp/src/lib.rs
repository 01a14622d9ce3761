// SPDX-License-Identifier: AGPL-3.0-or-later
//! openidc-sp: OpenID Connect service provider glue for identity federation
//!
//! Watches relation and configuration events for a federated identity
//! deployment, renders the `mod_auth_openidc` location configuration consumed
//! by Apache once enough data has arrived, and asks the principal to restart
//! the web server when that configuration changes.
//!
//! # Features
//!
//! * **Readiness evaluation:** reports exactly which keys are missing, or why the
//!   configuration is inconsistent, for both metadata discovery and manual endpoints
//! * **Level-triggered reconciliation:** every event re-evaluates from scratch and
//!   is deferred, without side effects, until rendering is safe
//! * **Shared passphrase:** generated once by the leader and shared over the peer relation

pub mod apache;
pub mod config;
pub mod error;
pub mod metadata;
pub mod principal;
pub mod readiness;
pub mod reconciler;
pub mod relation;
pub mod render;
pub mod secret;

pub use config::Settings;
pub use error::{OpenidcError, Result};
pub use reconciler::{Decision, Event, Reconciler, Status};
pub use relation::RelationState;
