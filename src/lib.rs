//! Warden - secret-store bootstrap, reconciliation, and identity issuance
//!
//! Warden drives a Vault-compatible secret-store backend from an unknown,
//! possibly uninitialized state into a fully configured one, then issues
//! short-lived X.509 identities and auxiliary authentication artifacts to
//! the rest of the platform from that backend.
//!
//! # Architecture
//!
//! Three layers, leaves first:
//! - The [`backend`] module speaks the backend's raw HTTP API (health,
//!   init, unseal, policies, mounts, tokens, logical read/write).
//! - The [`client`] module wraps that surface with transparent login and
//!   expiry tracking, safe for concurrent callers.
//! - The [`controller`] module owns a privileged handle and reconciles the
//!   backend toward its desired configuration on a fixed cadence, persisting
//!   recovery state to local disk so restarts never re-initialize.
//!
//! The [`identity`] issuance layer is built on [`client`] and is what the
//! rest of the platform consumes. It never calls the controller; it simply
//! requires the controller to have reached its terminal state before the
//! roles and policies it authenticates against exist.
//!
//! # Modules
//!
//! - [`backend`] - raw backend API trait and HTTP implementation
//! - [`client`] - authenticated backend client (login, expiry, correlation)
//! - [`identity`] - certificate/CRL/role issuance operations
//! - [`controller`] - bootstrap state machine and scheduling loop
//! - [`secrets`] - local persisted secret files
//! - [`pki`] - certificate comparison and CA material generation
//! - [`config`] - static configuration
//! - [`metrics`] - token-renewal counters
//! - [`server`] - status and metrics HTTP endpoint
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod backend;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod pki;
pub mod secrets;
pub mod server;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these ensures consistency between the controller defaults,
// the CLI defaults, and test fixtures.

/// Default mount point for the PKI secrets engine
pub const DEFAULT_PKI_MOUNT: &str = "pki";

/// Default name of the certificate signing role
pub const DEFAULT_SIGNING_ROLE: &str = "cert-manager";

/// Default interval between discovery/reconcile ticks
pub const DEFAULT_TICK_SECS: u64 = 5;

/// Default period of the operational token; renewal runs at a quarter of this
pub const DEFAULT_TOKEN_PERIOD_SECS: u64 = 24 * 60 * 60;

/// Default bound on handler invocations within one reconcile cycle
pub const DEFAULT_MAX_STATE_CHANGES: usize = 15;

/// Default margin subtracted from a login token's expiry before re-login
pub const DEFAULT_EXPIRY_MARGIN_SECS: u64 = 5 * 60;

/// Default port for the status/metrics HTTP endpoint
pub const DEFAULT_STATUS_PORT: u16 = 9110;
