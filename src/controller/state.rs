//! Reconciliation states and the transition table
//!
//! The enum order is the discovery priority order: initialization and seal
//! problems dominate everything else, and each configuration concern is
//! checked only once everything before it holds. The forward adjacency
//! lives in one [`Transitions`] table so the legal state graph is auditable
//! in one place instead of being scattered through the handlers.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// The backend's position in the bootstrap sequence at one evaluation instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileState {
    /// The backend has never been initialized
    Uninitialized,
    /// The backend is initialized but sealed
    Sealed,
    /// The PKI secrets engine is not mounted
    PkiNotEnabled,
    /// The PKI engine has no (or the wrong) CA certificate
    PkiCaCertNotConfigured,
    /// Issuing/CRL distribution URLs differ from the desired ones
    PkiUrlsNotConfigured,
    /// The signing role is absent or differs from the desired parameters
    PkiRoleNotConfigured,
    /// One or more access policies are absent or differ
    PolicyNotConfigured,
    /// The operational token has not been minted (or is no longer valid)
    TokenAuthNotConfigured,
    /// Fully configured; terminal for bootstrap, re-entered by every tick
    Done,
}

impl ReconcileState {
    /// All states in discovery priority order
    pub const ALL: [ReconcileState; 9] = [
        ReconcileState::Uninitialized,
        ReconcileState::Sealed,
        ReconcileState::PkiNotEnabled,
        ReconcileState::PkiCaCertNotConfigured,
        ReconcileState::PkiUrlsNotConfigured,
        ReconcileState::PkiRoleNotConfigured,
        ReconcileState::PolicyNotConfigured,
        ReconcileState::TokenAuthNotConfigured,
        ReconcileState::Done,
    ];
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Sealed => "sealed",
            Self::PkiNotEnabled => "pki-not-enabled",
            Self::PkiCaCertNotConfigured => "pki-ca-cert-not-configured",
            Self::PkiUrlsNotConfigured => "pki-urls-not-configured",
            Self::PkiRoleNotConfigured => "pki-role-not-configured",
            Self::PolicyNotConfigured => "policy-not-configured",
            Self::TokenAuthNotConfigured => "token-auth-not-configured",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// The legal next-state for each handler's success path.
///
/// The default table is the forward-only bootstrap chain. A table that maps
/// a state back to itself or to an earlier state makes reconciliation trip
/// its cycle bound instead of looping forever; constructing such a table is
/// only useful to exercise that detector.
#[derive(Debug, Clone)]
pub struct Transitions {
    next: BTreeMap<ReconcileState, ReconcileState>,
}

impl Default for Transitions {
    fn default() -> Self {
        let mut next = BTreeMap::new();
        // Forward chain in declaration order; Done has no successor.
        for pair in ReconcileState::ALL.windows(2) {
            next.insert(pair[0], pair[1]);
        }
        Self { next }
    }
}

impl Transitions {
    /// The state a handler for `from` moves to on success
    pub fn next(&self, from: ReconcileState) -> Option<ReconcileState> {
        self.next.get(&from).copied()
    }

    /// Replace the successor of `from`; used to exercise the cycle detector
    pub fn with_next(mut self, from: ReconcileState, to: ReconcileState) -> Self {
        self.next.insert(from, to);
        self
    }
}
