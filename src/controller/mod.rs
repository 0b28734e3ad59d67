//! Bootstrap/reconciliation controller
//!
//! The controller owns a privileged backend handle and drives the backend
//! from whatever state it finds it in to a fully configured one: unsealed,
//! PKI engine mounted, CA configured, issuing URLs set, signing role
//! defined, access policies installed, and a long-lived operational token
//! minted. It then keeps re-validating that configuration for the life of
//! the process and renews the operational token ahead of expiry.
//!
//! Discovery answers "which state is the backend in right now" by checking
//! each state's predicate in priority order; reconciliation walks the
//! handler table from that state until Done, bounded by a fixed handler
//! invocation count so a misconfigured transition table trips loudly
//! instead of spinning forever.
//!
//! Everything a handler mutates is either the backend itself or a persisted
//! local file; the credential bundle returned by initialization hits disk
//! before any further backend call, so a crash at any point is recoverable
//! by re-reading the file rather than by re-initializing (which an
//! initialized backend rejects).

pub mod desired;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{oneshot, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::backend::BackendApi;
use crate::config::Config;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::pki::{self, CaMaterial};
use crate::secrets::{
    SecretStore, KEY_CERTIFICATE, KEY_OPERATIONAL_TOKEN, KEY_PRIVATE_KEY, KEY_ROOT_TOKEN,
    KEY_UNSEAL_KEYS, SECRET_CA_CERTIFICATE, SECRET_CA_PRIVATE_KEY, SECRET_TOKEN,
};
use crate::Result;

pub use desired::{POLICY_APP_ROLE, POLICY_CERT_MANAGER, POLICY_ROOT_IDENTITY};
pub use state::{ReconcileState, Transitions};

use desired::{policy_documents, DesiredRole, DesiredUrls, PKI_MAX_LEASE_TTL};

/// The secret-threshold material and tokens recovered from or produced by
/// backend initialization
#[derive(Debug, Clone, Default)]
pub struct CredentialBundle {
    /// Maximal-privilege token from initialization
    pub root_token: Option<String>,
    /// Unseal key shares from initialization
    pub unseal_keys: Vec<String>,
    /// Policy-scoped periodic token for day-to-day issuance
    pub operational_token: Option<String>,
}

/// Read-side view of controller state for status endpoints
#[derive(Clone)]
pub struct StatusHandle {
    state: Arc<RwLock<ReconcileState>>,
    done_reached: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl StatusHandle {
    /// The most recently discovered state
    pub async fn state(&self) -> ReconcileState {
        *self.state.read().await
    }

    /// Whether Done has been reached at least once this process lifetime
    pub fn done_reached(&self) -> bool {
        self.done_reached.load(Ordering::Relaxed)
    }

    /// The renewal counters
    pub fn metrics(&self) -> &Metrics {
        self.metrics.as_ref()
    }
}

/// Bootstrap/reconciliation controller over one backend
pub struct Controller {
    config: Config,
    api: Arc<dyn BackendApi>,
    secrets: SecretStore,
    credentials: Arc<RwLock<CredentialBundle>>,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<ReconcileState>>,
    done_reached: Arc<AtomicBool>,
    transitions: Transitions,
    ready_tx: Option<oneshot::Sender<String>>,
}

impl Controller {
    /// Create a controller and the completion signal it will fire.
    ///
    /// Attempts to recover a previously persisted credential bundle from
    /// the secret directory; failure to recover is logged and ignored, as
    /// is normal for a first-ever start. The returned receiver yields the
    /// operational token exactly once when Done is first reached, and
    /// closes without a value when the controller stops beforehand.
    pub async fn new(
        config: Config,
        api: Arc<dyn BackendApi>,
    ) -> (Self, oneshot::Receiver<String>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let secrets = SecretStore::new(&config.secrets_dir);
        let controller = Self {
            config,
            api,
            secrets,
            credentials: Arc::new(RwLock::new(CredentialBundle::default())),
            metrics: Arc::new(Metrics::new()),
            state: Arc::new(RwLock::new(ReconcileState::Uninitialized)),
            done_reached: Arc::new(AtomicBool::new(false)),
            transitions: Transitions::default(),
            ready_tx: Some(ready_tx),
        };
        controller.recover().await;
        (controller, ready_rx)
    }

    /// Replace the transition table; used to exercise the cycle detector
    pub fn with_transitions(mut self, transitions: Transitions) -> Self {
        self.transitions = transitions;
        self
    }

    /// A cloneable read-side handle for status endpoints
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            state: self.state.clone(),
            done_reached: self.done_reached.clone(),
            metrics: self.metrics.clone(),
        }
    }

    // =========================================================================
    // Recovery and credential access
    // =========================================================================

    /// Load a previously persisted credential bundle, if any
    async fn recover(&self) {
        match self.load_bundle().await {
            Ok(Some(bundle)) => {
                info!(
                    has_operational_token = bundle.operational_token.is_some(),
                    "recovered credential bundle from disk"
                );
                *self.credentials.write().await = bundle;
            }
            Ok(None) => {
                debug!("no persisted credential bundle; assuming first start");
            }
            Err(e) => {
                warn!(error = %e, "failed to recover credential bundle; continuing");
            }
        }
    }

    async fn load_bundle(&self) -> Result<Option<CredentialBundle>> {
        let Some(root_token) = self.secrets.try_read(SECRET_TOKEN, KEY_ROOT_TOKEN).await? else {
            return Ok(None);
        };
        let unseal_keys = self
            .secrets
            .try_read(SECRET_TOKEN, KEY_UNSEAL_KEYS)
            .await?
            .map(|keys| keys.lines().map(str::to_string).collect())
            .unwrap_or_default();
        let operational_token = self
            .secrets
            .try_read(SECRET_TOKEN, KEY_OPERATIONAL_TOKEN)
            .await?;
        Ok(Some(CredentialBundle {
            root_token: Some(root_token),
            unseal_keys,
            operational_token,
        }))
    }

    async fn root_token(&self) -> Result<String> {
        self.credentials
            .read()
            .await
            .root_token
            .clone()
            .ok_or_else(|| {
                Error::config(
                    "backend is initialized but no root token is available; \
                     was it initialized outside this controller?",
                )
            })
    }

    /// The current operational token, if one has been minted or recovered
    pub async fn operational_token(&self) -> Option<String> {
        self.credentials.read().await.operational_token.clone()
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Determine which state the backend is currently in.
    ///
    /// Predicates run in priority order and the first that holds wins; a
    /// predicate that cannot be evaluated (network failure, malformed
    /// stored certificate) propagates its error rather than being treated
    /// as "in that state".
    pub async fn discover(&self) -> Result<ReconcileState> {
        let health = self.api.health().await?;
        if !health.initialized {
            return Ok(ReconcileState::Uninitialized);
        }
        if health.sealed {
            return Ok(ReconcileState::Sealed);
        }

        let token = self.root_token().await?;

        let mount = format!("{}/", self.config.pki_mount);
        if !self.api.mounts(&token).await?.contains(&mount) {
            return Ok(ReconcileState::PkiNotEnabled);
        }
        if !self.ca_configured(&token).await? {
            return Ok(ReconcileState::PkiCaCertNotConfigured);
        }
        if !self.urls_configured(&token).await? {
            return Ok(ReconcileState::PkiUrlsNotConfigured);
        }
        if !self.role_configured(&token).await? {
            return Ok(ReconcileState::PkiRoleNotConfigured);
        }
        if !self.policies_configured(&token).await? {
            return Ok(ReconcileState::PolicyNotConfigured);
        }
        if !self.token_auth_configured(&token).await? {
            return Ok(ReconcileState::TokenAuthNotConfigured);
        }
        Ok(ReconcileState::Done)
    }

    /// Whether the backend's CA certificate matches the persisted one.
    ///
    /// Compared on parsed form, so PEM wrapping differences never cause
    /// spurious reconfiguration.
    async fn ca_configured(&self, token: &str) -> Result<bool> {
        let Some(local) = self
            .secrets
            .try_read(SECRET_CA_CERTIFICATE, KEY_CERTIFICATE)
            .await?
        else {
            return Ok(false);
        };
        let path = format!("{}/cert/ca", self.config.pki_mount);
        let Some(data) = self.api.read(token, &path).await? else {
            return Ok(false);
        };
        let reported = match data.get("certificate") {
            Some(Value::String(pem)) => pem.clone(),
            Some(_) => return Err(Error::field_type("certificate")),
            None => return Err(Error::missing_field("certificate")),
        };
        if reported.trim().is_empty() {
            return Ok(false);
        }
        pki::same_certificate(&reported, &local)
    }

    async fn urls_configured(&self, token: &str) -> Result<bool> {
        let path = format!("{}/config/urls", self.config.pki_mount);
        let Some(data) = self.api.read(token, &path).await? else {
            return Ok(false);
        };
        let desired = DesiredUrls::derive(&self.config.external_url, &self.config.pki_mount);
        Ok(desired.matches(&data))
    }

    async fn role_configured(&self, token: &str) -> Result<bool> {
        let path = format!(
            "{}/roles/{}",
            self.config.pki_mount, self.config.signing_role
        );
        let Some(data) = self.api.read(token, &path).await? else {
            return Ok(false);
        };
        Ok(DesiredRole::derive(&self.config.organization).matches(&data))
    }

    async fn policies_configured(&self, token: &str) -> Result<bool> {
        for (name, desired) in policy_documents(&self.config.pki_mount) {
            match self.api.policy_read(token, name).await? {
                Some(stored) if stored.trim() == desired.trim() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn token_auth_configured(&self, token: &str) -> Result<bool> {
        let Some(operational) = self.operational_token().await else {
            return Ok(false);
        };
        self.api.lookup_token(token, &operational).await
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Walk the handler table from `from` until Done.
    ///
    /// Aborts with a cycle-bound error once the number of handler
    /// invocations in this cycle exceeds the configured maximum; a
    /// transition table that maps a state to itself or to an earlier state
    /// trips this bound instead of looping forever.
    pub async fn reconcile(&self, from: ReconcileState) -> Result<()> {
        let mut current = from;
        let mut invocations = 0usize;
        while current != ReconcileState::Done {
            if invocations >= self.config.max_state_changes {
                return Err(Error::CycleLimit(self.config.max_state_changes));
            }
            invocations += 1;
            let next = self.run_handler(current).await?;
            debug!(from = %current, to = %next, "state handler complete");
            current = next;
        }
        Ok(())
    }

    async fn run_handler(&self, current: ReconcileState) -> Result<ReconcileState> {
        match current {
            ReconcileState::Uninitialized => self.initialize().await,
            ReconcileState::Sealed => self.unseal().await,
            ReconcileState::PkiNotEnabled => self.enable_pki().await,
            ReconcileState::PkiCaCertNotConfigured => self.configure_pki_ca().await,
            ReconcileState::PkiUrlsNotConfigured => self.configure_pki_urls().await,
            ReconcileState::PkiRoleNotConfigured => self.configure_pki_role().await,
            ReconcileState::PolicyNotConfigured => self.configure_policy().await,
            ReconcileState::TokenAuthNotConfigured => self.configure_token_auth().await,
            ReconcileState::Done => Err(Error::NoHandler(current.to_string())),
        }
    }

    fn advance(&self, from: ReconcileState) -> Result<ReconcileState> {
        self.transitions
            .next(from)
            .ok_or_else(|| Error::NoHandler(from.to_string()))
    }

    /// Initialize the backend with a single share and a threshold of one.
    ///
    /// The returned bundle is persisted before any further backend call so
    /// a crash between initialization and the next step is recoverable by
    /// re-reading the files. Re-initialization of an initialized backend is
    /// rejected by the backend and must never be attempted as recovery.
    async fn initialize(&self) -> Result<ReconcileState> {
        info!("initializing backend");
        let init = self.api.init(1, 1).await?;

        self.secrets
            .write(SECRET_TOKEN, KEY_ROOT_TOKEN, &init.root_token)
            .await?;
        self.secrets
            .write(SECRET_TOKEN, KEY_UNSEAL_KEYS, &init.keys.join("\n"))
            .await?;

        let mut bundle = self.credentials.write().await;
        bundle.root_token = Some(init.root_token);
        bundle.unseal_keys = init.keys;

        self.advance(ReconcileState::Uninitialized)
    }

    /// Submit the unseal shard.
    ///
    /// A backend that reports still-sealed afterward keeps the state at
    /// Sealed rather than erroring, so unsealing is retried; the cycle
    /// bound caps how often that happens within one cycle and the next tick
    /// starts over.
    async fn unseal(&self) -> Result<ReconcileState> {
        let key = self
            .credentials
            .read()
            .await
            .unseal_keys
            .first()
            .cloned()
            .ok_or_else(|| Error::config("no unseal key material available"))?;

        let status = self.api.unseal(&key).await?;
        if status.sealed {
            warn!("backend still sealed after unseal attempt");
            return Ok(ReconcileState::Sealed);
        }
        info!("backend unsealed");
        self.advance(ReconcileState::Sealed)
    }

    async fn enable_pki(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        info!(mount = %self.config.pki_mount, "enabling PKI secrets engine");
        self.api
            .enable_mount(&token, &self.config.pki_mount, "pki")
            .await?;
        self.advance(ReconcileState::PkiNotEnabled)
    }

    async fn configure_pki_ca(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        self.api
            .tune_mount(&token, &self.config.pki_mount, PKI_MAX_LEASE_TTL)
            .await?;

        let ca = self.ensure_ca_material().await?;
        let path = format!("{}/config/ca", self.config.pki_mount);
        self.api
            .write(&token, &path, json!({ "pem_bundle": ca.pem_bundle() }))
            .await?;
        info!("configured PKI CA certificate");
        self.advance(ReconcileState::PkiCaCertNotConfigured)
    }

    /// Read the CA pair from disk, generating and persisting one first when
    /// none exists yet
    async fn ensure_ca_material(&self) -> Result<CaMaterial> {
        let cert = self
            .secrets
            .try_read(SECRET_CA_CERTIFICATE, KEY_CERTIFICATE)
            .await?;
        let key = self
            .secrets
            .try_read(SECRET_CA_PRIVATE_KEY, KEY_PRIVATE_KEY)
            .await?;
        if let (Some(certificate_pem), Some(private_key_pem)) = (cert, key) {
            return Ok(CaMaterial {
                certificate_pem,
                private_key_pem,
            });
        }

        info!("no persisted CA material; generating a root CA pair");
        let ca = pki::generate_ca(
            &format!("{} Root CA", self.config.base_dns),
            &self.config.organization,
        )?;
        self.secrets
            .write(SECRET_CA_CERTIFICATE, KEY_CERTIFICATE, &ca.certificate_pem)
            .await?;
        self.secrets
            .write(SECRET_CA_PRIVATE_KEY, KEY_PRIVATE_KEY, &ca.private_key_pem)
            .await?;
        Ok(ca)
    }

    async fn configure_pki_urls(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        let desired = DesiredUrls::derive(&self.config.external_url, &self.config.pki_mount);
        let path = format!("{}/config/urls", self.config.pki_mount);
        self.api
            .write(&token, &path, desired.write_payload())
            .await?;
        info!("configured issuing and CRL URLs");
        self.advance(ReconcileState::PkiUrlsNotConfigured)
    }

    async fn configure_pki_role(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        let desired = DesiredRole::derive(&self.config.organization);
        let path = format!(
            "{}/roles/{}",
            self.config.pki_mount, self.config.signing_role
        );
        self.api
            .write(&token, &path, desired.write_payload())
            .await?;
        info!(role = %self.config.signing_role, "configured signing role");
        self.advance(ReconcileState::PkiRoleNotConfigured)
    }

    async fn configure_policy(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        for (name, document) in policy_documents(&self.config.pki_mount) {
            self.api.policy_write(&token, name, &document).await?;
            debug!(policy = %name, "wrote access policy");
        }
        info!("configured access policies");
        self.advance(ReconcileState::PolicyNotConfigured)
    }

    async fn configure_token_auth(&self) -> Result<ReconcileState> {
        let token = self.root_token().await?;
        let auth = self
            .api
            .create_token(
                &token,
                &[POLICY_CERT_MANAGER.to_string()],
                &self.config.token_period_string(),
            )
            .await?;

        self.secrets
            .write(SECRET_TOKEN, KEY_OPERATIONAL_TOKEN, &auth.client_token)
            .await?;
        self.credentials.write().await.operational_token = Some(auth.client_token);
        info!("minted operational token");
        self.advance(ReconcileState::TokenAuthNotConfigured)
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Run discovery/reconciliation and renewal until `shutdown` fires.
    ///
    /// The three event sources (reconcile tick, renewal tick, shutdown) are
    /// handled one at a time, so discovery, reconciliation, and renewal
    /// never overlap for one controller. Dropping the controller on exit
    /// closes the completion signal, which is the only notification
    /// dependent callers get that the controller stopped for good.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut tick = interval(self.config.tick_interval);
        let mut renew = interval(self.config.renew_interval());
        info!(
            tick = ?self.config.tick_interval,
            renew = ?self.config.renew_interval(),
            "controller started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("controller shutting down");
                    break;
                }
                _ = tick.tick() => self.reconcile_tick().await,
                _ = renew.tick() => self.renew_operational_token().await,
            }
        }
    }

    /// One discovery/reconcile pass
    async fn reconcile_tick(&mut self) {
        let current = match self.discover().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "discovery failed; retrying next tick");
                return;
            }
        };
        *self.state.write().await = current;

        if current == ReconcileState::Done {
            self.mark_done().await;
            return;
        }

        debug!(state = %current, "reconciling");
        match self.reconcile(current).await {
            Ok(()) => {
                *self.state.write().await = ReconcileState::Done;
                self.mark_done().await;
            }
            Err(e) => {
                warn!(error = %e, state = %current, "reconciliation failed; retrying next tick");
            }
        }
    }

    /// Record that Done was reached and fire the completion signal once
    async fn mark_done(&mut self) {
        if !self.done_reached.swap(true, Ordering::Relaxed) {
            info!("backend configuration complete");
        }
        if self.ready_tx.is_some() {
            if let Some(token) = self.operational_token().await {
                if let Some(tx) = self.ready_tx.take() {
                    // The receiver may already be gone; that is its choice.
                    let _ = tx.send(token);
                }
            }
        }
    }

    /// Renew the operational token, counting the outcome.
    ///
    /// Skipped entirely (counters untouched) while the backend is not Done:
    /// a token cannot be usefully renewed before it exists.
    async fn renew_operational_token(&self) {
        if *self.state.read().await != ReconcileState::Done {
            debug!("skipping renewal; configuration not complete");
            return;
        }
        let Some(token) = self.operational_token().await else {
            warn!("no operational token to renew");
            self.metrics.record_renewal_failure();
            return;
        };
        match self.api.renew_token(&token).await {
            Ok(auth) => {
                debug!(lease_seconds = auth.lease_duration, "renewed operational token");
                self.metrics.record_renewal_success();
            }
            Err(e) => {
                warn!(error = %e, "operational token renewal failed; will retry");
                self.metrics.record_renewal_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Auth, HealthStatus, InitResponse, MockBackendApi, SealStatus};
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            secrets_dir: dir.path().to_path_buf(),
            tick_interval: Duration::from_millis(10),
            max_state_changes: 5,
            ..Default::default()
        }
    }

    async fn controller(
        api: MockBackendApi,
        dir: &tempfile::TempDir,
    ) -> (Controller, oneshot::Receiver<String>) {
        Controller::new(test_config(dir), Arc::new(api)).await
    }

    #[tokio::test]
    async fn discovery_reports_uninitialized_first() {
        let mut api = MockBackendApi::new();
        api.expect_health().returning(|| {
            Ok(HealthStatus {
                initialized: false,
                sealed: true,
            })
        });

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        assert_eq!(
            controller.discover().await.unwrap(),
            ReconcileState::Uninitialized
        );
    }

    #[tokio::test]
    async fn discovery_reports_sealed_before_configuration_concerns() {
        let mut api = MockBackendApi::new();
        api.expect_health().returning(|| {
            Ok(HealthStatus {
                initialized: true,
                sealed: true,
            })
        });

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        assert_eq!(controller.discover().await.unwrap(), ReconcileState::Sealed);
    }

    #[tokio::test]
    async fn discovery_errors_propagate() {
        let mut api = MockBackendApi::new();
        api.expect_health()
            .returning(|| Err(Error::api(502, "bad gateway")));

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        assert!(controller.discover().await.is_err());
    }

    #[tokio::test]
    async fn initialize_persists_the_bundle_before_advancing() {
        let mut api = MockBackendApi::new();
        api.expect_init()
            .withf(|shares, threshold| *shares == 1 && *threshold == 1)
            .times(1)
            .returning(|_, _| {
                Ok(InitResponse {
                    keys: vec!["shard-one".to_string()],
                    root_token: "s.root".to_string(),
                })
            });

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        let next = controller.initialize().await.unwrap();
        assert_eq!(next, ReconcileState::Sealed);

        // Bundle on disk and in memory
        assert_eq!(
            controller
                .secrets
                .read(SECRET_TOKEN, KEY_ROOT_TOKEN)
                .await
                .unwrap(),
            "s.root"
        );
        assert_eq!(
            controller
                .secrets
                .read(SECRET_TOKEN, KEY_UNSEAL_KEYS)
                .await
                .unwrap(),
            "shard-one"
        );
        assert_eq!(controller.root_token().await.unwrap(), "s.root");
    }

    #[tokio::test]
    async fn unseal_stays_sealed_when_backend_remains_sealed() {
        let mut api = MockBackendApi::new();
        api.expect_unseal()
            .times(1)
            .returning(|_| Ok(SealStatus { sealed: true }));

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        controller.credentials.write().await.unseal_keys = vec!["shard-one".to_string()];

        let next = controller.unseal().await.unwrap();
        assert_eq!(next, ReconcileState::Sealed);
    }

    #[tokio::test]
    async fn unseal_advances_once_unsealed() {
        let mut api = MockBackendApi::new();
        api.expect_unseal()
            .withf(|key| key == "shard-one")
            .times(1)
            .returning(|_| Ok(SealStatus { sealed: false }));

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        controller.credentials.write().await.unseal_keys = vec!["shard-one".to_string()];

        let next = controller.unseal().await.unwrap();
        assert_eq!(next, ReconcileState::PkiNotEnabled);
    }

    #[tokio::test]
    async fn cycle_bound_trips_at_exactly_the_configured_count() {
        // A transition table that maps policy configuration back onto
        // itself: the handler keeps succeeding, the state never advances,
        // and the bound must trip after exactly max_state_changes
        // invocations (3 policy writes each).
        let mut api = MockBackendApi::new();
        api.expect_policy_write()
            .times(15)
            .returning(|_, _, _| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _rx) = controller(api, &dir).await;
        controller.credentials.write().await.root_token = Some("s.root".to_string());
        controller = controller.with_transitions(Transitions::default().with_next(
            ReconcileState::PolicyNotConfigured,
            ReconcileState::PolicyNotConfigured,
        ));

        let err = controller
            .reconcile(ReconcileState::PolicyNotConfigured)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CycleLimit(5)));
    }

    #[tokio::test]
    async fn done_has_no_handler() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(MockBackendApi::new(), &dir).await;
        let err = controller
            .run_handler(ReconcileState::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoHandler(name) if name == "done"));
    }

    #[tokio::test]
    async fn renewal_is_gated_on_done() {
        // State is not Done: the ticker firing must perform zero renewal
        // calls and leave both counters unchanged. The mock would panic on
        // any renew_token call.
        let api = MockBackendApi::new();
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;

        controller.renew_operational_token().await;

        assert_eq!(controller.metrics.renewals_succeeded(), 0);
        assert_eq!(controller.metrics.renewals_failed(), 0);
    }

    #[tokio::test]
    async fn renewal_counts_success_and_failure() {
        let mut api = MockBackendApi::new();
        api.expect_renew_token()
            .withf(|token| token == "s.operational")
            .times(2)
            .returning({
                let mut first = true;
                move |_| {
                    if first {
                        first = false;
                        Ok(Auth {
                            client_token: "s.operational".to_string(),
                            lease_duration: 86400,
                        })
                    } else {
                        Err(Error::api(503, "sealed"))
                    }
                }
            });

        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(api, &dir).await;
        *controller.state.write().await = ReconcileState::Done;
        controller.credentials.write().await.operational_token =
            Some("s.operational".to_string());

        controller.renew_operational_token().await;
        controller.renew_operational_token().await;

        assert_eq!(controller.metrics.renewals_succeeded(), 1);
        assert_eq!(controller.metrics.renewals_failed(), 1);
    }

    #[tokio::test]
    async fn recovery_loads_a_persisted_bundle() {
        let dir = tempfile::tempdir().unwrap();
        {
            let secrets = SecretStore::new(dir.path());
            secrets
                .write(SECRET_TOKEN, KEY_ROOT_TOKEN, "s.recovered")
                .await
                .unwrap();
            secrets
                .write(SECRET_TOKEN, KEY_UNSEAL_KEYS, "shard-one\nshard-two")
                .await
                .unwrap();
            secrets
                .write(SECRET_TOKEN, KEY_OPERATIONAL_TOKEN, "s.op")
                .await
                .unwrap();
        }

        let (controller, _rx) = controller(MockBackendApi::new(), &dir).await;
        assert_eq!(controller.root_token().await.unwrap(), "s.recovered");
        assert_eq!(
            controller.operational_token().await,
            Some("s.op".to_string())
        );
        assert_eq!(
            controller.credentials.read().await.unseal_keys,
            vec!["shard-one".to_string(), "shard-two".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_root_token_is_a_named_error() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(MockBackendApi::new(), &dir).await;
        let err = controller.root_token().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn ensure_ca_material_generates_once_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _rx) = controller(MockBackendApi::new(), &dir).await;

        let first = controller.ensure_ca_material().await.unwrap();
        let second = controller.ensure_ca_material().await.unwrap();
        assert_eq!(first.certificate_pem, second.certificate_pem);
        assert!(
            controller
                .secrets
                .exists(SECRET_CA_CERTIFICATE, KEY_CERTIFICATE)
                .await
        );
        assert!(
            controller
                .secrets
                .exists(SECRET_CA_PRIVATE_KEY, KEY_PRIVATE_KEY)
                .await
        );
    }
}
