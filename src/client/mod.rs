//! Authenticated backend client
//!
//! A thin, login-aware wrapper around the backend's logical read/write
//! operations. The client owns token acquisition and expiry tracking and is
//! safe for any number of concurrent callers: the only serialized critical
//! section is the expiry-check-and-login sequence, guarded by one async
//! mutex held never longer than the check (and the login itself when one is
//! due). Read/write RPCs run outside the lock.
//!
//! The client knows nothing about certificates or bootstrap state; retry
//! policy belongs to callers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};

use crate::backend::{BackendApi, SecretData};
use crate::error::Error;
use crate::Result;

/// The login method a client authenticates with.
///
/// Selected exactly once at construction; see
/// [`crate::config::AuthSettings::method`] for the exactly-one-of-three
/// validation.
pub enum AuthMethod {
    /// A pre-shared backend token; never expires, never re-logged-in
    Token(String),
    /// Exchange the local service-identity token for a backend session
    PlatformIdentity {
        /// Backend role to log in as
        role: String,
        /// Path of the local service-identity token file
        token_file: PathBuf,
    },
    /// Application-role login with an id/secret pair
    AppRole {
        /// Role id
        role_id: String,
        /// Secret id
        secret_id: String,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose credential material in debug output
        match self {
            Self::Token(_) => f.write_str("AuthMethod::Token"),
            Self::PlatformIdentity { role, token_file } => f
                .debug_struct("AuthMethod::PlatformIdentity")
                .field("role", role)
                .field("token_file", token_file)
                .finish(),
            Self::AppRole { role_id, .. } => f
                .debug_struct("AuthMethod::AppRole")
                .field("role_id", role_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Current login session
struct Session {
    token: Option<String>,
    /// Absolute expiry; None means the token never expires
    expires_at: Option<Instant>,
}

impl Session {
    /// Whether the session must (re-)login before the next call
    fn needs_login(&self, margin: Duration) -> bool {
        match (&self.token, self.expires_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(expires_at)) => Instant::now() + margin >= expires_at,
        }
    }
}

/// Login-aware wrapper over the backend's logical read/write surface
pub struct BackendClient {
    api: Arc<dyn BackendApi>,
    auth: AuthMethod,
    session: Mutex<Session>,
    expiry_margin: Duration,
    correlation: AtomicU64,
}

impl BackendClient {
    /// Create a client using the given API handle and login method
    pub fn new(api: Arc<dyn BackendApi>, auth: AuthMethod) -> Self {
        Self {
            api,
            auth,
            session: Mutex::new(Session {
                token: None,
                expires_at: None,
            }),
            expiry_margin: Duration::from_secs(crate::DEFAULT_EXPIRY_MARGIN_SECS),
            correlation: AtomicU64::new(0),
        }
    }

    /// Override the expiry margin (default five minutes)
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Next six-digit correlation identifier
    fn next_correlation(&self) -> String {
        let id = self.correlation.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!("{:06}", id)
    }

    /// Return a valid session token, logging in first when required.
    ///
    /// The check and the login are serialized under the session lock, so
    /// concurrent callers observing an expired token never race duplicate
    /// logins: the first performs the login, the rest block and reuse it.
    async fn session_token(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if !session.needs_login(self.expiry_margin) {
            // needs_login is false only when a token is set
            return Ok(session.token.clone().unwrap_or_default());
        }

        let auth = match &self.auth {
            AuthMethod::Token(token) => {
                session.token = Some(token.clone());
                session.expires_at = None;
                return Ok(token.clone());
            }
            AuthMethod::PlatformIdentity { role, token_file } => {
                let jwt = tokio::fs::read_to_string(token_file).await.map_err(|e| {
                    Error::login(format!(
                        "failed to read service-identity token {}: {}",
                        token_file.display(),
                        e
                    ))
                })?;
                self.api
                    .login_platform_identity(role, jwt.trim())
                    .await?
                    .ok_or(Error::MissingAuth)?
            }
            AuthMethod::AppRole { role_id, secret_id } => self
                .api
                .login_app_role(role_id, secret_id)
                .await?
                .ok_or(Error::MissingAuth)?,
        };

        let expires_at = match auth.lease_duration {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        };
        info!(
            lease_seconds = auth.lease_duration,
            "logged in to backend"
        );
        session.token = Some(auth.client_token.clone());
        session.expires_at = expires_at;
        Ok(auth.client_token)
    }

    /// Read the secret at `path`; None when the path holds nothing
    pub async fn read(&self, path: &str) -> Result<Option<SecretData>> {
        let token = self.session_token().await?;
        let correlation = self.next_correlation();
        let span = info_span!("backend_read", correlation = %correlation, path = %path);
        async {
            let result = self.api.read(&token, path).await;
            if let Err(e) = &result {
                error!(error = %e, "backend read failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Write `data` to `path`; Some for endpoints that return data
    pub async fn write(&self, path: &str, data: Value) -> Result<Option<SecretData>> {
        let token = self.session_token().await?;
        let correlation = self.next_correlation();
        let span = info_span!("backend_write", correlation = %correlation, path = %path);
        async {
            let result = self.api.write(&token, path, data).await;
            if let Err(e) = &result {
                error!(error = %e, "backend write failed");
            }
            result
        }
        .instrument(span)
        .await
    }
}
