//! Static configuration for warden
//!
//! Configuration is resolved once at startup (CLI flags and environment in
//! the binary) and passed by value to the components that need it. Auth
//! settings arrive as three optional methods and are validated into the
//! single [`AuthMethod`] actually used; supplying zero or more than one is
//! a configuration error and the component refuses to start.

use std::path::PathBuf;
use std::time::Duration;

use crate::client::AuthMethod;
use crate::error::Error;
use crate::Result;

/// Default location of the platform service-identity token file
pub const DEFAULT_IDENTITY_TOKEN_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Static configuration for the controller and issuance layer
#[derive(Debug, Clone)]
pub struct Config {
    /// Base address of the secret-store backend, e.g. `http://127.0.0.1:8200`
    pub backend_addr: String,
    /// Externally reachable URL of the backend, embedded in issuing/CRL URLs
    pub external_url: String,
    /// Base DNS domain the signing role issues under
    pub base_dns: String,
    /// Organization written into the signing role and generated CA material
    pub organization: String,
    /// Root directory for locally persisted secrets
    pub secrets_dir: PathBuf,
    /// Mount point of the PKI secrets engine
    pub pki_mount: String,
    /// Name of the certificate signing role
    pub signing_role: String,
    /// Interval between discovery/reconcile ticks
    pub tick_interval: Duration,
    /// Period of the operational token; renewal runs at a quarter of this
    pub token_period: Duration,
    /// Bound on handler invocations within one reconcile cycle
    pub max_state_changes: usize,
    /// Listen port for the status/metrics endpoint
    pub status_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_addr: "http://127.0.0.1:8200".to_string(),
            external_url: "http://127.0.0.1:8200".to_string(),
            base_dns: "platform.local".to_string(),
            organization: "Warden".to_string(),
            secrets_dir: PathBuf::from("/var/lib/warden/secrets"),
            pki_mount: crate::DEFAULT_PKI_MOUNT.to_string(),
            signing_role: crate::DEFAULT_SIGNING_ROLE.to_string(),
            tick_interval: Duration::from_secs(crate::DEFAULT_TICK_SECS),
            token_period: Duration::from_secs(crate::DEFAULT_TOKEN_PERIOD_SECS),
            max_state_changes: crate::DEFAULT_MAX_STATE_CHANGES,
            status_port: crate::DEFAULT_STATUS_PORT,
        }
    }
}

impl Config {
    /// Interval between operational-token renewal attempts.
    ///
    /// One quarter of the token period, so a renewal can fail three times
    /// before the token ever approaches expiry.
    pub fn renew_interval(&self) -> Duration {
        self.token_period / 4
    }

    /// The token period in the backend's duration syntax (whole seconds)
    pub fn token_period_string(&self) -> String {
        format!("{}s", self.token_period.as_secs())
    }
}

/// Raw authentication settings as supplied by flags or environment.
///
/// At most one of the three methods may be configured; [`AuthSettings::method`]
/// enforces exactly one.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// Pre-shared backend token
    pub token: Option<String>,
    /// Platform-identity role to log in as
    pub platform_identity_role: Option<String>,
    /// Path to the local service-identity token file
    pub identity_token_file: Option<PathBuf>,
    /// Application-role id
    pub app_role_id: Option<String>,
    /// Application-role secret id
    pub app_role_secret: Option<String>,
}

impl AuthSettings {
    /// Validate the settings into the single login method to use.
    ///
    /// Exactly one method must be configured. An application-role id
    /// without its secret (or vice versa) is also rejected.
    pub fn method(&self) -> Result<AuthMethod> {
        let has_approle = self.app_role_id.is_some() || self.app_role_secret.is_some();
        let configured = [
            self.token.is_some(),
            self.platform_identity_role.is_some(),
            has_approle,
        ]
        .iter()
        .filter(|set| **set)
        .count();

        if configured == 0 {
            return Err(Error::config(
                "no login method configured: set a token, a platform-identity role, \
                 or an application-role id/secret pair",
            ));
        }
        if configured > 1 {
            return Err(Error::config(
                "ambiguous login configuration: exactly one of token, \
                 platform-identity role, or application role may be set",
            ));
        }

        if let Some(token) = &self.token {
            return Ok(AuthMethod::Token(token.clone()));
        }
        if let Some(role) = &self.platform_identity_role {
            let token_file = self
                .identity_token_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_TOKEN_FILE));
            return Ok(AuthMethod::PlatformIdentity {
                role: role.clone(),
                token_file,
            });
        }
        match (&self.app_role_id, &self.app_role_secret) {
            (Some(role_id), Some(secret_id)) => Ok(AuthMethod::AppRole {
                role_id: role_id.clone(),
                secret_id: secret_id.clone(),
            }),
            _ => Err(Error::config(
                "application-role login requires both a role id and a secret id",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent_with_crate_constants() {
        let config = Config::default();
        assert_eq!(config.pki_mount, crate::DEFAULT_PKI_MOUNT);
        assert_eq!(config.signing_role, crate::DEFAULT_SIGNING_ROLE);
        assert_eq!(config.max_state_changes, crate::DEFAULT_MAX_STATE_CHANGES);
    }

    #[test]
    fn renew_interval_is_a_quarter_period() {
        let config = Config {
            token_period: Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        };
        assert_eq!(config.renew_interval(), Duration::from_secs(6 * 60 * 60));
        assert_eq!(config.token_period_string(), "86400s");
    }

    #[test]
    fn zero_methods_is_a_configuration_error() {
        let settings = AuthSettings::default();
        let err = settings.method().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("no login method"));
    }

    #[test]
    fn two_methods_is_a_configuration_error() {
        let settings = AuthSettings {
            token: Some("s.abc".to_string()),
            platform_identity_role: Some("warden".to_string()),
            ..Default::default()
        };
        let err = settings.method().unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn token_method_is_selected() {
        let settings = AuthSettings {
            token: Some("s.abc".to_string()),
            ..Default::default()
        };
        match settings.method().unwrap() {
            AuthMethod::Token(token) => assert_eq!(token, "s.abc"),
            other => panic!("expected token method, got {:?}", other),
        }
    }

    #[test]
    fn platform_identity_gets_default_token_file() {
        let settings = AuthSettings {
            platform_identity_role: Some("warden".to_string()),
            ..Default::default()
        };
        match settings.method().unwrap() {
            AuthMethod::PlatformIdentity { role, token_file } => {
                assert_eq!(role, "warden");
                assert_eq!(token_file, PathBuf::from(DEFAULT_IDENTITY_TOKEN_FILE));
            }
            other => panic!("expected platform identity, got {:?}", other),
        }
    }

    #[test]
    fn half_an_approle_pair_is_rejected() {
        let settings = AuthSettings {
            app_role_id: Some("role-id".to_string()),
            ..Default::default()
        };
        let err = settings.method().unwrap_err();
        assert!(err.to_string().contains("both a role id and a secret id"));
    }
}
