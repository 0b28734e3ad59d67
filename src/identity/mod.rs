//! Identity and issuance operations
//!
//! Everything the platform consumes from the configured backend: leaf
//! certificates, the CA certificate, CRLs, application-role registrations,
//! and OIDC identity-token roles. Stateless except for the lazily
//! constructed backend client, which is built on first use and reused for
//! the life of the service.
//!
//! Field extraction from the backend's loosely typed responses goes through
//! [`string_field`], which turns each failure shape (no response, no data,
//! missing field, wrong type) into its own named error instead of a generic
//! not-found.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backend::{BackendApi, SecretData};
use crate::client::BackendClient;
use crate::config::AuthSettings;
use crate::error::Error;
use crate::Result;

/// Backend error fragment that marks a secret-id registration as already done
const ALREADY_REGISTERED: &str = "already registered";

/// Extract a required string field from a response data payload
fn string_field(data: &SecretData, field: &str) -> Result<String> {
    match data.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(Error::field_type(field)),
        None => Err(Error::missing_field(field)),
    }
}

/// The kind of identity token a role template is generated for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A device identity; carries the device identifier claim
    Device {
        /// Stable identifier of the device
        device_id: String,
    },
    /// A human user identity
    User,
    /// An application identity
    App,
}

impl TokenKind {
    fn type_claim(&self) -> &'static str {
        match self {
            Self::Device { .. } => "device",
            Self::User => "user",
            Self::App => "app",
        }
    }
}

/// Request for a role claim template
#[derive(Debug, Clone)]
pub struct RoleTemplateRequest {
    /// Token kind the template is for
    pub kind: TokenKind,
    /// Subject username embedded in the claims
    pub username: String,
    /// Group memberships embedded in the claims
    pub groups: Vec<String>,
}

/// Produce the JSON claim template for an identity-token role.
///
/// Pure function of the request; the not-before claim uses the backend's
/// issue-time template placeholder so every minted token carries its own
/// timestamp.
pub fn role_template(request: &RoleTemplateRequest) -> String {
    let mut claims = json!({
        "typ": request.kind.type_claim(),
        "username": request.username,
        "groups": request.groups,
        "nbf": "{{time.now}}",
    });
    if let TokenKind::Device { device_id } = &request.kind {
        claims["device_id"] = Value::String(device_id.clone());
    }
    claims.to_string()
}

/// Issuance operations against the configured backend
pub struct IdentityService {
    api: Arc<dyn BackendApi>,
    auth: AuthSettings,
    pki_mount: String,
    signing_role: String,
    client: OnceCell<BackendClient>,
}

impl IdentityService {
    /// Create a service issuing from the given PKI mount and signing role
    pub fn new(
        api: Arc<dyn BackendApi>,
        auth: AuthSettings,
        pki_mount: impl Into<String>,
        signing_role: impl Into<String>,
    ) -> Self {
        Self {
            api,
            auth,
            pki_mount: pki_mount.into(),
            signing_role: signing_role.into(),
            client: OnceCell::new(),
        }
    }

    /// The backend client, constructed on first use and reused thereafter
    async fn client(&self) -> Result<&BackendClient> {
        self.client
            .get_or_try_init(|| async {
                let method = self.auth.method()?;
                debug!(method = ?method, "constructing backend client");
                Ok(BackendClient::new(self.api.clone(), method))
            })
            .await
    }

    /// Issue a leaf certificate for `sans` valid for `ttl_hours`.
    ///
    /// Returns the certificate and private key PEMs.
    pub async fn issue_certificate(&self, sans: &str, ttl_hours: u64) -> Result<(String, String)> {
        let path = format!("{}/issue/{}", self.pki_mount, self.signing_role);
        let data = json!({
            "common_name": sans,
            "ttl": format!("{}h", ttl_hours),
        });
        let response = self
            .client()
            .await?
            .write(&path, data)
            .await?
            .ok_or(Error::EmptyResponse)?;

        let certificate = string_field(&response, "certificate")?;
        let private_key = string_field(&response, "private_key")?;
        info!(sans = %sans, ttl_hours, "issued certificate");
        Ok((certificate, private_key))
    }

    /// Read the CA certificate PEM
    pub async fn ca_certificate(&self) -> Result<String> {
        let path = format!("{}/cert/ca", self.pki_mount);
        let response = self
            .client()
            .await?
            .read(&path)
            .await?
            .ok_or(Error::EmptyResponse)?;
        string_field(&response, "certificate")
    }

    /// Read a previously issued certificate by its serial number
    pub async fn certificate(&self, serial: &str) -> Result<String> {
        let path = format!("{}/cert/{}", self.pki_mount, serial);
        let response = self
            .client()
            .await?
            .read(&path)
            .await?
            .ok_or(Error::EmptyResponse)?;
        string_field(&response, "certificate")
    }

    /// Read the current certificate revocation list PEM
    pub async fn crl(&self) -> Result<String> {
        let path = format!("{}/cert/crl", self.pki_mount);
        let response = self
            .client()
            .await?
            .read(&path)
            .await?
            .ok_or(Error::EmptyResponse)?;
        string_field(&response, "certificate")
    }

    /// Ensure an application role bound to `policies` exists and has
    /// `secret_id` registered under it.
    ///
    /// Both writes are idempotent: the role write overwrites, and a backend
    /// complaint that the secret id is already registered is converted to
    /// success rather than surfaced.
    pub async fn ensure_app_role(
        &self,
        role: &str,
        policies: &[String],
        secret_id: &str,
    ) -> Result<()> {
        let client = self.client().await?;

        let role_path = format!("auth/approle/role/{}", role);
        client
            .write(&role_path, json!({ "token_policies": policies }))
            .await?;

        let secret_path = format!("auth/approle/role/{}/custom-secret-id", role);
        match client
            .write(&secret_path, json!({ "secret_id": secret_id }))
            .await
        {
            Ok(_) => {}
            Err(e) if e.api_message_contains(ALREADY_REGISTERED) => {
                debug!(role = %role, "secret id already registered");
            }
            Err(e) => return Err(e),
        }
        info!(role = %role, "application role ensured");
        Ok(())
    }

    /// Ensure an OIDC identity-token role definition exists
    pub async fn ensure_identity_role(
        &self,
        role: &str,
        key: &str,
        ttl: &str,
        template: &str,
        client_id: &str,
    ) -> Result<()> {
        let path = format!("identity/oidc/role/{}", role);
        let data = json!({
            "key": key,
            "ttl": ttl,
            "template": template,
            "client_id": client_id,
        });
        self.client().await?.write(&path, data).await?;
        info!(role = %role, "identity role ensured");
        Ok(())
    }

    /// Read a freshly minted OIDC token for the named role
    pub async fn identity_token(&self, role: &str) -> Result<String> {
        let path = format!("identity/oidc/token/{}", role);
        let response = self
            .client()
            .await?
            .read(&path)
            .await?
            .ok_or(Error::EmptyResponse)?;
        string_field(&response, "token")
    }
}
