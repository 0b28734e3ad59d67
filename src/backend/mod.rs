//! Raw backend API surface
//!
//! This module speaks the secret-store backend's versioned HTTP API and
//! nothing else: no login management, no certificates, no bootstrap state.
//! The [`BackendApi`] trait abstracts the surface so higher layers can be
//! tested against mocks or an in-memory backend while production uses the
//! reqwest-based [`HttpBackend`].
//!
//! Error mapping contract: transport failures surface as transport errors;
//! non-success statuses surface as named API errors carrying the status and
//! the backend's reported messages; a missing secret on logical read/write
//! (404) maps to `Ok(None)` so callers can treat absence as data, not
//! failure.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::Result;

/// Header carrying the backend token on authenticated requests
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Backend health as reported by the health endpoint
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthStatus {
    /// Whether the backend has been initialized
    pub initialized: bool,
    /// Whether the backend is currently sealed
    pub sealed: bool,
}

/// Result of initializing the backend
#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    /// Unseal key shares
    pub keys: Vec<String>,
    /// The maximal-privilege root token
    pub root_token: String,
}

/// Seal state as reported after an unseal attempt or a status query
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SealStatus {
    /// Whether the backend remains sealed
    pub sealed: bool,
}

/// Authentication payload returned by login and token-create operations
#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
    /// The newly minted token
    pub client_token: String,
    /// Validity of the token in seconds; zero means non-expiring
    pub lease_duration: u64,
}

/// Data payload of a logical read/write response
pub type SecretData = serde_json::Map<String, Value>;

/// The backend RPC operations warden consumes.
///
/// All operations are black-box remote calls; methods taking a `token`
/// authenticate with it, the rest are unauthenticated by the backend's own
/// contract (health, init, unseal, login).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Query initialization and seal state
    async fn health(&self) -> Result<HealthStatus>;

    /// Initialize the backend with the given share count and threshold.
    ///
    /// Fails on an already-initialized backend; callers must never reach
    /// for this as a recovery mechanism.
    async fn init(&self, shares: u32, threshold: u32) -> Result<InitResponse>;

    /// Submit one unseal key share
    async fn unseal(&self, key: &str) -> Result<SealStatus>;

    /// Query seal state without submitting a share
    async fn seal_status(&self) -> Result<SealStatus>;

    /// Read a named access policy; None when the policy does not exist
    async fn policy_read(&self, token: &str, name: &str) -> Result<Option<String>>;

    /// Create or overwrite a named access policy
    async fn policy_write(&self, token: &str, name: &str, document: &str) -> Result<()>;

    /// List enabled secret-engine mount points (paths end with `/`)
    async fn mounts(&self, token: &str) -> Result<Vec<String>>;

    /// Enable a secrets engine of the given type at the given mount point
    async fn enable_mount(&self, token: &str, path: &str, engine: &str) -> Result<()>;

    /// Tune a mount's maximum lease TTL
    async fn tune_mount(&self, token: &str, path: &str, max_lease_ttl: &str) -> Result<()>;

    /// Create a periodic token scoped to the given policies
    async fn create_token(&self, token: &str, policies: &[String], period: &str) -> Result<Auth>;

    /// Whether `target` is a currently valid token
    async fn lookup_token(&self, token: &str, target: &str) -> Result<bool>;

    /// Renew `target` for another period
    async fn renew_token(&self, target: &str) -> Result<Auth>;

    /// Application-role login; None when the response lacks an auth payload
    async fn login_app_role(&self, role_id: &str, secret_id: &str) -> Result<Option<Auth>>;

    /// Platform-identity login exchanging a service-identity token;
    /// None when the response lacks an auth payload
    async fn login_platform_identity(&self, role: &str, jwt: &str) -> Result<Option<Auth>>;

    /// Generic path-based read; None when the path has no secret
    async fn read(&self, token: &str, path: &str) -> Result<Option<SecretData>>;

    /// Generic path-based write; Some for endpoints that return data
    async fn write(&self, token: &str, path: &str, data: Value) -> Result<Option<SecretData>>;
}

/// Error body shape of backend error responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// Production [`BackendApi`] implementation over the backend's HTTP API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Create a client for the backend at the given base address
    pub fn new(addr: &str) -> Result<Self> {
        let base = Url::parse(addr)
            .map_err(|e| Error::config(format!("invalid backend address {:?}: {}", addr, e)))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("v1/{}", path))
            .map_err(|e| Error::config(format!("invalid backend path {:?}: {}", path, e)))
    }

    /// Turn a non-success response into a named API error
    async fn into_api_error(resp: reqwest::Response) -> Error {
        let status = resp.status().as_u16();
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
            _ => "no error detail".to_string(),
        };
        Error::api(status, message)
    }

    async fn get_json(&self, token: Option<&str>, path: &str) -> Result<Option<Value>> {
        let mut req = self.http.get(self.endpoint(path)?);
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::into_api_error(resp).await);
        }
        Ok(Some(resp.json().await?))
    }

    async fn put_json(
        &self,
        token: Option<&str>,
        path: &str,
        body: &Value,
    ) -> Result<Option<Value>> {
        let mut req = self.http.put(self.endpoint(path)?).json(body);
        if let Some(token) = token {
            req = req.header(TOKEN_HEADER, token);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::into_api_error(resp).await);
        }
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        // Some write endpoints return 200 with an empty body
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Extract the `auth` payload of a login-shaped response
    fn auth_payload(body: Value) -> Result<Option<Auth>> {
        match body.get("auth") {
            Some(Value::Null) | None => Ok(None),
            Some(auth) => Ok(Some(serde_json::from_value(auth.clone())?)),
        }
    }

    /// Extract the `data` payload of a read-shaped response
    fn data_payload(body: Value) -> Result<SecretData> {
        match body.get("data") {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Err(Error::MissingData),
        }
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn health(&self) -> Result<HealthStatus> {
        // The health endpoint encodes state in its status code (sealed and
        // uninitialized backends answer non-200) but always carries the
        // JSON body; parse the body whatever the status.
        let resp = self.http.get(self.endpoint("sys/health")?).send().await?;
        Ok(resp.json().await?)
    }

    async fn init(&self, shares: u32, threshold: u32) -> Result<InitResponse> {
        let body = serde_json::json!({
            "secret_shares": shares,
            "secret_threshold": threshold,
        });
        let value = self
            .put_json(None, "sys/init", &body)
            .await?
            .ok_or(Error::EmptyResponse)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn unseal(&self, key: &str) -> Result<SealStatus> {
        let body = serde_json::json!({ "key": key });
        let value = self
            .put_json(None, "sys/unseal", &body)
            .await?
            .ok_or(Error::EmptyResponse)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn seal_status(&self) -> Result<SealStatus> {
        let value = self
            .get_json(None, "sys/seal-status")
            .await?
            .ok_or(Error::EmptyResponse)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn policy_read(&self, token: &str, name: &str) -> Result<Option<String>> {
        let path = format!("sys/policies/acl/{}", name);
        let Some(body) = self.get_json(Some(token), &path).await? else {
            return Ok(None);
        };
        let data = Self::data_payload(body)?;
        match data.get("policy") {
            Some(Value::String(document)) => Ok(Some(document.clone())),
            Some(_) => Err(Error::field_type("policy")),
            None => Err(Error::missing_field("policy")),
        }
    }

    async fn policy_write(&self, token: &str, name: &str, document: &str) -> Result<()> {
        let path = format!("sys/policies/acl/{}", name);
        let body = serde_json::json!({ "policy": document });
        self.put_json(Some(token), &path, &body).await?;
        Ok(())
    }

    async fn mounts(&self, token: &str) -> Result<Vec<String>> {
        let body = self
            .get_json(Some(token), "sys/mounts")
            .await?
            .ok_or(Error::EmptyResponse)?;
        // Mount listings nest under "data" on current backends; older ones
        // return the map at the top level.
        let map = match body.get("data") {
            Some(Value::Object(map)) => map.clone(),
            _ => match body {
                Value::Object(map) => map,
                _ => return Err(Error::MissingData),
            },
        };
        Ok(map
            .into_iter()
            .filter(|(path, info)| path.ends_with('/') && info.is_object())
            .map(|(path, _)| path)
            .collect())
    }

    async fn enable_mount(&self, token: &str, path: &str, engine: &str) -> Result<()> {
        let body = serde_json::json!({ "type": engine });
        self.put_json(Some(token), &format!("sys/mounts/{}", path), &body)
            .await?;
        Ok(())
    }

    async fn tune_mount(&self, token: &str, path: &str, max_lease_ttl: &str) -> Result<()> {
        let body = serde_json::json!({ "max_lease_ttl": max_lease_ttl });
        self.put_json(Some(token), &format!("sys/mounts/{}/tune", path), &body)
            .await?;
        Ok(())
    }

    async fn create_token(&self, token: &str, policies: &[String], period: &str) -> Result<Auth> {
        let body = serde_json::json!({
            "policies": policies,
            "period": period,
        });
        let value = self
            .put_json(Some(token), "auth/token/create", &body)
            .await?
            .ok_or(Error::EmptyResponse)?;
        Self::auth_payload(value)?.ok_or(Error::MissingAuth)
    }

    async fn lookup_token(&self, token: &str, target: &str) -> Result<bool> {
        let body = serde_json::json!({ "token": target });
        match self
            .put_json(Some(token), "auth/token/lookup", &body)
            .await
        {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            // The backend answers an invalid or expired token with a client
            // error, which here means "not configured", not a failure.
            Err(Error::Api { status, .. }) if (400..500).contains(&status) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn renew_token(&self, target: &str) -> Result<Auth> {
        let value = self
            .put_json(Some(target), "auth/token/renew-self", &Value::Null)
            .await?
            .ok_or(Error::EmptyResponse)?;
        Self::auth_payload(value)?.ok_or(Error::MissingAuth)
    }

    async fn login_app_role(&self, role_id: &str, secret_id: &str) -> Result<Option<Auth>> {
        let body = serde_json::json!({
            "role_id": role_id,
            "secret_id": secret_id,
        });
        match self.put_json(None, "auth/approle/login", &body).await? {
            Some(value) => Self::auth_payload(value),
            None => Ok(None),
        }
    }

    async fn login_platform_identity(&self, role: &str, jwt: &str) -> Result<Option<Auth>> {
        let body = serde_json::json!({
            "role": role,
            "jwt": jwt,
        });
        match self.put_json(None, "auth/kubernetes/login", &body).await? {
            Some(value) => Self::auth_payload(value),
            None => Ok(None),
        }
    }

    async fn read(&self, token: &str, path: &str) -> Result<Option<SecretData>> {
        match self.get_json(Some(token), path).await? {
            Some(body) => Ok(Some(Self::data_payload(body)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, token: &str, path: &str, data: Value) -> Result<Option<SecretData>> {
        match self.put_json(Some(token), path, &data).await? {
            Some(body) => Ok(Some(Self::data_payload(body)?)),
            None => Ok(None),
        }
    }
}
