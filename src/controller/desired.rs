//! Desired configuration objects
//!
//! Value objects describing the target backend configuration at each
//! reconciliation state. They are computed from static configuration and
//! compared against what the backend reports; nothing here is persisted or
//! mutated by handlers.

use serde_json::{json, Value};

use crate::backend::SecretData;

/// Name of the policy granting identity-token operations
pub const POLICY_ROOT_IDENTITY: &str = "root-identity";
/// Name of the policy granting application-role management
pub const POLICY_APP_ROLE: &str = "app-role";
/// Name of the policy the operational token is scoped to
pub const POLICY_CERT_MANAGER: &str = "cert-manager";

/// Maximum lease TTL the PKI mount is tuned to (ten years)
pub const PKI_MAX_LEASE_TTL: &str = "87600h";

/// Desired issuing-certificate and CRL-distribution URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredUrls {
    /// Where issued certificates point for the issuing CA
    pub issuing_certificates: Vec<String>,
    /// Where issued certificates point for revocation lists
    pub crl_distribution_points: Vec<String>,
}

impl DesiredUrls {
    /// Derive the URLs from the externally reachable service URL
    pub fn derive(external_url: &str, pki_mount: &str) -> Self {
        let base = external_url.trim_end_matches('/');
        Self {
            issuing_certificates: vec![format!("{}/v1/{}/ca", base, pki_mount)],
            crl_distribution_points: vec![format!("{}/v1/{}/crl", base, pki_mount)],
        }
    }

    /// Whether the backend-reported URL configuration matches
    pub fn matches(&self, reported: &SecretData) -> bool {
        string_list(reported, "issuing_certificates") == self.issuing_certificates
            && string_list(reported, "crl_distribution_points") == self.crl_distribution_points
    }

    /// The write payload establishing this configuration
    pub fn write_payload(&self) -> Value {
        json!({
            "issuing_certificates": self.issuing_certificates,
            "crl_distribution_points": self.crl_distribution_points,
        })
    }
}

/// Desired parameters of the certificate signing role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRole {
    /// Whether any common name may be requested
    pub allow_any_name: bool,
    /// Organization stamped into issued certificates
    pub organization: String,
    /// Longest TTL a caller may request, in seconds
    pub max_ttl_secs: u64,
    /// Backdating slack applied to not-before, in seconds
    pub not_before_secs: u64,
}

impl DesiredRole {
    /// Derive the signing-role parameters from static configuration
    pub fn derive(organization: &str) -> Self {
        Self {
            allow_any_name: true,
            organization: organization.to_string(),
            // One year of issuance headroom, one minute of clock slack
            max_ttl_secs: 365 * 24 * 60 * 60,
            not_before_secs: 60,
        }
    }

    /// Whether the backend-reported role matches these parameters
    pub fn matches(&self, reported: &SecretData) -> bool {
        reported.get("allow_any_name").and_then(Value::as_bool) == Some(self.allow_any_name)
            && string_list(reported, "organization") == vec![self.organization.clone()]
            && reported.get("max_ttl").and_then(Value::as_u64) == Some(self.max_ttl_secs)
            && reported.get("not_before_duration").and_then(Value::as_u64)
                == Some(self.not_before_secs)
    }

    /// The write payload establishing this configuration
    pub fn write_payload(&self) -> Value {
        json!({
            "allow_any_name": self.allow_any_name,
            "organization": [self.organization],
            "max_ttl": self.max_ttl_secs,
            "not_before_duration": self.not_before_secs,
        })
    }
}

/// The three access-policy documents, in write order.
///
/// Documents are compared trimmed, so trailing-newline differences between
/// what was written and what the backend stores never count as drift.
pub fn policy_documents(pki_mount: &str) -> Vec<(&'static str, String)> {
    let root_identity = r#"path "identity/oidc/token/*" {
  capabilities = ["read"]
}
path "identity/oidc/role/*" {
  capabilities = ["create", "read", "update"]
}
"#
    .to_string();

    let app_role = r#"path "auth/approle/role/*" {
  capabilities = ["create", "read", "update"]
}
"#
    .to_string();

    let cert_manager = format!(
        r#"path "{mount}/issue/*" {{
  capabilities = ["create", "update"]
}}
path "{mount}/cert/*" {{
  capabilities = ["read"]
}}
path "auth/token/renew-self" {{
  capabilities = ["update"]
}}
"#,
        mount = pki_mount
    );

    vec![
        (POLICY_ROOT_IDENTITY, root_identity),
        (POLICY_APP_ROLE, app_role),
        (POLICY_CERT_MANAGER, cert_manager),
    ]
}

/// Extract a list of strings from a reported configuration field
fn string_list(data: &SecretData, field: &str) -> Vec<String> {
    data.get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_data(value: Value) -> SecretData {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn urls_derive_from_the_external_address() {
        let urls = DesiredUrls::derive("https://secrets.platform.example.com/", "pki");
        assert_eq!(
            urls.issuing_certificates,
            vec!["https://secrets.platform.example.com/v1/pki/ca".to_string()]
        );
        assert_eq!(
            urls.crl_distribution_points,
            vec!["https://secrets.platform.example.com/v1/pki/crl".to_string()]
        );
    }

    #[test]
    fn urls_round_trip_through_their_own_payload() {
        let urls = DesiredUrls::derive("https://secrets.example.com", "pki");
        let reported = as_data(urls.write_payload());
        assert!(urls.matches(&reported));
    }

    #[test]
    fn url_drift_is_detected() {
        let urls = DesiredUrls::derive("https://secrets.example.com", "pki");
        let reported = as_data(json!({
            "issuing_certificates": ["https://old.example.com/v1/pki/ca"],
            "crl_distribution_points": ["https://secrets.example.com/v1/pki/crl"],
        }));
        assert!(!urls.matches(&reported));
    }

    #[test]
    fn role_round_trips_through_its_own_payload() {
        let role = DesiredRole::derive("Warden");
        let reported = as_data(role.write_payload());
        assert!(role.matches(&reported));
    }

    #[test]
    fn role_drift_is_detected_per_field() {
        let role = DesiredRole::derive("Warden");

        let mut reported = as_data(role.write_payload());
        reported.insert("allow_any_name".to_string(), json!(false));
        assert!(!role.matches(&reported));

        let mut reported = as_data(role.write_payload());
        reported.insert("max_ttl".to_string(), json!(60));
        assert!(!role.matches(&reported));

        let mut reported = as_data(role.write_payload());
        reported.insert("organization".to_string(), json!(["Someone Else"]));
        assert!(!role.matches(&reported));
    }

    #[test]
    fn missing_fields_never_match() {
        let role = DesiredRole::derive("Warden");
        assert!(!role.matches(&SecretData::new()));

        let urls = DesiredUrls::derive("https://secrets.example.com", "pki");
        assert!(!urls.matches(&SecretData::new()));
    }

    #[test]
    fn three_policies_in_write_order() {
        let policies = policy_documents("pki");
        let names: Vec<_> = policies.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![POLICY_ROOT_IDENTITY, POLICY_APP_ROLE, POLICY_CERT_MANAGER]
        );
    }

    #[test]
    fn cert_manager_policy_covers_issue_and_renew() {
        let policies = policy_documents("pki");
        let (_, cert_manager) = policies
            .iter()
            .find(|(name, _)| *name == POLICY_CERT_MANAGER)
            .unwrap();
        assert!(cert_manager.contains("path \"pki/issue/*\""));
        assert!(cert_manager.contains("auth/token/renew-self"));
    }
}
