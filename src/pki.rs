//! Certificate comparison and CA material generation
//!
//! The controller compares the CA certificate reported by the backend with
//! the locally persisted one. Comparison happens on the parsed form (PEM
//! decoded to DER, validated as X.509) so that line-wrapping or whitespace
//! differences never cause spurious reconfiguration.

use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa,
    KeyPair, KeyUsagePurpose,
};
use x509_parser::prelude::*;

use crate::error::Error;
use crate::Result;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| Error::certificate(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Compare two PEM-encoded certificates for semantic equality.
///
/// Both sides are decoded to DER and validated as X.509 certificates before
/// the DER forms are compared, so two encodings of the same certificate
/// compare equal regardless of PEM wrapping. A side that fails to decode or
/// parse is an error, never silent inequality.
pub fn same_certificate(a_pem: &str, b_pem: &str) -> Result<bool> {
    let a_der = parse_pem(a_pem)?;
    let b_der = parse_pem(b_pem)?;

    X509Certificate::from_der(&a_der)
        .map_err(|e| Error::certificate(format!("failed to parse certificate: {}", e)))?;
    X509Certificate::from_der(&b_der)
        .map_err(|e| Error::certificate(format!("failed to parse certificate: {}", e)))?;

    Ok(a_der == b_der)
}

/// A CA certificate and private key pair in PEM form
#[derive(Debug, Clone)]
pub struct CaMaterial {
    /// Self-signed CA certificate
    pub certificate_pem: String,
    /// CA private key
    pub private_key_pem: String,
}

impl CaMaterial {
    /// The certificate and key concatenated as a single PEM bundle, the
    /// form the backend's CA-configuration endpoint expects
    pub fn pem_bundle(&self) -> String {
        format!(
            "{}\n{}",
            self.certificate_pem.trim_end(),
            self.private_key_pem.trim_end()
        )
    }
}

/// Generate a self-signed root CA certificate and key pair.
///
/// Used once on first startup when no CA material has been persisted yet;
/// thereafter the persisted pair is the source of truth.
pub fn generate_ca(common_name: &str, organization: &str) -> Result<CaMaterial> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(organization.to_string()),
    );
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    // 20 year validity
    params.not_before = date_time_ymd(2025, 1, 1);
    params.not_after = date_time_ymd(2045, 1, 1);

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::certificate(format!("failed to generate CA key: {}", e)))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::certificate(format!("failed to self-sign CA certificate: {}", e)))?;

    Ok(CaMaterial {
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}
