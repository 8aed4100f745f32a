//! Identity model and the signing capability seam.
//!
//! An identity is an end-entity certificate, its optional intermediate chain,
//! and a way to produce signatures with the matching private key. Consumers
//! (CAdES, the sign workflow) depend only on [`SigningCapability`]; nothing
//! downstream branches on where the key actually lives.

use crate::domain::hash::HashAlgorithm;
use crate::infra::error::{SignerError, SignerResult};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Key family of a signing capability; selects the CMS signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
}

/// The one seam every signer implements: produce a signature over `message`
/// with the named hash. RSA implementations return a PKCS#1 v1.5 signature,
/// EC implementations a DER-encoded ECDSA-Sig-Value.
pub trait SigningCapability: Send {
    fn key_kind(&self) -> KeyKind;
    fn sign(&self, message: &[u8], hash: HashAlgorithm) -> SignerResult<Vec<u8>>;
}

/// DER-backed certificate with the handful of views the signer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    der: Vec<u8>,
}

impl CertificateData {
    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        Self { der }
    }

    /// Parse a single PEM CERTIFICATE block.
    pub fn from_pem(pem: &str) -> SignerResult<Self> {
        let der = pem_decode(pem, "CERTIFICATE")?;
        Ok(Self { der })
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    #[must_use]
    pub fn to_pem(&self) -> String {
        pem_encode(&self.der, "CERTIFICATE")
    }

    /// SHA-256 fingerprint of the DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.der).into()
    }

    /// Decode into the structured certificate form.
    pub fn parse(&self) -> SignerResult<x509_cert::Certificate> {
        use der::Decode;
        x509_cert::Certificate::from_der(&self.der)
            .map_err(|e| SignerError::Asn1(format!("certificate parse failed: {e}")))
    }

    /// Key family of the certificate's public key.
    pub fn public_key_kind(&self) -> SignerResult<KeyKind> {
        const OID_RSA: der::oid::ObjectIdentifier =
            der::oid::ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
        const OID_EC: der::oid::ObjectIdentifier =
            der::oid::ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

        let cert = self.parse()?;
        let alg = &cert.tbs_certificate.subject_public_key_info.algorithm;
        if alg.oid == OID_RSA {
            Ok(KeyKind::Rsa)
        } else if alg.oid == OID_EC {
            Ok(KeyKind::Ec)
        } else {
            Err(SignerError::Unsupported(format!(
                "unsupported public key algorithm {}",
                alg.oid
            )))
        }
    }
}

/// An identity as handed to callers: always a copy, never a shared handle
/// into the store.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable opaque id (UUIDv4 for stored identities, derived for system ones).
    pub id: String,
    pub friendly_name: String,
    pub cert: CertificateData,
    pub chain: Vec<CertificateData>,
    pub fingerprint: [u8; 32],
}

impl Identity {
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

/// Reference to a PKCS#11-resident key (NSS profile or hardware token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkcs11Ref {
    pub lib_path: String,
    pub profile_dir: String,
    pub slot: u64,
    pub cka_id: Vec<u8>,
}

/// Where a discovered system identity keeps its key.
#[derive(Debug, Clone)]
pub enum SystemProvenance {
    /// NSS or hardware key reachable through a PKCS#11 module.
    Pkcs11(Pkcs11Ref),
    /// OS keychain identity, re-found by certificate fingerprint on unlock.
    OsNative,
    /// Loose passwordless .p12 file found by the filesystem walk.
    LooseP12 { path: PathBuf },
}

/// Identity discovered outside the local store, with enough provenance to
/// import or unlock it later.
#[derive(Debug, Clone)]
pub struct SystemIdentity {
    pub identity: Identity,
    pub provenance: SystemProvenance,
}

/// Discovery filter shared by the OS-native and NSS scan paths: the
/// certificate must be inside its validity window and its key usage, when
/// present, must allow digitalSignature or nonRepudiation. Certificates
/// without a key-usage extension are accepted.
#[must_use]
pub fn usable_for_signing(cert: &x509_cert::Certificate, now: std::time::SystemTime) -> bool {
    use der::Decode;

    let validity = &cert.tbs_certificate.validity;
    if now < validity.not_before.to_system_time() || now > validity.not_after.to_system_time() {
        return false;
    }

    const OID_KEY_USAGE: der::oid::ObjectIdentifier =
        der::oid::ObjectIdentifier::new_unwrap("2.5.29.15");
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return true;
    };
    let Some(ku_ext) = extensions.iter().find(|e| e.extn_id == OID_KEY_USAGE) else {
        return true;
    };
    let Ok(key_usage) =
        x509_cert::ext::pkix::KeyUsage::from_der(ku_ext.extn_value.as_bytes())
    else {
        return true;
    };
    key_usage
        .0
        .contains(x509_cert::ext::pkix::KeyUsages::DigitalSignature)
        || key_usage
            .0
            .contains(x509_cert::ext::pkix::KeyUsages::NonRepudiation)
}

/// Encode DER bytes as a PEM block.
#[must_use]
pub fn pem_encode(der: &[u8], label: &str) -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

/// Decode the first PEM block with the given label.
pub fn pem_decode(pem: &str, label: &str) -> SignerResult<Vec<u8>> {
    use base64::Engine;
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = pem
        .find(&begin)
        .ok_or_else(|| SignerError::InvalidFile(format!("missing PEM {label} block")))?
        + begin.len();
    let stop = pem[start..]
        .find(&end)
        .ok_or_else(|| SignerError::InvalidFile(format!("unterminated PEM {label} block")))?
        + start;
    let body: String = pem[start..stop].chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| SignerError::InvalidFile(format!("invalid PEM base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_roundtrip() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let pem = pem_encode(&der, "CERTIFICATE");
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        assert_eq!(pem_decode(&pem, "CERTIFICATE").unwrap(), der);
    }

    #[test]
    fn test_pem_decode_rejects_missing_block() {
        assert!(pem_decode("garbage", "CERTIFICATE").is_err());
        let pem = pem_encode(&[1, 2, 3], "PRIVATE KEY");
        assert!(pem_decode(&pem, "CERTIFICATE").is_err());
    }

    #[test]
    fn test_fingerprint_is_sha256_of_der() {
        let cert = CertificateData::from_der(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            hex::encode(cert.fingerprint()),
            "5f78c33274e43fa9de5659265c1d917e25c03722dcb0b8d27db8d5feaa813953"
        );
    }

    #[test]
    fn test_pem_wraps_at_64_columns() {
        let der = vec![0xab; 100];
        let pem = pem_encode(&der, "CERTIFICATE");
        for line in pem.lines().filter(|l| !l.starts_with("-----")) {
            assert!(line.len() <= 64);
        }
    }
}
