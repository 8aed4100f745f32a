//! CAdES-BES detached signature assembly.
//!
//! Builds a CMS `SignedData` the organizer side re-verifies: detached
//! content (`encapContentInfo` carries no `eContent`), signed attributes
//! including `signingCertificateV2`, and the full intermediate chain in the
//! `certificates` field. The signing capability is invoked over the DER SET
//! encoding of the signed attributes; the same attribute bytes are embedded
//! `[0] IMPLICIT` in the `SignerInfo`.

use crate::domain::asn1;
use crate::domain::hash::HashAlgorithm;
use crate::domain::identity::{CertificateData, KeyKind, SigningCapability};
use crate::domain::manifest::SignPolicy;
use crate::infra::error::{SignerError, SignerResult};
use base64::Engine;
use chrono::{DateTime, Utc};
use der::Encode;

const OID_SIGNED_DATA: &str = "1.2.840.113549.1.7.2";
const OID_ID_DATA: &str = "1.2.840.113549.1.7.1";
const OID_CONTENT_TYPE: &str = "1.2.840.113549.1.9.3";
const OID_MESSAGE_DIGEST: &str = "1.2.840.113549.1.9.4";
const OID_SIGNING_TIME: &str = "1.2.840.113549.1.9.5";
pub const OID_SIGNING_CERTIFICATE_V2: &str = "1.2.840.113549.1.9.16.2.47";
pub const OID_SIGNATURE_POLICY_IDENTIFIER: &str = "1.2.840.113549.1.9.16.2.15";
const OID_SPQ_ETS_URI: &str = "1.2.840.113549.1.9.16.5.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";

/// Inputs beyond the identity itself.
pub struct SignOptions<'a> {
    pub signing_time: DateTime<Utc>,
    pub policy: Option<&'a SignPolicy>,
}

/// Produce a detached CAdES-BES signature over `content`.
pub fn sign_detached(
    capability: &dyn SigningCapability,
    cert: &CertificateData,
    chain: &[CertificateData],
    content: &[u8],
    opts: &SignOptions<'_>,
) -> SignerResult<Vec<u8>> {
    let attrs = build_signed_attributes(cert, content, opts)?;
    let set_der = asn1::set_of(attrs);

    log::debug!(
        "signing {} attribute bytes over {} content bytes",
        set_der.len(),
        content.len()
    );
    let signature = capability.sign(&set_der, HashAlgorithm::Sha256)?;

    let signer_info = build_signer_info(capability.key_kind(), cert, &set_der, &signature)?;
    assemble_signed_data(cert, chain, &signer_info)
}

/// The signed attributes, each a complete `Attribute` SEQUENCE. Assembly
/// order is contentType, signingTime, messageDigest, signingCertificateV2,
/// signaturePolicyIdentifier; the SET encoding re-sorts by DER bytes.
fn build_signed_attributes(
    cert: &CertificateData,
    content: &[u8],
    opts: &SignOptions<'_>,
) -> SignerResult<Vec<Vec<u8>>> {
    let mut attrs = Vec::with_capacity(5);

    attrs.push(attribute(
        OID_CONTENT_TYPE,
        must_oid(OID_ID_DATA)?,
    )?);
    attrs.push(attribute(
        OID_SIGNING_TIME,
        utc_time(&opts.signing_time),
    )?);
    attrs.push(attribute(
        OID_MESSAGE_DIGEST,
        asn1::wrap(
            asn1::TAG_OCTET_STRING,
            &HashAlgorithm::Sha256.digest(content),
        ),
    )?);
    attrs.push(attribute(
        OID_SIGNING_CERTIFICATE_V2,
        signing_certificate_v2(cert),
    )?);
    if let Some(policy) = opts.policy {
        if let Some(attr_value) = signature_policy_identifier(policy)? {
            attrs.push(attribute(OID_SIGNATURE_POLICY_IDENTIFIER, attr_value)?);
        }
    }

    Ok(attrs)
}

/// Attribute ::= SEQUENCE { type OID, values SET OF AttributeValue }
fn attribute(oid: &str, value: Vec<u8>) -> SignerResult<Vec<u8>> {
    let mut content = must_oid(oid)?;
    content.extend_from_slice(&asn1::wrap(asn1::TAG_SET, &value));
    Ok(asn1::wrap(asn1::TAG_SEQUENCE, &content))
}

/// SigningCertificateV2 ::= SEQUENCE { certs SEQUENCE OF ESSCertIDv2 } with
/// a single ESSCertIDv2 carrying sha256 (explicit NULL parameters) and the
/// end-entity certificate hash. The optional issuerSerial is omitted.
fn signing_certificate_v2(cert: &CertificateData) -> Vec<u8> {
    let cert_hash = HashAlgorithm::Sha256.digest(cert.as_der());
    let mut ess_cert = HashAlgorithm::Sha256.algorithm_identifier();
    ess_cert.extend_from_slice(&asn1::wrap(asn1::TAG_OCTET_STRING, &cert_hash));
    let ess_cert = asn1::wrap(asn1::TAG_SEQUENCE, &ess_cert);
    let certs = asn1::wrap(asn1::TAG_SEQUENCE, &ess_cert);
    asn1::wrap(asn1::TAG_SEQUENCE, &certs)
}

/// SignaturePolicyIdentifier ::= SEQUENCE { sigPolicyId OID, sigPolicyHash,
/// sigPolicyQualifiers OPTIONAL }. Returns `None` for policies without an
/// OID (implicit mode).
fn signature_policy_identifier(policy: &SignPolicy) -> SignerResult<Option<Vec<u8>>> {
    let Some(oid_str) = policy.oid.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let policy_oid = asn1::oid(oid_str).ok_or_else(|| SignerError::SignFailed {
        step: "policy",
        reason: format!("malformed policy OID: {oid_str}"),
    })?;

    let hash_bytes = match policy.hash.as_deref() {
        Some(b64) if !b64.is_empty() => base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| SignerError::SignFailed {
                step: "policy",
                reason: format!("invalid policy hash base64: {e}"),
            })?,
        _ => Vec::new(),
    };
    let mut sig_policy_hash = HashAlgorithm::Sha256.algorithm_identifier();
    sig_policy_hash.extend_from_slice(&asn1::wrap(asn1::TAG_OCTET_STRING, &hash_bytes));
    let sig_policy_hash = asn1::wrap(asn1::TAG_SEQUENCE, &sig_policy_hash);

    let mut content = policy_oid;
    content.extend_from_slice(&sig_policy_hash);

    if let Some(uri) = policy.uri.as_deref().filter(|s| !s.is_empty()) {
        let mut qualifier = must_oid(OID_SPQ_ETS_URI)?;
        qualifier.extend_from_slice(&asn1::wrap(asn1::TAG_IA5_STRING, uri.as_bytes()));
        let qualifier = asn1::wrap(asn1::TAG_SEQUENCE, &qualifier);
        content.extend_from_slice(&asn1::wrap(asn1::TAG_SEQUENCE, &qualifier));
    }

    Ok(Some(asn1::wrap(asn1::TAG_SEQUENCE, &content)))
}

fn build_signer_info(
    key_kind: KeyKind,
    cert: &CertificateData,
    attrs_set_der: &[u8],
    signature: &[u8],
) -> SignerResult<Vec<u8>> {
    let parsed = cert.parse()?;

    let mut si = Vec::new();
    // version 1: issuerAndSerialNumber identification
    si.extend_from_slice(&asn1::wrap(asn1::TAG_INTEGER, &[0x01]));

    let issuer_der = parsed
        .tbs_certificate
        .issuer
        .to_der()
        .map_err(|e| SignerError::Asn1(e.to_string()))?;
    let serial = asn1::integer(parsed.tbs_certificate.serial_number.as_bytes());
    let mut issuer_serial = issuer_der;
    issuer_serial.extend_from_slice(&serial);
    si.extend_from_slice(&asn1::wrap(asn1::TAG_SEQUENCE, &issuer_serial));

    si.extend_from_slice(&HashAlgorithm::Sha256.algorithm_identifier());

    // signedAttrs [0] IMPLICIT: same content bytes as the SET that was signed.
    let (_, attr_content) = split_tlv(attrs_set_der)?;
    si.extend_from_slice(&asn1::wrap(asn1::TAG_CONTEXT_0, attr_content));

    si.extend_from_slice(&signature_algorithm_identifier(key_kind)?);
    si.extend_from_slice(&asn1::wrap(asn1::TAG_OCTET_STRING, signature));

    Ok(asn1::wrap(asn1::TAG_SEQUENCE, &si))
}

/// rsaEncryption keeps its NULL parameters; ECDSA algorithm identifiers
/// carry none.
fn signature_algorithm_identifier(kind: KeyKind) -> SignerResult<Vec<u8>> {
    let content = match kind {
        KeyKind::Rsa => {
            let mut c = must_oid(OID_RSA_ENCRYPTION)?;
            c.extend_from_slice(&asn1::null());
            c
        }
        KeyKind::Ec => must_oid(OID_ECDSA_WITH_SHA256)?,
    };
    Ok(asn1::wrap(asn1::TAG_SEQUENCE, &content))
}

fn assemble_signed_data(
    cert: &CertificateData,
    chain: &[CertificateData],
    signer_info: &[u8],
) -> SignerResult<Vec<u8>> {
    let mut sd = Vec::new();
    // version 1
    sd.extend_from_slice(&asn1::wrap(asn1::TAG_INTEGER, &[0x01]));
    // digestAlgorithms SET
    sd.extend_from_slice(&asn1::wrap(
        asn1::TAG_SET,
        &HashAlgorithm::Sha256.algorithm_identifier(),
    ));
    // encapContentInfo: id-data, eContent omitted (detached)
    sd.extend_from_slice(&asn1::wrap(asn1::TAG_SEQUENCE, &must_oid(OID_ID_DATA)?));
    // certificates [0] IMPLICIT: end-entity first, then the chain
    let mut certs = cert.as_der().to_vec();
    for c in chain {
        certs.extend_from_slice(c.as_der());
    }
    sd.extend_from_slice(&asn1::wrap(asn1::TAG_CONTEXT_0, &certs));
    // signerInfos SET
    sd.extend_from_slice(&asn1::wrap(asn1::TAG_SET, signer_info));

    let signed_data = asn1::wrap(asn1::TAG_SEQUENCE, &sd);

    let mut ci = must_oid(OID_SIGNED_DATA)?;
    ci.extend_from_slice(&asn1::wrap(asn1::TAG_CONTEXT_0, &signed_data));
    Ok(asn1::wrap(asn1::TAG_SEQUENCE, &ci))
}

fn utc_time(time: &DateTime<Utc>) -> Vec<u8> {
    let formatted = time.format("%y%m%d%H%M%SZ").to_string();
    asn1::wrap(asn1::TAG_UTC_TIME, formatted.as_bytes())
}

fn must_oid(dotted: &str) -> SignerResult<Vec<u8>> {
    asn1::oid(dotted).ok_or_else(|| SignerError::SignFailed {
        step: "oid",
        reason: format!("malformed OID: {dotted}"),
    })
}

/// Split a DER TLV into (header length, content).
fn split_tlv(der: &[u8]) -> SignerResult<(usize, &[u8])> {
    if der.len() < 2 {
        return Err(SignerError::Asn1("short TLV".to_string()));
    }
    let first = der[1];
    let header = if first < 0x80 {
        2
    } else {
        2 + (first & 0x7f) as usize
    };
    if header > der.len() {
        return Err(SignerError::Asn1("truncated TLV header".to_string()));
    }
    Ok((header, &der[header..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pkcs12::SoftwareSigner;
    use crate::services::test_support;
    use chrono::TimeZone;

    fn sign_sample(policy: Option<&SignPolicy>) -> (Vec<u8>, CertificateData, Vec<u8>) {
        let pkey = test_support::rsa_key();
        let cert_x509 = test_support::self_signed_cert(&pkey, "CAdES Test");
        let cert = CertificateData::from_der(cert_x509.to_der().unwrap());
        let signer = SoftwareSigner::new(pkey).unwrap();
        let content = b"<SignaturaILP versio=\"1.0\"></SignaturaILP>".to_vec();
        let opts = SignOptions {
            signing_time: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
            policy,
        };
        let der = sign_detached(&signer, &cert, &[], &content, &opts).unwrap();
        (der, cert, content)
    }

    fn sample_policy() -> SignPolicy {
        SignPolicy {
            mode: "explicit".to_string(),
            oid: Some("2.16.724.1.3.1.1.2.1.9".to_string()),
            hash_alg: Some("SHA-256".to_string()),
            hash: Some(base64::engine::general_purpose::STANDARD.encode([0x5a; 32])),
            uri: Some("https://example.org/policy.pdf".to_string()),
        }
    }

    #[test]
    fn test_output_is_signed_data_content_info() {
        let (der, _, _) = sign_sample(None);
        assert_eq!(der[0], asn1::TAG_SEQUENCE);
        // contentType OID signedData appears right after the header.
        let signed_data_oid = must_oid(OID_SIGNED_DATA).unwrap();
        let pos = find(&der, &signed_data_oid).expect("signedData OID present");
        assert!(pos < 8);
    }

    #[test]
    fn test_detached_content_has_no_econtent() {
        let (der, _, content) = sign_sample(None);
        // The detached content bytes must not be embedded anywhere.
        assert!(find(&der, &content).is_none());
        // But its digest is a signed attribute.
        let digest = HashAlgorithm::Sha256.digest(&content);
        assert!(find(&der, &digest).is_some());
    }

    #[test]
    fn test_signing_certificate_v2_binds_cert_hash() {
        let (der, cert, _) = sign_sample(None);
        let cert_hash = HashAlgorithm::Sha256.digest(cert.as_der());
        assert!(find(&der, &cert_hash).is_some());
        let attr_oid = must_oid(OID_SIGNING_CERTIFICATE_V2).unwrap();
        assert!(find(&der, &attr_oid).is_some());
    }

    #[test]
    fn test_certificates_field_carries_chain() {
        let pkey = test_support::rsa_key();
        let ca_key = test_support::rsa_key();
        let cert_x509 = test_support::self_signed_cert(&pkey, "Leaf");
        let ca_x509 = test_support::self_signed_cert(&ca_key, "Intermediate CA");
        let cert = CertificateData::from_der(cert_x509.to_der().unwrap());
        let chain = vec![CertificateData::from_der(ca_x509.to_der().unwrap())];
        let signer = SoftwareSigner::new(pkey).unwrap();
        let opts = SignOptions {
            signing_time: Utc::now(),
            policy: None,
        };
        let der = sign_detached(&signer, &cert, &chain, b"content", &opts).unwrap();
        assert!(find(&der, cert.as_der()).is_some());
        assert!(find(&der, chain[0].as_der()).is_some());
    }

    #[test]
    fn test_policy_attribute_present_iff_policy_supplied() {
        let attr_oid = must_oid(OID_SIGNATURE_POLICY_IDENTIFIER).unwrap();
        let policy_oid = asn1::oid("2.16.724.1.3.1.1.2.1.9").unwrap();

        let (without, _, _) = sign_sample(None);
        assert!(find(&without, &attr_oid).is_none());

        let policy = sample_policy();
        let (with, _, _) = sign_sample(Some(&policy));
        assert!(find(&with, &attr_oid).is_some());
        assert!(find(&with, &policy_oid).is_some());
        // Policy hash and URI qualifier are embedded.
        assert!(find(&with, &[0x5a; 32]).is_some());
        assert!(find(&with, b"https://example.org/policy.pdf").is_some());
    }

    #[test]
    fn test_malformed_policy_oid_is_sign_failed() {
        let mut policy = sample_policy();
        policy.oid = Some("not.an.oid".to_string());
        let pkey = test_support::rsa_key();
        let cert = CertificateData::from_der(
            test_support::self_signed_cert(&pkey, "X").to_der().unwrap(),
        );
        let signer = SoftwareSigner::new(pkey).unwrap();
        let opts = SignOptions {
            signing_time: Utc::now(),
            policy: Some(&policy),
        };
        let err = sign_detached(&signer, &cert, &[], b"c", &opts).unwrap_err();
        assert!(matches!(err, SignerError::SignFailed { step: "policy", .. }));
    }

    #[test]
    fn test_signature_verifies_via_openssl_cms() {
        let (der, cert, content) = sign_sample(None);

        let pkcs7 = openssl::pkcs7::Pkcs7::from_der(&der).unwrap();
        let store = openssl::x509::store::X509StoreBuilder::new().unwrap().build();
        let signer_cert = openssl::x509::X509::from_der(cert.as_der()).unwrap();
        let mut certs = openssl::stack::Stack::new().unwrap();
        certs.push(signer_cert).unwrap();

        let mut out = Vec::new();
        pkcs7
            .verify(
                &certs,
                &store,
                Some(&content),
                Some(&mut out),
                openssl::pkcs7::Pkcs7Flags::NOVERIFY,
            )
            .unwrap();
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let (der, cert, _) = sign_sample(None);
        let pkcs7 = openssl::pkcs7::Pkcs7::from_der(&der).unwrap();
        let store = openssl::x509::store::X509StoreBuilder::new().unwrap().build();
        let signer_cert = openssl::x509::X509::from_der(cert.as_der()).unwrap();
        let mut certs = openssl::stack::Stack::new().unwrap();
        certs.push(signer_cert).unwrap();

        let result = pkcs7.verify(
            &certs,
            &store,
            Some(b"tampered content"),
            None,
            openssl::pkcs7::Pkcs7Flags::NOVERIFY,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ec_signature_verifies_via_openssl_cms() {
        let pkey = test_support::ec_key();
        let cert_x509 = test_support::self_signed_cert(&pkey, "EC Signer");
        let cert = CertificateData::from_der(cert_x509.to_der().unwrap());
        let signer = SoftwareSigner::new(pkey).unwrap();
        let content = b"ec signed content";
        let opts = SignOptions {
            signing_time: Utc::now(),
            policy: None,
        };
        let der = sign_detached(&signer, &cert, &[], content, &opts).unwrap();

        let pkcs7 = openssl::pkcs7::Pkcs7::from_der(&der).unwrap();
        let store = openssl::x509::store::X509StoreBuilder::new().unwrap().build();
        let mut certs = openssl::stack::Stack::new().unwrap();
        certs
            .push(openssl::x509::X509::from_der(cert.as_der()).unwrap())
            .unwrap();
        pkcs7
            .verify(
                &certs,
                &store,
                Some(content),
                None,
                openssl::pkcs7::Pkcs7Flags::NOVERIFY,
            )
            .unwrap();
    }

    #[test]
    fn test_utc_time_format() {
        let t = Utc.with_ymd_and_hms(2026, 2, 1, 9, 5, 7).unwrap();
        let der = utc_time(&t);
        assert_eq!(der[0], asn1::TAG_UTC_TIME);
        assert_eq!(&der[2..], b"260201090507Z");
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || haystack.len() < needle.len() {
            return None;
        }
        (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
    }
}
