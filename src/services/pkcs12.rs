//! PKCS#12/PFX import pipeline.
//!
//! Real-world .p12 files are messier than the standard admits: legacy idCAT
//! exports are BER-encoded, passwordless exports commonly misreport as
//! protected, and BER→DER normalization invalidates the embedded MAC. The
//! decoder therefore runs an ordered sequence of decode attempts and returns
//! on the first success; the attempt list is the contract:
//!
//! 1. raw bytes, user password
//! 2. raw bytes, empty password
//! 3. normalized bytes, user password
//! 4. normalized bytes, empty password
//! 5. normalized bytes with MAC recomputed for the user password, user password
//! 6. normalized bytes with MAC recomputed for the empty password, empty password
//!
//! Attempts are deduplicated by (sha256(bytes), password).

use crate::domain::ber;
use crate::domain::hash::HashAlgorithm;
use crate::domain::identity::{CertificateData, KeyKind, SigningCapability};
use crate::infra::error::{SignerError, SignerResult};
use crate::services::p12_mac;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Private};
use sha2::{Digest, Sha256};

/// Successful parse result: a software signing capability plus the
/// certificate material that goes with it.
#[derive(Debug)]
pub struct ParsedIdentity {
    pub signer: SoftwareSigner,
    pub cert: CertificateData,
    pub chain: Vec<CertificateData>,
}

/// Software key held in process memory, wrapping an OpenSSL `PKey`.
#[derive(Debug)]
pub struct SoftwareSigner {
    pkey: PKey<Private>,
    kind: KeyKind,
}

impl SoftwareSigner {
    /// Wrap a parsed private key, rejecting key types without a signing
    /// capability.
    pub fn new(pkey: PKey<Private>) -> SignerResult<Self> {
        let kind = match pkey.id() {
            Id::RSA => KeyKind::Rsa,
            Id::EC => KeyKind::Ec,
            other => {
                return Err(SignerError::Unsupported(format!(
                    "key type {other:?} does not support signing"
                )))
            }
        };
        Ok(Self { pkey, kind })
    }

    /// Parse a DER PKCS#8 blob (the vault's at-rest format).
    pub fn from_pkcs8_der(der: &[u8]) -> SignerResult<Self> {
        let pkey = PKey::private_key_from_pkcs8(der)
            .map_err(|e| SignerError::Unsupported(format!("pkcs8 parse failed: {e}")))?;
        Self::new(pkey)
    }

    /// Serialize to DER PKCS#8 for vault storage.
    pub fn to_pkcs8_der(&self) -> SignerResult<Vec<u8>> {
        self.pkey
            .private_key_to_pkcs8()
            .map_err(|e| SignerError::Unsupported(format!("pkcs8 serialize failed: {e}")))
    }

    /// DER SubjectPublicKeyInfo of the key's public half.
    pub fn public_key_der(&self) -> SignerResult<Vec<u8>> {
        Ok(self.pkey.public_key_to_der()?)
    }
}

impl SigningCapability for SoftwareSigner {
    fn key_kind(&self) -> KeyKind {
        self.kind
    }

    fn sign(&self, message: &[u8], hash: HashAlgorithm) -> SignerResult<Vec<u8>> {
        let md = match hash {
            HashAlgorithm::Sha1 => MessageDigest::sha1(),
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Sha384 => MessageDigest::sha384(),
            HashAlgorithm::Sha512 => MessageDigest::sha512(),
        };
        let mut signer = openssl::sign::Signer::new(md, &self.pkey).map_err(|e| {
            SignerError::SignFailed {
                step: "signer init",
                reason: e.to_string(),
            }
        })?;
        signer
            .sign_oneshot_to_vec(message)
            .map_err(|e| SignerError::SignFailed {
                step: "sign",
                reason: e.to_string(),
            })
    }
}

/// Parse a PKCS#12 file through the attempt pipeline.
pub fn parse(data: &[u8], password: &str) -> SignerResult<ParsedIdentity> {
    let attempts = build_attempts(data, password);
    decode_with_attempts(openssl_decode, &attempts, password)
}

pub(crate) struct DecodeAttempt {
    data: Vec<u8>,
    password: String,
}

/// Why a single decode attempt failed.
pub(crate) enum DecodeFailure {
    /// MAC or decryption failure: wrong (or missing) password.
    Password,
    /// Anything else, with the decoder's message.
    Other(String),
}

pub(crate) fn build_attempts(data: &[u8], password: &str) -> Vec<DecodeAttempt> {
    let mut passwords = vec![password.to_string()];
    if !password.is_empty() {
        // Passwordless exports commonly misreport as protected.
        passwords.push(String::new());
    }

    let mut attempts: Vec<DecodeAttempt> = Vec::new();
    let mut seen: Vec<([u8; 32], String)> = Vec::new();

    for pass in &passwords {
        push_attempt(&mut attempts, &mut seen, data, pass);
    }

    let normalized = match ber::normalize(data) {
        Ok(n) => n,
        Err(_) => return attempts,
    };
    for pass in &passwords {
        push_attempt(&mut attempts, &mut seen, &normalized, pass);
    }

    // Normalization invalidates the original MAC bytes; retry with a MAC
    // recomputed for each candidate password.
    for pass in &passwords {
        if let Ok(rewritten) = p12_mac::recompute_pfx_mac(&normalized, pass) {
            push_attempt(&mut attempts, &mut seen, &rewritten, pass);
        }
    }

    attempts
}

fn push_attempt(
    attempts: &mut Vec<DecodeAttempt>,
    seen: &mut Vec<([u8; 32], String)>,
    payload: &[u8],
    pass: &str,
) {
    let key: ([u8; 32], String) = (Sha256::digest(payload).into(), pass.to_string());
    if seen.contains(&key) {
        return;
    }
    seen.push(key);
    attempts.push(DecodeAttempt {
        data: payload.to_vec(),
        password: pass.to_string(),
    });
}

pub(crate) fn decode_with_attempts<F>(
    mut decode: F,
    attempts: &[DecodeAttempt],
    user_password: &str,
) -> SignerResult<ParsedIdentity>
where
    F: FnMut(&[u8], &str) -> Result<ParsedIdentity, DecodeFailure>,
{
    let mut saw_password_failure = false;
    let mut first_other_failure: Option<String> = None;

    for attempt in attempts {
        match decode(&attempt.data, &attempt.password) {
            Ok(parsed) => return Ok(parsed),
            Err(DecodeFailure::Password) => saw_password_failure = true,
            Err(DecodeFailure::Other(msg)) => {
                if first_other_failure.is_none() {
                    first_other_failure = Some(msg);
                }
            }
        }
    }

    if saw_password_failure && first_other_failure.is_none() {
        if user_password.trim().is_empty() {
            return Err(SignerError::PasswordRequired);
        }
        return Err(SignerError::WrongPassword);
    }

    match first_other_failure {
        Some(msg) if is_likely_invalid_file(&msg) => Err(SignerError::InvalidFile(msg)),
        Some(msg) => Err(SignerError::Unsupported(msg)),
        None => Err(SignerError::Unsupported("unknown parse error".to_string())),
    }
}

fn openssl_decode(data: &[u8], password: &str) -> Result<ParsedIdentity, DecodeFailure> {
    let pkcs12 = openssl::pkcs12::Pkcs12::from_der(data)
        .map_err(|e| classify_openssl_failure(&e.to_string()))?;
    let parsed = pkcs12
        .parse2(password)
        .map_err(|e| classify_openssl_failure(&e.to_string()))?;

    let cert = parsed
        .cert
        .ok_or_else(|| DecodeFailure::Other("certificate missing".to_string()))?;
    let pkey = parsed
        .pkey
        .ok_or_else(|| DecodeFailure::Other("private key missing".to_string()))?;

    let cert_der = cert
        .to_der()
        .map_err(|e| DecodeFailure::Other(e.to_string()))?;
    let mut chain = Vec::new();
    if let Some(ca) = parsed.ca {
        for c in ca {
            let der = c.to_der().map_err(|e| DecodeFailure::Other(e.to_string()))?;
            chain.push(CertificateData::from_der(der));
        }
    }

    let signer = SoftwareSigner::new(pkey)
        .map_err(|e| DecodeFailure::Other(e.to_string()))?;
    Ok(ParsedIdentity {
        signer,
        cert: CertificateData::from_der(cert_der),
        chain,
    })
}

fn classify_openssl_failure(message: &str) -> DecodeFailure {
    if is_password_failure(message) {
        DecodeFailure::Password
    } else {
        DecodeFailure::Other(message.to_string())
    }
}

fn is_password_failure(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("mac verify failure")
        || msg.contains("mac verify error")
        || msg.contains("invalid password")
        || msg.contains("password incorrect")
        || msg.contains("bad decrypt")
        || msg.contains("decrypt error")
        || msg.contains("incorrect padding")
        || msg.contains("pkcs12 cipherfinal error")
}

fn is_likely_invalid_file(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("not der")
        || msg.contains("syntax error")
        || msg.contains("trailing data")
        || msg.contains("certificate missing")
        || msg.contains("private key missing")
        || msg.contains("error reading p12 data")
        || msg.contains("asn1 encoding routines")
        || msg.contains("wrong tag")
        || msg.contains("not enough data")
        || msg.contains("header too long")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_identity() -> ParsedIdentity {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        ParsedIdentity {
            signer: SoftwareSigner::new(pkey).unwrap(),
            cert: CertificateData::from_der(vec![0x30, 0x00]),
            chain: Vec::new(),
        }
    }

    #[test]
    fn test_attempt_order_and_dedup() {
        // Non-BER input: normalization of arbitrary DER succeeds and equals
        // the input, so normalized attempts dedup away.
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let attempts = build_attempts(&der, "pw");
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].password, "pw");
        assert_eq!(attempts[1].password, "");

        // BER input yields distinct normalized attempts.
        let ber = vec![0x30, 0x80, 0x02, 0x01, 0x05, 0x00, 0x00];
        let attempts = build_attempts(&ber, "pw");
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[0].data, ber);
        assert_eq!(attempts[2].data, vec![0x30, 0x03, 0x02, 0x01, 0x05]);
    }

    #[test]
    fn test_empty_password_not_duplicated() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let attempts = build_attempts(&der, "");
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].password, "");
    }

    #[test]
    fn test_unnormalizable_input_keeps_raw_attempts() {
        let garbage = vec![0x00, 0x01, 0x02];
        let attempts = build_attempts(&garbage, "pw");
        assert_eq!(attempts.len(), 2);
    }

    #[test]
    fn test_all_password_failures_without_user_password() {
        let attempts = build_attempts(&[0x30, 0x03, 0x02, 0x01, 0x05], "");
        let err = decode_with_attempts(
            |_, _| Err(DecodeFailure::Password),
            &attempts,
            "",
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::PasswordRequired));
    }

    #[test]
    fn test_all_password_failures_with_user_password() {
        let attempts = build_attempts(&[0x30, 0x03, 0x02, 0x01, 0x05], "wrong");
        let err = decode_with_attempts(
            |_, _| Err(DecodeFailure::Password),
            &attempts,
            "wrong",
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::WrongPassword));
    }

    #[test]
    fn test_structural_failure_wins_over_password_failure() {
        let attempts = build_attempts(&[0x30, 0x03, 0x02, 0x01, 0x05], "pw");
        let mut first = true;
        let err = decode_with_attempts(
            move |_, _| {
                if std::mem::take(&mut first) {
                    Err(DecodeFailure::Other("trailing data".to_string()))
                } else {
                    Err(DecodeFailure::Password)
                }
            },
            &attempts,
            "pw",
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::InvalidFile(_)));
    }

    #[test]
    fn test_unclassified_failure_is_unsupported() {
        let attempts = build_attempts(&[0x30, 0x03, 0x02, 0x01, 0x05], "pw");
        let err = decode_with_attempts(
            |_, _| Err(DecodeFailure::Other("martian key algorithm".to_string())),
            &attempts,
            "pw",
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::Unsupported(_)));
    }

    #[test]
    fn test_first_success_returns() {
        let attempts = build_attempts(&[0x30, 0x03, 0x02, 0x01, 0x05], "pw");
        let result = decode_with_attempts(
            |_, pass| {
                if pass.is_empty() {
                    Ok(dummy_identity())
                } else {
                    Err(DecodeFailure::Password)
                }
            },
            &attempts,
            "pw",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_garbage_input_classification() {
        let err = parse(&[0x00, 0x01, 0x02, 0x03], "").unwrap_err();
        assert!(matches!(
            err,
            SignerError::InvalidFile(_) | SignerError::Unsupported(_)
        ));
    }

    #[test]
    fn test_software_signer_rsa_roundtrip() {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let signer = SoftwareSigner::new(pkey.clone()).unwrap();
        assert_eq!(signer.key_kind(), KeyKind::Rsa);

        let sig = signer.sign(b"message", HashAlgorithm::Sha256).unwrap();
        let mut verifier =
            openssl::sign::Verifier::new(MessageDigest::sha256(), &pkey).unwrap();
        verifier.update(b"message").unwrap();
        assert!(verifier.verify(&sig).unwrap());
    }

    #[test]
    fn test_software_signer_ec_roundtrip() {
        let group =
            openssl::ec::EcGroup::from_curve_name(openssl::nid::Nid::X9_62_PRIME256V1).unwrap();
        let ec = openssl::ec::EcKey::generate(&group).unwrap();
        let pkey = PKey::from_ec_key(ec).unwrap();
        let signer = SoftwareSigner::new(pkey.clone()).unwrap();
        assert_eq!(signer.key_kind(), KeyKind::Ec);

        let sig = signer.sign(b"message", HashAlgorithm::Sha256).unwrap();
        // ECDSA signatures are DER SEQUENCEs.
        assert_eq!(sig[0], 0x30);
        let mut verifier =
            openssl::sign::Verifier::new(MessageDigest::sha256(), &pkey).unwrap();
        verifier.update(b"message").unwrap();
        assert!(verifier.verify(&sig).unwrap());
    }

    #[test]
    fn test_pkcs8_roundtrip_preserves_signing() {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let signer = SoftwareSigner::new(PKey::from_rsa(rsa).unwrap()).unwrap();
        let der = signer.to_pkcs8_der().unwrap();
        let restored = SoftwareSigner::from_pkcs8_der(&der).unwrap();
        assert_eq!(restored.key_kind(), KeyKind::Rsa);
        assert_eq!(
            signer.public_key_der().unwrap(),
            restored.public_key_der().unwrap()
        );
    }

    #[test]
    fn test_openssl_pkcs12_roundtrip_through_pipeline() {
        // Build a real PKCS#12 with openssl, then run it through the
        // attempt pipeline with the right, wrong, and missing password.
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let cert = crate::services::test_support::self_signed_cert(&pkey, "Test Signer");

        let p12 = openssl::pkcs12::Pkcs12::builder()
            .name("test")
            .pkey(&pkey)
            .cert(&cert)
            .build2("password")
            .unwrap();
        let der = p12.to_der().unwrap();

        let parsed = parse(&der, "password").unwrap();
        assert_eq!(parsed.cert.as_der(), cert.to_der().unwrap().as_slice());
        assert_eq!(parsed.signer.key_kind(), KeyKind::Rsa);

        assert!(matches!(
            parse(&der, "wrong").unwrap_err(),
            SignerError::WrongPassword
        ));
        assert!(matches!(
            parse(&der, "").unwrap_err(),
            SignerError::PasswordRequired
        ));
    }
}
