//! Organizer manifest verification.
//!
//! A manifest is trusted only when its compact JWS checks out against the
//! organizer's published JWKS *and* the JWS payload is byte-identical to the
//! canonical encoding of the manifest with `organizerSignature` removed;
//! the fetched JSON itself is never what gets verified.

use crate::domain::canon;
use crate::domain::manifest::Manifest;
use crate::infra::error::{SignerError, SignerResult};
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: String,
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub alg: String,
    #[serde(default, rename = "use")]
    pub use_: String,
    #[serde(default)]
    pub crv: String,
    #[serde(default)]
    pub x: String,
    #[serde(default)]
    pub y: String,
}

impl Jwk {
    /// Reconstitute a P-256 verifying key. Anything that is not EC/P-256 is
    /// an unsupported key.
    pub fn to_verifying_key(&self) -> SignerResult<VerifyingKey> {
        if self.kty != "EC" {
            return Err(SignerError::UnsupportedKey(format!(
                "unsupported key type: {}",
                self.kty
            )));
        }
        if self.crv != "P-256" {
            return Err(SignerError::UnsupportedKey(format!(
                "unsupported curve: {}",
                self.crv
            )));
        }
        let x = decode_coordinate(&self.x, "x")?;
        let y = decode_coordinate(&self.y, "y")?;

        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&x);
        sec1.extend_from_slice(&y);
        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|_| SignerError::UnsupportedKey("invalid EC point".to_string()))
    }
}

fn decode_coordinate(b64: &str, name: &str) -> SignerResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|e| SignerError::UnsupportedKey(format!("invalid {name} coordinate: {e}")))?;
    if bytes.len() > 32 {
        return Err(SignerError::UnsupportedKey(format!(
            "invalid {name} coordinate length: {}",
            bytes.len()
        )));
    }
    // Left-pad short coordinates to the fixed field width.
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Verify the manifest against an already-fetched JWKS.
pub fn verify_with_jwks(manifest: &Manifest, jwks: &Jwks) -> SignerResult<()> {
    manifest.validate()?;

    let signature = manifest
        .organizer_signature
        .as_ref()
        .ok_or_else(|| SignerError::ManifestInvalid {
            field: "organizerSignature",
            reason: "missing".to_string(),
        })?;

    let jwk = jwks
        .keys
        .iter()
        .find(|k| k.kid == manifest.organizer.kid)
        .ok_or_else(|| SignerError::KeyNotFound(manifest.organizer.kid.clone()))?;
    let verifying_key = jwk.to_verifying_key()?;

    let mut parts = signature.value.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        log::debug!("JWS value is not three dot-separated segments");
        return Err(SignerError::SignatureInvalid);
    };

    let header_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| SignerError::SignatureInvalid)?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| SignerError::SignatureInvalid)?;
    match header.get("alg").and_then(|a| a.as_str()) {
        Some("ES256") => {}
        Some(other) => return Err(SignerError::UnsupportedAlgorithm(other.to_string())),
        None => return Err(SignerError::UnsupportedAlgorithm("missing".to_string())),
    }

    // The payload must equal the canonical manifest with the signature
    // field omitted, byte for byte.
    let mut unsigned = manifest.clone();
    unsigned.organizer_signature = None;
    let canonical = canon::encode(&unsigned)?;
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SignerError::SignatureInvalid)?;
    if payload_bytes != canonical {
        log::debug!(
            "payload mismatch: canonical {} bytes, payload {} bytes",
            canonical.len(),
            payload_bytes.len()
        );
        return Err(SignerError::PayloadMismatch);
    }

    let signature_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| SignerError::SignatureInvalid)?;
    if signature_bytes.len() != 64 {
        return Err(SignerError::SignatureInvalid);
    }
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| SignerError::SignatureInvalid)?;

    let signing_input = format!("{header_b64}.{payload_b64}");
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| SignerError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::manifest::{
        Callback, FullText, Organizer, OrganizerSignature, Proposal,
    };
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    fn b64url(data: &[u8]) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
    }

    fn unsigned_manifest() -> Manifest {
        Manifest {
            version: "1.0".to_string(),
            request_id: "ilp-7".to_string(),
            issued_at: "2026-01-01T10:00:00Z".to_string(),
            expires_at: "2999-01-01T10:00:00Z".to_string(),
            nonce: base64::engine::general_purpose::STANDARD.encode([9u8; 16]),
            proposal: Proposal {
                title: "Títol".to_string(),
                promoter: "Promotora".to_string(),
                jurisdiction: "ES-CT".to_string(),
                summary: "Resum".to_string(),
                legal_statement: "Declaración".to_string(),
                full_text: FullText {
                    url: "https://example.org/t.pdf".to_string(),
                    sha256: base64::engine::general_purpose::STANDARD.encode([3u8; 32]),
                },
            },
            callback: Callback {
                url: "https://example.org/cb".to_string(),
                method: "POST".to_string(),
            },
            organizer: Organizer {
                kid: "k1".to_string(),
                jwk_set_url: "https://example.org/jwks.json".to_string(),
            },
            organizer_signature: None,
            policy: None,
        }
    }

    fn jwk_for(key: &SigningKey, kid: &str) -> Jwk {
        let point = key.verifying_key().to_encoded_point(false);
        Jwk {
            kid: kid.to_string(),
            kty: "EC".to_string(),
            alg: "ES256".to_string(),
            use_: "sig".to_string(),
            crv: "P-256".to_string(),
            x: b64url(point.x().unwrap().as_slice()),
            y: b64url(point.y().unwrap().as_slice()),
        }
    }

    /// Sign a manifest the way the organizer portal does.
    fn sign_manifest(manifest: &mut Manifest, key: &SigningKey) {
        let canonical = canon::encode(manifest).unwrap();
        let header = br#"{"alg":"ES256","typ":"JWT"}"#;
        let signing_input = format!("{}.{}", b64url(header), b64url(&canonical));
        let signature: Signature = key.sign(signing_input.as_bytes());
        let value = format!("{signing_input}.{}", b64url(&signature.to_vec()));
        manifest.organizer_signature = Some(OrganizerSignature {
            format: "JWS".to_string(),
            value,
        });
    }

    #[test]
    fn test_happy_path_verifies() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        verify_with_jwks(&manifest, &jwks).unwrap();
    }

    #[test]
    fn test_unknown_kid_is_key_not_found() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "other-kid")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_non_ec_key_is_unsupported() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        let mut jwk = jwk_for(&key, "k1");
        jwk.kty = "RSA".to_string();
        assert!(matches!(
            verify_with_jwks(&manifest, &Jwks { keys: vec![jwk] }),
            Err(SignerError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_non_p256_curve_is_unsupported() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        let mut jwk = jwk_for(&key, "k1");
        jwk.crv = "P-384".to_string();
        assert!(matches!(
            verify_with_jwks(&manifest, &Jwks { keys: vec![jwk] }),
            Err(SignerError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_wrong_alg_is_unsupported_algorithm() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        let canonical = canon::encode(&manifest).unwrap();
        let header = br#"{"alg":"RS256","typ":"JWT"}"#;
        let signing_input = format!("{}.{}", b64url(header), b64url(&canonical));
        let signature: Signature = key.sign(signing_input.as_bytes());
        manifest.organizer_signature = Some(OrganizerSignature {
            format: "JWS".to_string(),
            value: format!("{signing_input}.{}", b64url(&signature.to_vec())),
        });
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_mutated_manifest_is_payload_mismatch() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        // A single character of drift flips verification to PayloadMismatch.
        manifest.proposal.title.push(' ');
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::PayloadMismatch)
        ));
    }

    #[test]
    fn test_bad_signature_is_signature_invalid() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let other_key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &other_key);
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_malformed_compact_form_is_signature_invalid() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        if let Some(sig) = manifest.organizer_signature.as_mut() {
            sig.value = "only.two".to_string();
        }
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_truncated_raw_signature_is_signature_invalid() {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut manifest = unsigned_manifest();
        sign_manifest(&mut manifest, &key);
        if let Some(sig) = manifest.organizer_signature.as_mut() {
            let mut parts: Vec<&str> = sig.value.split('.').collect();
            let short = b64url(&[0u8; 63]);
            parts[2] = &short;
            sig.value = parts.join(".");
        }
        let jwks = Jwks {
            keys: vec![jwk_for(&key, "k1")],
        };
        assert!(matches!(
            verify_with_jwks(&manifest, &jwks),
            Err(SignerError::SignatureInvalid)
        ));
    }
}
