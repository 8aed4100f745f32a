//! PKCS#12 MAC recomputation.
//!
//! BER→DER normalization changes the byte-level AuthSafe encoding, which
//! invalidates the MAC stored in the file. To keep accepting legacy BER
//! exports, the digest is recomputed over the normalized AuthSafe with the
//! RFC 7292 password-to-key derivation and HMAC-SHA1, then written back and
//! the PFX re-encoded.

use crate::infra::error::{SignerError, SignerResult};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Any, Decode, Encode, Sequence};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use spki::AlgorithmIdentifierOwned;

const OID_HMAC_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");

/// PFX ::= SEQUENCE { version, authSafe, macData OPTIONAL }
#[derive(Clone, Debug, Sequence)]
struct Pfx {
    version: u8,
    auth_safe: ContentInfo,
    #[asn1(optional = "true")]
    mac_data: Option<MacData>,
}

#[derive(Clone, Debug, Sequence)]
struct ContentInfo {
    content_type: ObjectIdentifier,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    content: Option<Any>,
}

#[derive(Clone, Debug, Sequence)]
struct MacData {
    mac: DigestInfo,
    mac_salt: OctetString,
    #[asn1(default = "default_iterations")]
    iterations: u32,
}

#[derive(Clone, Debug, Sequence)]
struct DigestInfo {
    algorithm: AlgorithmIdentifierOwned,
    digest: OctetString,
}

fn default_iterations() -> u32 {
    1
}

/// Recompute the PFX MAC for `password` over DER-encoded `der_bytes`.
/// Fails when the file has no MAC or uses a MAC algorithm other than
/// HMAC-SHA1 (the only one legacy exports use).
pub fn recompute_pfx_mac(der_bytes: &[u8], password: &str) -> SignerResult<Vec<u8>> {
    let mut pfx = Pfx::from_der(der_bytes)
        .map_err(|e| SignerError::InvalidFile(format!("pfx parse failed: {e}")))?;

    let mac_data = pfx
        .mac_data
        .as_mut()
        .ok_or_else(|| SignerError::InvalidFile("pkcs12 has no mac".to_string()))?;
    if mac_data.mac.algorithm.oid != OID_HMAC_SHA1 {
        return Err(SignerError::Unsupported(
            "unsupported mac algorithm".to_string(),
        ));
    }

    let auth_safe_content = pfx
        .auth_safe
        .content
        .as_ref()
        .ok_or_else(|| SignerError::InvalidFile("pkcs12 authSafe has no content".to_string()))?;
    let auth_safe_bytes: OctetString = auth_safe_content
        .decode_as()
        .map_err(|e| SignerError::InvalidFile(format!("authSafe content: {e}")))?;

    let encoded_password = bmp_string_zero_terminated(password)?;
    let iterations = mac_data.iterations.max(1);
    let digest = compute_pkcs12_mac_sha1(
        auth_safe_bytes.as_bytes(),
        mac_data.mac_salt.as_bytes(),
        &encoded_password,
        iterations,
    );
    mac_data.mac.digest = OctetString::new(digest)
        .map_err(|e| SignerError::Asn1(e.to_string()))?;

    pfx.to_der().map_err(|e| SignerError::Asn1(e.to_string()))
}

fn compute_pkcs12_mac_sha1(
    message: &[u8],
    salt: &[u8],
    password: &[u8],
    iterations: u32,
) -> Vec<u8> {
    let key = pkcs12_kdf_sha1(salt, password, iterations, 3, 20);
    let mut mac = Hmac::<Sha1>::new_from_slice(&key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 7292 appendix B password-to-key derivation, SHA-1 parameters
/// (u = 20, v = 64).
fn pkcs12_kdf_sha1(salt: &[u8], password: &[u8], iterations: u32, id: u8, size: usize) -> Vec<u8> {
    const U: usize = 20;
    const V: usize = 64;

    let d = [id; V];

    let expand = |src: &[u8]| -> Vec<u8> {
        if src.is_empty() {
            return Vec::new();
        }
        let len = V * src.len().div_ceil(V);
        (0..len).map(|i| src[i % src.len()]).collect()
    };
    let s = expand(salt);
    let p = expand(password);

    let mut i: Vec<u8> = [s, p].concat();
    let mut result = vec![0u8; size];

    let rounds = size.div_ceil(U);
    for round in 0..rounds {
        let mut hasher = Sha1::new();
        hasher.update(d);
        hasher.update(&i);
        let mut a: Vec<u8> = hasher.finalize().to_vec();
        for _ in 1..iterations {
            a = Sha1::digest(&a).to_vec();
        }

        let offset = round * U;
        let take = U.min(size - offset);
        result[offset..offset + take].copy_from_slice(&a[..take]);

        if offset + U < size {
            // B = A repeated to v bytes; I += B + 1 blockwise (mod 2^v*8).
            let b: Vec<u8> = (0..V).map(|j| a[j % U]).collect();
            for block in i.chunks_mut(V) {
                let mut carry = 1u16;
                for k in (0..block.len()).rev() {
                    let sum = u16::from(block[k]) + u16::from(b[k]) + carry;
                    block[k] = (sum & 0xff) as u8;
                    carry = sum >> 8;
                }
            }
        }
    }
    result
}

/// PKCS#12 BMPString password encoding: UTF-16BE with a trailing U+0000.
/// Characters outside the BMP are rejected.
pub fn bmp_string_zero_terminated(s: &str) -> SignerResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 2 + 2);
    for c in s.chars() {
        let code = u32::from(c);
        if code > 0xffff {
            return Err(SignerError::Unsupported(
                "password contains unsupported unicode character".to_string(),
            ));
        }
        out.push((code >> 8) as u8);
        out.push((code & 0xff) as u8);
    }
    out.push(0x00);
    out.push(0x00);
    Ok(out)
}
