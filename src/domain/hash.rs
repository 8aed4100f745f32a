//! Hash algorithm domain type.
//!
//! Names the digests the signer works with and carries their DER identities:
//! the algorithm OID and the `DigestInfo` prefix required by raw
//! `CKM_RSA_PKCS` signing.

use crate::domain::asn1;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::str::FromStr;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Dotted-decimal OID of the digest algorithm.
    pub fn oid(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "1.3.14.3.2.26",
            HashAlgorithm::Sha256 => "2.16.840.1.101.3.4.2.1",
            HashAlgorithm::Sha384 => "2.16.840.1.101.3.4.2.2",
            HashAlgorithm::Sha512 => "2.16.840.1.101.3.4.2.3",
        }
    }

    /// Compute the digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// DER `AlgorithmIdentifier` with explicit NULL parameters.
    pub fn algorithm_identifier(&self) -> Vec<u8> {
        let mut content = asn1::oid(self.oid()).unwrap_or_default();
        content.extend_from_slice(&asn1::null());
        asn1::wrap(asn1::TAG_SEQUENCE, &content)
    }

    /// `DigestInfo` header to prepend to a raw digest before `CKM_RSA_PKCS`.
    ///
    /// The full `DigestInfo` is `SEQUENCE { AlgorithmIdentifier, OCTET STRING
    /// digest }`; the prefix is everything before the digest bytes.
    pub fn digest_info_prefix(&self) -> Vec<u8> {
        let alg = self.algorithm_identifier();
        let digest_placeholder = asn1::wrap(asn1::TAG_OCTET_STRING, &vec![0u8; self.digest_size()]);
        let mut content = alg;
        content.extend_from_slice(&digest_placeholder);
        let full = asn1::wrap(asn1::TAG_SEQUENCE, &content);
        full[..full.len() - self.digest_size()].to_vec()
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(HashAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_sizes() {
        assert_eq!(HashAlgorithm::Sha1.digest_size(), 20);
        assert_eq!(HashAlgorithm::Sha256.digest_size(), 32);
        assert_eq!(HashAlgorithm::Sha384.digest_size(), 48);
        assert_eq!(HashAlgorithm::Sha512.digest_size(), 64);
    }

    #[test]
    fn test_sha256_digest_info_prefix() {
        // Well-known RFC 8017 prefix for SHA-256.
        let expected = [
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ];
        assert_eq!(HashAlgorithm::Sha256.digest_info_prefix(), expected);
    }

    #[test]
    fn test_sha1_digest_info_prefix() {
        let expected = [
            0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
            0x14,
        ];
        assert_eq!(HashAlgorithm::Sha1.digest_info_prefix(), expected);
    }

    #[test]
    fn test_digest_values() {
        // SHA-256 of the empty string.
        assert_eq!(
            hex::encode(HashAlgorithm::Sha256.digest(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
