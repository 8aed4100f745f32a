//! Proposal manifest model and structural validation.
//!
//! The wire field names are part of the organizer contract; the canonical
//! encoding of the manifest with `organizerSignature` omitted must equal the
//! JWS payload byte-for-byte, so serialization shape matters here.

use crate::infra::error::{SignerError, SignerResult};
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub request_id: String,
    pub issued_at: String,
    pub expires_at: String,
    pub nonce: String,
    pub proposal: Proposal,
    pub callback: Callback,
    pub organizer: Organizer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer_signature: Option<OrganizerSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<SignPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub title: String,
    pub promoter: String,
    pub jurisdiction: String,
    pub summary: String,
    pub legal_statement: String,
    pub full_text: FullText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullText {
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callback {
    pub url: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organizer {
    pub kid: String,
    pub jwk_set_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerSignature {
    pub format: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignPolicy {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Manifest {
    /// Structural and semantic validation, run before any network activity.
    pub fn validate(&self) -> SignerResult<()> {
        if self.version != "1.0" {
            return invalid("version", format!("unsupported version: {}", self.version));
        }
        if self.request_id.is_empty() {
            return invalid("requestId", "missing".to_string());
        }

        chrono::DateTime::parse_from_rfc3339(&self.issued_at)
            .map_err(|e| manifest_invalid("issuedAt", e.to_string()))?;
        let expires_at = chrono::DateTime::parse_from_rfc3339(&self.expires_at)
            .map_err(|e| manifest_invalid("expiresAt", e.to_string()))?;
        if expires_at < chrono::Utc::now() {
            return invalid("expiresAt", "request expired".to_string());
        }

        let nonce = base64::engine::general_purpose::STANDARD
            .decode(&self.nonce)
            .map_err(|e| manifest_invalid("nonce", format!("invalid base64: {e}")))?;
        if nonce.len() < 16 || nonce.len() > 32 {
            return invalid("nonce", "length must be between 16 and 32 bytes".to_string());
        }

        if self.proposal.title.is_empty() {
            return invalid("proposal.title", "missing".to_string());
        }
        let full_text_hash = base64::engine::general_purpose::STANDARD
            .decode(&self.proposal.full_text.sha256)
            .map_err(|e| manifest_invalid("proposal.fullText.sha256", format!("invalid base64: {e}")))?;
        if full_text_hash.len() != 32 {
            return invalid("proposal.fullText.sha256", "must be 32 bytes".to_string());
        }

        require_https_or_loopback("callback.url", &self.callback.url)?;
        if self.callback.method != "POST" {
            return invalid("callback.method", "must be POST".to_string());
        }

        if self.organizer.kid.is_empty() {
            return invalid("organizer.kid", "missing".to_string());
        }
        require_https_or_loopback("organizer.jwkSetUrl", &self.organizer.jwk_set_url)?;

        let signature = self
            .organizer_signature
            .as_ref()
            .ok_or_else(|| manifest_invalid("organizerSignature", "missing".to_string()))?;
        if signature.format != "JWS" {
            return invalid("organizerSignature.format", "must be JWS".to_string());
        }
        if signature.value.is_empty() {
            return invalid("organizerSignature.value", "missing".to_string());
        }

        Ok(())
    }

    /// Host portion of the callback URL (for audit entries).
    #[must_use]
    pub fn callback_host(&self) -> String {
        url_host(&self.callback.url).unwrap_or_default()
    }
}

fn manifest_invalid(field: &'static str, reason: String) -> SignerError {
    SignerError::ManifestInvalid { field, reason }
}

fn invalid<T>(field: &'static str, reason: String) -> SignerResult<T> {
    Err(manifest_invalid(field, reason))
}

/// Scheme of a URL, lowercased.
fn url_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

/// Host of a URL, without port or userinfo.
pub fn url_host(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

fn require_https_or_loopback(field: &'static str, url: &str) -> SignerResult<()> {
    let scheme = url_scheme(url)
        .ok_or_else(|| manifest_invalid(field, "not an absolute URL".to_string()))?;
    let host = url_host(url)
        .ok_or_else(|| manifest_invalid(field, "missing host".to_string()))?;
    let loopback = host == "localhost" || host == "127.0.0.1";
    match scheme {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        _ => invalid(field, "must be https".to_string()),
    }
}
