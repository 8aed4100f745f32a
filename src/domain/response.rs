//! Sign response, submission receipt, and audit entry models.

use serde::{Deserialize, Serialize};

/// Constant signature format string carried by every sign response.
pub const SIGNATURE_FORMAT: &str = "CAdES-detached";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub version: String,
    pub request_id: String,
    /// Nonce echoed verbatim from the manifest.
    pub nonce: String,
    pub signed_at: String,
    /// Base64 SHA-256 of the signer XML (the detached content).
    pub payload_canonical_sha256: String,
    pub signature_format: String,
    pub signature_der_base64: String,
    pub signer_cert_pem: String,
    pub chain_pem: Vec<String>,
    pub signer_xml_base64: String,
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub app: String,
    pub version: String,
    pub os: String,
}

impl ClientInfo {
    /// Client info for this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            app: "vocsign".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub status: String,
    pub receipt_id: String,
    pub received_at: String,
}

/// One line of the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(default)]
    pub timestamp: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proposal_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signer_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signer_dni: String,
    pub callback_host: String,
    pub cert_fingerprint: String,
    /// `success` or `fail`.
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_ack_id: String,
}
