//! Error types surfaced by the signing core.
//!
//! Every failure the core can produce has an explicit kind; the orchestrator
//! decides user-visible messaging and whether an audit entry is written.

use thiserror::Error;

/// Result type for signer operations
pub type SignerResult<T> = Result<T, SignerError>;

/// All error kinds surfaced by the signing core
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SignerError {
    // --- network / HTTP ---
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("unexpected HTTP status: {code}")]
    UnexpectedStatus { code: u16 },

    // --- manifest validation ---
    #[error("invalid manifest field `{field}`: {reason}")]
    ManifestInvalid { field: &'static str, reason: String },

    // --- JWS verification ---
    #[error("organizer signature verification failed")]
    SignatureInvalid,

    #[error("JWS payload does not match canonical manifest")]
    PayloadMismatch,

    #[error("JWKS key not found: {0}")]
    KeyNotFound(String),

    #[error("unsupported JWS algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported JWKS key: {0}")]
    UnsupportedKey(String),

    // --- PKCS#12 import ---
    #[error("certificate password required")]
    PasswordRequired,

    #[error("certificate password incorrect")]
    WrongPassword,

    #[error("certificate already exists")]
    Duplicate,

    #[error("invalid certificate file: {0}")]
    InvalidFile(String),

    #[error("unsupported certificate format: {0}")]
    Unsupported(String),

    // --- vault envelope ---
    #[error("vault data failed authentication")]
    VaultTampered,

    #[error("vault data unreadable: {0}")]
    VaultUnreadable(String),

    // --- system key access ---
    #[error("system certificate no longer available")]
    SystemCertificateMissing,

    #[error("OS-native keychain access is not available on this platform")]
    OsNativeUnavailable,

    #[error("PKCS#11 {step} failed: {reason}")]
    Pkcs11Failed { step: &'static str, reason: String },

    // --- CAdES assembly ---
    #[error("signing {step} failed: {reason}")]
    SignFailed { step: &'static str, reason: String },

    // --- submission ---
    #[error("submission failed with status {code}: {body}")]
    SubmitFailed { code: u16, body: String },

    // --- cancellation ---
    #[error("operation cancelled")]
    Cancelled,

    // --- housekeeping ---
    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("invalid BER encoding: {0}")]
    InvalidBer(String),

    #[error("ASN.1 error: {0}")]
    Asn1(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<std::io::Error> for SignerError {
    fn from(error: std::io::Error) -> Self {
        SignerError::Io(error.to_string())
    }
}

impl From<der::Error> for SignerError {
    fn from(error: der::Error) -> Self {
        SignerError::Asn1(error.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SignerError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SignerError::Asn1(error.to_string())
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(error: serde_json::Error) -> Self {
        SignerError::Json(error.to_string())
    }
}

impl From<reqwest::Error> for SignerError {
    fn from(error: reqwest::Error) -> Self {
        SignerError::FetchFailed(error.to_string())
    }
}

impl SignerError {
    /// User-facing message for certificate import failures.
    #[must_use]
    pub fn friendly_import_message(&self) -> &'static str {
        match self {
            SignerError::PasswordRequired => {
                "This certificate requires a password. Enter the certificate password and try again."
            }
            SignerError::WrongPassword => "The certificate password is incorrect.",
            SignerError::Duplicate => "This certificate is already imported in your wallet.",
            SignerError::InvalidFile(_) => {
                "The selected file is not a valid .p12/.pfx certificate or is corrupted."
            }
            SignerError::Unsupported(_) => {
                "The certificate uses an unsupported format or key type."
            }
            _ => "Certificate import failed. Please verify the file and password.",
        }
    }
}
