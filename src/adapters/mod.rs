//! Adapter layer modules for external system integration.
//!
//! Provides adapters for:
//! - HTTP communication with the organizer (manifest, JWKS, submission)
//! - PKCS#11 modules (NSS softoken, hardware tokens)
//! - The NSS scan worker subprocess protocol

pub mod http;
pub mod nss_worker;
pub mod pkcs11;

pub use http::HttpClient;
pub use pkcs11::Pkcs11Signer;
