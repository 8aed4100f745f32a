//! VocSign core library.
//!
//! A desktop signer for legally binding citizen signatures on legislative
//! proposals: an organizer publishes a signed proposal manifest; a citizen
//! verifies it, picks a qualified personal certificate (imported PKCS#12,
//! OS keychain, or an NSS browser profile), and answers with a CAdES-BES
//! detached signature over a canonical attestation XML.
//!
//! Layering, leaves first:
//! - [`domain`]: pure types and codecs (canonical JSON, BER→DER, identity
//!   model, manifest, attestation XML, Spanish-subject extraction)
//! - [`services`]: stateful operations (PKCS#12 import, vault, identity
//!   store, CAdES assembly, JWS verification, discovery, audit log)
//! - [`adapters`]: external systems (HTTP, PKCS#11, the NSS scan worker)
//! - [`infra`]: errors, configuration, cancellation contexts, paths
//! - [`pipelines`]: user-level workflows built from the above

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

pub use domain::hash::HashAlgorithm;
pub use domain::identity::{Identity, KeyKind, SigningCapability, SystemIdentity};
pub use domain::manifest::Manifest;
pub use infra::config::{AppConfig, ConfigManager};
pub use infra::context::Context;
pub use infra::error::{SignerError, SignerResult};
pub use pipelines::{ScanWorkflow, SignInput, SignWorkflow};
pub use services::{AuditLog, IdentityStore};
