//! Discovery of identities the user already has installed.
//!
//! Two subsystems: the OS-native keychain (macOS only; other platforms
//! report nothing and fail deep queries with `OsNativeUnavailable`) and NSS
//! profile databases scanned through subprocess workers. A failing store is
//! collected and logged, never fatal to the overall scan.

use crate::domain::identity::{SystemIdentity, SigningCapability};
use crate::infra::context::Context;
use crate::infra::error::{SignerError, SignerResult};
use crate::services::nss_profiles::{self, NssStore};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Result of the NSS fan-out: identities found plus per-store failures.
#[derive(Debug, Default)]
pub struct NssScanOutcome {
    pub identities: Vec<SystemIdentity>,
    pub errors: Vec<String>,
}

/// Enumerate OS keychain identities with a signing-capable key.
pub fn scan_os_native() -> SignerResult<Vec<SystemIdentity>> {
    os_native::scan()
}

/// Re-find an OS keychain identity by end-entity fingerprint and return its
/// signer.
pub fn unlock_os_native(fingerprint: &[u8; 32]) -> SignerResult<Box<dyn SigningCapability>> {
    os_native::unlock(fingerprint)
}

/// Scan every discovered NSS store, bounded to `parallelism` concurrent
/// subprocess workers. Cancellation yields the partial result collected so
/// far.
pub fn scan_nss_stores(ctx: &Context, parallelism: usize) -> NssScanOutcome {
    let stores = nss_profiles::discover_nss_stores();
    log::debug!("discovered {} NSS stores", stores.len());
    if stores.is_empty() {
        return NssScanOutcome::default();
    }

    let next = AtomicUsize::new(0);
    let outcome = Mutex::new(NssScanOutcome::default());
    let workers = parallelism.max(1).min(stores.len());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if ctx.is_cancelled() {
                    return;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(store) = stores.get(index) else { return };
                log::debug!(
                    "scanning NSS store label={:?} profile={}",
                    store.label,
                    store.profile_dir.display()
                );
                match scan_store_via_worker(store, ctx) {
                    Ok(mut identities) => {
                        if let Ok(mut guard) = outcome.lock() {
                            guard.identities.append(&mut identities);
                        }
                    }
                    Err(e) => {
                        log::debug!("NSS store {:?} failed: {e}", store.label);
                        if let Ok(mut guard) = outcome.lock() {
                            guard.errors.push(format!("{}: {e}", store.label));
                        }
                    }
                }
            });
        }
    });

    outcome.into_inner().unwrap_or_default()
}

/// Run one store scan in a worker subprocess and decode its JSON output.
fn scan_store_via_worker(store: &NssStore, ctx: &Context) -> SignerResult<Vec<SystemIdentity>> {
    use crate::adapters::nss_worker::{WorkerIdentity, WORKER_FLAG};
    use crate::domain::identity::{CertificateData, Identity, Pkcs11Ref, SystemProvenance};

    let exe = std::env::current_exe()
        .map_err(|e| SignerError::Io(format!("resolve executable: {e}")))?;
    let mut child = Command::new(exe)
        .arg(WORKER_FLAG)
        .arg("--lib")
        .arg(&store.lib_path)
        .arg("--profile")
        .arg(&store.profile_dir)
        .arg("--label")
        .arg(&store.label)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SignerError::Io(format!("spawn nss worker: {e}")))?;

    // Poll for exit so the context deadline can kill a hung worker.
    loop {
        if ctx.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SignerError::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => std::thread::sleep(std::time::Duration::from_millis(100)),
            Err(e) => {
                let _ = child.kill();
                return Err(SignerError::Io(format!("wait nss worker: {e}")));
            }
        }
    }
    let output = child
        .wait_with_output()
        .map_err(|e| SignerError::Io(format!("collect nss worker output: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SignerError::Pkcs11Failed {
            step: "worker",
            reason: format!("exit {:?}: {}", output.status.code(), stderr.trim()),
        });
    }

    let payload: Vec<WorkerIdentity> = serde_json::from_slice(&output.stdout).map_err(|e| {
        SignerError::Json(format!(
            "decode nss worker output for {}: {e}",
            store.label
        ))
    })?;

    let mut identities = Vec::new();
    for dto in payload {
        let Ok(cert) = CertificateData::from_pem(&dto.cert_pem) else {
            continue;
        };
        let Ok(cka_id) = hex::decode(&dto.id_hex) else {
            continue;
        };
        let fingerprint = cert.fingerprint();
        identities.push(SystemIdentity {
            identity: Identity {
                id: format!("nss:{}:{}", store.label, hex::encode(fingerprint)),
                friendly_name: dto.friendly_name,
                cert,
                chain: Vec::new(),
                fingerprint,
            },
            provenance: SystemProvenance::Pkcs11(Pkcs11Ref {
                lib_path: dto.lib_path,
                profile_dir: dto.profile_dir,
                slot: dto.slot,
                cka_id,
            }),
        });
    }
    Ok(identities)
}

#[cfg(target_os = "macos")]
mod os_native {
    use super::*;
    use crate::domain::hash::HashAlgorithm;
    use crate::domain::identity::{
        usable_for_signing, CertificateData, Identity, KeyKind, SystemProvenance,
    };
    use security_framework::item::{ItemClass, ItemSearchOptions, Reference, SearchResult};
    use security_framework::key::Algorithm;

    pub fn scan() -> SignerResult<Vec<SystemIdentity>> {
        let now = std::time::SystemTime::now();
        let mut out = Vec::new();
        for identity in keychain_identities()? {
            let Ok(sec_cert) = identity.certificate() else { continue };
            let cert = CertificateData::from_der(sec_cert.to_der());
            let Ok(parsed) = cert.parse() else { continue };
            if !usable_for_signing(&parsed, now) {
                continue;
            }
            if identity.private_key().is_err() {
                continue;
            }

            let display_name = sec_cert.subject_summary();
            let fingerprint = cert.fingerprint();
            out.push(SystemIdentity {
                identity: Identity {
                    id: format!("os:{}", hex::encode(fingerprint)),
                    friendly_name: format!("[System] {display_name}"),
                    cert,
                    chain: Vec::new(),
                    fingerprint,
                },
                provenance: SystemProvenance::OsNative,
            });
        }
        Ok(out)
    }

    pub fn unlock(fingerprint: &[u8; 32]) -> SignerResult<Box<dyn SigningCapability>> {
        for identity in keychain_identities()? {
            let Ok(sec_cert) = identity.certificate() else { continue };
            let cert = CertificateData::from_der(sec_cert.to_der());
            if &cert.fingerprint() != fingerprint {
                continue;
            }
            let kind = cert.public_key_kind()?;
            let key = identity
                .private_key()
                .map_err(|e| SignerError::Pkcs11Failed {
                    step: "keychain key",
                    reason: e.to_string(),
                })?;
            return Ok(Box::new(OsNativeSigner { key, kind }));
        }
        Err(SignerError::SystemCertificateMissing)
    }

    fn keychain_identities() -> SignerResult<Vec<security_framework::identity::SecIdentity>> {
        let results = ItemSearchOptions::new()
            .class(ItemClass::identity())
            .load_refs(true)
            .limit(i32::MAX as i64)
            .search()
            .map_err(|e| SignerError::Pkcs11Failed {
                step: "keychain search",
                reason: e.to_string(),
            })?;
        Ok(results
            .into_iter()
            .filter_map(|result| match result {
                SearchResult::Ref(Reference::Identity(identity)) => Some(identity),
                _ => None,
            })
            .collect())
    }

    struct OsNativeSigner {
        key: security_framework::key::SecKey,
        kind: KeyKind,
    }

    impl SigningCapability for OsNativeSigner {
        fn key_kind(&self) -> KeyKind {
            self.kind
        }

        fn sign(&self, message: &[u8], hash: HashAlgorithm) -> SignerResult<Vec<u8>> {
            let algorithm = match (self.kind, hash) {
                (KeyKind::Rsa, HashAlgorithm::Sha1) => Algorithm::RSASignatureMessagePKCS1v15SHA1,
                (KeyKind::Rsa, HashAlgorithm::Sha256) => {
                    Algorithm::RSASignatureMessagePKCS1v15SHA256
                }
                (KeyKind::Rsa, HashAlgorithm::Sha384) => {
                    Algorithm::RSASignatureMessagePKCS1v15SHA384
                }
                (KeyKind::Rsa, HashAlgorithm::Sha512) => {
                    Algorithm::RSASignatureMessagePKCS1v15SHA512
                }
                (KeyKind::Ec, HashAlgorithm::Sha1) => Algorithm::ECDSASignatureMessageX962SHA1,
                (KeyKind::Ec, HashAlgorithm::Sha256) => Algorithm::ECDSASignatureMessageX962SHA256,
                (KeyKind::Ec, HashAlgorithm::Sha384) => Algorithm::ECDSASignatureMessageX962SHA384,
                (KeyKind::Ec, HashAlgorithm::Sha512) => Algorithm::ECDSASignatureMessageX962SHA512,
            };
            self.key
                .create_signature(algorithm, message)
                .map_err(|e| SignerError::SignFailed {
                    step: "keychain sign",
                    reason: e.to_string(),
                })
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod os_native {
    use super::*;

    pub fn scan() -> SignerResult<Vec<SystemIdentity>> {
        // No native keychain integration on this platform.
        Ok(Vec::new())
    }

    pub fn unlock(_fingerprint: &[u8; 32]) -> SignerResult<Box<dyn SigningCapability>> {
        Err(SignerError::OsNativeUnavailable)
    }
}
