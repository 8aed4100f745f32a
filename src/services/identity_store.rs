//! File-backed identity store.
//!
//! Each identity is a metadata record (`<id>.json`, mode 0600) plus, for
//! software keys, an encrypted PKCS#8 blob (`<id>.key.enc`). The store
//! directory is 0700 and every operation holds the store lock. Identities
//! handed out are copies; the store keeps exclusive ownership of the files.

use crate::domain::identity::{
    CertificateData, Identity, Pkcs11Ref, SigningCapability, SystemIdentity, SystemProvenance,
};
use crate::infra::error::{SignerError, SignerResult};
use crate::infra::paths;
use crate::services::{pkcs12, system_store, vault};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted metadata record, one per identity. At most one of the two
/// reference blocks is set; neither means a software key with an encrypted
/// blob next to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMeta {
    pub id: String,
    pub friendly_name: String,
    pub cert_pem: String,
    #[serde(default)]
    pub chain_pem: Vec<String>,
    pub fingerprint_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkcs11: Option<Pkcs11RefMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_native: Option<OsNativeRefMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pkcs11RefMeta {
    pub lib_path: String,
    pub profile_dir: String,
    pub slot: u64,
    pub cka_id_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsNativeRefMeta {
    pub fingerprint_hex: String,
}

pub struct IdentityStore {
    dir: PathBuf,
    vault_password: Vec<u8>,
    lock: Mutex<()>,
}

impl IdentityStore {
    /// Open (creating if needed) the store at `dir`.
    pub fn open(dir: &Path, vault_password: &[u8]) -> SignerResult<Self> {
        paths::create_private_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            vault_password: vault_password.to_vec(),
            lock: Mutex::new(()),
        })
    }

    /// All stored identities, capabilities elided. Broken records are
    /// skipped, not fatal.
    pub fn list(&self) -> SignerResult<Vec<Identity>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut identities = Vec::new();
        for meta in self.read_all_meta()? {
            match identity_from_meta(&meta) {
                Ok(identity) => identities.push(identity),
                Err(e) => log::debug!("skipping broken store record {}: {e}", meta.id),
            }
        }
        Ok(identities)
    }

    /// Import a PKCS#12 file. The private key is PKCS#8-serialized,
    /// vault-encrypted, and written alongside the metadata record.
    pub fn import(&self, name: &str, data: &[u8], password: &str) -> SignerResult<Identity> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;

        let parsed = pkcs12::parse(data, password)?;
        let fingerprint = parsed.cert.fingerprint();
        if self.exists_locked(&fingerprint)? {
            return Err(SignerError::Duplicate);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let key_der = parsed.signer.to_pkcs8_der()?;
        let encrypted = vault::encrypt(&key_der, &self.vault_password)?;

        let key_path = self.key_path(&id);
        paths::write_private_file(&key_path, &encrypted)?;

        let meta = IdentityMeta {
            id: id.clone(),
            friendly_name: name.to_string(),
            cert_pem: parsed.cert.to_pem(),
            chain_pem: parsed.chain.iter().map(CertificateData::to_pem).collect(),
            fingerprint_hex: hex::encode(fingerprint),
            pkcs11: None,
            os_native: None,
        };
        if let Err(e) = self.write_meta(&meta) {
            // Don't leave an orphaned key blob behind.
            let _ = fs::remove_file(&key_path);
            return Err(e);
        }

        Ok(Identity {
            id,
            friendly_name: meta.friendly_name,
            cert: parsed.cert,
            chain: parsed.chain,
            fingerprint,
        })
    }

    /// Import a discovered system identity: metadata only, no key material.
    pub fn import_system(&self, system: &SystemIdentity) -> SignerResult<Identity> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;

        let identity = &system.identity;
        if self.exists_locked(&identity.fingerprint)? {
            return Err(SignerError::Duplicate);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut meta = IdentityMeta {
            id: id.clone(),
            friendly_name: identity.friendly_name.clone(),
            cert_pem: identity.cert.to_pem(),
            chain_pem: identity.chain.iter().map(CertificateData::to_pem).collect(),
            fingerprint_hex: identity.fingerprint_hex(),
            pkcs11: None,
            os_native: None,
        };
        match &system.provenance {
            SystemProvenance::Pkcs11(p11) => {
                meta.pkcs11 = Some(Pkcs11RefMeta {
                    lib_path: p11.lib_path.clone(),
                    profile_dir: p11.profile_dir.clone(),
                    slot: p11.slot,
                    cka_id_hex: hex::encode(&p11.cka_id),
                });
            }
            SystemProvenance::OsNative => {
                meta.os_native = Some(OsNativeRefMeta {
                    fingerprint_hex: identity.fingerprint_hex(),
                });
            }
            SystemProvenance::LooseP12 { path } => {
                return Err(SignerError::Unsupported(format!(
                    "loose PKCS#12 files are imported from bytes, not referenced: {}",
                    path.display()
                )));
            }
        }
        self.write_meta(&meta)?;

        Ok(Identity {
            id,
            friendly_name: identity.friendly_name.clone(),
            cert: identity.cert.clone(),
            chain: identity.chain.clone(),
            fingerprint: identity.fingerprint,
        })
    }

    /// Remove both files for `id`. Idempotent.
    pub fn delete(&self, id: &str) -> SignerResult<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let _ = fs::remove_file(self.meta_path(id));
        let _ = fs::remove_file(self.key_path(id));
        Ok(())
    }

    /// Is any persisted record carrying this fingerprint?
    pub fn exists(&self, fingerprint: &[u8; 32]) -> SignerResult<bool> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        self.exists_locked(fingerprint)
    }

    /// Re-materialize the signing capability for `id`.
    pub fn unlock(&self, id: &str) -> SignerResult<Box<dyn SigningCapability>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;

        let meta = self.read_meta(id)?;

        if let Some(p11) = &meta.pkcs11 {
            let cka_id = hex::decode(&p11.cka_id_hex)
                .map_err(|e| SignerError::InvalidFile(format!("invalid CKA_ID hex: {e}")))?;
            let cert = CertificateData::from_pem(&meta.cert_pem)?;
            let kind = cert.public_key_kind()?;
            let signer = crate::adapters::pkcs11::Pkcs11Signer::new(
                Pkcs11Ref {
                    lib_path: p11.lib_path.clone(),
                    profile_dir: p11.profile_dir.clone(),
                    slot: p11.slot,
                    cka_id,
                },
                kind,
            );
            return Ok(Box::new(signer));
        }

        if let Some(os_ref) = &meta.os_native {
            let target = hex::decode(&os_ref.fingerprint_hex)
                .map_err(|e| SignerError::InvalidFile(format!("invalid fingerprint hex: {e}")))?;
            let target: [u8; 32] = target
                .try_into()
                .map_err(|_| SignerError::InvalidFile("fingerprint must be 32 bytes".to_string()))?;
            return system_store::unlock_os_native(&target);
        }

        let encrypted = fs::read(self.key_path(id))
            .map_err(|e| SignerError::Io(format!("failed to read encrypted key: {e}")))?;
        let key_der = vault::decrypt(&encrypted, &self.vault_password)?;
        let signer = pkcs12::SoftwareSigner::from_pkcs8_der(&key_der)?;
        Ok(Box::new(signer))
    }

    // --- internals (store lock held) ---

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn key_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.key.enc"))
    }

    fn write_meta(&self, meta: &IdentityMeta) -> SignerResult<()> {
        let bytes = serde_json::to_vec(meta)?;
        paths::write_private_file(&self.meta_path(&meta.id), &bytes)
    }

    fn read_meta(&self, id: &str) -> SignerResult<IdentityMeta> {
        let path = self.meta_path(id);
        let bytes = fs::read(&path).map_err(|_| SignerError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn read_all_meta(&self) -> SignerResult<Vec<IdentityMeta>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| SignerError::Io(format!("failed to read store dir: {e}")))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = fs::read(&path) else { continue };
            match serde_json::from_slice::<IdentityMeta>(&bytes) {
                Ok(meta) => out.push(meta),
                Err(e) => log::debug!("skipping unparseable record {}: {e}", path.display()),
            }
        }
        out.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
        Ok(out)
    }

    fn exists_locked(&self, fingerprint: &[u8; 32]) -> SignerResult<bool> {
        let hexfp = hex::encode(fingerprint);
        Ok(self
            .read_all_meta()?
            .iter()
            .any(|meta| meta.fingerprint_hex == hexfp))
    }
}

fn identity_from_meta(meta: &IdentityMeta) -> SignerResult<Identity> {
    let cert = CertificateData::from_pem(&meta.cert_pem)?;
    let mut chain = Vec::new();
    for pem in &meta.chain_pem {
        if let Ok(c) = CertificateData::from_pem(pem) {
            chain.push(c);
        }
    }
    let fingerprint = cert.fingerprint();
    Ok(Identity {
        id: meta.id.clone(),
        friendly_name: meta.friendly_name.clone(),
        cert,
        chain,
        fingerprint,
    })
}

fn poisoned() -> SignerError {
    SignerError::Io("identity store lock poisoned".to_string())
}
