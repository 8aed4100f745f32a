//! NSS scan worker.
//!
//! NSS initialization is global and cannot be cleanly reset in a long-lived
//! process, so profile scans run in a subprocess: the binary re-executes
//! itself with `--nss-scan-worker --lib <path> --profile <dir> --label
//! <name>`, the worker initializes NSS read-only against that one profile,
//! lists signing-capable certificates, and emits a JSON array on stdout.
//! Diagnostics go to stderr; a failing profile kills only its own worker.

use crate::domain::identity::{usable_for_signing, CertificateData};
use crate::infra::error::{SignerError, SignerResult};
use der::Decode;
use pkcs11::types::{
    CKA_CLASS, CKA_ID, CKA_LABEL, CKA_VALUE, CKF_SERIAL_SESSION, CKO_CERTIFICATE,
    CKO_PRIVATE_KEY, CKU_USER, CK_ATTRIBUTE, CK_OBJECT_CLASS, CK_OBJECT_HANDLE,
    CK_SESSION_HANDLE, CK_SLOT_ID,
};
use pkcs11::Ctx;
use serde::{Deserialize, Serialize};

/// Hidden CLI flag selecting worker mode; checked before clap ever runs.
pub const WORKER_FLAG: &str = "--nss-scan-worker";

/// Wire record emitted by the worker, one per discovered identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdentity {
    pub friendly_name: String,
    pub cert_pem: String,
    pub lib_path: String,
    pub profile_dir: String,
    pub slot: u64,
    pub id_hex: String,
}

/// Entry point for `--nss-scan-worker`. Returns the process exit code.
pub fn run(args: &[String]) -> i32 {
    let mut lib_path = String::new();
    let mut profile_dir = String::new();
    let mut label = "Browser NSS".to_string();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--lib" => lib_path = iter.next().cloned().unwrap_or_default(),
            "--profile" => profile_dir = iter.next().cloned().unwrap_or_default(),
            "--label" => label = iter.next().cloned().unwrap_or_default(),
            other => {
                eprintln!("nss worker: unknown argument: {other}");
                return 2;
            }
        }
    }
    if lib_path.is_empty() || profile_dir.is_empty() {
        eprintln!("nss worker: --lib and --profile are required");
        return 2;
    }

    let identities = match list_profile_identities(&lib_path, &profile_dir, &label) {
        Ok(identities) => identities,
        Err(e) => {
            eprintln!("nss worker: scan failed for {label} ({profile_dir}): {e}");
            return 1;
        }
    };

    match serde_json::to_string(&identities) {
        Ok(payload) => {
            println!("{payload}");
            0
        }
        Err(e) => {
            eprintln!("nss worker: encode payload failed: {e}");
            1
        }
    }
}

/// Scan one NSS profile in-process. Only ever called inside the worker.
pub fn list_profile_identities(
    lib_path: &str,
    profile_dir: &str,
    label: &str,
) -> SignerResult<Vec<WorkerIdentity>> {
    // The Ctx finalizes the module on drop, on success and failure alike.
    let mut ctx = Ctx::new(lib_path).map_err(|e| SignerError::Pkcs11Failed {
        step: "load library",
        reason: e.to_string(),
    })?;
    crate::adapters::pkcs11::initialize_for_profile(&mut ctx, profile_dir)?;

    let slots = ctx
        .get_slot_list(true)
        .map_err(|e| SignerError::Pkcs11Failed {
            step: "slot list",
            reason: e.to_string(),
        })?;
    log::debug!("{label}: {} PKCS#11 slots", slots.len());

    let mut identities = Vec::new();
    for slot in slots {
        match scan_slot(&ctx, slot, lib_path, profile_dir, label) {
            Ok(mut found) => identities.append(&mut found),
            Err(e) => eprintln!("nss worker: slot {slot} in {label}: {e}"),
        }
    }

    Ok(identities)
}

fn scan_slot(
    ctx: &Ctx,
    slot: CK_SLOT_ID,
    lib_path: &str,
    profile_dir: &str,
    label: &str,
) -> SignerResult<Vec<WorkerIdentity>> {
    let session = ctx
        .open_session(slot, CKF_SERIAL_SESSION, None, None)
        .map_err(|e| SignerError::Pkcs11Failed {
            step: "open session",
            reason: e.to_string(),
        })?;

    let result = scan_slot_session(ctx, session, slot, lib_path, profile_dir, label);

    let _ = ctx.logout(session);
    let _ = ctx.close_session(session);
    result
}

fn scan_slot_session(
    ctx: &Ctx,
    session: CK_SESSION_HANDLE,
    slot: CK_SLOT_ID,
    lib_path: &str,
    profile_dir: &str,
    label: &str,
) -> SignerResult<Vec<WorkerIdentity>> {
    if let Err(e) = ctx.login(session, CKU_USER, Some("")) {
        log::debug!("login failed for slot {slot} in {label}: {e}");
    }

    let cert_class: CK_OBJECT_CLASS = CKO_CERTIFICATE;
    let template = vec![CK_ATTRIBUTE::new(CKA_CLASS).with_ck_ulong(&cert_class)];
    ctx.find_objects_init(session, &template)
        .map_err(|e| SignerError::Pkcs11Failed {
            step: "find certificates",
            reason: e.to_string(),
        })?;
    let objects = ctx.find_objects(session, 1000);
    let _ = ctx.find_objects_final(session);
    let objects = objects.map_err(|e| SignerError::Pkcs11Failed {
        step: "find certificates",
        reason: e.to_string(),
    })?;
    log::debug!("slot {slot} in {label}: {} certificate objects", objects.len());

    let now = std::time::SystemTime::now();
    let mut identities = Vec::new();
    for object in objects {
        let Some((cert_der, object_label, cka_id)) = read_cert_attributes(ctx, session, object)
        else {
            continue;
        };
        if cert_der.is_empty() {
            continue;
        }
        let Ok(cert) = x509_cert::Certificate::from_der(&cert_der) else {
            continue;
        };
        if !usable_for_signing(&cert, now) {
            continue;
        }
        if !has_private_key(ctx, session, &cka_id) {
            continue;
        }

        let display_name = subject_cn(&cert).unwrap_or(object_label);
        identities.push(WorkerIdentity {
            friendly_name: format!("[{label}] {display_name}"),
            cert_pem: CertificateData::from_der(cert_der).to_pem(),
            lib_path: lib_path.to_string(),
            profile_dir: profile_dir.to_string(),
            slot: slot as u64,
            id_hex: hex::encode(&cka_id),
        });
    }
    Ok(identities)
}

/// Two-phase attribute read: first query lengths, then fetch values.
fn read_cert_attributes(
    ctx: &Ctx,
    session: CK_SESSION_HANDLE,
    object: CK_OBJECT_HANDLE,
) -> Option<(Vec<u8>, String, Vec<u8>)> {
    let mut probe = vec![
        CK_ATTRIBUTE::new(CKA_VALUE),
        CK_ATTRIBUTE::new(CKA_LABEL),
        CK_ATTRIBUTE::new(CKA_ID),
    ];
    ctx.get_attribute_value(session, object, &mut probe).ok()?;

    let mut value = vec![0u8; probe[0].ulValueLen as usize];
    let mut label = vec![0u8; probe[1].ulValueLen as usize];
    let mut id = vec![0u8; probe[2].ulValueLen as usize];
    let mut template = vec![
        CK_ATTRIBUTE::new(CKA_VALUE).with_bytes(&value),
        CK_ATTRIBUTE::new(CKA_LABEL).with_bytes(&label),
        CK_ATTRIBUTE::new(CKA_ID).with_bytes(&id),
    ];
    ctx.get_attribute_value(session, object, &mut template).ok()?;

    // The buffers were filled through the template's pointers.
    let value_len = template[0].ulValueLen as usize;
    let label_len = template[1].ulValueLen as usize;
    let id_len = template[2].ulValueLen as usize;
    value.truncate(value_len);
    label.truncate(label_len);
    id.truncate(id_len);

    Some((
        value,
        String::from_utf8_lossy(&label).to_string(),
        id,
    ))
}

fn has_private_key(ctx: &Ctx, session: CK_SESSION_HANDLE, cka_id: &[u8]) -> bool {
    let class: CK_OBJECT_CLASS = CKO_PRIVATE_KEY;
    let template = vec![
        CK_ATTRIBUTE::new(CKA_CLASS).with_ck_ulong(&class),
        CK_ATTRIBUTE::new(CKA_ID).with_bytes(cka_id),
    ];
    if ctx.find_objects_init(session, &template).is_err() {
        return false;
    }
    let objects = ctx.find_objects(session, 1);
    let _ = ctx.find_objects_final(session);
    objects.map(|o| !o.is_empty()).unwrap_or(false)
}

fn subject_cn(cert: &x509_cert::Certificate) -> Option<String> {
    const OID_CN: der::oid::ObjectIdentifier = der::oid::ObjectIdentifier::new_unwrap("2.5.4.3");
    for rdn in cert.tbs_certificate.subject.0.iter() {
        for atav in rdn.0.iter() {
            if atav.oid == OID_CN {
                if let Ok(s) = atav.value.decode_as::<der::asn1::Utf8StringRef<'_>>() {
                    return Some(s.as_str().to_string());
                }
                if let Ok(s) = atav.value.decode_as::<der::asn1::PrintableStringRef<'_>>() {
                    return Some(s.as_str().to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_identity_wire_names() {
        let identity = WorkerIdentity {
            friendly_name: "[Firefox] Alice".to_string(),
            cert_pem: "-----BEGIN CERTIFICATE-----".to_string(),
            lib_path: "/usr/lib/libsoftokn3.so".to_string(),
            profile_dir: "/home/u/.mozilla/firefox/x.default".to_string(),
            slot: 2,
            id_hex: "a1b2".to_string(),
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("friendlyName").is_some());
        assert!(json.get("certPem").is_some());
        assert!(json.get("libPath").is_some());
        assert!(json.get("profileDir").is_some());
        assert!(json.get("idHex").is_some());
    }

    #[test]
    fn test_run_rejects_missing_arguments() {
        assert_eq!(run(&[]), 2);
        assert_eq!(run(&["--lib".to_string(), "/x.so".to_string()]), 2);
        assert_eq!(run(&["--bogus".to_string()]), 2);
    }
}
