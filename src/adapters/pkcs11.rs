//! PKCS#11 signing capability for NSS and hardware-backed keys.
//!
//! The signer carries only values (library path, profile directory, slot,
//! CKA_ID) so identities never hold live module handles. Every call runs the
//! full lifecycle: initialize the module against the profile, open a serial
//! session, best-effort USER login with an empty PIN, locate the private key
//! by CKA_ID, sign, then close and finalize on every exit path.
//!
//! NSS quirk: the softoken is initialized through the reserved argument of
//! `C_Initialize` carrying an NSS config string; a plain initialize is the
//! fallback for non-NSS modules.

use crate::domain::asn1;
use crate::domain::hash::HashAlgorithm;
use crate::domain::identity::{KeyKind, Pkcs11Ref, SigningCapability};
use crate::infra::error::{SignerError, SignerResult};
use pkcs11::types::{
    CKA_CLASS, CKA_ID, CKF_OS_LOCKING_OK, CKF_SERIAL_SESSION, CKM_ECDSA, CKM_RSA_PKCS,
    CKO_PRIVATE_KEY, CKU_USER, CK_ATTRIBUTE, CK_C_INITIALIZE_ARGS, CK_MECHANISM, CK_OBJECT_CLASS,
    CK_SESSION_HANDLE, CK_VOID_PTR,
};
use pkcs11::Ctx;

pub struct Pkcs11Signer {
    reference: Pkcs11Ref,
    kind: KeyKind,
}

impl Pkcs11Signer {
    #[must_use]
    pub fn new(reference: Pkcs11Ref, kind: KeyKind) -> Self {
        Self { reference, kind }
    }

    fn open_module(&self) -> SignerResult<Ctx> {
        let mut ctx = Ctx::new(&self.reference.lib_path).map_err(|e| SignerError::Pkcs11Failed {
            step: "load library",
            reason: e.to_string(),
        })?;
        initialize_for_profile(&mut ctx, &self.reference.profile_dir)?;
        Ok(ctx)
    }

    fn sign_in_session(
        &self,
        ctx: &Ctx,
        session: CK_SESSION_HANDLE,
        message: &[u8],
        hash: HashAlgorithm,
    ) -> SignerResult<Vec<u8>> {
        // Empty-PIN login; "already logged in" and "not required" class
        // failures are non-fatal.
        if let Err(e) = ctx.login(session, CKU_USER, Some("")) {
            log::debug!("PKCS#11 login ignored: {e}");
        }

        let key = find_private_key(ctx, session, &self.reference.cka_id)?;

        let digest = hash.digest(message);
        let (mechanism, sign_input) = match self.kind {
            KeyKind::Rsa => (CKM_RSA_PKCS, rsa_sign_input(&digest, hash)),
            KeyKind::Ec => (CKM_ECDSA, digest),
        };
        let mechanism = CK_MECHANISM {
            mechanism,
            pParameter: std::ptr::null_mut(),
            ulParameterLen: 0,
        };

        ctx.sign_init(session, &mechanism, key)
            .map_err(|e| SignerError::Pkcs11Failed {
                step: "sign init",
                reason: e.to_string(),
            })?;
        let raw = ctx
            .sign(session, &sign_input)
            .map_err(|e| SignerError::Pkcs11Failed {
                step: "sign",
                reason: e.to_string(),
            })?;

        match self.kind {
            KeyKind::Rsa => Ok(raw),
            KeyKind::Ec => ecdsa_p1363_to_der(&raw),
        }
    }
}

impl SigningCapability for Pkcs11Signer {
    fn key_kind(&self) -> KeyKind {
        self.kind
    }

    fn sign(&self, message: &[u8], hash: HashAlgorithm) -> SignerResult<Vec<u8>> {
        log::debug!(
            "PKCS#11 sign: slot {} profile {}",
            self.reference.slot,
            self.reference.profile_dir
        );
        // Dropping the Ctx finalizes the module, so every exit path below
        // (including the error returns) tears the session state down.
        let ctx = self.open_module()?;
        let slot = self.reference.slot as pkcs11::types::CK_SLOT_ID;
        let session = ctx
            .open_session(slot, CKF_SERIAL_SESSION, None, None)
            .map_err(|e| SignerError::Pkcs11Failed {
                step: "open session",
                reason: e.to_string(),
            })?;

        let result = self.sign_in_session(&ctx, session, message, hash);

        let _ = ctx.close_session(session);
        result
    }
}

/// Initialize a module. NSS softokens take their configuration through the
/// reserved initialize argument; plain initialization is the fallback.
pub(crate) fn initialize_for_profile(ctx: &mut Ctx, profile_dir: &str) -> SignerResult<()> {
    let params = format!(
        "configdir='sql:{profile_dir}' certPrefix='' keyPrefix='' secmod='secmod.db' flags=readOnly\0"
    );
    let mut args = CK_C_INITIALIZE_ARGS::new();
    args.flags = CKF_OS_LOCKING_OK;
    args.pReserved = params.as_ptr() as CK_VOID_PTR;

    if let Err(reserved_err) = ctx.initialize(Some(args)) {
        log::debug!("NSS reserved initialize failed, trying plain: {reserved_err}");
        ctx.initialize(None).map_err(|plain_err| SignerError::Pkcs11Failed {
            step: "initialize",
            reason: format!("reserved={reserved_err} plain={plain_err}"),
        })?;
    }
    Ok(())
}

fn find_private_key(
    ctx: &Ctx,
    session: CK_SESSION_HANDLE,
    cka_id: &[u8],
) -> SignerResult<pkcs11::types::CK_OBJECT_HANDLE> {
    let class: CK_OBJECT_CLASS = CKO_PRIVATE_KEY;
    let template = vec![
        CK_ATTRIBUTE::new(CKA_CLASS).with_ck_ulong(&class),
        CK_ATTRIBUTE::new(CKA_ID).with_bytes(cka_id),
    ];
    ctx.find_objects_init(session, &template)
        .map_err(|e| SignerError::Pkcs11Failed {
            step: "find key",
            reason: e.to_string(),
        })?;
    let objects = ctx.find_objects(session, 1);
    let _ = ctx.find_objects_final(session);
    let objects = objects.map_err(|e| SignerError::Pkcs11Failed {
        step: "find key",
        reason: e.to_string(),
    })?;
    objects
        .first()
        .copied()
        .ok_or_else(|| SignerError::Pkcs11Failed {
            step: "find key",
            reason: "private key not found by CKA_ID".to_string(),
        })
}

/// `CKM_RSA_PKCS` is raw PKCS#1 v1.5: the DigestInfo header for the named
/// hash must be prepended to the digest by the caller.
pub(crate) fn rsa_sign_input(digest: &[u8], hash: HashAlgorithm) -> Vec<u8> {
    let mut input = hash.digest_info_prefix();
    input.extend_from_slice(digest);
    input
}

/// `CKM_ECDSA` yields IEEE-P1363 `r ‖ s`; CMS wants a DER SEQUENCE of two
/// INTEGERs.
pub(crate) fn ecdsa_p1363_to_der(signature: &[u8]) -> SignerResult<Vec<u8>> {
    if signature.is_empty() || signature.len() % 2 != 0 {
        return Err(SignerError::Pkcs11Failed {
            step: "signature encode",
            reason: format!("invalid ECDSA signature length {}", signature.len()),
        });
    }
    let (r, s) = signature.split_at(signature.len() / 2);
    let mut content = asn1::integer(r);
    content.extend_from_slice(&asn1::integer(s));
    Ok(asn1::wrap(asn1::TAG_SEQUENCE, &content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsa_sign_input_has_digest_info_prefix() {
        let digest = [0xaa; 32];
        let input = rsa_sign_input(&digest, HashAlgorithm::Sha256);
        assert_eq!(input.len(), 19 + 32);
        assert_eq!(&input[..19], HashAlgorithm::Sha256.digest_info_prefix().as_slice());
        assert_eq!(&input[19..], digest);
    }

    #[test]
    fn test_p1363_to_der_roundtrip_via_openssl() {
        // A P-256 style signature with high-bit-set halves to exercise the
        // sign-padding path.
        let mut raw = vec![0x80; 32];
        raw.extend_from_slice(&[0x7f; 32]);
        let der = ecdsa_p1363_to_der(&raw).unwrap();
        assert_eq!(der[0], 0x30);

        let parsed = openssl::ecdsa::EcdsaSig::from_der(&der).unwrap();
        assert_eq!(parsed.r().to_vec(), vec![0x80; 32]);
        assert_eq!(parsed.s().to_vec(), vec![0x7f; 32]);
    }

    #[test]
    fn test_p1363_leading_zeros_are_minimal() {
        let mut raw = vec![0u8; 31];
        raw.push(0x05); // r = 5
        raw.extend_from_slice(&[0u8; 31]);
        raw.push(0x07); // s = 7
        let der = ecdsa_p1363_to_der(&raw).unwrap();
        assert_eq!(der, vec![0x30, 0x06, 0x02, 0x01, 0x05, 0x02, 0x01, 0x07]);
    }

    #[test]
    fn test_odd_length_signature_rejected() {
        assert!(ecdsa_p1363_to_der(&[1, 2, 3]).is_err());
        assert!(ecdsa_p1363_to_der(&[]).is_err());
    }
}
