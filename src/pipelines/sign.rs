//! The end-to-end signing workflow.
//!
//! Drives the full path: fetch → verify → unlock identity → seed the signer
//! attestation → render XML → CAdES → submit → audit. Both outcomes are
//! audited once a manifest is known; the caller decides user-visible
//! messaging from the returned error kind.

use crate::adapters::http::HttpClient;
use crate::domain::extract;
use crate::domain::hash::HashAlgorithm;
use crate::domain::identity::Identity;
use crate::domain::manifest::Manifest;
use crate::domain::response::{AuditEntry, ClientInfo, SignResponse, SubmitReceipt, SIGNATURE_FORMAT};
use crate::domain::signer_xml::{self, Signant};
use crate::infra::context::Context;
use crate::infra::error::{SignerError, SignerResult};
use crate::services::audit::AuditLog;
use crate::services::identity_store::IdentityStore;
use crate::services::{cades, manifest_verify};
use base64::Engine;

pub struct SignWorkflow<'a> {
    http: &'a HttpClient,
    store: &'a IdentityStore,
    audit: &'a AuditLog,
}

/// User-supplied inputs for one signing run.
pub struct SignInput {
    pub manifest_url: String,
    pub identity_id: String,
    /// Signer birth date, YYYY-MM-DD (not derivable from the certificate).
    pub birth_date: String,
}

#[derive(Debug)]
pub struct SignOutcome {
    pub manifest: Manifest,
    pub response: SignResponse,
    pub receipt: SubmitReceipt,
}

impl<'a> SignWorkflow<'a> {
    #[must_use]
    pub fn new(http: &'a HttpClient, store: &'a IdentityStore, audit: &'a AuditLog) -> Self {
        Self { http, store, audit }
    }

    /// Run the workflow. The context bounds every network step.
    pub fn run(&self, input: &SignInput, ctx: &Context) -> SignerResult<SignOutcome> {
        ctx.check()?;
        let (manifest, _raw) = self.http.fetch_manifest(&input.manifest_url, ctx)?;

        let identity = match self.find_identity(&input.identity_id) {
            Ok(identity) => identity,
            Err(e) => {
                self.audit_failure(&manifest, None, &e);
                return Err(e);
            }
        };

        match self.sign_and_submit(&manifest, &identity, input, ctx) {
            Ok((response, receipt, signant)) => {
                self.audit
                    .log(AuditEntry {
                        timestamp: String::new(),
                        request_id: manifest.request_id.clone(),
                        proposal_title: manifest.proposal.title.clone(),
                        signer_name: signant.nom.clone(),
                        signer_dni: signant.numero_identificador.clone(),
                        callback_host: manifest.callback_host(),
                        cert_fingerprint: identity.fingerprint_hex(),
                        status: "success".to_string(),
                        error: String::new(),
                        server_ack_id: receipt.receipt_id.clone(),
                    })
                    .unwrap_or_else(|e| log::warn!("audit write failed: {e}"));
                Ok(SignOutcome {
                    manifest,
                    response,
                    receipt,
                })
            }
            Err(e) => {
                self.audit_failure(&manifest, Some(&identity), &e);
                Err(e)
            }
        }
    }

    fn sign_and_submit(
        &self,
        manifest: &Manifest,
        identity: &Identity,
        input: &SignInput,
        ctx: &Context,
    ) -> SignerResult<(SignResponse, SubmitReceipt, Signant)> {
        ctx.check()?;
        let jwks = self.http.fetch_jwks(&manifest.organizer.jwk_set_url, ctx)?;
        manifest_verify::verify_with_jwks(manifest, &jwks)?;
        log::info!("organizer signature verified for request {}", manifest.request_id);

        ctx.check()?;
        let capability = self.store.unlock(&identity.id)?;

        let signant = build_signant(identity, &input.birth_date)?;
        let xml = signer_xml::render(manifest, &signant);

        ctx.check()?;
        let options = cades::SignOptions {
            signing_time: chrono::Utc::now(),
            policy: manifest.policy.as_ref(),
        };
        let signature_der = cades::sign_detached(
            capability.as_ref(),
            &identity.cert,
            &identity.chain,
            &xml,
            &options,
        )?;
        log::info!("CAdES signature produced ({} bytes)", signature_der.len());

        let b64 = base64::engine::general_purpose::STANDARD;
        let response = SignResponse {
            version: "1.0".to_string(),
            request_id: manifest.request_id.clone(),
            nonce: manifest.nonce.clone(),
            signed_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            payload_canonical_sha256: b64.encode(HashAlgorithm::Sha256.digest(&xml)),
            signature_format: SIGNATURE_FORMAT.to_string(),
            signature_der_base64: b64.encode(&signature_der),
            signer_cert_pem: identity.cert.to_pem(),
            chain_pem: identity.chain.iter().map(|c| c.to_pem()).collect(),
            signer_xml_base64: b64.encode(&xml),
            client: ClientInfo::current(),
        };

        let receipt = self.http.submit(&manifest.callback.url, &response, ctx)?;
        Ok((response, receipt, signant))
    }

    fn find_identity(&self, id: &str) -> SignerResult<Identity> {
        self.store
            .list()?
            .into_iter()
            .find(|identity| identity.id == id)
            .ok_or_else(|| SignerError::NotFound(id.to_string()))
    }

    fn audit_failure(&self, manifest: &Manifest, identity: Option<&Identity>, error: &SignerError) {
        let entry = AuditEntry {
            timestamp: String::new(),
            request_id: manifest.request_id.clone(),
            proposal_title: manifest.proposal.title.clone(),
            signer_name: String::new(),
            signer_dni: String::new(),
            callback_host: manifest.callback_host(),
            cert_fingerprint: identity.map(Identity::fingerprint_hex).unwrap_or_default(),
            status: "fail".to_string(),
            error: error.to_string(),
            server_ack_id: String::new(),
        };
        self.audit
            .log(entry)
            .unwrap_or_else(|e| log::warn!("audit write failed: {e}"));
    }
}

/// Seed the attestation from the certificate subject plus the user-supplied
/// birth date. Representative certificates cannot attest a personal
/// signature.
pub fn build_signant(identity: &Identity, birth_date: &str) -> SignerResult<Signant> {
    let parsed = identity.cert.parse()?;
    let info = extract::spanish_identity(&parsed);

    if info.is_representative {
        return Err(SignerError::SignFailed {
            step: "signer identity",
            reason: "representative certificates cannot sign a citizen attestation".to_string(),
        });
    }
    if info.dni.is_empty() {
        return Err(SignerError::SignFailed {
            step: "signer identity",
            reason: "no DNI/NIE found in the certificate subject".to_string(),
        });
    }
    chrono::NaiveDate::parse_from_str(birth_date, "%Y-%m-%d").map_err(|e| {
        SignerError::SignFailed {
            step: "signer identity",
            reason: format!("invalid birth date: {e}"),
        }
    })?;

    let tipus = if info.dni.starts_with(['X', 'Y', 'Z']) {
        "NIE"
    } else {
        "DNI"
    };
    Ok(Signant {
        nom: info.given_name.clone(),
        cognom1: info.first_surname().to_string(),
        cognom2: info.second_surname().to_string(),
        data_naixement: birth_date.to_string(),
        tipus_identificador: tipus.to_string(),
        numero_identificador: info.dni,
    })
}
