//! Shared helpers for integration tests: throwaway certificates, manifest
//! fixtures, organizer-side JWS signing, and a minimal canned-response HTTP
//! server.

#![allow(dead_code)]

use base64::Engine;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509NameBuilder, X509};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use vocsign::domain::canon;
use vocsign::domain::manifest::{
    Callback, FullText, Manifest, Organizer, OrganizerSignature, Proposal,
};
use vocsign::services::manifest_verify::{Jwk, Jwks};

pub fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub fn b64url(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

pub fn rsa_key() -> PKey<Private> {
    let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
    PKey::from_rsa(rsa).unwrap()
}

/// Self-signed certificate with idCAT-style personal subject attributes.
pub fn personal_cert(pkey: &PKey<Private>) -> X509 {
    cert_with_subject(
        pkey,
        &[
            (Nid::COMMONNAME, "PAU ESCRICH GARCIA - DNI 47824166J"),
            (Nid::GIVENNAME, "PAU"),
            (Nid::SURNAME, "ESCRICH GARCIA"),
            (Nid::SERIALNUMBER, "IDCES-47824166J"),
        ],
    )
}

pub fn cert_with_subject(pkey: &PKey<Private>, subject: &[(Nid, &str)]) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    for (nid, value) in subject {
        name.append_entry_by_nid(*nid, value).unwrap();
    }
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(rand::random::<u32>() | 1)
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

/// DER PKCS#12 bundle for (key, cert) under `password`.
pub fn p12_bytes(pkey: &PKey<Private>, cert: &X509, password: &str) -> Vec<u8> {
    openssl::pkcs12::Pkcs12::builder()
        .name("test identity")
        .pkey(pkey)
        .cert(cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap()
}

/// A structurally valid manifest pointing at `base_url` for both the
/// callback and the JWKS, unsigned.
pub fn manifest_for(base_url: &str) -> Manifest {
    Manifest {
        version: "1.0".to_string(),
        request_id: "ilp-2026-042".to_string(),
        issued_at: "2026-01-10T09:00:00Z".to_string(),
        expires_at: "2999-01-01T00:00:00Z".to_string(),
        nonce: b64(&[0x42; 24]),
        proposal: Proposal {
            title: "Iniciativa Legislativa Popular de Transparència".to_string(),
            promoter: "Comissió Promotora".to_string(),
            jurisdiction: "ES-CT".to_string(),
            summary: "Una proposta de llei".to_string(),
            legal_statement: "Amb la meva signatura dono suport a la proposta".to_string(),
            full_text: FullText {
                url: "https://example.org/proposta.pdf".to_string(),
                sha256: b64(&[0x11; 32]),
            },
        },
        callback: Callback {
            url: format!("{base_url}/callback"),
            method: "POST".to_string(),
        },
        organizer: Organizer {
            kid: "organizer-2026".to_string(),
            jwk_set_url: format!("{base_url}/jwks.json"),
        },
        organizer_signature: None,
        policy: None,
    }
}

/// Sign `manifest` with `key` the way the organizer portal does: ES256 over
/// the canonical encoding with the signature field omitted.
pub fn organizer_sign(manifest: &mut Manifest, key: &SigningKey) {
    manifest.organizer_signature = None;
    let canonical = canon::encode(manifest).unwrap();
    let header = br#"{"alg":"ES256","typ":"JWT"}"#;
    let signing_input = format!("{}.{}", b64url(header), b64url(&canonical));
    let signature: p256::ecdsa::Signature = key.sign(signing_input.as_bytes());
    manifest.organizer_signature = Some(OrganizerSignature {
        format: "JWS".to_string(),
        value: format!("{signing_input}.{}", b64url(&signature.to_vec())),
    });
}

pub fn jwks_for(key: &SigningKey, kid: &str) -> Jwks {
    let point = key.verifying_key().to_encoded_point(false);
    Jwks {
        keys: vec![Jwk {
            kid: kid.to_string(),
            kty: "EC".to_string(),
            alg: "ES256".to_string(),
            use_: "sig".to_string(),
            crv: "P-256".to_string(),
            x: b64url(point.x().unwrap().as_slice()),
            y: b64url(point.y().unwrap().as_slice()),
        }],
    }
}

/// One parsed inbound HTTP request.
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// A minimal blocking HTTP server: each accepted connection is answered by
/// the handler with (status, content-type, body). Captured requests are
/// forwarded on a channel for assertions.
pub struct TestServer {
    pub base_url: String,
    pub requests: mpsc::Receiver<CapturedRequest>,
    _handle: thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&CapturedRequest) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let Some(request) = read_request(&mut stream) else {
                    continue;
                };
                let (status, body) = handler(&request);
                let _ = tx.send(request);
                let reason = match status {
                    200 => "OK",
                    201 => "Created",
                    409 => "Conflict",
                    _ => "Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            requests: rx,
            _handle: handle,
        }
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end;
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            header_end = pos + 4;
            break;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    }

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let content_length = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .next()
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Some(CapturedRequest { method, path, body })
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
