//! Spanish identity extraction from X.509 subjects.
//!
//! Interprets real-world idCAT/FNMT subject conventions: given name and
//! surnames from directory attributes, DNI/NIE from the serial number or the
//! CN, and representative-certificate markers (organization identifier,
//! `(R: <CIF>)` CN suffixes, registry descriptions). Matching is ASCII-folded
//! only; accented characters are compared verbatim.

use der::asn1::{Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef};
use der::oid::ObjectIdentifier;
use regex::Regex;
use std::sync::OnceLock;
use x509_cert::name::Name;

const OID_GIVEN_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.42");
const OID_SURNAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.4");
const OID_SERIAL_NUMBER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.5");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_DESCRIPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.13");
const OID_ORG_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.97");
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

fn re_dni() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{8}[A-Z]\b").expect("static regex"))
}

fn re_nie() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[XYZ]\d{7}[A-Z]\b").expect("static regex"))
}

fn re_cif() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[ABCDEFGHJNPQRSUVW]\d{7}[0-9A-J]\b").expect("static regex"))
}

fn re_id_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:DNI|NIE)\s*[:\-]?\s*([A-Z0-9]{8,9})\b").expect("static regex")
    })
}

fn re_rep_cn() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\(\s*R:\s*([A-Z]\d{7}[0-9A-J])\s*\)").expect("static regex")
    })
}

/// What the extractor learned about the certificate holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedIdentity {
    pub given_name: String,
    pub surnames: Vec<String>,
    /// DNI/NIE (or CIF for legal entities) in canonical form.
    pub dni: String,
    pub organization: String,
    pub organization_id: String,
    pub is_representative: bool,
}

impl ExtractedIdentity {
    /// True for personal (non-representative) certificates.
    #[must_use]
    pub fn is_personal(&self) -> bool {
        !self.is_representative
    }

    #[must_use]
    pub fn first_surname(&self) -> &str {
        self.surnames.first().map(String::as_str).unwrap_or("")
    }

    #[must_use]
    pub fn second_surname(&self) -> &str {
        if self.surnames.len() >= 2 {
            // Everything after the first word is the second surname.
            self.surnames.get(1).map(String::as_str).unwrap_or("")
        } else {
            ""
        }
    }
}

/// Extract signer fields from a parsed certificate.
#[must_use]
pub fn spanish_identity(cert: &x509_cert::Certificate) -> ExtractedIdentity {
    let subject = &cert.tbs_certificate.subject;
    let issuer_cn = common_name(&cert.tbs_certificate.issuer);
    extract_from_subject(subject, &issuer_cn)
}

fn extract_from_subject(subject: &Name, issuer_cn: &str) -> ExtractedIdentity {
    let mut info = ExtractedIdentity::default();

    let mut has_personal_attrs = false;
    let mut has_subject_org = false;
    let mut has_subject_org_id = false;
    let mut has_rep_description = false;

    for (oid, value) in subject_attributes(subject) {
        let value = value.trim().to_string();
        if oid == OID_GIVEN_NAME {
            info.given_name = value;
            if !info.given_name.is_empty() {
                has_personal_attrs = true;
            }
        } else if oid == OID_SURNAME {
            info.surnames = split_words(&value);
            if !info.surnames.is_empty() {
                has_personal_attrs = true;
            }
        } else if oid == OID_SERIAL_NUMBER {
            if let Some(id) = extract_id(&value) {
                let personal = is_personal_id(&id);
                info.dni = id;
                if personal {
                    has_personal_attrs = true;
                }
            }
        } else if oid == OID_ORGANIZATION {
            info.organization = normalize_space(&value);
            has_subject_org = !info.organization.is_empty();
        } else if oid == OID_ORG_IDENTIFIER {
            info.organization_id = extract_org_id(&value);
            has_subject_org_id = !info.organization_id.is_empty();
        } else if oid == OID_DESCRIPTION {
            let desc = normalize_space(&value).to_ascii_uppercase();
            if desc.contains("REG:") || desc.contains("REF:AEAT") || desc.contains("INSCRIPCI") {
                has_rep_description = true;
            }
        }
    }

    // Fallbacks from the CN.
    let cn = normalize_space(&common_name(subject));
    if info.organization_id.is_empty() {
        if let Some(id) = extract_representative_id(&cn) {
            info.organization_id = id;
        }
    }
    if info.dni.is_empty() {
        if let Some(id) = extract_id(&cn) {
            info.dni = id;
        }
    }
    if info.given_name.is_empty() || info.surnames.is_empty() {
        let mut name_part = cn.as_str();
        if let Some(idx) = name_part.find(" - ") {
            name_part = &name_part[..idx];
        }
        if let Some(idx) = name_part.to_ascii_uppercase().find(" DNI ") {
            name_part = &name_part[..idx];
        }
        let parts = split_words(name_part);
        if info.given_name.is_empty() {
            if let Some(first) = parts.first() {
                info.given_name = first.clone();
            }
        }
        if info.surnames.is_empty() && parts.len() >= 2 {
            info.surnames = parts[1..].to_vec();
        }
    }

    let has_personal_identity = has_personal_attrs || is_personal_id(&info.dni);
    let has_rep_cn = looks_representative_cn(&cn) || extract_representative_id(&cn).is_some();
    let issuer_rep = normalize_space(issuer_cn)
        .to_ascii_uppercase()
        .contains("REPRESENT");

    // Strong representative markers win even when personal holder attributes
    // (GN/SN/DNI) are also present.
    info.is_representative = has_subject_org_id
        || has_rep_cn
        || (has_subject_org && issuer_rep)
        || has_rep_description
        || (!has_personal_identity && has_subject_org);

    // Personal certs sometimes echo issuer organization labels in subject
    // fields; drop them.
    if !info.is_representative && has_personal_identity {
        info.organization.clear();
        info.organization_id.clear();
    }

    info
}

/// Iterate subject attributes as (oid, string value), skipping values that
/// are not string-typed.
fn subject_attributes(name: &Name) -> Vec<(ObjectIdentifier, String)> {
    let mut out = Vec::new();
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            if let Some(value) = any_to_string(&atav.value) {
                out.push((atav.oid, value));
            }
        }
    }
    out
}

fn any_to_string(value: &der::Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = value.decode_as::<Ia5StringRef<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = value.decode_as::<TeletexStringRef<'_>>() {
        return Some(s.as_str().to_string());
    }
    None
}

fn common_name(name: &Name) -> String {
    for rdn in name.0.iter() {
        for atav in rdn.0.iter() {
            if atav.oid == OID_COMMON_NAME {
                if let Some(value) = any_to_string(&atav.value) {
                    return value;
                }
            }
        }
    }
    String::new()
}

fn extract_id(s: &str) -> Option<String> {
    let mut v = normalize_space(s).to_ascii_uppercase();
    for prefix in ["IDCES-", "IDESP-"] {
        if let Some(rest) = v.strip_prefix(prefix) {
            v = rest.to_string();
            break;
        }
    }
    if let Some(captures) = re_id_prefix().captures(&v) {
        if let Some(m) = captures.get(1) {
            v = m.as_str().to_string();
        }
    }
    if let Some(m) = re_dni().find(&v) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = re_nie().find(&v) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = re_cif().find(&v) {
        return Some(m.as_str().to_string());
    }
    None
}

fn is_personal_id(id: &str) -> bool {
    !id.is_empty() && (re_dni().is_match(id) || re_nie().is_match(id))
}

fn looks_representative_cn(cn: &str) -> bool {
    let cn = cn.to_ascii_uppercase();
    cn.contains("REPRESENT") || cn.contains("APODERAD") || cn.contains("(R:")
}

fn extract_representative_id(s: &str) -> Option<String> {
    re_rep_cn()
        .captures(&s.to_ascii_uppercase())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_org_id(s: &str) -> String {
    let mut v = normalize_space(s).to_ascii_uppercase();
    if let Some(rest) = v.strip_prefix("VATES-") {
        v = rest.to_string();
    }
    if let Some(m) = re_cif().find(&v) {
        return m.as_str().to_string();
    }
    v
}

fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
