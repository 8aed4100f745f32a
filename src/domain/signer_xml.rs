//! `SignaturaILP` attestation XML.
//!
//! The signature is computed over these exact bytes; element names and the
//! attribute set are fixed by the legal contract and must not drift.

use crate::domain::manifest::Manifest;

/// Fields describing the signer, seeded from the certificate extractor plus
/// user-supplied data (birth date).
#[derive(Debug, Clone, Default)]
pub struct Signant {
    pub nom: String,
    pub cognom1: String,
    pub cognom2: String,
    /// YYYY-MM-DD.
    pub data_naixement: String,
    /// Identification type, normally `DNI`.
    pub tipus_identificador: String,
    /// DNI/NIE in canonical form.
    pub numero_identificador: String,
}

/// Render the attestation for `manifest` and `signant`.
#[must_use]
pub fn render(manifest: &Manifest, signant: &Signant) -> Vec<u8> {
    let mut out = String::with_capacity(512);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<SignaturaILP versio=\"1.0\">\n");
    out.push_str("  <ILP>\n");
    push_element(&mut out, 4, "Titol", &manifest.proposal.title);
    push_element(&mut out, 4, "Codi", &manifest.request_id);
    out.push_str("  </ILP>\n");
    out.push_str("  <Signant>\n");
    push_element(&mut out, 4, "Nom", &signant.nom);
    push_element(&mut out, 4, "Cognom1", &signant.cognom1);
    push_element(&mut out, 4, "Cognom2", &signant.cognom2);
    push_element(&mut out, 4, "DataNaixement", &signant.data_naixement);
    push_element(&mut out, 4, "TipusIdentificador", &signant.tipus_identificador);
    push_element(&mut out, 4, "NumeroIdentificador", &signant.numero_identificador);
    out.push_str("  </Signant>\n");
    out.push_str("</SignaturaILP>");
    out.into_bytes()
}

fn push_element(out: &mut String, indent: usize, name: &str, text: &str) {
    for _ in 0..indent {
        out.push(' ');
    }
    out.push('<');
    out.push_str(name);
    out.push('>');
    out.push_str(&escape_text(text));
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

/// Character escaping matching Go's `xml.EscapeText`, which the organizer
/// side reproduces when re-rendering: quotes and the chardata control
/// characters are escaped too, not just `&`, `<`, `>`.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}
