//! BER-to-DER normalizer.
//!
//! Strict ASN.1 decoders reject BER constructs that legacy PKCS#12 exports
//! (notably old idCAT files) still use: indefinite lengths and constructed
//! OCTET STRINGs. This module rewrites such input into DER so the PKCS#12
//! decode pipeline can retry on the normalized bytes.

use crate::domain::asn1;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BerError {
    #[error("missing tag at offset {0}")]
    MissingTag(usize),
    #[error("truncated long-form tag at offset {0}")]
    TruncatedTag(usize),
    #[error("missing length at offset {0}")]
    MissingLength(usize),
    #[error("reserved length form at offset {0}")]
    ReservedLength(usize),
    #[error("truncated long-form length at offset {0}")]
    TruncatedLength(usize),
    #[error("primitive element with indefinite length at offset {0}")]
    PrimitiveIndefinite(usize),
    #[error("missing end-of-contents marker for indefinite length")]
    MissingEoc,
    #[error("content truncated at offset {0}")]
    ContentTruncated(usize),
    #[error("constructed OCTET STRING child is not an OCTET STRING")]
    BadOctetStringChild,
    #[error("trailing data after root element")]
    TrailingData,
}

impl From<BerError> for crate::infra::error::SignerError {
    fn from(error: BerError) -> Self {
        Self::InvalidBer(error.to_string())
    }
}

const CLASS_MASK: u8 = 0xc0;
const CLASS_CONTEXT: u8 = 0x80;
const CONSTRUCTED_MASK: u8 = 0x20;
const TAG_NUMBER_MASK: u8 = 0x1f;

/// Convert BER (including indefinite lengths and constructed OCTET STRINGs)
/// into DER. Errors if anything follows the single root element.
pub fn normalize(input: &[u8]) -> Result<Vec<u8>, BerError> {
    let mut parser = Parser { buf: input, pos: 0 };
    let der = parser.parse_element()?;
    if parser.pos != input.len() {
        return Err(BerError::TrailingData);
    }
    Ok(der)
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn parse_element(&mut self) -> Result<Vec<u8>, BerError> {
        let (first, mut tag_bytes) = self.read_tag()?;
        let (length, indefinite) = self.read_length()?;

        let constructed = first & CONSTRUCTED_MASK != 0;
        let class = first & CLASS_MASK;
        let tag_number = first & TAG_NUMBER_MASK;

        let content = if indefinite {
            if !constructed {
                return Err(BerError::PrimitiveIndefinite(self.pos));
            }
            let mut chunks = Vec::new();
            loop {
                if self.remaining() < 2 {
                    return Err(BerError::MissingEoc);
                }
                if self.buf[self.pos] == 0x00 && self.buf[self.pos + 1] == 0x00 {
                    self.pos += 2;
                    break;
                }
                chunks.push(self.parse_element()?);
            }
            Self::assemble(class, tag_number, chunks, &mut tag_bytes)?
        } else {
            if self.remaining() < length {
                return Err(BerError::ContentTruncated(self.pos));
            }
            let raw = &self.buf[self.pos..self.pos + length];
            self.pos += length;

            if constructed {
                let mut child = Parser { buf: raw, pos: 0 };
                let mut chunks = Vec::new();
                while child.pos < child.buf.len() {
                    chunks.push(child.parse_element()?);
                }
                Self::assemble(class, tag_number, chunks, &mut tag_bytes)?
            } else {
                raw.to_vec()
            }
        };

        Ok(asn1::wrap_tag_bytes(&tag_bytes, &content))
    }

    /// Join parsed children, flattening the two OCTET STRING shapes DER
    /// forbids: constructed universal OCTET STRINGs, and context `[0]`
    /// wrappers fragmented into multiple primitive OCTET STRINGs (the common
    /// PKCS#12 authSafe wrapping).
    fn assemble(
        class: u8,
        tag_number: u8,
        chunks: Vec<Vec<u8>>,
        tag_bytes: &mut Vec<u8>,
    ) -> Result<Vec<u8>, BerError> {
        if class == 0 && tag_number == asn1::TAG_OCTET_STRING {
            let flattened = flatten_octet_children(&chunks)?;
            *tag_bytes = vec![asn1::TAG_OCTET_STRING];
            Ok(maybe_renormalize(flattened))
        } else if class == CLASS_CONTEXT && tag_number == 0 && chunks.len() > 1 {
            match flatten_octet_children(&chunks) {
                Ok(flattened) => {
                    if let Some(first) = tag_bytes.first_mut() {
                        *first &= !CONSTRUCTED_MASK;
                    }
                    Ok(flattened)
                }
                Err(_) => Ok(chunks.concat()),
            }
        } else {
            Ok(chunks.concat())
        }
    }

    fn read_tag(&mut self) -> Result<(u8, Vec<u8>), BerError> {
        if self.remaining() < 1 {
            return Err(BerError::MissingTag(self.pos));
        }
        let first = self.buf[self.pos];
        self.pos += 1;

        // Long-form tag numbers are carried through unchanged.
        if first & TAG_NUMBER_MASK == TAG_NUMBER_MASK {
            let mut tag_bytes = vec![first];
            loop {
                if self.remaining() < 1 {
                    return Err(BerError::TruncatedTag(self.pos));
                }
                let b = self.buf[self.pos];
                self.pos += 1;
                tag_bytes.push(b);
                if b & 0x80 == 0 {
                    break;
                }
            }
            return Ok((first, tag_bytes));
        }
        Ok((first, vec![first]))
    }

    fn read_length(&mut self) -> Result<(usize, bool), BerError> {
        if self.remaining() < 1 {
            return Err(BerError::MissingLength(self.pos));
        }
        let first = self.buf[self.pos];
        self.pos += 1;

        if first == 0x80 {
            return Ok((0, true));
        }
        if first < 0x80 {
            return Ok((first as usize, false));
        }

        let n = (first & 0x7f) as usize;
        if n == 0 {
            return Err(BerError::ReservedLength(self.pos));
        }
        if self.remaining() < n {
            return Err(BerError::TruncatedLength(self.pos));
        }
        let mut length = 0usize;
        for _ in 0..n {
            length = (length << 8) | self.buf[self.pos] as usize;
            self.pos += 1;
        }
        Ok((length, false))
    }
}

/// Concatenate the contents of already-normalized OCTET STRING children.
/// A non-OCTET-STRING child is an error; the `[0]` caller falls back to
/// plain concatenation on it.
fn flatten_octet_children(chunks: &[Vec<u8>]) -> Result<Vec<u8>, BerError> {
    let mut out = Vec::new();
    for chunk in chunks {
        let (tag, content) = decode_single_der(chunk).ok_or(BerError::BadOctetStringChild)?;
        if tag != asn1::TAG_OCTET_STRING {
            return Err(BerError::BadOctetStringChild);
        }
        out.extend_from_slice(content);
    }
    Ok(out)
}

/// Split a single DER element produced by this module into (tag, content).
fn decode_single_der(der: &[u8]) -> Option<(u8, &[u8])> {
    if der.len() < 2 {
        return None;
    }
    let tag = der[0];
    let mut pos = 1;
    if tag & TAG_NUMBER_MASK == TAG_NUMBER_MASK {
        loop {
            let b = *der.get(pos)?;
            pos += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    let first_len = *der.get(pos)?;
    pos += 1;
    let length = if first_len < 0x80 {
        first_len as usize
    } else {
        let n = (first_len & 0x7f) as usize;
        if n == 0 || pos + n > der.len() {
            return None;
        }
        let mut length = 0usize;
        for _ in 0..n {
            length = (length << 8) | der[pos] as usize;
            pos += 1;
        }
        length
    };
    if pos + length != der.len() {
        return None;
    }
    Some((tag, &der[pos..]))
}

/// A flattened OCTET STRING often wraps a nested BER SEQUENCE; renormalize it
/// when it parses, leave it untouched when it doesn't.
fn maybe_renormalize(content: Vec<u8>) -> Vec<u8> {
    if content.first() != Some(&asn1::TAG_SEQUENCE) {
        return content;
    }
    match normalize(&content) {
        Ok(der) => der,
        Err(_) => content,
    }
}
