//! Minimal DER writer helpers.
//!
//! The CMS container and the BER normalizer assemble raw DER; these helpers
//! keep tag/length/content encoding in one place. Length encoding uses the
//! minimal definite form.

/// ASN.1 universal tags used by the signer.
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0c;
pub const TAG_IA5_STRING: u8 = 0x16;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
/// Context-specific constructed `[0]` / `[1]`.
pub const TAG_CONTEXT_0: u8 = 0xa0;
pub const TAG_CONTEXT_1: u8 = 0xa1;

/// Encode a definite length in minimal DER form.
#[must_use]
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let mut tmp = [0u8; 8];
    let mut i = tmp.len();
    let mut v = length;
    while v > 0 {
        i -= 1;
        tmp[i] = (v & 0xff) as u8;
        v >>= 8;
    }
    let n = tmp.len() - i;
    let mut out = Vec::with_capacity(1 + n);
    out.push(0x80 | n as u8);
    out.extend_from_slice(&tmp[i..]);
    out
}

/// Wrap `content` in a TLV with the given tag byte.
#[must_use]
pub fn wrap(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + content.len());
    out.push(tag);
    out.extend_from_slice(&encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// Wrap `content` in a TLV with multi-byte tag bytes (long-form tag numbers).
#[must_use]
pub fn wrap_tag_bytes(tag: &[u8], content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.len() + 2 + content.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// Encode a big-endian unsigned integer as a DER INTEGER, stripping leading
/// zeros and prepending 0x00 when the high bit is set.
#[must_use]
pub fn integer(bytes: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start < bytes.len() && bytes[start] == 0 {
        start += 1;
    }
    let mut v = if start == bytes.len() {
        vec![0]
    } else {
        bytes[start..].to_vec()
    };
    if v[0] & 0x80 != 0 {
        v.insert(0, 0x00);
    }
    wrap(TAG_INTEGER, &v)
}

/// Encode a dotted-decimal OID string as a DER OBJECT IDENTIFIER.
/// Returns `None` for malformed input (fewer than two arcs, non-numeric arc,
/// or a first arc outside 0..=2).
#[must_use]
pub fn oid(dotted: &str) -> Option<Vec<u8>> {
    let arcs: Vec<u64> = dotted
        .split('.')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return None;
    }
    let mut content = Vec::new();
    content.extend_from_slice(&base128(arcs[0] * 40 + arcs[1]));
    for &arc in &arcs[2..] {
        content.extend_from_slice(&base128(arc));
    }
    Some(wrap(TAG_OID, &content))
}

fn base128(mut v: u64) -> Vec<u8> {
    let mut out = vec![(v & 0x7f) as u8];
    v >>= 7;
    while v > 0 {
        out.push(0x80 | (v & 0x7f) as u8);
        v >>= 7;
    }
    out.reverse();
    out
}

/// DER NULL.
#[must_use]
pub fn null() -> Vec<u8> {
    vec![TAG_NULL, 0x00]
}

/// Encode a SET OF from pre-encoded elements, sorting them by their DER
/// bytes as DER requires.
#[must_use]
pub fn set_of(mut elements: Vec<Vec<u8>>) -> Vec<u8> {
    elements.sort();
    let content: Vec<u8> = elements.concat();
    wrap(TAG_SET, &content)
}
