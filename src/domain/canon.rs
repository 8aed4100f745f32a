//! Canonical JSON encoding.
//!
//! The canonical form is the single source of truth for any bytes to be
//! signed or hashed: keys sorted lexicographically at every object level, no
//! insignificant whitespace, HTML-unsafe characters (`<`, `>`, `&`) emitted
//! as literals, no terminating newline. Callers always hash this encoder's
//! output, never their own serialization.

use crate::infra::error::SignerResult;
use serde::Serialize;

/// Encode `value` canonically.
///
/// Serialization goes through [`serde_json::Value`], whose object maps are
/// ordered, so nested keys come out sorted regardless of struct field order.
pub fn encode<T: Serialize>(value: &T) -> SignerResult<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&tree)?)
}

/// Convenience: canonical encoding as a string.
pub fn encode_string<T: Serialize>(value: &T) -> SignerResult<String> {
    let bytes = encode(value)?;
    String::from_utf8(bytes).map_err(|e| crate::infra::error::SignerError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sorted_keys_and_compact_output() {
        let input = json!({
            "b": 1,
            "a": "hello",
            "c": [2, 1, 3],
            "d": { "y": "foo", "x": "bar" }
        });
        let encoded = encode(&input).unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"{"a":"hello","b":1,"c":[2,1,3],"d":{"x":"bar","y":"foo"}}"#
        );
    }

    #[test]
    fn test_html_unsafe_characters_are_literal() {
        let input = json!({ "stmt": "a < b && c > d" });
        let encoded = encode_string(&input).unwrap();
        assert_eq!(encoded, r#"{"stmt":"a < b && c > d"}"#);
    }

    #[test]
    fn test_no_trailing_newline() {
        let encoded = encode(&json!({"k": "v"})).unwrap();
        assert_ne!(*encoded.last().unwrap(), b'\n');
    }

    #[test]
    fn test_idempotent() {
        let input = json!({ "z": { "b": 2, "a": 1 }, "a": [true, null, 0.5] });
        let once = encode(&input).unwrap();
        let reparsed: serde_json::Value = serde_json::from_slice(&once).unwrap();
        let twice = encode(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_integer_formatting() {
        let encoded = encode_string(&json!({ "n": 42, "m": 0 })).unwrap();
        assert_eq!(encoded, r#"{"m":0,"n":42}"#);
    }

    #[test]
    fn test_struct_fields_sorted_regardless_of_declaration_order() {
        #[derive(Serialize)]
        struct Unsorted {
            zulu: u32,
            alpha: u32,
        }
        let encoded = encode_string(&Unsorted { zulu: 1, alpha: 2 }).unwrap();
        assert_eq!(encoded, r#"{"alpha":2,"zulu":1}"#);
    }
}
