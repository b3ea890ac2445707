//! Partner redirect templates.
//!
//! A partner passes its own sync URL in the `r` parameter, URL-encoded, with
//! placeholders for the values it wants back.

use percent_encoding::percent_decode_str;

use crate::error::DecodeError;

/// Replaced with the first-party id.
pub const DEVICE_ID_PLACEHOLDER: &str = "${DEVICE_ID}";

/// Replaced with the lowercase SHA-256 email hash, or nothing when unknown.
pub const EMAIL_HASH_PLACEHOLDER: &str = "${EHASH_SHA256_LOWERCASE}";

/// Query-style unescape: `+` is a space and every `%` must start a valid
/// two-digit hex escape. The decoded bytes must be UTF-8.
pub fn decode_template(raw: &str) -> Result<String, DecodeError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(DecodeError {
                    position: i,
                    reason: "malformed percent escape",
                });
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| DecodeError {
            position: e.valid_up_to(),
            reason: "decoded bytes are not UTF-8",
        })
}

/// Decodes `raw` and substitutes both placeholders.
pub fn render(raw: &str, device_id: &str, email_hash: &str) -> Result<String, DecodeError> {
    let template = decode_template(raw)?;
    Ok(template
        .replace(DEVICE_ID_PLACEHOLDER, device_id)
        .replace(EMAIL_HASH_PLACEHOLDER, email_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_placeholders() {
        let raw = "https%3A%2F%2Fpartner.example%2Fsync%3Fuid%3D%24%7BDEVICE_ID%7D%26hem%3D%24%7BEHASH_SHA256_LOWERCASE%7D";
        let url = render(raw, "abc", "f00d").unwrap();
        assert_eq!(url, "https://partner.example/sync?uid=abc&hem=f00d");
    }

    #[test]
    fn test_render_unknown_hash_is_empty() {
        let url = render("https://x/?uid=${DEVICE_ID}&hem=${EHASH_SHA256_LOWERCASE}", "abc", "")
            .unwrap();
        assert_eq!(url, "https://x/?uid=abc&hem=");
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let url = render("${DEVICE_ID}/${DEVICE_ID}", "id", "").unwrap();
        assert_eq!(url, "id/id");
    }

    #[test]
    fn test_plus_decodes_to_space() {
        assert_eq!(decode_template("a+b%2Bc").unwrap(), "a b+c");
    }

    #[test]
    fn test_malformed_escapes_fail() {
        assert_eq!(decode_template("%zz").unwrap_err().position, 0);
        assert_eq!(decode_template("abc%4").unwrap_err().position, 3);
        assert!(decode_template("%").is_err());
    }

    #[test]
    fn test_invalid_utf8_fails() {
        assert!(decode_template("%ff%fe").is_err());
    }
}
