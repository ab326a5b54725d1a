use encoding_rs::WINDOWS_1252;

/// Decodes a CoAP payload using the Windows-1252 (cp1252) code page, which is
/// what Shelly Gen1 firmwares emit.
pub fn decode_cp1252(bytes: &[u8]) -> String {
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Applies the documented workaround for the Shelly DW2 firmware bug, which
/// emits malformed separators in its `G` array payloads.
///
/// `",,"` collapses runs of empty array elements into one comma, and
/// `"]["` is missing the comma between adjacent arrays.
pub fn fix_dw2_payload(payload: &str) -> String {
    payload.replace(",,", ",").replace("][", "],[")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii_as_is() {
        assert_eq!(decode_cp1252(b"hello"), "hello");
    }

    #[test]
    fn decodes_high_byte_degree_sign() {
        // 0xB0 is the degree sign in cp1252, distinct from UTF-8.
        assert_eq!(decode_cp1252(&[0xB0]), "\u{00B0}");
    }

    #[test]
    fn fixes_double_comma() {
        assert_eq!(fix_dw2_payload("[[0,112,1],,[0,113,2]]"), "[[0,112,1],[0,113,2]]");
    }

    #[test]
    fn fixes_missing_comma_between_brackets() {
        assert_eq!(fix_dw2_payload("[0,112,1][0,113,2]"), "[0,112,1],[0,113,2]");
    }

    #[test]
    fn leaves_well_formed_payload_untouched() {
        assert_eq!(
            fix_dw2_payload(r#"{"G":[[0,112,1]]}"#),
            r#"{"G":[[0,112,1]]}"#
        );
    }
}
