//! CoAP header/option decoder for Shelly Gen1 frames (spec §4.5).
//!
//! Byte-for-byte port of the option-walking algorithm in
//! `original_source/fastybird_shelly_connector/clients/coap.py`'s
//! `__handle_request`, expressed as a typed decoder instead of inline loop
//! state.

use std::net::IpAddr;

use common::text::{decode_cp1252, fix_dw2_payload};

/// Accumulated option delta at which the Shelly "Global Devid" option lives.
const GLOBAL_DEVID_DELTA: u32 = 3332;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Status,
    Description,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub kind: FrameKind,
    pub device_type: String,
    pub device_identifier: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame shorter than the minimum CoAP header")]
    TooShort,
    #[error("unsupported CoAP code {0}")]
    UnsupportedCode(u8),
    #[error("option length/delta extension ran past end of frame")]
    TruncatedOption,
    #[error("Global Devid option value was not '<type>#<identifier>#...'")]
    MalformedDevid,
}

/// Decodes one CoAP datagram per spec §4.5 steps 1–6. `source_ip` is carried
/// through untouched for the caller to attach to the result.
pub fn decode(mut data: &[u8], _source_ip: IpAddr) -> Result<DecodedFrame, DecodeError> {
    if data.len() < 4 {
        return Err(DecodeError::TooShort);
    }

    // Step 1: proxy-wrapped origin frame ("prxy" magic), skip 8 bytes.
    if data.starts_with(b"prxy") {
        if data.len() < 8 {
            return Err(DecodeError::TooShort);
        }
        data = &data[8..];
    }

    if data.len() < 4 {
        return Err(DecodeError::TooShort);
    }

    let header = data[0];
    let tkl = (header & 0x0F) as usize;
    let code = data[1];

    let mut pos = 4 + tkl;
    if pos > data.len() {
        return Err(DecodeError::TruncatedOption);
    }

    let kind = match code {
        30 => FrameKind::Status,
        69 => FrameKind::Description,
        other => return Err(DecodeError::UnsupportedCode(other)),
    };

    let mut total_delta: u32 = 0;
    let mut device_type = String::new();
    let mut device_identifier = String::new();

    loop {
        let byte = *data.get(pos).ok_or(DecodeError::TruncatedOption)?;
        if byte == 0xFF {
            pos += 1;
            break;
        }

        let mut delta = (byte >> 4) as u32;
        let mut length = (byte & 0x0F) as usize;

        if delta == 13 {
            pos += 1;
            delta = *data.get(pos).ok_or(DecodeError::TruncatedOption)? as u32 + 13;
        } else if delta == 14 {
            pos += 2;
            let hi = *data.get(pos - 1).ok_or(DecodeError::TruncatedOption)? as u32;
            let lo = *data.get(pos).ok_or(DecodeError::TruncatedOption)? as u32;
            delta = hi * 256 + lo + 269;
        }

        total_delta += delta;

        if length == 13 {
            pos += 1;
            length = *data.get(pos).ok_or(DecodeError::TruncatedOption)? as usize + 13;
        } else if length == 14 {
            pos += 2;
            let hi = *data.get(pos - 1).ok_or(DecodeError::TruncatedOption)? as usize;
            let lo = *data.get(pos).ok_or(DecodeError::TruncatedOption)? as usize;
            length = hi * 256 + lo + 269;
        }

        let value_start = pos + 1;
        let value_end = value_start + length;
        let value = data.get(value_start..value_end).ok_or(DecodeError::TruncatedOption)?;
        pos = value_end;

        if total_delta == GLOBAL_DEVID_DELTA {
            let text = decode_cp1252(value);
            let mut parts = text.splitn(3, '#');
            device_type = parts.next().ok_or(DecodeError::MalformedDevid)?.to_string();
            device_identifier = parts.next().ok_or(DecodeError::MalformedDevid)?.to_string();
        }
    }

    let raw_payload = data.get(pos..).unwrap_or_default();
    let mut payload = decode_cp1252(raw_payload);
    if !payload.is_empty() {
        payload = fix_dw2_payload(&payload);
    }

    Ok(DecodedFrame {
        kind,
        device_type,
        device_identifier,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// Builds a single-option CoAP frame with the Global Devid option at
    /// delta 3332 (13 + 13*... actually encoded via two extension bytes, see
    /// below) followed by the 0xFF marker and a payload.
    fn build_description_frame(devid: &str, payload: &str) -> Vec<u8> {
        let mut frame = vec![0x40, 69, 0x00, 0x01]; // ver/type/tkl=0, code=69(desc), msg id

        // One option carrying the whole 3332 delta via the 14-nibble extension:
        // delta_nibble=14 -> real delta = 256*b0 + b1 + 269.
        // 3332 - 269 = 3063 = 0x0BF7 -> b0=0x0B, b1=0xF7.
        let devid_bytes = devid.as_bytes();
        let length = devid_bytes.len();

        if length < 13 {
            frame.push(0xE0 | (length as u8)); // delta nibble=14 (0xE), length nibble=len
            frame.push(0x0B);
            frame.push(0xF7);
        } else {
            // length nibble=13 (extended by one byte: real length = byte + 13)
            frame.push(0xED);
            frame.push(0x0B);
            frame.push(0xF7);
            frame.push((length - 13) as u8);
        }
        frame.extend_from_slice(devid_bytes);

        frame.push(0xFF);
        frame.extend_from_slice(payload.as_bytes());
        frame
    }

    #[test]
    fn decodes_description_frame_with_global_devid() {
        let frame = build_description_frame(
            "SHSW-25#ABCDEF123456#2",
            r#"{"blk":[{"I":0,"D":"relay_0"}],"sen":[{"I":112,"T":"S","D":"output","R":"0/1","L":0}]}"#,
        );

        let decoded = decode(&frame, localhost()).unwrap();
        assert_eq!(decoded.kind, FrameKind::Description);
        assert_eq!(decoded.device_type, "SHSW-25");
        assert_eq!(decoded.device_identifier, "ABCDEF123456");
        assert!(decoded.payload.contains("relay_0"));
    }

    #[test]
    fn strips_proxy_prefix() {
        let mut frame = b"prxy".to_vec();
        frame.extend_from_slice(&[0u8; 4]); // pad to 8-byte proxy prefix
        frame.extend(build_description_frame("SHSW-25#ABCDEF123456#2", "{}"));

        let decoded = decode(&frame, localhost()).unwrap();
        assert_eq!(decoded.device_identifier, "ABCDEF123456");
    }

    #[test]
    fn rejects_unsupported_code() {
        let frame = vec![0x40, 1, 0, 1, 0xFF];
        assert_eq!(decode(&frame, localhost()), Err(DecodeError::UnsupportedCode(1)));
    }

    #[test]
    fn truncated_extended_length_is_an_error() {
        // delta nibble 0, length nibble 14 (extended) but no follow bytes.
        let frame = vec![0x40, 30, 0, 1, 0x0E];
        assert_eq!(decode(&frame, localhost()), Err(DecodeError::TruncatedOption));
    }

    #[test]
    fn fixes_dw2_double_comma_and_missing_separator() {
        let frame = build_description_frame("SHSW-25#ABCDEF123456#2", r#"{"G":[[0,112,1],,[0,113,2]]}"#);
        let decoded = decode(&frame, localhost()).unwrap();
        assert!(!decoded.payload.contains(",,"));
    }
}
