//! Structural schema check for inbound Gen1 payloads (spec §4.2).
//!
//! Validation never inspects values, only shape: presence of the keys a
//! given [`MessageKind`] is required to carry. Unknown top-level keys are
//! tolerated.

use serde_json::Value;
use types::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(String),
}

pub fn validate(kind: MessageKind, payload: &[u8]) -> Validity {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(err) => return Validity::Invalid(format!("not valid JSON: {err}")),
    };

    let Some(object) = value.as_object() else {
        return Validity::Invalid("payload is not a JSON object".to_string());
    };

    match kind {
        MessageKind::CoapStatus => validate_coap_status(object),
        MessageKind::CoapDescription => validate_coap_description(object),
        MessageKind::HttpShelly => validate_http_shelly(object),
        MessageKind::HttpStatus | MessageKind::HttpDescription => validate_http_status_like(object),
    }
}

fn validate_coap_status(object: &serde_json::Map<String, Value>) -> Validity {
    match object.get("G").and_then(Value::as_array) {
        Some(entries) if entries.iter().all(|e| e.as_array().is_some_and(|a| a.len() == 3)) => {
            Validity::Valid
        }
        Some(_) => Validity::Invalid("G entries must be 3-element arrays".to_string()),
        None => Validity::Invalid("missing top-level 'G' array".to_string()),
    }
}

fn validate_coap_description(object: &serde_json::Map<String, Value>) -> Validity {
    let blk_ok = object
        .get("blk")
        .and_then(Value::as_array)
        .is_some_and(|blocks| blocks.iter().all(|b| has_keys(b, &["I", "D"])));

    if !blk_ok {
        return Validity::Invalid("missing or malformed 'blk' array".to_string());
    }

    let sen_ok = object
        .get("sen")
        .and_then(Value::as_array)
        .is_some_and(|sensors| sensors.iter().all(|s| has_keys(s, &["I", "T", "D", "R", "L"])));

    if !sen_ok {
        return Validity::Invalid("missing or malformed 'sen' array".to_string());
    }

    Validity::Valid
}

fn validate_http_shelly(object: &serde_json::Map<String, Value>) -> Validity {
    if has_keys(&Value::Object(object.clone()), &["type", "mac", "fw"]) {
        Validity::Valid
    } else {
        Validity::Invalid("missing one of 'type'/'mac'/'fw'".to_string())
    }
}

const HTTP_STATUS_KEYS: &[&str] = &[
    "relays",
    "meters",
    "inputs",
    "lights",
    "tmp",
    "hum",
    "wifi_sta",
    "update",
    "ram_total",
];

fn validate_http_status_like(object: &serde_json::Map<String, Value>) -> Validity {
    if HTTP_STATUS_KEYS.iter().any(|key| object.contains_key(*key)) {
        Validity::Valid
    } else {
        Validity::Invalid("no recognised top-level key present".to_string())
    }
}

fn has_keys(value: &Value, keys: &[&str]) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    keys.iter().all(|key| object.contains_key(*key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_coap_status() {
        let payload = br#"{"G":[[0,112,1]]}"#;
        assert_eq!(validate(MessageKind::CoapStatus, payload), Validity::Valid);
    }

    #[test]
    fn rejects_coap_status_missing_g() {
        let payload = br#"{"foo":1}"#;
        assert!(matches!(
            validate(MessageKind::CoapStatus, payload),
            Validity::Invalid(_)
        ));
    }

    #[test]
    fn accepts_well_formed_coap_description() {
        let payload = br#"{"blk":[{"I":0,"D":"relay_0"}],"sen":[{"I":112,"T":"S","D":"output","R":"0/1","L":0}]}"#;
        assert_eq!(validate(MessageKind::CoapDescription, payload), Validity::Valid);
    }

    #[test]
    fn rejects_coap_description_missing_sen() {
        let payload = br#"{"blk":[{"I":0,"D":"relay_0"}]}"#;
        assert!(matches!(
            validate(MessageKind::CoapDescription, payload),
            Validity::Invalid(_)
        ));
    }

    #[test]
    fn accepts_http_shelly() {
        let payload = br#"{"type":"SHSW-1","mac":"AABBCCDDEEFF","fw":"1.0"}"#;
        assert_eq!(validate(MessageKind::HttpShelly, payload), Validity::Valid);
    }

    #[test]
    fn accepts_http_status_with_any_known_key() {
        let payload = br#"{"relays":[{"ison":true}]}"#;
        assert_eq!(validate(MessageKind::HttpStatus, payload), Validity::Valid);
    }

    #[test]
    fn rejects_non_json_payload() {
        assert!(matches!(
            validate(MessageKind::CoapStatus, b"not json"),
            Validity::Invalid(_)
        ));
    }

    #[test]
    fn tolerates_unknown_top_level_keys() {
        let payload = br#"{"G":[[0,112,1]],"extra_vendor_field":true}"#;
        assert_eq!(validate(MessageKind::CoapStatus, payload), Validity::Valid);
    }
}
