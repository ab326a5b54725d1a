//! Parses the combined channel/property identifier strings used by
//! persisted (MANUAL-source) devices, per
//! `original_source/.../connector.py`'s two regexes.

use std::sync::OnceLock;

use regex::Regex;

fn channel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?P<identifier>[0-9]+)_(?P<description>[a-zA-Z0-9_]+)$").unwrap())
}

fn property_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<identifier>[0-9]+)_(?P<type>[a-zA-Z]{1,3})_(?P<description>[a-zA-Z0-9]+)$").unwrap()
    })
}

pub struct ParsedChannel {
    pub identifier: i64,
    pub description: String,
}

pub struct ParsedProperty {
    pub identifier: i64,
    pub sensor_type: String,
    pub description: String,
}

pub fn parse_channel_identifier(raw: &str) -> Option<ParsedChannel> {
    let captures = channel_pattern().captures(raw)?;
    Some(ParsedChannel {
        identifier: captures["identifier"].parse().ok()?,
        description: captures["description"].to_string(),
    })
}

pub fn parse_property_identifier(raw: &str) -> Option<ParsedProperty> {
    let captures = property_pattern().captures(raw)?;
    Some(ParsedProperty {
        identifier: captures["identifier"].parse().ok()?,
        sensor_type: captures["type"].to_string(),
        description: captures["description"].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_channel_identifier() {
        let parsed = parse_channel_identifier("0_relay").unwrap();
        assert_eq!(parsed.identifier, 0);
        assert_eq!(parsed.description, "relay");
    }

    #[test]
    fn rejects_malformed_channel_identifier() {
        assert!(parse_channel_identifier("relay").is_none());
        assert!(parse_channel_identifier("0-relay").is_none());
    }

    #[test]
    fn parses_well_formed_property_identifier() {
        let parsed = parse_property_identifier("112_S_output").unwrap();
        assert_eq!(parsed.identifier, 112);
        assert_eq!(parsed.sensor_type, "S");
        assert_eq!(parsed.description, "output");
    }

    #[test]
    fn rejects_malformed_property_identifier() {
        assert!(parse_property_identifier("112_output").is_none());
        assert!(parse_property_identifier("112_STYPE_output").is_none());
    }
}
