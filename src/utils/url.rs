// src/utils/url.rs

//! Helpers for the vendor's href and query string conventions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Everything after the first `=` of an href (keeps base64 padding intact).
pub fn query_value(href: &str) -> Option<&str> {
    href.split_once('=').map(|(_, value)| value)
}

/// Everything after the last `=` of an href.
pub fn last_query_value(href: &str) -> Option<&str> {
    href.rsplit_once('=').map(|(_, value)| value)
}

/// Encode a racer id the way the vendor's `CustID` parameter expects.
pub fn encode_racer_id(racer_id: u64) -> String {
    STANDARD.encode(racer_id.to_string())
}

/// Decode a base64 `CustID` value back into a numeric racer id.
pub fn decode_racer_id(encoded: &str) -> Option<u64> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    std::str::from_utf8(&bytes).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_keeps_padding() {
        assert_eq!(query_value("RacerHistory.aspx?CustID=MTI="), Some("MTI="));
        assert_eq!(query_value("no-query"), None);
    }

    #[test]
    fn test_last_query_value() {
        assert_eq!(
            last_query_value("./HeatDetails.aspx?HeatNo=147204"),
            Some("147204")
        );
    }

    #[test]
    fn test_racer_id_encoding() {
        assert_eq!(encode_racer_id(123), "MTIz");
        assert_eq!(decode_racer_id("MTIz"), Some(123));
        assert_eq!(decode_racer_id(&encode_racer_id(1_048_576)), Some(1_048_576));
        assert_eq!(decode_racer_id("%%%"), None);
    }
}
