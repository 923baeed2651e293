//! Migration shim for secret maps stored before encryption was introduced.

use super::codec::SecretMap;

/// Parses `raw` as a plain JSON secret map.
///
/// Only reachable after a decrypt attempt has already failed with a format
/// or authentication error. Returns `None` when `raw` is not a JSON object of
/// strings either.
#[deprecated(note = "legacy plaintext records; remove once every record has been re-encrypted")]
pub fn try_legacy_fallback(raw: &str) -> Option<SecretMap> {
    let parsed: SecretMap = serde_json::from_str(raw).ok()?;
    tracing::warn!(
        keys = parsed.len(),
        "Legacy unencrypted secret record detected; it should be re-encrypted"
    );
    Some(parsed)
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_json_object() {
        let map = try_legacy_fallback(r#"{"API_KEY":"abc","TOKEN":"xyz"}"#).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["TOKEN"], "xyz");
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(try_legacy_fallback("[1,2,3]").is_none());
        assert!(try_legacy_fallback("aa:bb:cc:dd").is_none());
        assert!(try_legacy_fallback(r#"{"nested":{"a":1}}"#).is_none());
    }
}
