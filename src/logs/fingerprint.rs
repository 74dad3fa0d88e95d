//! Message normalization and fingerprinting for deduplication.
//!
//! Two errors are "the same" when they come from the same addon and their
//! messages are equal after volatile tokens (addresses, line numbers, counts)
//! are replaced by placeholders.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

lazy_static! {
    static ref HEX_REGEX: Regex = Regex::new(r"0[xX][0-9a-fA-F]+").unwrap();
    static ref LUA_LINE_REGEX: Regex = Regex::new(r"\.lua:\d+").unwrap();
    static ref NUMERIC_REGEX: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
}

/// Normalize an error message: mask addresses, line numbers and other numbers,
/// then collapse whitespace.
pub fn normalize(message: &str) -> String {
    let text = HEX_REGEX.replace_all(message, "0xADDR");
    let text = LUA_LINE_REGEX.replace_all(&text, ".lua:N");
    let text = NUMERIC_REGEX.replace_all(&text, "N");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint of an already-normalized message for an addon.
pub fn fingerprint(addon: Option<&str>, normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(addon.unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

/// Normalize and fingerprint a raw message in one step.
pub fn fingerprint_message(addon: Option<&str>, message: &str) -> String {
    fingerprint(addon, &normalize(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_masks_volatile_tokens() {
        let normalized = normalize(
            "addons/wiremod/lua/wire/wirelib.lua:123: bad argument #1 to 'pairs' (table expected, got nil) [0x7f3a2c]",
        );
        assert_eq!(
            normalized,
            "addons/wiremod/lua/wire/wirelib.lua:N: bad argument #N to 'pairs' (table expected, got nil) [0xADDR]"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  attempt   to\tindex nil  "), "attempt to index nil");
    }

    #[test]
    fn test_fingerprint_ignores_line_numbers() {
        let a = fingerprint_message(Some("wiremod"), "lua/a.lua:10: attempt to index nil");
        let b = fingerprint_message(Some("wiremod"), "lua/a.lua:42: attempt to index nil");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_fingerprint_depends_on_addon() {
        let a = fingerprint_message(Some("wiremod"), "attempt to index nil");
        let b = fingerprint_message(Some("ulx"), "attempt to index nil");
        let c = fingerprint_message(None, "attempt to index nil");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_is_stable_for_entity_references() {
        let a = fingerprint_message(None, "Tried to use a NULL entity! Entity [45][prop_physics]");
        let b = fingerprint_message(None, "Tried to use a NULL entity! Entity [912][prop_physics]");
        assert_eq!(a, b);
    }
}
