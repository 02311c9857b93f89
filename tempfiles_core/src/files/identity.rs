//! File identifiers: 128 random bits, base64url without padding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::{rngs::OsRng, RngCore};

pub const FILE_ID_BYTES: usize = 16;
pub const FILE_ID_LEN: usize = 22;

pub fn generate_file_id() -> String {
    let mut bytes = [0u8; FILE_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// True only for strings shaped like [`generate_file_id`] output, so nothing
/// else (`..`, separators, hidden names) ever reaches the filesystem.
pub fn is_valid_file_id(id: &str) -> bool {
    id.len() == FILE_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..100 {
            let id = generate_file_id();
            assert_eq!(id.len(), FILE_ID_LEN);
            assert!(is_valid_file_id(&id), "invalid id: {}", id);
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_file_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(!is_valid_file_id(""));
        assert!(!is_valid_file_id("short"));
        assert!(!is_valid_file_id("../../../../etc/passwd"));
        assert!(!is_valid_file_id("abcdefghijklmnopqrst/v"));
        assert!(!is_valid_file_id("abcdefghijklmnopqrst.v"));
        assert!(is_valid_file_id("abcdefghijklmnopqrst-_"));
    }
}
