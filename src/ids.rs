//! Tool-call id generation.
//!
//! Ids match `^call_[A-Za-z0-9]{24}$` (§6) and must be collision-resistant
//! within a single process. We draw from `rand`'s thread-local generator,
//! the same crate the teacher SDK uses for retry jitter.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 24;

/// Generate a fresh tool-call id of the form `call_` + 24 alphanumeric characters.
pub fn generate_tool_call_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(5 + SUFFIX_LEN);
    id.push_str("call_");
    for _ in 0..SUFFIX_LEN {
        let idx = rng.gen_range(0..ALPHABET.len());
        id.push(ALPHABET[idx] as char);
    }
    id
}

/// Generate an id for a non-tool-call stream segment (text/reasoning).
///
/// Segment ids have no contractual format (§6 only constrains tool-call
/// ids), but reuse the same collision-resistant alphabet/source for
/// simplicity.
pub fn generate_segment_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        let idx = rng.gen_range(0..ALPHABET.len());
        id.push(ALPHABET[idx] as char);
    }
    id
}

/// Validate that a string matches the tool-call id format (`^call_[A-Za-z0-9]{24}$`).
pub fn is_valid_tool_call_id(id: &str) -> bool {
    match id.strip_prefix("call_") {
        Some(rest) => rest.len() == SUFFIX_LEN && rest.bytes().all(|b| b.is_ascii_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_id_matches_format() {
        for _ in 0..256 {
            let id = generate_tool_call_id();
            assert!(is_valid_tool_call_id(&id), "invalid id: {id}");
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_tool_call_id();
            assert!(seen.insert(id), "collision detected");
        }
    }

    #[test]
    fn test_generate_segment_id_has_expected_length() {
        let id = generate_segment_id();
        assert_eq!(id.len(), SUFFIX_LEN);
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_is_valid_tool_call_id_rejects_bad_shapes() {
        let valid_suffix = "A".repeat(SUFFIX_LEN);
        assert!(!is_valid_tool_call_id(""));
        assert!(!is_valid_tool_call_id("call_short"));
        assert!(!is_valid_tool_call_id(&format!("nope_{valid_suffix}")));
        assert!(!is_valid_tool_call_id(&format!("call_{}!", "A".repeat(SUFFIX_LEN - 1))));
        assert!(is_valid_tool_call_id(&format!("call_{valid_suffix}")));
    }
}
