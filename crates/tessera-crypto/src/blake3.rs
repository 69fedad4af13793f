//! Domain-separated BLAKE3 hashing for the Tessera protocol.
//!
//! BLAKE3 serves several distinct purposes in the subsystem: content
//! addressing of rosters, dealing mask derivation, Fiat-Shamir challenges,
//! and key-vote digests. Cross-domain collisions are prevented by mandatory
//! domain separation via BLAKE3's derive-key mode.
//!
//! ## Modes
//!
//! - [`hash`] — Pure hashing: content addressing (roster hashes, vote digests)
//! - [`derive_key`] / [`derive_key_xof`] — Key derivation: dealing masks,
//!   Fiat-Shamir challenge material
//! - [`keyed_hash`] — Keyed MAC/PRF

/// Registered BLAKE3 context strings. Using an unregistered context string
/// is a protocol violation.
pub mod contexts {
    pub const ROSTER_HASH: &str = "Tessera v1 roster-hash";
    pub const DEALING_MASK: &str = "Tessera v1 dealing-mask";
    pub const DEALING_CHALLENGE: &str = "Tessera v1 dealing-challenge";
    pub const KEY_VOTE: &str = "Tessera v1 key-vote";
    pub const LEDGER_MESSAGE: &str = "Tessera v1 ledger-message";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[
        ROSTER_HASH,
        DEALING_MASK,
        DEALING_CHALLENGE,
        KEY_VOTE,
        LEDGER_MESSAGE,
    ];
}

/// Compute BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// The context string must be one of the registered context strings in
/// [`contexts`].
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Derive a variable-length key using BLAKE3's derive-key mode XOF.
///
/// Used where more than 32 bytes of uniform output are needed, e.g. when
/// reducing into a prime field without noticeable bias.
pub fn derive_key_xof(context: &str, key_material: &[u8], output: &mut [u8]) {
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    hasher.finalize_xof().fill(output);
}

/// Compute a keyed BLAKE3 hash (MAC/PRF).
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Verify that a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

/// Encode multiple dynamic fields using length-prefixed encoding.
///
/// Inputs use `LE32(len(field1)) || field1 || LE32(len(field2)) || field2 || ...`
/// so that field boundaries cannot be shifted to produce collisions.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut output = Vec::with_capacity(total_len);
    for field in fields {
        output.extend_from_slice(&(field.len() as u32).to_le_bytes());
        output.extend_from_slice(field);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_context_strings_registered() {
        for ctx in contexts::ALL_CONTEXTS {
            assert!(
                ctx.starts_with("Tessera v1 "),
                "Context string '{ctx}' has wrong prefix"
            );
        }
        assert!(is_registered_context(contexts::DEALING_MASK));
        assert!(!is_registered_context("Tessera v1 unregistered"));
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"tessera test vector"), hash(b"tessera test vector"));
    }

    #[test]
    fn test_derive_key_domain_separation() {
        let a = derive_key(contexts::DEALING_MASK, b"material");
        let b = derive_key(contexts::DEALING_CHALLENGE, b"material");
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_key_xof_prefix_consistent() {
        let short = derive_key(contexts::DEALING_MASK, b"material");
        let mut long = [0u8; 64];
        derive_key_xof(contexts::DEALING_MASK, b"material", &mut long);
        assert_eq!(short, long[..32]);
    }

    #[test]
    fn test_encode_multi_field_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc".
        let e1 = encode_multi_field(&[b"ab", b"c"]);
        let e2 = encode_multi_field(&[b"a", b"bc"]);
        assert_ne!(e1, e2);
        assert_ne!(hash(&e1), hash(&e2));
    }

    #[test]
    fn test_keyed_hash_differs_from_plain() {
        let key = derive_key(contexts::KEY_VOTE, b"key material");
        assert_ne!(keyed_hash(&key, b"message").to_vec(), hash(b"message").to_vec());
    }
}
