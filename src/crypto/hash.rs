/// BLAKE3 hashing for skykey identity and nonce derivation.
///
/// Callers pass a sequence of parts; a leading specifier tag in the sequence
/// provides domain separation.

/// Output width of the hash.
pub const HASH_LEN: usize = 32;

/// Hash the concatenation of `parts`.
pub fn hash_all(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
