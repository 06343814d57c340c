/// XChaCha20 primitive wrapper.
///
/// The key manager treats the cipher as an opaque source of `key || nonce`
/// entropy tuples; this module owns the widths and the validity check.
use chacha20::cipher::KeyIvInit;
use chacha20::XChaCha20;
use rand::RngCore;

use crate::codec::Specifier;
use crate::crypto::sensitive::SensitiveBytes;
use crate::error::{Result, SkykeyError};

/// XChaCha20 key width.
pub const KEY_LEN: usize = 32;
/// XChaCha20 extended nonce width.
pub const XNONCE_LEN: usize = 24;
/// Total entropy width: key followed by nonce.
pub const ENTROPY_LEN: usize = KEY_LEN + XNONCE_LEN;

/// Identifier tag for a symmetric cipher.
///
/// The wire format preserves arbitrary tags so foreign keys survive
/// import/export round-trips, but only XChaCha20 keys may enter a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherType(Specifier);

impl CipherType {
    pub const XCHACHA20: CipherType = CipherType(Specifier::new("XChaCha20"));
    /// Present for import/export only; never accepted by a store.
    pub const AES256GCM: CipherType = CipherType(Specifier::new("AES256GCM"));

    pub const fn from_specifier(tag: Specifier) -> Self {
        CipherType(tag)
    }

    pub fn specifier(&self) -> &Specifier {
        &self.0
    }

    /// Key width for this cipher, if known.
    pub fn key_len(&self) -> Option<usize> {
        match *self {
            CipherType::XCHACHA20 => Some(KEY_LEN),
            _ => None,
        }
    }
}

impl std::fmt::Display for CipherType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Draw fresh `key || nonce` entropy for the given cipher.
pub fn generate_entropy(ct: CipherType) -> Result<SensitiveBytes> {
    if ct != CipherType::XCHACHA20 {
        return Err(SkykeyError::UnsupportedCipherType);
    }
    let mut entropy = vec![0u8; ENTROPY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    Ok(SensitiveBytes::new(entropy))
}

/// Generate a random 24-byte extended nonce.
pub fn generate_nonce() -> [u8; XNONCE_LEN] {
    let mut nonce = [0u8; XNONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Validate entropy for the cipher and construct a usable instance.
pub fn new_instance(ct: CipherType, entropy: &[u8]) -> Result<XChaCha20> {
    if ct != CipherType::XCHACHA20 {
        return Err(SkykeyError::UnsupportedCipherType);
    }
    if entropy.len() != ENTROPY_LEN {
        return Err(SkykeyError::BadEncoding(format!(
            "XChaCha20 entropy must be {ENTROPY_LEN} bytes, got {}",
            entropy.len()
        )));
    }
    XChaCha20::new_from_slices(&entropy[..KEY_LEN], &entropy[KEY_LEN..])
        .map_err(|e| SkykeyError::BadEncoding(e.to_string()))
}
