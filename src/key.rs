/// File keys ("skykeys") and their content-derived identifiers.
///
/// A master key and every subkey derived from it share an ID, because the ID
/// hashes only the cipher type and the key portion of the entropy; the nonce
/// is what varies between subkeys. That shared ID is how the master key for
/// an encrypted file is found again later.
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chacha20::XChaCha20;

use crate::codec::{self, Specifier, SPECIFIER_LEN};
use crate::crypto::cipher::{self, CipherType, ENTROPY_LEN, KEY_LEN, XNONCE_LEN};
use crate::crypto::hash;
use crate::crypto::sensitive::SensitiveBytes;
use crate::error::{Result, SkykeyError};

/// Width of a skykey identifier.
pub const ID_LEN: usize = 16;

/// Maximum byte length of a skykey name.
pub const MAX_NAME_LEN: usize = 128;

/// Domain-separation tag hashed into every skykey ID.
pub const SKYKEY_SPECIFIER: Specifier = Specifier::new("Skykey");

/// Identifier of a skykey: the leading 16 bytes of the domain-separated hash
/// of its cipher type and key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkykeyId(pub [u8; ID_LEN]);

impl fmt::Display for SkykeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE.encode(self.0))
    }
}

impl FromStr for SkykeyId {
    type Err = SkykeyError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(s)
            .map_err(|e| SkykeyError::BadEncoding(e.to_string()))?;
        let id: [u8; ID_LEN] = bytes.try_into().map_err(|_| {
            SkykeyError::BadEncoding(format!("skykey ID must decode to {ID_LEN} bytes"))
        })?;
        Ok(SkykeyId(id))
    }
}

/// A symmetric file key.
///
/// For XChaCha20 the entropy is 56 bytes laid out `key(32) || nonce(24)`.
/// Keys are plain values: the store hands out clones, and mutating a clone
/// does not touch the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skykey {
    pub name: String,
    pub cipher_type: CipherType,
    pub entropy: SensitiveBytes,
}

impl Skykey {
    pub fn new(name: String, cipher_type: CipherType, entropy: SensitiveBytes) -> Self {
        Skykey {
            name,
            cipher_type,
            entropy,
        }
    }

    /// Serialize into the wire form:
    /// `[name_len(8) | name | cipher_tag(16) | entropy_len(8) | entropy]`.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(8 + self.name.len() + SPECIFIER_LEN + 8 + self.entropy.len());
        out.extend_from_slice(&(self.name.len() as u64).to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(self.cipher_type.specifier().as_bytes());
        out.extend_from_slice(&(self.entropy.len() as u64).to_le_bytes());
        out.extend_from_slice(self.entropy.as_bytes());
        out
    }

    /// Decode one wire-form key from `r`, leaving the reader positioned just
    /// past it.
    pub fn decode_from<R: Read>(r: &mut R) -> Result<Skykey> {
        let name_bytes = codec::read_prefixed(r)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|e| SkykeyError::BadEncoding(format!("skykey name is not UTF-8: {e}")))?;
        let tag = codec::read_specifier(r)?;
        let entropy = codec::read_prefixed(r)?;
        Ok(Skykey {
            name,
            cipher_type: CipherType::from_specifier(tag),
            entropy: SensitiveBytes::new(entropy),
        })
    }

    /// The key's identifier. Subkeys share the master's ID because the nonce
    /// portion of the entropy is excluded from the hash.
    pub fn id(&self) -> SkykeyId {
        let entropy = self.entropy.as_bytes();
        let effective = match self.cipher_type.key_len() {
            Some(key_len) if entropy.len() >= key_len => &entropy[..key_len],
            _ => entropy,
        };
        let digest = hash::hash_all(&[
            SKYKEY_SPECIFIER.as_bytes(),
            self.cipher_type.specifier().as_bytes(),
            effective,
        ]);
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&digest[..ID_LEN]);
        SkykeyId(id)
    }

    /// The nonce portion of the entropy.
    pub fn nonce(&self) -> &[u8] {
        let entropy = self.entropy.as_bytes();
        match self.cipher_type.key_len() {
            Some(key_len) if entropy.len() >= key_len => &entropy[key_len..],
            _ => &[],
        }
    }

    /// Build a subkey with the same key material but the given nonce. Skykeys
    /// may only be used once per nonce, so every encrypted file gets its own
    /// subkey.
    pub fn subkey_with_nonce(&self, nonce: &[u8]) -> Result<Skykey> {
        if nonce.len() != XNONCE_LEN {
            return Err(SkykeyError::BadNonceSize);
        }
        let key_part = self
            .entropy
            .as_bytes()
            .get(..KEY_LEN)
            .ok_or_else(|| SkykeyError::BadEncoding("entropy shorter than cipher key".into()))?;

        let mut entropy = Vec::with_capacity(ENTROPY_LEN);
        entropy.extend_from_slice(key_part);
        entropy.extend_from_slice(nonce);

        let subkey = Skykey {
            name: self.name.clone(),
            cipher_type: self.cipher_type,
            entropy: SensitiveBytes::new(entropy),
        };
        // Sanity check that the cipher accepts the assembled entropy.
        cipher::new_instance(subkey.cipher_type, subkey.entropy.as_bytes())?;
        Ok(subkey)
    }

    /// Build a subkey with a fresh random nonce.
    pub fn generate_file_specific_subkey(&self) -> Result<Skykey> {
        let nonce = cipher::generate_nonce();
        self.subkey_with_nonce(&nonce)
    }

    /// Build a subkey whose nonce is derived from this key's nonce and the
    /// given derivation bytes. Deterministic in both inputs.
    pub fn derive_subkey(&self, derivation: &[u8]) -> Result<Skykey> {
        let digest = hash::hash_all(&[self.nonce(), derivation]);
        self.subkey_with_nonce(&digest[..XNONCE_LEN])
    }

    /// The XChaCha20 instance this key configures.
    pub fn cipher_instance(&self) -> Result<XChaCha20> {
        cipher::new_instance(self.cipher_type, self.entropy.as_bytes())
    }
}

impl fmt::Display for Skykey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE.encode(self.wire_bytes()))
    }
}

impl FromStr for Skykey {
    type Err = SkykeyError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(s)
            .map_err(|e| SkykeyError::BadEncoding(e.to_string()))?;
        let mut cursor = bytes.as_slice();
        let key = Skykey::decode_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(SkykeyError::BadEncoding(
                "trailing bytes after skykey".into(),
            ));
        }
        Ok(key)
    }
}
