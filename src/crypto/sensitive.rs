/// Wrapper for key entropy that is zeroized when dropped.
use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Variable-length secret bytes, zeroized on drop.
///
/// `Skykey` values handed to callers carry their own copy, so the
/// zeroize-on-drop guarantee travels with them; callers are responsible for
/// not spilling the bytes into longer-lived buffers.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SensitiveBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SensitiveBytes {
    // Key material never reaches logs or panic messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes({} bytes)", self.0.len())
    }
}
