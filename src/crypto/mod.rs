/// Cryptographic primitives consumed by the skykey core.
///
/// The cipher and the hash are opaque to the manager: the cipher produces and
/// validates `key || nonce` entropy tuples, the hash derives identifiers and
/// subkey nonces.
pub mod cipher;
pub mod hash;
pub mod sensitive;
