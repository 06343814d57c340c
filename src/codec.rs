/// Wire-format primitives for the skykey persist file.
///
/// All multi-byte integers are little-endian. Variable-length fields carry an
/// 8-byte length prefix; fixed 16-byte specifier tags are written raw.
use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Result, SkykeyError};

/// Width of a specifier tag.
pub const SPECIFIER_LEN: usize = 16;

/// Cap on decoded variable-length fields. Keys are small; a larger prefix
/// means corrupt or hostile input.
pub const MAX_FIELD_LEN: u64 = 4096;

/// A fixed-width ASCII tag, NUL-padded on the right. Used for the file magic,
/// the version tag, cipher-type tags, and hash domain separation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Specifier([u8; SPECIFIER_LEN]);

impl Specifier {
    /// Build a specifier from an ASCII literal. Fails to compile if the
    /// literal exceeds 16 bytes.
    pub const fn new(tag: &str) -> Self {
        let bytes = tag.as_bytes();
        assert!(bytes.len() <= SPECIFIER_LEN, "specifier tag too long");
        let mut out = [0u8; SPECIFIER_LEN];
        let mut i = 0;
        while i < bytes.len() {
            out[i] = bytes[i];
            i += 1;
        }
        Specifier(out)
    }

    pub const fn from_bytes(bytes: [u8; SPECIFIER_LEN]) -> Self {
        Specifier(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SPECIFIER_LEN] {
        &self.0
    }

    /// The tag with trailing NUL padding stripped, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(self.trimmed()).ok()
    }

    fn trimmed(&self) -> &[u8] {
        let end = self.0.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &self.0[..end]
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Specifier({self})")
    }
}

/// Read a length-prefixed byte field, refusing prefixes beyond
/// `MAX_FIELD_LEN`.
pub fn read_prefixed<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_u64(r)?;
    if len > MAX_FIELD_LEN {
        return Err(SkykeyError::BadEncoding(format!(
            "length prefix {len} exceeds the {MAX_FIELD_LEN}-byte field cap"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact(r, &mut buf)?;
    Ok(buf)
}

/// Read a raw 16-byte specifier tag.
pub fn read_specifier<R: Read>(r: &mut R) -> Result<Specifier> {
    let mut buf = [0u8; SPECIFIER_LEN];
    read_exact(r, &mut buf)?;
    Ok(Specifier::from_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SkykeyError::ShortRead,
        _ => SkykeyError::Io("reading wire field".into(), e),
    })
}

/// An `io::Write` adapter that tracks how many bytes pass through it.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
