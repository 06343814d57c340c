/// Append-only persistence for skykeys.
///
/// Layout: a fixed 40-byte header followed by concatenated key wire forms.
///
/// ```text
/// [magic(16) | version(16) | file_len(8) | key_0 | key_1 | ...]
/// ```
///
/// `file_len` is the number of valid bytes including the header. A record is
/// synced to disk before the header advances past it, so after a crash the
/// header never points past a partial record; leftover bytes beyond
/// `file_len` are ignored on load and overwritten by the next append.
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use semver::Version;
use tracing::info;

use crate::codec::{self, CountingWriter, Specifier, SPECIFIER_LEN};
use crate::error::{Result, SkykeyError};
use crate::key::Skykey;

/// Name of the persist file inside the persist directory.
pub const PERSIST_FILENAME: &str = "skykeys.dat";

/// First bytes of every skykey file.
pub const FILE_MAGIC: Specifier = Specifier::new("SkykeyFile");

/// Version written into fresh headers. On load, older on-disk versions are
/// accepted; newer ones are rejected.
pub const VERSION_STRING: &str = "1.4.4";

/// Header width: magic, version, and the 8-byte file length.
pub const HEADER_LEN: u64 = (SPECIFIER_LEN * 2 + 8) as u64;

#[cfg(unix)]
const FILE_PERM: u32 = 0o644;
#[cfg(unix)]
const DIR_PERM: u32 = 0o755;

/// Owns the on-disk skykey file and tracks its validated length and version.
/// Not internally synchronized; the manager serializes all access.
#[derive(Debug)]
pub struct PersistStore {
    path: PathBuf,
    version: Specifier,
    file_len: u64,
}

impl PersistStore {
    /// Open (creating if necessary) the persist file under `persist_dir` and
    /// decode every stored key.
    pub fn open(persist_dir: &Path) -> Result<(PersistStore, Vec<Skykey>)> {
        create_persist_dir(persist_dir)?;
        let mut store = PersistStore {
            path: persist_dir.join(PERSIST_FILENAME),
            version: Specifier::new(VERSION_STRING),
            file_len: HEADER_LEN,
        };
        let keys = store.load()?;
        Ok((store, keys))
    }

    /// Number of bytes the store considers valid, including the header.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Append a key's wire form, then advance the header. The record is
    /// durable before the header points past it; on failure the recorded
    /// length is left where it was and the bytes are overwritten next time.
    pub fn append(&mut self, key: &Skykey) -> Result<()> {
        let mut file = open_rw(&self.path, false)?;
        file.seek(SeekFrom::Start(self.file_len))
            .map_err(|e| SkykeyError::Io("seeking past valid skykey data".into(), e))?;

        let mut writer = CountingWriter::new(&mut file);
        writer
            .write_all(&key.wire_bytes())
            .map_err(|e| SkykeyError::Io("writing skykey record".into(), e))?;
        let written = writer.bytes_written();

        file.sync_all()
            .map_err(|e| SkykeyError::Io("syncing skykey record".into(), e))?;

        self.file_len += written;
        self.write_header(&mut file)
    }

    fn load(&mut self) -> Result<Vec<Skykey>> {
        let mut file = open_rw(&self.path, true)?;
        let disk_len = file
            .metadata()
            .map_err(|e| SkykeyError::Io("reading skykey file metadata".into(), e))?
            .len();

        // A file without a full header is treated as brand new.
        if disk_len < HEADER_LEN {
            self.write_header(&mut file)?;
            info!(path = %self.path.display(), "initialized skykey persist file");
            return Ok(Vec::new());
        }

        self.read_header(&mut file)?;

        file.seek(SeekFrom::Start(HEADER_LEN))
            .map_err(|e| SkykeyError::Io("seeking past skykey file header".into(), e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| SkykeyError::Io("reading skykey records".into(), e))?;

        // Decode records until the recorded length is reached; bytes past it
        // are leftovers from an interrupted append.
        let target = (self.file_len - HEADER_LEN) as usize;
        let mut cursor = buf.as_slice();
        let mut keys = Vec::new();
        while buf.len() - cursor.len() < target {
            let key = Skykey::decode_from(&mut cursor)?;
            if buf.len() - cursor.len() > target {
                return Err(SkykeyError::TruncatedFile);
            }
            keys.push(key);
        }

        info!(
            path = %self.path.display(),
            keys = keys.len(),
            version = %self.version,
            "loaded skykey persist file"
        );
        Ok(keys)
    }

    fn read_header(&mut self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| SkykeyError::Io("seeking to skykey file header".into(), e))?;
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)
            .map_err(|e| SkykeyError::Io("reading skykey file header".into(), e))?;

        let mut cursor = header.as_slice();
        let magic = codec::read_specifier(&mut cursor)?;
        if magic != FILE_MAGIC {
            return Err(SkykeyError::BadHeader("missing skykey file magic".into()));
        }

        let version_tag = codec::read_specifier(&mut cursor)?;
        let version_str = version_tag
            .text()
            .ok_or_else(|| SkykeyError::BadHeader("version tag is not valid UTF-8".into()))?;
        let on_disk = Version::parse(version_str).map_err(|e| {
            SkykeyError::BadHeader(format!("invalid version {version_str:?}: {e}"))
        })?;
        let current = Version::parse(VERSION_STRING)
            .map_err(|e| SkykeyError::BadHeader(format!("invalid current version: {e}")))?;
        if on_disk > current {
            return Err(SkykeyError::BadHeader(format!(
                "unknown skykey file version {on_disk}"
            )));
        }

        let file_len = codec::read_u64(&mut cursor)?;
        if file_len < HEADER_LEN {
            return Err(SkykeyError::BadHeader(
                "recorded length shorter than the header".into(),
            ));
        }

        // Keep writing the loaded (possibly older) version on future appends.
        self.version = version_tag;
        self.file_len = file_len;
        Ok(())
    }

    fn write_header(&mut self, file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| SkykeyError::Io("seeking to skykey file header".into(), e))?;

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(FILE_MAGIC.as_bytes());
        header.extend_from_slice(self.version.as_bytes());
        header.extend_from_slice(&self.file_len.to_le_bytes());

        file.write_all(&header)
            .map_err(|e| SkykeyError::Io("writing skykey file header".into(), e))?;
        file.sync_all()
            .map_err(|e| SkykeyError::Io("syncing skykey file header".into(), e))
    }
}

fn open_rw(path: &Path, create: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    if create {
        opts.create(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(FILE_PERM);
    }
    opts.open(path)
        .map_err(|e| SkykeyError::Io("opening skykey persist file".into(), e))
}

#[cfg(unix)]
fn create_persist_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_PERM)
        .create(dir)
        .map_err(|e| SkykeyError::Io("creating skykey persist directory".into(), e))
}

#[cfg(not(unix))]
fn create_persist_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| SkykeyError::Io("creating skykey persist directory".into(), e))
}
