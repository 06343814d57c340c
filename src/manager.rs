/// The skykey manager: an in-memory dual index over an append-only persist
/// file.
///
/// One manager instance owns one persist file. A single mutex guards both
/// index maps and all mutating disk I/O, so readers and writers always
/// observe a consistent snapshot. Lookups are pure in-memory; mutations
/// block on disk while holding the lock.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::crypto::cipher::{self, CipherType};
use crate::error::{Result, SkykeyError};
use crate::key::{Skykey, SkykeyId, MAX_NAME_LEN};
use crate::persist::PersistStore;

/// Manages creation, persistence, and lookup of skykeys, referenced by
/// unique name or by identifier.
pub struct SkykeyManager {
    inner: Mutex<Inner>,
}

/// State guarded by the manager lock: the secondary `name → id` index, the
/// authoritative `id → key` map, and the persist store.
struct Inner {
    ids_by_name: HashMap<String, SkykeyId>,
    keys_by_id: HashMap<SkykeyId, Skykey>,
    store: PersistStore,
}

impl SkykeyManager {
    /// Open a manager over `<persist_dir>/skykeys.dat`, creating the
    /// directory and file as needed, and index every stored key.
    pub fn new(persist_dir: &Path) -> Result<SkykeyManager> {
        let (store, keys) = PersistStore::open(persist_dir)?;

        let mut ids_by_name = HashMap::new();
        let mut keys_by_id = HashMap::new();
        for key in keys {
            let id = key.id();
            ids_by_name.insert(key.name.clone(), id);
            keys_by_id.insert(id, key);
        }

        Ok(SkykeyManager {
            inner: Mutex::new(Inner {
                ids_by_name,
                keys_by_id,
                store,
            }),
        })
    }

    /// True iff keys of this cipher type may be stored.
    pub fn supports_cipher_type(&self, cipher_type: CipherType) -> bool {
        cipher_type == CipherType::XCHACHA20
    }

    /// Create and persist a new skykey under `name` with fresh entropy.
    pub fn create_key(&self, name: &str, cipher_type: CipherType) -> Result<Skykey> {
        if name.len() > MAX_NAME_LEN {
            return Err(SkykeyError::NameTooLong);
        }
        if !self.supports_cipher_type(cipher_type) {
            return Err(SkykeyError::UnsupportedCipherType);
        }

        let mut inner = self.lock();
        if inner.ids_by_name.contains_key(name) {
            return Err(SkykeyError::NameExists);
        }

        let entropy = cipher::generate_entropy(cipher_type)?;
        let key = Skykey::new(name.to_owned(), cipher_type, entropy);
        inner.save_key(&key)?;
        Ok(key)
    }

    /// Persist an imported skykey with caller-supplied entropy.
    pub fn add_key(&self, key: Skykey) -> Result<()> {
        if !self.supports_cipher_type(key.cipher_type) {
            return Err(SkykeyError::UnsupportedCipherType);
        }
        // Malformed entropy never reaches the store.
        cipher::new_instance(key.cipher_type, key.entropy.as_bytes())?;

        let mut inner = self.lock();
        if inner.keys_by_id.contains_key(&key.id()) {
            return Err(SkykeyError::IdExists);
        }
        if inner.ids_by_name.contains_key(&key.name) {
            return Err(SkykeyError::NameExists);
        }
        inner.save_key(&key)
    }

    /// The ID associated with the given key name.
    pub fn id_by_name(&self, name: &str) -> Result<SkykeyId> {
        self.lock()
            .ids_by_name
            .get(name)
            .copied()
            .ok_or(SkykeyError::NoSuchName)
    }

    /// The skykey associated with the given key name.
    pub fn key_by_name(&self, name: &str) -> Result<Skykey> {
        let inner = self.lock();
        let id = inner.ids_by_name.get(name).ok_or(SkykeyError::NoSuchName)?;
        inner.keys_by_id.get(id).cloned().ok_or(SkykeyError::NoSuchId)
    }

    /// The skykey associated with the given ID.
    pub fn key_by_id(&self, id: SkykeyId) -> Result<Skykey> {
        self.lock()
            .keys_by_id
            .get(&id)
            .cloned()
            .ok_or(SkykeyError::NoSuchId)
    }

    /// A snapshot of every stored skykey, in unspecified order. The returned
    /// keys are the caller's to mutate.
    pub fn all_keys(&self) -> Vec<Skykey> {
        self.lock().keys_by_id.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Map state stays consistent even if a holder panicked: the disk
        // append either completed before the insertions or not at all.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    /// Append to disk first; index only a durably stored key.
    fn save_key(&mut self, key: &Skykey) -> Result<()> {
        self.store.append(key)?;

        let id = key.id();
        self.ids_by_name.insert(key.name.clone(), id);
        self.keys_by_id.insert(id, key.clone());
        debug!(name = %key.name, id = %id, "stored skykey");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::{ENTROPY_LEN, KEY_LEN};
    use crate::crypto::sensitive::SensitiveBytes;
    use crate::persist::{HEADER_LEN, PERSIST_FILENAME};
    use std::fs;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn persist_size(dir: &Path) -> u64 {
        fs::metadata(dir.join(PERSIST_FILENAME)).unwrap().len()
    }

    #[test]
    fn test_create_key_writes_exact_record() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        let key = manager.create_key("alpha", CipherType::XCHACHA20).unwrap();
        assert_eq!(key.name, "alpha");
        assert_eq!(key.entropy.len(), ENTROPY_LEN);

        // header + (8 + 5 + 16 + 8 + 56)
        assert_eq!(persist_size(dir.path()), HEADER_LEN + 93);

        let reopened = SkykeyManager::new(dir.path()).unwrap();
        let loaded = reopened.key_by_name("alpha").unwrap();
        assert_eq!(loaded.name, "alpha");
        assert_eq!(loaded.entropy.len(), ENTROPY_LEN);
        assert_eq!(loaded, key);
    }

    #[test]
    fn test_create_key_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        manager.create_key("alpha", CipherType::XCHACHA20).unwrap();
        let size = persist_size(dir.path());

        let err = manager
            .create_key("alpha", CipherType::XCHACHA20)
            .unwrap_err();
        assert!(matches!(err, SkykeyError::NameExists));
        assert_eq!(persist_size(dir.path()), size);
    }

    #[test]
    fn test_create_key_rejects_unsupported_cipher() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        let size = persist_size(dir.path());

        let err = manager
            .create_key("beta", CipherType::AES256GCM)
            .unwrap_err();
        assert!(matches!(err, SkykeyError::UnsupportedCipherType));
        assert_eq!(persist_size(dir.path()), size);
    }

    #[test]
    fn test_create_key_rejects_long_name() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        let name = "x".repeat(MAX_NAME_LEN + 1);
        let err = manager.create_key(&name, CipherType::XCHACHA20).unwrap_err();
        assert!(matches!(err, SkykeyError::NameTooLong));

        // The boundary length itself is accepted.
        let name = "x".repeat(MAX_NAME_LEN);
        assert!(manager.create_key(&name, CipherType::XCHACHA20).is_ok());
    }

    #[test]
    fn test_add_key_roundtrips_through_text_form() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        let key = manager.create_key("exported", CipherType::XCHACHA20).unwrap();

        let dir2 = tempdir().unwrap();
        let other = SkykeyManager::new(dir2.path()).unwrap();
        let imported: Skykey = key.to_string().parse().unwrap();
        other.add_key(imported).unwrap();

        assert_eq!(other.key_by_name("exported").unwrap(), key);
        assert_eq!(other.key_by_id(key.id()).unwrap(), key);
    }

    #[test]
    fn test_add_key_rejects_duplicate_id_first() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        let key = manager.create_key("alpha", CipherType::XCHACHA20).unwrap();

        // Same entropy and name: both predicates collide, ID wins.
        let err = manager.add_key(key.clone()).unwrap_err();
        assert!(matches!(err, SkykeyError::IdExists));

        // Same entropy under a different name still collides by ID.
        let mut renamed = key.clone();
        renamed.name = "other".to_owned();
        let err = manager.add_key(renamed).unwrap_err();
        assert!(matches!(err, SkykeyError::IdExists));
    }

    #[test]
    fn test_add_key_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        manager.create_key("alpha", CipherType::XCHACHA20).unwrap();

        let fresh = Skykey::new(
            "alpha".to_owned(),
            CipherType::XCHACHA20,
            SensitiveBytes::new(vec![0x5A; ENTROPY_LEN]),
        );
        let err = manager.add_key(fresh).unwrap_err();
        assert!(matches!(err, SkykeyError::NameExists));
    }

    #[test]
    fn test_add_key_rejects_unsupported_cipher() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        let foreign = Skykey::new(
            "foreign".to_owned(),
            CipherType::AES256GCM,
            SensitiveBytes::new(vec![0x11; ENTROPY_LEN]),
        );
        let err = manager.add_key(foreign).unwrap_err();
        assert!(matches!(err, SkykeyError::UnsupportedCipherType));
    }

    #[test]
    fn test_add_key_rejects_malformed_entropy() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        let short = Skykey::new(
            "short".to_owned(),
            CipherType::XCHACHA20,
            SensitiveBytes::new(vec![0x11; KEY_LEN]),
        );
        let err = manager.add_key(short).unwrap_err();
        assert!(matches!(err, SkykeyError::BadEncoding(_)));
    }

    #[test]
    fn test_lookups_miss() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        assert!(matches!(
            manager.id_by_name("ghost").unwrap_err(),
            SkykeyError::NoSuchName
        ));
        assert!(matches!(
            manager.key_by_name("ghost").unwrap_err(),
            SkykeyError::NoSuchName
        ));
        assert!(matches!(
            manager.key_by_id(SkykeyId([0u8; 16])).unwrap_err(),
            SkykeyError::NoSuchId
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let names = ["alpha", "beta", "gamma", "delta"];
        let mut created = Vec::new();

        {
            let manager = SkykeyManager::new(dir.path()).unwrap();
            for name in names {
                created.push(manager.create_key(name, CipherType::XCHACHA20).unwrap());
            }
        }

        let manager = SkykeyManager::new(dir.path()).unwrap();
        let mut all = manager.all_keys();
        assert_eq!(all.len(), created.len());

        all.sort_by(|a, b| a.name.cmp(&b.name));
        let mut expected = created.clone();
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(all, expected);

        for key in &created {
            assert_eq!(manager.key_by_name(&key.name).unwrap(), *key);
            assert_eq!(manager.key_by_id(key.id()).unwrap(), *key);
            assert_eq!(manager.id_by_name(&key.name).unwrap(), key.id());
        }
    }

    #[test]
    fn test_recovers_after_interrupted_append() {
        let dir = tempdir().unwrap();
        let first = {
            let manager = SkykeyManager::new(dir.path()).unwrap();
            manager.create_key("alpha", CipherType::XCHACHA20).unwrap()
        };

        // Trailing bytes past the recorded length, as left by an append that
        // died before the header advanced.
        let path = dir.path().join(PERSIST_FILENAME);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAA; 17]).unwrap();
        drop(file);

        let manager = SkykeyManager::new(dir.path()).unwrap();
        assert_eq!(manager.all_keys(), vec![first.clone()]);

        // The next create overwrites the garbage and both keys survive.
        let second = manager.create_key("beta", CipherType::XCHACHA20).unwrap();
        assert_eq!(persist_size(dir.path()), HEADER_LEN + 93 + 92);

        let reopened = SkykeyManager::new(dir.path()).unwrap();
        assert_eq!(reopened.key_by_name("alpha").unwrap(), first);
        assert_eq!(reopened.key_by_name("beta").unwrap(), second);
    }

    #[test]
    fn test_all_keys_returns_detached_copies() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        manager.create_key("alpha", CipherType::XCHACHA20).unwrap();

        let mut snapshot = manager.all_keys();
        snapshot[0].name = "mutated".to_owned();

        assert!(manager.key_by_name("alpha").is_ok());
        assert!(matches!(
            manager.key_by_name("mutated").unwrap_err(),
            SkykeyError::NoSuchName
        ));
    }

    #[test]
    fn test_subkeys_resolve_back_to_master() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();
        let master = manager.create_key("master", CipherType::XCHACHA20).unwrap();

        let subkey = master.generate_file_specific_subkey().unwrap();
        let found = manager.key_by_id(subkey.id()).unwrap();
        assert_eq!(found, master);

        // Subkeys are derived values, never stored.
        assert_eq!(manager.all_keys().len(), 1);
    }

    #[test]
    fn test_concurrent_creates_stay_consistent() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(SkykeyManager::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for j in 0..4 {
                        manager
                            .create_key(&format!("key-{i}-{j}"), CipherType::XCHACHA20)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(manager.all_keys().len(), 32);
        let reopened = SkykeyManager::new(dir.path()).unwrap();
        assert_eq!(reopened.all_keys().len(), 32);
    }

    #[test]
    fn test_supports_cipher_type() {
        let dir = tempdir().unwrap();
        let manager = SkykeyManager::new(dir.path()).unwrap();

        assert!(manager.supports_cipher_type(CipherType::XCHACHA20));
        assert!(!manager.supports_cipher_type(CipherType::AES256GCM));
    }
}
