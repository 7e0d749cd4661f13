//! The persistent block store (§4.2, §6): the external collaborator the VFS
//! layers itself over. Keys are absolute real (root-prefixed) paths; values
//! are arbitrary byte blobs. Reads, deletes, and listing are synchronous;
//! writes, flush, and pull are asynchronous — queued onto a background
//! worker and their completion is reported only through the log, never a
//! return value, matching the crash model in §4.2.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Sender};

/// The persistence collaborator's contract.
pub trait BlockStore: Send + Sync {
    /// Synchronously read a blob. `None` if the key is absent.
    fn read(&self, key: &str) -> Option<Vec<u8>>;

    /// Queue an asynchronous write. Returns once the write is queued, not
    /// once it is durable.
    fn write(&self, key: &str, value: Vec<u8>);

    /// Queue an asynchronous delete.
    fn delete(&self, key: &str);

    /// Synchronously list every key with the given prefix.
    fn list(&self, prefix: &str) -> Vec<String>;

    /// Request the store to durabilise pending writes. Asynchronous;
    /// completion is logged, not returned.
    fn flush(&self);

    /// Request the store to refresh its in-memory view from the backing
    /// medium (used at boot). Asynchronous; completion is logged.
    fn pull(&self);
}

enum StoreCommand {
    Write(String, Vec<u8>),
    Delete(String),
    Flush,
    Pull,
}

/// A `BlockStore` backed by ordinary files under a host directory. Keys are
/// mapped to files by replacing `/` with a filesystem-safe separator so the
/// whole key space fits in one flat directory regardless of guest path
/// depth.
pub struct FsBlockStore {
    root: PathBuf,
    cache: Mutex<BTreeMap<String, Vec<u8>>>,
    tx: Sender<StoreCommand>,
}

fn key_to_filename(key: &str) -> String {
    key.replace('/', "__SLASH__")
}

impl FsBlockStore {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Arc<Self>> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut cache = BTreeMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            let key = filename.replace("__SLASH__", "/");
            let data = std::fs::read(entry.path())?;
            cache.insert(key, data);
        }

        let (tx, rx) = unbounded::<StoreCommand>();
        let store = Arc::new(FsBlockStore {
            root: root.clone(),
            cache: Mutex::new(cache),
            tx,
        });

        let worker_root = root.clone();
        std::thread::Builder::new()
            .name("blockstore-writer".into())
            .spawn(move || {
                for cmd in rx {
                    match cmd {
                        StoreCommand::Write(key, value) => {
                            let path = worker_root.join(key_to_filename(&key));
                            match std::fs::write(&path, &value) {
                                Ok(()) => log::debug!(target: "kernel::store", "wrote {key} ({} bytes)", value.len()),
                                Err(e) => log::error!(target: "kernel::store", "write {key} failed: {e}"),
                            }
                        }
                        StoreCommand::Delete(key) => {
                            let path = worker_root.join(key_to_filename(&key));
                            match std::fs::remove_file(&path) {
                                Ok(()) => log::debug!(target: "kernel::store", "deleted {key}"),
                                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                                Err(e) => log::error!(target: "kernel::store", "delete {key} failed: {e}"),
                            }
                        }
                        StoreCommand::Flush => {
                            log::info!(target: "kernel::store", "push_to_persist acknowledged");
                        }
                        StoreCommand::Pull => {
                            log::info!(target: "kernel::store", "pull_from_persist acknowledged");
                        }
                    }
                }
            })?;

        Ok(store)
    }
}

impl BlockStore for FsBlockStore {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn write(&self, key: &str, value: Vec<u8>) {
        self.cache.lock().unwrap().insert(key.to_string(), value.clone());
        let _ = self.tx.send(StoreCommand::Write(key.to_string(), value));
    }

    fn delete(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
        let _ = self.tx.send(StoreCommand::Delete(key.to_string()));
    }

    fn list(&self, prefix: &str) -> Vec<String> {
        self.cache
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn flush(&self) {
        let _ = self.tx.send(StoreCommand::Flush);
    }

    fn pull(&self) {
        let _ = self.tx.send(StoreCommand::Pull);
    }
}

/// A pure in-memory `BlockStore`, used by fast unit tests that don't care
/// about durability across process restarts.
#[derive(Default)]
pub struct MemoryBlockStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl BlockStore for MemoryBlockStore {
    fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn write(&self, key: &str, value: Vec<u8>) {
        self.data.lock().unwrap().insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.data.lock().unwrap().remove(key);
    }

    fn list(&self, prefix: &str) -> Vec<String> {
        self.data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn flush(&self) {
        log::info!(target: "kernel::store", "push_to_persist acknowledged (memory store)");
    }

    fn pull(&self) {
        log::info!(target: "kernel::store", "pull_from_persist acknowledged (memory store)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrips() {
        let store = MemoryBlockStore::new();
        store.write("/persistent/a", b"hello".to_vec());
        assert_eq!(store.read("/persistent/a"), Some(b"hello".to_vec()));
        store.delete("/persistent/a");
        assert_eq!(store.read("/persistent/a"), None);
    }

    #[test]
    fn memory_store_lists_by_prefix() {
        let store = MemoryBlockStore::new();
        store.write("/persistent/bin/a", vec![]);
        store.write("/persistent/bin/b", vec![]);
        store.write("/persistent/home/c", vec![]);
        let mut keys = store.list("/persistent/bin");
        keys.sort();
        assert_eq!(keys, vec!["/persistent/bin/a", "/persistent/bin/b"]);
    }

    #[test]
    fn fs_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsBlockStore::open(dir.path()).unwrap();
            store.write("/persistent/a", b"durable".to_vec());
            store.flush();
        }
        // Give the writer thread a moment to land the file.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let store2 = FsBlockStore::open(dir.path()).unwrap();
        assert_eq!(store2.read("/persistent/a"), Some(b"durable".to_vec()));
    }
}
