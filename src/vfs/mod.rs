//! The permissioned virtual file system (§4.1, §4.2).
//!
//! A single confined tree, keyed internally by real (root-prefixed) path,
//! backed by a [`store::BlockStore`] and layered with per-process
//! descriptor/handle tables. Every guest-visible path first passes through
//! [`crate::path::normalise`], so nothing outside `root_prefix` is ever
//! reachable.

pub mod bootstrap;
pub mod fd;
pub mod node;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::KernelConfig;
use crate::error::VfsError;
use crate::path;

use fd::{DirHandleTable, FdEntry, FdTable, OpenFlags};
use node::{FileStat, Node, NodeType, Permissions};
use store::BlockStore;

/// The virtual file system: one instance per booted kernel.
pub struct Vfs {
    config: KernelConfig,
    store: Arc<dyn BlockStore>,
    tree: Mutex<BTreeMap<String, Node>>,
    next_ino: AtomicU64,
    fd_tables: Mutex<HashMap<u32, FdTable>>,
    dir_tables: Mutex<HashMap<u32, DirHandleTable>>,
}

impl Vfs {
    pub fn new(config: KernelConfig, store: Arc<dyn BlockStore>) -> Self {
        let mut tree = BTreeMap::new();
        let root_key = config.root_prefix.clone();
        let mut root = Node::new_directory(0);
        root.protected = true;
        tree.insert(root_key, root);
        Vfs {
            config,
            store,
            tree: Mutex::new(tree),
            next_ino: AtomicU64::new(1),
            fd_tables: Mutex::new(HashMap::new()),
            dir_tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_cwd(&self) -> String {
        self.config.root_prefix.clone()
    }

    /// As [`path::normalise`], but trims any trailing `/` so the result
    /// always matches the keys actually stored in `tree` (directories,
    /// including the root itself, are keyed without one).
    fn normalise(&self, cwd: &str, raw: &str) -> String {
        let real = path::normalise(&self.config.root_prefix, cwd, raw);
        match real.trim_end_matches('/') {
            "" => self.config.root_prefix.clone(),
            trimmed => trimmed.to_string(),
        }
    }

    /// Resolve a guest path against a cwd into a confined real path,
    /// without performing any file operation. Used by the process manager
    /// to snapshot redirect targets at `redirect()` time.
    pub fn resolve_path(&self, cwd: &str, raw: &str) -> String {
        self.normalise(cwd, raw)
    }

    fn next_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    fn persist_node(&self, real_path: &str, node: &Node) {
        match serde_json::to_vec(node) {
            Ok(bytes) => self.store.write(real_path, bytes),
            Err(e) => log::error!(target: "kernel::vfs", "failed to serialize {real_path}: {e}"),
        }
    }

    // ----- whole-path operations (take an already-resolved guest path,
    // normalised against the root itself — used by bootstrap and by
    // process-independent queries) -----

    pub fn stat(&self, raw_path: &str) -> Result<FileStat, VfsError> {
        let real = self.normalise(&self.config.root_prefix, raw_path);
        let tree = self.tree.lock().unwrap();
        let node = tree.get(&real).ok_or(VfsError::NoSuchFile)?;
        Ok(FileStat::from(node))
    }

    /// As [`Vfs::stat`], but resolves a relative `raw_path` against a
    /// caller's actual cwd rather than the root. Used by the `file.stat`
    /// script binding, where `raw_path` may be relative.
    pub fn stat_cwd(&self, cwd: &str, raw_path: &str) -> Result<FileStat, VfsError> {
        let real = self.normalise(cwd, raw_path);
        let tree = self.tree.lock().unwrap();
        let node = tree.get(&real).ok_or(VfsError::NoSuchFile)?;
        Ok(FileStat::from(node))
    }

    /// As [`Vfs::readdir`], but resolves a relative `raw_path` against a
    /// caller's actual cwd rather than the root. Used by the `file.readdir`
    /// script binding.
    pub fn readdir_cwd(&self, cwd: &str, raw_path: &str) -> Result<Vec<String>, VfsError> {
        self.readdir_at(cwd, raw_path)
    }

    /// Whether a node exists at an already-resolved real path, without
    /// performing any further normalisation. Used by the process manager to
    /// validate `create`'s program path (§4.3's `no-such-program`).
    pub fn exists(&self, real_path: &str) -> bool {
        self.tree.lock().unwrap().contains_key(real_path)
    }

    /// Read a node's whole contents by already-resolved real path, bypassing
    /// the per-process descriptor table. Used to load a program's source at
    /// `create` time, before any file descriptor exists for it.
    pub fn read_program(&self, real_path: &str) -> Result<Vec<u8>, VfsError> {
        let tree = self.tree.lock().unwrap();
        let node = tree.get(real_path).ok_or(VfsError::NoSuchFile)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        Ok(node.contents.clone())
    }

    pub fn is_protected(&self, raw_path: &str) -> bool {
        let real = self.normalise(&self.config.root_prefix, raw_path);
        self.tree.lock().unwrap().get(&real).map(|n| n.protected).unwrap_or(false)
    }

    pub fn readdir(&self, raw_path: &str) -> Result<Vec<String>, VfsError> {
        let real = self.normalise(&self.config.root_prefix, raw_path);
        self.readdir_real(&real)
    }

    /// Core directory listing, taking an already-resolved real path. Shared
    /// by [`Vfs::readdir`] (normalises a guest path against the root) and
    /// [`Vfs::readdir_at`] (normalises against a caller's cwd) so neither
    /// feeds an already-confined path back through normalisation a second
    /// time.
    fn readdir_real(&self, real: &str) -> Result<Vec<String>, VfsError> {
        let tree = self.tree.lock().unwrap();
        let node = tree.get(real).ok_or(VfsError::NoSuchFile)?;
        if !node.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        let prefix = format!("{}/", real.trim_end_matches('/'));
        let mut names: Vec<String> = tree
            .keys()
            .filter_map(|k| {
                if k == real {
                    return None;
                }
                let rest = k.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn install_system_directory(&self, raw_path: &str) {
        let real = self.normalise(&self.config.root_prefix, raw_path);
        let mut tree = self.tree.lock().unwrap();
        if !tree.contains_key(&real) {
            let ino = self.next_ino();
            let mut node = Node::new_directory(ino);
            node.protected = true;
            tree.insert(real, node);
        } else if let Some(node) = tree.get_mut(&real) {
            node.protected = true;
        }
    }

    pub fn install_system_file(&self, raw_path: &str, contents: &[u8], perm: Permissions) {
        let real = self.normalise(&self.config.root_prefix, raw_path);
        let ino = {
            let tree = self.tree.lock().unwrap();
            tree.get(&real).map(|n| n.ino).unwrap_or_else(|| self.next_ino())
        };
        let mut node = Node::new_file(ino);
        node.contents = contents.to_vec();
        node.perm = perm;
        node.protected = true;
        self.persist_node(&real, &node);
        self.tree.lock().unwrap().insert(real, node);
    }

    // ----- path operations scoped to a process's cwd -----

    pub fn mkdir(&self, cwd: &str, raw_path: &str) -> Result<(), VfsError> {
        let real = self.normalise(cwd, raw_path);
        let (parent, _) = path::split_path(&real);
        let mut tree = self.tree.lock().unwrap();
        if tree.contains_key(&real) {
            return Err(VfsError::Exists);
        }
        match tree.get(parent) {
            Some(n) if n.is_dir() => {}
            Some(_) => return Err(VfsError::NotADirectory),
            None => return Err(VfsError::NoSuchFile),
        }
        let ino = self.next_ino();
        tree.insert(real, Node::new_directory(ino));
        Ok(())
    }

    pub fn rmdir(&self, cwd: &str, raw_path: &str) -> Result<(), VfsError> {
        let real = self.normalise(cwd, raw_path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.get(&real).ok_or(VfsError::NoSuchFile)?;
        if !node.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        if node.protected {
            return Err(VfsError::SystemFileReadonly);
        }
        let prefix = format!("{}/", real.trim_end_matches('/'));
        if tree.keys().any(|k| k.starts_with(&prefix)) {
            return Err(VfsError::DirectoryNotEmpty);
        }
        tree.remove(&real);
        self.store.delete(&real);
        Ok(())
    }

    pub fn remove(&self, cwd: &str, raw_path: &str) -> Result<(), VfsError> {
        let real = self.normalise(cwd, raw_path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.get(&real).ok_or(VfsError::NoSuchFile)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        if node.protected {
            return Err(VfsError::SystemFileReadonly);
        }
        tree.remove(&real);
        self.store.delete(&real);
        Ok(())
    }

    pub fn rename(&self, cwd: &str, from: &str, to: &str) -> Result<(), VfsError> {
        let real_from = self.normalise(cwd, from);
        let real_to = self.normalise(cwd, to);
        let mut tree = self.tree.lock().unwrap();
        if tree.contains_key(&real_to) {
            return Err(VfsError::Exists);
        }
        let node = tree.get(&real_from).ok_or(VfsError::NoSuchFile)?;
        if node.protected {
            return Err(VfsError::SystemFileReadonly);
        }
        let (parent, _) = path::split_path(&real_to);
        match tree.get(parent) {
            Some(n) if n.is_dir() => {}
            Some(_) => return Err(VfsError::NotADirectory),
            None => return Err(VfsError::NoSuchFile),
        }
        let mut node = tree.remove(&real_from).unwrap();
        node.touch_mtime();
        self.store.delete(&real_from);
        self.persist_node(&real_to, &node);
        tree.insert(real_to, node);
        Ok(())
    }

    pub fn chdir(&self, cwd: &str, raw_path: &str) -> Result<String, VfsError> {
        let real = self.normalise(cwd, raw_path);
        let tree = self.tree.lock().unwrap();
        match tree.get(&real) {
            Some(n) if n.is_dir() => Ok(real),
            Some(_) => Err(VfsError::NotADirectory),
            None => Err(VfsError::NoSuchFile),
        }
    }

    pub fn permit(&self, cwd: &str, raw_path: &str, perm: Permissions) -> Result<(), VfsError> {
        let real = self.normalise(cwd, raw_path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.get_mut(&real).ok_or(VfsError::NoSuchFile)?;
        if node.is_dir() {
            return Err(VfsError::IsADirectory);
        }
        if node.protected {
            return Err(VfsError::SystemFileReadonly);
        }
        node.perm = perm;
        node.touch_mtime();
        self.persist_node(&real, node);
        Ok(())
    }

    // ----- descriptor-scoped operations -----

    fn with_fd_table<R>(&self, pid: u32, f: impl FnOnce(&mut FdTable) -> R) -> R {
        let mut tables = self.fd_tables.lock().unwrap();
        let table = tables
            .entry(pid)
            .or_insert_with(|| FdTable::new(self.config.max_fds_per_process));
        f(table)
    }

    fn with_dir_table<R>(&self, pid: u32, f: impl FnOnce(&mut DirHandleTable) -> R) -> R {
        let mut tables = self.dir_tables.lock().unwrap();
        let table = tables
            .entry(pid)
            .or_insert_with(|| DirHandleTable::new(self.config.max_dir_handles_per_process));
        f(table)
    }

    pub fn open(&self, pid: u32, cwd: &str, raw_path: &str, flags: OpenFlags) -> Result<u32, VfsError> {
        let real = self.normalise(cwd, raw_path);
        self.open_real(pid, &real, flags)
    }

    /// As [`Vfs::open`], but `real_path` is taken as already-confined and
    /// is not re-normalised. Used by the stream router to reopen a
    /// redirect target resolved once at `redirect()` time.
    pub fn open_real(&self, pid: u32, real: &str, flags: OpenFlags) -> Result<u32, VfsError> {
        let real = real.to_string();
        let ino = {
            let mut tree = self.tree.lock().unwrap();
            match tree.get(&real) {
                Some(_) if flags.contains(OpenFlags::CREATE) => return Err(VfsError::Exists),
                Some(n) if n.is_dir() => return Err(VfsError::IsADirectory),
                Some(n) => {
                    if flags.contains(OpenFlags::READ) && !n.perm.read {
                        return Err(VfsError::PermissionDenied);
                    }
                    if flags.contains(OpenFlags::WRITE) {
                        if n.protected {
                            return Err(VfsError::SystemFileReadonly);
                        }
                        if !n.perm.write {
                            return Err(VfsError::PermissionDenied);
                        }
                    }
                    n.ino
                }
                None if flags.contains(OpenFlags::CREATE) => {
                    let (parent, _) = path::split_path(&real);
                    match tree.get(parent) {
                        Some(n) if n.is_dir() => {}
                        Some(_) => return Err(VfsError::NotADirectory),
                        None => return Err(VfsError::NoSuchFile),
                    }
                    let ino = self.next_ino();
                    let node = Node::new_file(ino);
                    self.persist_node(&real, &node);
                    tree.insert(real.clone(), node);
                    ino
                }
                None => return Err(VfsError::NoSuchFile),
            }
        };
        let _ = ino;
        self.with_fd_table(pid, |table| {
            table.allocate(FdEntry { real_path: real.clone(), offset: 0, flags })
        })
    }

    pub fn close(&self, pid: u32, fd: u32) -> Result<(), VfsError> {
        self.with_fd_table(pid, |table| table.close(fd))
    }

    pub fn write(&self, pid: u32, fd: u32, data: &[u8]) -> Result<usize, VfsError> {
        let (real, offset, flags) = self.with_fd_table(pid, |table| {
            let entry = table.get(fd)?;
            Ok::<_, VfsError>((entry.real_path.clone(), entry.offset, entry.flags))
        })?;
        if !flags.contains(OpenFlags::WRITE) {
            return Err(VfsError::PermissionDenied);
        }
        let written = {
            let mut tree = self.tree.lock().unwrap();
            let node = tree.get_mut(&real).ok_or(VfsError::NoSuchFile)?;
            if node.protected {
                return Err(VfsError::SystemFileReadonly);
            }
            let start = offset as usize;
            if start > node.contents.len() {
                node.contents.resize(start, 0);
            }
            let end = start + data.len();
            if end > node.contents.len() {
                node.contents.resize(end, 0);
            }
            node.contents[start..end].copy_from_slice(data);
            node.touch_mtime();
            self.persist_node(&real, node);
            data.len()
        };
        self.with_fd_table(pid, |table| {
            if let Ok(entry) = table.get_mut(fd) {
                entry.offset += written as u64;
            }
        });
        Ok(written)
    }

    pub fn read(&self, pid: u32, fd: u32, len: usize) -> Result<Vec<u8>, VfsError> {
        let (real, offset, flags) = self.with_fd_table(pid, |table| {
            let entry = table.get(fd)?;
            Ok::<_, VfsError>((entry.real_path.clone(), entry.offset, entry.flags))
        })?;
        if !flags.contains(OpenFlags::READ) {
            return Err(VfsError::PermissionDenied);
        }
        let data = {
            let mut tree = self.tree.lock().unwrap();
            let node = tree.get_mut(&real).ok_or(VfsError::NoSuchFile)?;
            node.touch_atime();
            let start = (offset as usize).min(node.contents.len());
            let end = (start + len).min(node.contents.len());
            node.contents[start..end].to_vec()
        };
        self.with_fd_table(pid, |table| {
            if let Ok(entry) = table.get_mut(fd) {
                entry.offset += data.len() as u64;
            }
        });
        Ok(data)
    }

    pub fn read_all(&self, pid: u32, fd: u32) -> Result<Vec<u8>, VfsError> {
        let len = {
            let real = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.real_path.clone()))?;
            let tree = self.tree.lock().unwrap();
            tree.get(&real).ok_or(VfsError::NoSuchFile)?.contents.len()
        };
        let offset = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.offset))? as usize;
        self.read(pid, fd, len.saturating_sub(offset))
    }

    /// Read up to and including the next `\n`, or to end-of-file. Returns
    /// `None` once the cursor is already at the end (nothing left to read).
    pub fn read_line(&self, pid: u32, fd: u32) -> Result<Option<Vec<u8>>, VfsError> {
        let (real, offset, flags) = self.with_fd_table(pid, |table| {
            let entry = table.get(fd)?;
            Ok::<_, VfsError>((entry.real_path.clone(), entry.offset, entry.flags))
        })?;
        if !flags.contains(OpenFlags::READ) {
            return Err(VfsError::PermissionDenied);
        }
        let (line, new_offset) = {
            let mut tree = self.tree.lock().unwrap();
            let node = tree.get_mut(&real).ok_or(VfsError::NoSuchFile)?;
            node.touch_atime();
            let start = (offset as usize).min(node.contents.len());
            if start >= node.contents.len() {
                return Ok(None);
            }
            match node.contents[start..].iter().position(|&b| b == b'\n') {
                Some(rel) => (node.contents[start..=start + rel].to_vec(), start + rel + 1),
                None => (node.contents[start..].to_vec(), node.contents.len()),
            }
        };
        self.with_fd_table(pid, |table| {
            if let Ok(entry) = table.get_mut(fd) {
                entry.offset = new_offset as u64;
            }
        });
        Ok(Some(line))
    }

    /// Move the cursor by `delta` relative to its current position, clamped
    /// to `[0, file length]`.
    pub fn shift(&self, pid: u32, fd: u32, delta: i64) -> Result<u64, VfsError> {
        let real = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.real_path.clone()))?;
        let len = self.tree.lock().unwrap().get(&real).ok_or(VfsError::NoSuchFile)?.contents.len() as i64;
        let offset = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.offset))? as i64;
        let new_offset = (offset + delta).clamp(0, len) as u64;
        self.with_fd_table(pid, |table| {
            table.get_mut(fd).map(|e| e.offset = new_offset)
        })?;
        Ok(new_offset)
    }

    /// Move the cursor to an absolute position, clamped to `[0, file length]`.
    pub fn seek(&self, pid: u32, fd: u32, offset: u64) -> Result<u64, VfsError> {
        let real = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.real_path.clone()))?;
        let len = self.tree.lock().unwrap().get(&real).ok_or(VfsError::NoSuchFile)?.contents.len() as u64;
        let new_offset = offset.min(len);
        self.with_fd_table(pid, |table| {
            table.get_mut(fd).map(|e| e.offset = new_offset)
        })?;
        Ok(new_offset)
    }

    pub fn truncate(&self, pid: u32, fd: u32, len: u64) -> Result<(), VfsError> {
        let (real, flags) = self.with_fd_table(pid, |table| {
            let entry = table.get(fd)?;
            Ok::<_, VfsError>((entry.real_path.clone(), entry.flags))
        })?;
        if !flags.contains(OpenFlags::WRITE) {
            return Err(VfsError::PermissionDenied);
        }
        let mut tree = self.tree.lock().unwrap();
        let node = tree.get_mut(&real).ok_or(VfsError::NoSuchFile)?;
        if node.protected {
            return Err(VfsError::SystemFileReadonly);
        }
        node.contents.resize(len as usize, 0);
        node.touch_mtime();
        self.persist_node(&real, node);
        Ok(())
    }

    pub fn fdstat(&self, pid: u32, fd: u32) -> Result<FileStat, VfsError> {
        let real = self.with_fd_table(pid, |table| table.get(fd).map(|e| e.real_path.clone()))?;
        let tree = self.tree.lock().unwrap();
        let node = tree.get(&real).ok_or(VfsError::NoSuchFile)?;
        Ok(FileStat::from(node))
    }

    // ----- directory handle lifecycle (§3) -----

    pub fn opendir(&self, pid: u32, cwd: &str, raw_path: &str) -> Result<u32, VfsError> {
        let names = self.readdir_at(cwd, raw_path)?;
        self.with_dir_table(pid, |table| table.open(names))
    }

    pub fn readdir_next(&self, pid: u32, handle: u32) -> Result<Option<String>, VfsError> {
        self.with_dir_table(pid, |table| table.next(handle))
    }

    pub fn closedir(&self, pid: u32, handle: u32) -> Result<(), VfsError> {
        self.with_dir_table(pid, |table| table.close(handle))
    }

    fn readdir_at(&self, cwd: &str, raw_path: &str) -> Result<Vec<String>, VfsError> {
        let real = self.normalise(cwd, raw_path);
        self.readdir_real(&real)
    }

    /// Release every descriptor and directory handle a terminating process
    /// holds. Called by the process manager on `exit`/`kill`.
    pub fn close_all_for_process(&self, pid: u32) {
        self.fd_tables.lock().unwrap().remove(&pid);
        self.dir_tables.lock().unwrap().remove(&pid);
    }

    // ----- persistence lifecycle (§4.2, §6) -----

    pub fn pull_from_persist(&self) {
        self.store.pull();
    }

    pub fn push_to_persist(&self) {
        self.store.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::store::MemoryBlockStore;

    fn new_vfs() -> Vfs {
        Vfs::new(KernelConfig::for_tests(), MemoryBlockStore::new())
    }

    #[test]
    fn write_then_read_roundtrips() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let fd = vfs.open(1, &root, "/hello.txt", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        vfs.write(1, fd, b"hello world").unwrap();
        vfs.seek(1, fd, 0).unwrap();
        let data = vfs.read_all(1, fd).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn open_without_create_on_missing_file_fails() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let err = vfs.open(1, &root, "/nope.txt", OpenFlags::READ).unwrap_err();
        assert_eq!(err, VfsError::NoSuchFile);
    }

    #[test]
    fn protected_file_resists_write_and_removal() {
        let vfs = new_vfs();
        vfs.install_system_file("/bin/init", b"#!/init", Permissions::owner_rwx());
        let root = vfs.root_cwd();
        let err = vfs.open(1, &root, "/bin/init", OpenFlags::WRITE).unwrap_err();
        assert_eq!(err, VfsError::SystemFileReadonly);
        let err = vfs.remove(&root, "/bin/init").unwrap_err();
        assert_eq!(err, VfsError::SystemFileReadonly);
    }

    #[test]
    fn open_with_create_on_an_existing_file_fails_exists() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.open(1, &root, "/a.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let err = vfs.open(1, &root, "/a.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap_err();
        assert_eq!(err, VfsError::Exists);
    }

    #[test]
    fn open_enforces_owner_permission_bits_independent_of_the_protected_bit() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let fd = vfs.open(1, &root, "/a.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        vfs.close(1, fd).unwrap();
        vfs.permit(&root, "/a.txt", Permissions { read: true, write: false, execute: false }).unwrap();
        let err = vfs.open(1, &root, "/a.txt", OpenFlags::WRITE).unwrap_err();
        assert_eq!(err, VfsError::PermissionDenied);
        vfs.open(1, &root, "/a.txt", OpenFlags::READ).unwrap();
    }

    #[test]
    fn permit_refuses_directories() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.mkdir(&root, "/a").unwrap();
        let err = vfs.permit(&root, "/a", Permissions::owner_rwx()).unwrap_err();
        assert_eq!(err, VfsError::IsADirectory);
    }

    #[test]
    fn mkdir_requires_existing_parent() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let err = vfs.mkdir(&root, "/a/b").unwrap_err();
        assert_eq!(err, VfsError::NoSuchFile);
        vfs.mkdir(&root, "/a").unwrap();
        vfs.mkdir(&root, "/a/b").unwrap();
    }

    #[test]
    fn rmdir_refuses_nonempty_directory() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.mkdir(&root, "/a").unwrap();
        vfs.mkdir(&root, "/a/b").unwrap();
        assert_eq!(vfs.rmdir(&root, "/a").unwrap_err(), VfsError::DirectoryNotEmpty);
        vfs.rmdir(&root, "/a/b").unwrap();
        vfs.rmdir(&root, "/a").unwrap();
    }

    #[test]
    fn readdir_lists_only_immediate_children() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.mkdir(&root, "/a").unwrap();
        vfs.mkdir(&root, "/a/b").unwrap();
        vfs.open(1, &root, "/a/file.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let mut names = vfs.readdir("/a").unwrap();
        names.sort();
        assert_eq!(names, vec!["b".to_string(), "file.txt".to_string()]);
    }

    #[test]
    fn truncate_shrinks_contents() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let fd = vfs.open(1, &root, "/a.txt", OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREATE).unwrap();
        vfs.write(1, fd, b"0123456789").unwrap();
        vfs.truncate(1, fd, 4).unwrap();
        let stat = vfs.fdstat(1, fd).unwrap();
        assert_eq!(stat.size, 4);
    }

    #[test]
    fn dir_handle_lifecycle_matches_bulk_readdir() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.open(1, &root, "/a.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        vfs.open(1, &root, "/b.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let handle = vfs.opendir(1, &root, "/").unwrap();
        let mut seen = Vec::new();
        while let Some(name) = vfs.readdir_next(1, handle).unwrap() {
            seen.push(name);
        }
        seen.sort();
        assert_eq!(seen, vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert_eq!(vfs.closedir(1, handle).unwrap_err(), VfsError::BadDescriptor);
    }

    #[test]
    fn opendir_on_a_nested_directory_does_not_double_resolve_the_root_prefix() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.mkdir(&root, "/home").unwrap();
        vfs.open(1, &root, "/home/note.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let handle = vfs.opendir(1, &root, "/home").unwrap();
        assert_eq!(vfs.readdir_next(1, handle).unwrap(), Some("note.txt".to_string()));
        assert_eq!(vfs.readdir_next(1, handle).unwrap(), None);
    }

    #[test]
    fn stat_cwd_and_readdir_cwd_resolve_relative_to_caller() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        vfs.mkdir(&root, "/home").unwrap();
        vfs.open(1, &root, "/home/note.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        let home = format!("{root}/home");
        let names = vfs.readdir_cwd(&home, ".").unwrap();
        assert_eq!(names, vec!["note.txt".to_string()]);
        let stat = vfs.stat_cwd(&home, "note.txt").unwrap();
        assert_eq!(stat.size, 0);
    }

    #[test]
    fn read_program_reads_by_real_path_without_a_descriptor() {
        let vfs = new_vfs();
        vfs.install_system_file("/bin/init", b"print('hi')", Permissions::owner_rwx());
        let real = format!("{}/bin/init", vfs.root_cwd());
        assert_eq!(vfs.read_program(&real).unwrap(), b"print('hi')".to_vec());
        assert!(vfs.exists(&real));
        assert!(!vfs.exists(&format!("{}/bin/missing", vfs.root_cwd())));
    }

    #[test]
    fn close_all_for_process_releases_descriptors() {
        let vfs = new_vfs();
        let root = vfs.root_cwd();
        let fd = vfs.open(1, &root, "/a.txt", OpenFlags::CREATE | OpenFlags::WRITE).unwrap();
        vfs.close_all_for_process(1);
        assert_eq!(vfs.close(1, fd).unwrap_err(), VfsError::BadDescriptor);
    }
}
