//! Per-process file descriptor and directory handle tables (§3, §4.2).
//!
//! File descriptors and directory handles are two independent, small
//! integer namespaces, each scoped to one process and capped by
//! [`crate::config::KernelConfig`]. Neither overlaps the stream addresses
//! (`STDIN`/`STDOUT`) used by the stream router — those are a separate
//! concept entirely (§4.4).

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::VfsError;

bitflags! {
    /// The `r`/`w`/`x`/`c` capability letters an `open` call requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const READ    = 0b0001;
        const WRITE   = 0b0010;
        const EXECUTE = 0b0100;
        const CREATE  = 0b1000;
    }
}

impl OpenFlags {
    /// Parse a guest-supplied capability string such as `"rw"` or `"rwc"`.
    /// Unrecognised letters are ignored rather than rejected, matching the
    /// forgiving parse the original capability strings use.
    pub fn parse(spec: &str) -> Self {
        let mut flags = OpenFlags::empty();
        for c in spec.chars() {
            match c {
                'r' => flags |= OpenFlags::READ,
                'w' => flags |= OpenFlags::WRITE,
                'x' => flags |= OpenFlags::EXECUTE,
                'c' => flags |= OpenFlags::CREATE,
                _ => {}
            }
        }
        flags
    }
}

/// A single open file's cursor and access mode.
#[derive(Debug, Clone)]
pub struct FdEntry {
    pub real_path: String,
    pub offset: u64,
    pub flags: OpenFlags,
}

/// A process's open-file-descriptor table.
#[derive(Debug)]
pub struct FdTable {
    entries: BTreeMap<u32, FdEntry>,
    next_fd: u32,
    capacity: usize,
}

impl FdTable {
    pub fn new(capacity: usize) -> Self {
        FdTable { entries: BTreeMap::new(), next_fd: 0, capacity }
    }

    /// Allocate the lowest unused descriptor number for `entry`.
    pub fn allocate(&mut self, entry: FdEntry) -> Result<u32, VfsError> {
        if self.entries.len() >= self.capacity {
            return Err(VfsError::ResourceUnavailable);
        }
        while self.entries.contains_key(&self.next_fd) {
            self.next_fd = self.next_fd.wrapping_add(1);
        }
        let fd = self.next_fd;
        self.entries.insert(fd, entry);
        self.next_fd = self.next_fd.wrapping_add(1);
        Ok(fd)
    }

    pub fn get(&self, fd: u32) -> Result<&FdEntry, VfsError> {
        self.entries.get(&fd).ok_or(VfsError::BadDescriptor)
    }

    pub fn get_mut(&mut self, fd: u32) -> Result<&mut FdEntry, VfsError> {
        self.entries.get_mut(&fd).ok_or(VfsError::BadDescriptor)
    }

    pub fn close(&mut self, fd: u32) -> Result<(), VfsError> {
        self.entries.remove(&fd).map(|_| ()).ok_or(VfsError::BadDescriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single `opendir` handle's listing and read cursor.
#[derive(Debug)]
struct DirHandleEntry {
    names: Vec<String>,
    cursor: usize,
}

/// A process's open-directory-handle table (§3's stateful `opendir` /
/// `readdir_next` / `closedir` lifecycle, distinct from the bulk
/// `Vfs::readdir(path)` call in §4.2).
#[derive(Debug)]
pub struct DirHandleTable {
    entries: BTreeMap<u32, DirHandleEntry>,
    next_handle: u32,
    capacity: usize,
}

impl DirHandleTable {
    pub fn new(capacity: usize) -> Self {
        DirHandleTable { entries: BTreeMap::new(), next_handle: 0, capacity }
    }

    pub fn open(&mut self, names: Vec<String>) -> Result<u32, VfsError> {
        if self.entries.len() >= self.capacity {
            return Err(VfsError::ResourceUnavailable);
        }
        while self.entries.contains_key(&self.next_handle) {
            self.next_handle = self.next_handle.wrapping_add(1);
        }
        let handle = self.next_handle;
        self.entries.insert(handle, DirHandleEntry { names, cursor: 0 });
        self.next_handle = self.next_handle.wrapping_add(1);
        Ok(handle)
    }

    /// Advance the cursor and return the next entry name, or `None` once
    /// exhausted. Exhaustion auto-closes the handle (§3).
    pub fn next(&mut self, handle: u32) -> Result<Option<String>, VfsError> {
        let entry = self.entries.get_mut(&handle).ok_or(VfsError::BadDescriptor)?;
        if entry.cursor >= entry.names.len() {
            self.entries.remove(&handle);
            return Ok(None);
        }
        let name = entry.names[entry.cursor].clone();
        entry.cursor += 1;
        Ok(Some(name))
    }

    pub fn close(&mut self, handle: u32) -> Result<(), VfsError> {
        self.entries.remove(&handle).map(|_| ()).ok_or(VfsError::BadDescriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_parse_ignores_unknown_letters() {
        let f = OpenFlags::parse("rwz");
        assert!(f.contains(OpenFlags::READ));
        assert!(f.contains(OpenFlags::WRITE));
        assert!(!f.contains(OpenFlags::EXECUTE));
    }

    #[test]
    fn fd_table_reuses_lowest_free_descriptor() {
        let mut table = FdTable::new(4);
        let entry = |p: &str| FdEntry { real_path: p.to_string(), offset: 0, flags: OpenFlags::READ };
        let a = table.allocate(entry("/a")).unwrap();
        let b = table.allocate(entry("/b")).unwrap();
        assert_eq!((a, b), (0, 1));
        table.close(a).unwrap();
        let c = table.allocate(entry("/c")).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn fd_table_enforces_capacity() {
        let mut table = FdTable::new(1);
        let entry = || FdEntry { real_path: "/a".to_string(), offset: 0, flags: OpenFlags::READ };
        table.allocate(entry()).unwrap();
        assert_eq!(table.allocate(entry()), Err(VfsError::ResourceUnavailable));
    }

    #[test]
    fn bad_descriptor_on_unknown_fd() {
        let table = FdTable::new(4);
        assert_eq!(table.get(7), Err(VfsError::BadDescriptor));
    }

    #[test]
    fn dir_handle_exhausts_and_auto_closes() {
        let mut dirs = DirHandleTable::new(4);
        let h = dirs.open(vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(dirs.next(h).unwrap(), Some("a".to_string()));
        assert_eq!(dirs.next(h).unwrap(), Some("b".to_string()));
        assert_eq!(dirs.next(h).unwrap(), None);
        assert_eq!(dirs.next(h), Err(VfsError::BadDescriptor));
    }
}
