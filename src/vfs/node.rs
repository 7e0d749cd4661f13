//! File nodes: the unit of data the VFS persists.

use serde::{Deserialize, Serialize};

/// A POSIX-like timestamp with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            sec: dur.as_secs() as i64,
            nsec: dur.subsec_nanos(),
        }
    }
}

/// Owner read/write/execute permission bits. Directory permission bits are
/// tracked for uniformity but never enforced (§4.2 `mkdir`/`rmdir`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    pub const fn owner_rwx() -> Self {
        Permissions { read: true, write: true, execute: true }
    }

    /// Render as a compressed `rwx` string, as `stat`/`fdstat` report it.
    pub fn as_rwx_string(self) -> String {
        format!(
            "{}{}{}",
            if self.read { 'r' } else { '-' },
            if self.write { 'w' } else { '-' },
            if self.execute { 'x' } else { '-' },
        )
    }
}

/// Whether a node is a regular file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Directory,
}

/// A persisted file or directory node, keyed externally by its real path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub ino: u64,
    pub node_type: NodeType,
    pub contents: Vec<u8>,
    pub perm: Permissions,
    /// Out-of-band system-file marker (never a mode bit — see DESIGN.md's
    /// resolution of the corresponding Open Question). Mutation, removal,
    /// rename, and chmod are all refused while this is set, even for the
    /// owner.
    pub protected: bool,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl Node {
    pub fn new_file(ino: u64) -> Self {
        let now = Timestamp::now();
        Node {
            ino,
            node_type: NodeType::File,
            contents: Vec::new(),
            perm: Permissions::owner_rwx(),
            protected: false,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn new_directory(ino: u64) -> Self {
        let now = Timestamp::now();
        Node {
            ino,
            node_type: NodeType::Directory,
            contents: Vec::new(),
            perm: Permissions::owner_rwx(),
            protected: false,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.node_type, NodeType::Directory)
    }

    pub fn touch_mtime(&mut self) {
        let now = Timestamp::now();
        self.mtime = now;
        self.ctime = now;
    }

    pub fn touch_atime(&mut self) {
        self.atime = Timestamp::now();
    }
}

/// Result of `stat`/`fdstat` (§4.2).
#[derive(Debug, Clone)]
pub struct FileStat {
    pub size: u64,
    pub blocks: u64,
    pub block_size: u32,
    pub ino: u64,
    pub perm: String,
    pub node_type: NodeType,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

pub const BLOCK_SIZE: u32 = 4096;

impl From<&Node> for FileStat {
    fn from(n: &Node) -> Self {
        let size = n.contents.len() as u64;
        FileStat {
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            block_size: BLOCK_SIZE,
            ino: n.ino,
            perm: n.perm.as_rwx_string(),
            node_type: n.node_type,
            atime: n.atime,
            mtime: n.mtime,
            ctime: n.ctime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rwx_string_reflects_bits() {
        let p = Permissions { read: true, write: false, execute: true };
        assert_eq!(p.as_rwx_string(), "r-x");
    }

    #[test]
    fn new_file_defaults_to_owner_rwx_and_unprotected() {
        let n = Node::new_file(1);
        assert!(n.perm.read && n.perm.write && n.perm.execute);
        assert!(!n.protected);
        assert!(!n.is_dir());
    }
}
