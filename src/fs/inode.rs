//! The inode record: metadata plus, for directories, the sorted entry list.

use super::permissions::{S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use super::types::{FileType, InodeId, Timestamp};

/// A directory entry: a name bound to an inode ordinal.
///
/// Names are non-empty and contain no `/`. Within a directory the entries
/// are unique by name and sorted lexicographically; `.` and `..` are regular
/// entries like any other.
#[derive(Debug, Clone)]
pub(crate) struct Dirent {
    pub name: String,
    pub ino: InodeId,
}

/// The metadata record for a filesystem object, decoupled from any name.
///
/// `mode` carries the classic permission bits plus the `S_IFMT` type bits;
/// byte content and symlink targets live in the store's side tables keyed by
/// ordinal, not here.
#[derive(Debug)]
pub(crate) struct Inode {
    pub ino: InodeId,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub ctime: Timestamp,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    /// Sorted directory entries; empty for non-directories.
    pub entries: Vec<Dirent>,
}

impl Inode {
    pub fn new(ino: InodeId, mode: u32) -> Self {
        let now = Timestamp::now();
        Self {
            ino,
            mode,
            nlink: 0,
            uid: 0,
            gid: 0,
            ctime: now,
            atime: now,
            mtime: now,
            entries: Vec::new(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    /// Binary search over the sorted entry list. `Ok` carries the position
    /// of the matching entry, `Err` the insertion point that keeps the list
    /// sorted.
    pub fn find(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
    }

    /// Looks up the ordinal bound to `name`, if present.
    pub fn lookup(&self, name: &str) -> Option<InodeId> {
        self.find(name).ok().map(|i| self.entries[i].ino)
    }

    pub fn accessed(&mut self) {
        self.atime = Timestamp::now();
    }

    pub fn modified(&mut self) {
        let now = Timestamp::now();
        self.atime = now;
        self.mtime = now;
    }
}
