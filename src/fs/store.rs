//! The inode store: allocation, directory linking, link-count accounting,
//! byte buffers, and the symlink target table.
//!
//! The store is the sole owner of every inode and every buffer. Directories
//! refer to their children (and to themselves, through `.` and `..`) purely
//! by ordinal, so the `.`/`..` cycles never translate into ownership cycles.
//! The link count is a logical count of directory entries and is decoupled
//! from reclamation: an inode's buffer and symlink target are released only
//! once its link count reaches zero *and* no open handle refers to it.

use std::collections::HashMap;

use bytes::BytesMut;

use super::errors::FsError;
use super::inode::{Dirent, Inode};
use super::permissions::{S_IFDIR, S_IFLNK, S_IFREG, strip_type};
use super::types::{InodeId, Metadata};

/// Ordinal of the root directory.
pub(crate) const ROOT_INO: InodeId = 1;

#[derive(Debug, Default)]
pub(crate) struct InodeStore {
    nodes: HashMap<InodeId, Inode>,
    /// Regular-file content, keyed by ordinal.
    data: HashMap<InodeId, BytesMut>,
    /// Verbatim symlink targets; exactly the symlink inodes appear here.
    symlinks: HashMap<InodeId, String>,
    /// Open-handle counts, keyed by ordinal. Defers reclamation.
    handles: HashMap<InodeId, usize>,
    next: InodeId,
}

impl InodeStore {
    pub fn new() -> Self {
        Self {
            next: ROOT_INO,
            ..Self::default()
        }
    }

    fn allocate(&mut self) -> InodeId {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Allocates a regular-file inode. Any type bits in `mode` are stripped;
    /// the link count starts at zero and the byte buffer starts empty.
    pub fn new_file(&mut self, mode: u32) -> InodeId {
        let id = self.allocate();
        self.nodes.insert(id, Inode::new(id, strip_type(mode) | S_IFREG));
        self.data.insert(id, BytesMut::new());
        id
    }

    /// Allocates a directory inode, self-linked through `.` and `..`.
    /// Placing it under a parent replaces the `..` entry.
    pub fn new_dir(&mut self, mode: u32) -> InodeId {
        let id = self.allocate();
        self.nodes.insert(id, Inode::new(id, strip_type(mode) | S_IFDIR));
        self.link(id, ".", id).expect("fresh directory accepts links");
        self.link(id, "..", id).expect("fresh directory accepts links");
        id
    }

    /// Allocates a symlink inode recording `target` verbatim.
    pub fn new_symlink(&mut self, target: &str) -> InodeId {
        let id = self.allocate();
        self.nodes.insert(id, Inode::new(id, S_IFLNK | 0o777));
        self.symlinks.insert(id, target.to_string());
        id
    }

    pub fn get(&self, id: InodeId) -> Result<&Inode, FsError> {
        self.nodes.get(&id).ok_or(FsError::NotFound)
    }

    pub fn get_mut(&mut self, id: InodeId) -> Result<&mut Inode, FsError> {
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Binds `name` to `child` in `dir`, keeping the entry list sorted.
    /// An existing entry under the same name is replaced, with link counts
    /// adjusted for both the new child and the displaced inode.
    pub fn link(&mut self, dir: InodeId, name: &str, child: InodeId) -> Result<(), FsError> {
        let d = self.nodes.get_mut(&dir).ok_or(FsError::NotFound)?;
        if !d.is_directory() {
            return Err(FsError::NotDirectory);
        }
        let entry = Dirent {
            name: name.to_string(),
            ino: child,
        };
        match d.find(name) {
            Ok(pos) => {
                let displaced = d.entries[pos].ino;
                d.entries[pos] = entry;
                d.modified();
                // up before down so a same-inode replace never dips to zero
                self.count_up(child);
                self.count_down(displaced);
            }
            Err(pos) => {
                d.entries.insert(pos, entry);
                d.modified();
                self.count_up(child);
            }
        }
        Ok(())
    }

    /// Removes the entry `name` from `dir` and decrements its target.
    pub fn unlink(&mut self, dir: InodeId, name: &str) -> Result<(), FsError> {
        let d = self.nodes.get_mut(&dir).ok_or(FsError::NotFound)?;
        if !d.is_directory() {
            return Err(FsError::NotDirectory);
        }
        let Ok(pos) = d.find(name) else {
            return Err(FsError::NotFound);
        };
        let removed = d.entries.remove(pos);
        d.modified();
        self.count_down(removed.ino);
        Ok(())
    }

    /// Recursively unlinks everything below `dir`, leaving only its own `.`
    /// and `..` entries. Child directories are torn down completely (their
    /// dot entries included, so the counts their `..` held on `dir` are
    /// returned); entries that point back at `dir` under another name are
    /// dropped without recursion.
    pub fn unlink_all(&mut self, dir: InodeId) -> Result<(), FsError> {
        let d = self.nodes.get_mut(&dir).ok_or(FsError::NotFound)?;
        if !d.is_directory() {
            return Err(FsError::NotDirectory);
        }
        let mut doomed = Vec::new();
        d.entries.retain(|e| {
            if e.name == "." || e.name == ".." {
                true
            } else {
                doomed.push(e.clone());
                false
            }
        });
        d.modified();
        for e in &doomed {
            if e.ino != dir && self.nodes.get(&e.ino).is_some_and(Inode::is_directory) {
                self.tear_down(e.ino);
            }
        }
        for e in &doomed {
            self.count_down(e.ino);
        }
        Ok(())
    }

    /// Dismantles a directory that is itself being destroyed: every entry,
    /// `.` and `..` included, is dropped and its target decremented.
    fn tear_down(&mut self, dir: InodeId) {
        let Some(d) = self.nodes.get_mut(&dir) else {
            return;
        };
        let entries = std::mem::take(&mut d.entries);
        for e in &entries {
            if e.name == "." || e.name == ".." {
                continue;
            }
            if e.ino != dir && self.nodes.get(&e.ino).is_some_and(Inode::is_directory) {
                self.tear_down(e.ino);
            }
        }
        for e in &entries {
            self.count_down(e.ino);
        }
    }

    fn count_up(&mut self, id: InodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.nlink += 1;
            node.accessed();
        }
    }

    fn count_down(&mut self, id: InodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            assert!(node.nlink > 0, "inode {id} negative link count");
            node.nlink -= 1;
            node.accessed();
        }
        self.maybe_release(id);
    }

    /// Registers an open handle against `id`, pinning it against reclamation.
    pub fn register_handle(&mut self, id: InodeId) {
        *self.handles.entry(id).or_insert(0) += 1;
    }

    /// Releases one open handle; the last release of an unlinked inode
    /// reclaims it.
    pub fn release_handle(&mut self, id: InodeId) {
        if let Some(count) = self.handles.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.handles.remove(&id);
            }
        }
        self.maybe_release(id);
    }

    fn maybe_release(&mut self, id: InodeId) {
        let unreferenced =
            self.nodes.get(&id).is_some_and(|n| n.nlink == 0) && !self.handles.contains_key(&id);
        if unreferenced {
            self.nodes.remove(&id);
            self.data.remove(&id);
            self.symlinks.remove(&id);
        }
    }

    /// Size in bytes: the buffer length for regular files, 0 otherwise.
    pub fn file_size(&self, id: InodeId) -> u64 {
        self.data.get(&id).map_or(0, |b| b.len() as u64)
    }

    /// A private copy of the file's bytes for a fresh handle.
    pub fn data_snapshot(&self, id: InodeId) -> BytesMut {
        self.data.get(&id).cloned().unwrap_or_default()
    }

    /// Publishes a handle's working buffer back into the store.
    pub fn set_data(&mut self, id: InodeId, buf: BytesMut) {
        self.data.insert(id, buf);
    }

    /// Empties a regular file's buffer in place.
    pub fn clear_data(&mut self, id: InodeId) {
        if let Some(buf) = self.data.get_mut(&id) {
            buf.clear();
        }
    }

    /// Resizes a regular file's buffer to exactly `size`, zero-filling
    /// growth.
    pub fn truncate_data(&mut self, id: InodeId, size: u64) {
        let buf = self.data.entry(id).or_default();
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size <= buf.len() {
            buf.truncate(size);
        } else {
            buf.resize(size, 0);
        }
    }

    pub fn symlink_target(&self, id: InodeId) -> Result<&str, FsError> {
        self.symlinks
            .get(&id)
            .map(String::as_str)
            .ok_or(FsError::InvalidArgument)
    }

    pub fn set_symlink_target(&mut self, id: InodeId, target: &str) {
        if let Some(t) = self.symlinks.get_mut(&id) {
            target.clone_into(t);
        }
    }

    /// The metadata view of `id`, presented under `name`.
    pub fn metadata(&self, id: InodeId, name: &str) -> Result<Metadata, FsError> {
        let node = self.get(id)?;
        Ok(Metadata {
            name: name.to_string(),
            size: self.file_size(id),
            mode: node.mode,
            mtime: node.mtime,
            ino: id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_root() -> InodeStore {
        let mut store = InodeStore::new();
        let root = store.new_dir(0o755);
        assert_eq!(root, ROOT_INO);
        store
    }

    #[test]
    fn ordinals_are_strictly_increasing() {
        let mut store = store_with_root();
        let a = store.new_file(0o644);
        let b = store.new_dir(0o755);
        let c = store.new_symlink("/a");
        assert!(ROOT_INO < a && a < b && b < c);
    }

    #[test]
    fn root_is_self_parented() {
        let store = store_with_root();
        let root = store.get(ROOT_INO).unwrap();
        assert_eq!(root.lookup("."), Some(ROOT_INO));
        assert_eq!(root.lookup(".."), Some(ROOT_INO));
        assert_eq!(root.nlink, 2);
    }

    #[test]
    fn link_counts_track_entries() {
        let mut store = store_with_root();
        let mut children = Vec::new();
        for _ in 0..100 {
            children.push(store.new_file(0o666));
        }
        for &c in &children {
            assert_eq!(store.get(c).unwrap().nlink, 0);
        }

        for (i, &c) in children.iter().enumerate() {
            store
                .link(ROOT_INO, &format!("file.{i:04}.txt"), c)
                .unwrap();
        }
        for &c in &children {
            assert_eq!(store.get(c).unwrap().nlink, 1);
        }

        // second link from a subdirectory
        let sub = store.new_dir(0o755);
        store.link(ROOT_INO, "sub", sub).unwrap();
        store.link(sub, "..", ROOT_INO).unwrap();
        for (i, &c) in children.iter().enumerate() {
            store.link(sub, &format!("file.{i:04}.txt"), c).unwrap();
        }
        for &c in &children {
            assert_eq!(store.get(c).unwrap().nlink, 2);
        }

        for i in 0..children.len() {
            store.unlink(ROOT_INO, &format!("file.{i:04}.txt")).unwrap();
        }
        for &c in &children {
            assert_eq!(store.get(c).unwrap().nlink, 1);
        }
    }

    #[test]
    fn entries_stay_sorted_and_unique() {
        let mut store = store_with_root();
        for name in ["zeta", "alpha", "mid", "beta"] {
            let f = store.new_file(0o644);
            store.link(ROOT_INO, name, f).unwrap();
        }
        let names: Vec<&str> = store
            .get(ROOT_INO)
            .unwrap()
            .entries
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, [".", "..", "alpha", "beta", "mid", "zeta"]);
    }

    #[test]
    fn replacing_a_name_swaps_link_counts() {
        let mut store = store_with_root();
        let old = store.new_file(0o644);
        let new = store.new_file(0o644);
        store.link(ROOT_INO, "f", old).unwrap();
        store.link(ROOT_INO, "keep", old).unwrap();
        store.link(ROOT_INO, "f", new).unwrap();
        assert_eq!(store.get(old).unwrap().nlink, 1);
        assert_eq!(store.get(new).unwrap().nlink, 1);
        assert_eq!(store.get(ROOT_INO).unwrap().lookup("f"), Some(new));
    }

    #[test]
    fn link_into_non_directory_fails() {
        let mut store = store_with_root();
        let f = store.new_file(0o644);
        let g = store.new_file(0o644);
        assert_eq!(store.link(f, "x", g), Err(FsError::NotDirectory));
        assert_eq!(store.unlink(f, "x"), Err(FsError::NotDirectory));
    }

    #[test]
    fn unlink_missing_entry_fails() {
        let mut store = store_with_root();
        assert_eq!(store.unlink(ROOT_INO, "ghost"), Err(FsError::NotFound));
    }

    #[test]
    fn unlinked_file_is_reclaimed_without_handles() {
        let mut store = store_with_root();
        let f = store.new_file(0o644);
        store.link(ROOT_INO, "f", f).unwrap();
        store.truncate_data(f, 16);
        store.unlink(ROOT_INO, "f").unwrap();
        assert!(!store.contains(f));
        assert_eq!(store.file_size(f), 0);
    }

    #[test]
    fn open_handle_defers_reclamation() {
        let mut store = store_with_root();
        let f = store.new_file(0o644);
        store.link(ROOT_INO, "f", f).unwrap();
        store.register_handle(f);
        store.unlink(ROOT_INO, "f").unwrap();
        assert!(store.contains(f));
        store.release_handle(f);
        assert!(!store.contains(f));
    }

    #[test]
    fn unlink_all_empties_and_reclaims_subtree() {
        let mut store = store_with_root();
        let dir = store.new_dir(0o755);
        store.link(ROOT_INO, "dir", dir).unwrap();
        store.link(dir, "..", ROOT_INO).unwrap();
        let inner = store.new_dir(0o755);
        store.link(dir, "inner", inner).unwrap();
        store.link(inner, "..", dir).unwrap();
        let f = store.new_file(0o644);
        store.link(inner, "f", f).unwrap();

        store.unlink_all(ROOT_INO).unwrap();

        assert!(!store.contains(dir));
        assert!(!store.contains(inner));
        assert!(!store.contains(f));
        let root = store.get(ROOT_INO).unwrap();
        let names: Vec<&str> = root.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", ".."]);
        // only root's own dot entries count toward it again
        assert_eq!(root.nlink, 2);
    }

    #[test]
    fn symlink_targets_live_in_the_side_table() {
        let mut store = store_with_root();
        let l = store.new_symlink("/target");
        store.link(ROOT_INO, "l", l).unwrap();
        assert_eq!(store.symlink_target(l), Ok("/target"));
        let f = store.new_file(0o644);
        assert_eq!(store.symlink_target(f), Err(FsError::InvalidArgument));
        store.unlink(ROOT_INO, "l").unwrap();
        assert_eq!(store.symlink_target(l), Err(FsError::InvalidArgument));
    }

    #[test]
    #[should_panic(expected = "negative link count")]
    fn link_count_underflow_aborts() {
        let mut store = store_with_root();
        let f = store.new_file(0o644);
        store.link(ROOT_INO, "f", f).unwrap();
        store.register_handle(f); // keep the node around past nlink 0
        store.unlink(ROOT_INO, "f").unwrap();
        // no entry refers to f anymore; a stray decrement must abort
        store.count_down(f);
    }
}
