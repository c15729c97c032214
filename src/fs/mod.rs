//! The filesystem facade and its supporting machinery.

pub mod errors;
pub mod file;
pub mod permissions;
pub mod types;

pub(crate) mod inode;
pub(crate) mod resolver;
pub(crate) mod store;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use tracing::debug;

use crate::path;

use self::errors::{FsError, PathError};
use self::file::File;
use self::permissions::{MODE_PERM, S_IFMT, check_open_access};
use self::store::{InodeStore, ROOT_INO};
use self::types::{Access, InodeId, Metadata, OpenFlags, Timestamp};

const DEFAULT_UMASK: u32 = 0o755;
const DEFAULT_TEMPDIR: &str = "/tmp";

/// Everything a filesystem instance owns. Shared between the facade and its
/// open [`File`] handles through `Rc<RefCell<..>>`.
#[derive(Debug)]
pub(crate) struct FsState {
    pub(crate) store: InodeStore,
    umask: u32,
    tempdir: String,
    cwd: String,
    cwd_ino: InodeId,
}

impl FsState {
    fn start_for(&self, name: &str) -> InodeId {
        if path::is_absolute(name) {
            ROOT_INO
        } else {
            self.cwd_ino
        }
    }

    fn resolve(&self, name: &str) -> Result<InodeId, FsError> {
        resolver::resolve(&self.store, self.start_for(name), name)
    }

    fn resolve_nofollow(&self, name: &str) -> Result<InodeId, FsError> {
        resolver::resolve_nofollow(&self.store, self.start_for(name), name)
    }

    fn full(&self, name: &str) -> String {
        path::clean(&path::absolutize(&self.cwd, name))
    }
}

/// An in-memory POSIX-flavored filesystem.
///
/// Cloning is cheap and yields another handle onto the same filesystem.
/// Multiple independent filesystems coexist trivially; there is no
/// process-wide state.
///
/// Not safe for concurrent use from multiple threads (see the crate docs);
/// `HeapFs` is deliberately `!Send`.
#[derive(Clone)]
pub struct HeapFs {
    pub(crate) state: Rc<RefCell<FsState>>,
}

impl Default for HeapFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapFs {
    /// An empty filesystem: a root directory, cwd `/`, umask `0o755`, and
    /// tempdir `/tmp`.
    #[must_use]
    pub fn new() -> Self {
        let mut store = InodeStore::new();
        let root = store.new_dir(DEFAULT_UMASK);
        debug_assert_eq!(root, ROOT_INO);
        Self {
            state: Rc::new(RefCell::new(FsState {
                store,
                umask: DEFAULT_UMASK,
                tempdir: DEFAULT_TEMPDIR.to_string(),
                cwd: "/".to_string(),
                cwd_ino: ROOT_INO,
            })),
        }
    }

    /// The path separator, `/` on every host OS.
    #[must_use]
    pub fn separator(&self) -> char {
        '/'
    }

    /// The path-list separator, `:` on every host OS.
    #[must_use]
    pub fn list_separator(&self) -> char {
        ':'
    }

    /// The mode mask AND-ed with caller-supplied permissions on creation.
    #[must_use]
    pub fn umask(&self) -> u32 {
        self.state.borrow().umask
    }

    pub fn set_umask(&self, umask: u32) {
        self.state.borrow_mut().umask = umask & MODE_PERM;
    }

    /// The configured temporary-directory path. Purely advisory: the
    /// directory is not created automatically.
    #[must_use]
    pub fn temp_dir(&self) -> String {
        self.state.borrow().tempdir.clone()
    }

    pub fn set_temp_dir(&self, dir: impl Into<String>) {
        self.state.borrow_mut().tempdir = dir.into();
    }

    /// The current working directory path.
    #[must_use]
    pub fn getwd(&self) -> String {
        self.state.borrow().cwd.clone()
    }

    /// Opens `name` read-only.
    pub fn open(&self, name: &str) -> Result<File, PathError> {
        self.open_file(name, OpenFlags::RDONLY, 0)
    }

    /// Creates (truncating if present) `name` read-write with permission
    /// `0o644`.
    pub fn create(&self, name: &str) -> Result<File, PathError> {
        self.open_file(
            name,
            OpenFlags::RDWR | OpenFlags::CREATE | OpenFlags::TRUNC,
            0o644,
        )
    }

    /// Opens `name` with the given flags; `perm` (masked by the umask) is
    /// the mode used when the call creates the file.
    ///
    /// `"/"` and `"."` always open (yielding the root and the cwd), with all
    /// flags except the access mode ignored. A create of a new file grants
    /// the returned handle access regardless of `perm`; an existing file is
    /// checked against its mode bits unless creation was requested.
    pub fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<File, PathError> {
        debug!("open: name={name:?}, flags={flags:?}, perm={perm:#o}");
        let wrap = |e: FsError| PathError::new("open", name, e);
        let mut st = self.state.borrow_mut();
        if name == "/" || name == "." {
            let ino = if name == "/" { ROOT_INO } else { st.cwd_ino };
            st.store.register_handle(ino);
            let data = st.store.data_snapshot(ino);
            return Ok(File::new(
                Rc::clone(&self.state),
                name.to_string(),
                flags,
                ino,
                data,
            ));
        }
        if name.is_empty() {
            return Err(wrap(FsError::NotFound));
        }

        let access = flags.access();
        let create = flags.contains(OpenFlags::CREATE);
        let truncate = flags.contains(OpenFlags::TRUNC);

        let ino = match st.resolve(name) {
            Ok(ino) => {
                if create && flags.contains(OpenFlags::EXCL) {
                    return Err(wrap(FsError::Exists));
                }
                let node = st.store.get(ino).map_err(wrap)?;
                if node.is_directory() && (access != Access::ReadOnly || truncate) {
                    return Err(wrap(FsError::IsDirectory));
                }
                let (mode, regular) = (node.mode, node.is_file());
                if truncate && regular {
                    st.store.clear_data(ino);
                }
                if !create {
                    check_open_access(mode, access).map_err(wrap)?;
                }
                ino
            }
            Err(FsError::NotFound) if create => {
                let full = st.full(name);
                let (dir, base) = path::split_parent(&full);
                if base.is_empty() || base == "." || base == ".." {
                    return Err(wrap(FsError::InvalidArgument));
                }
                let parent = st.resolve(&dir).map_err(wrap)?;
                let mode = perm & st.umask;
                let ino = st.store.new_file(mode);
                st.store.link(parent, base, ino).map_err(wrap)?;
                ino
            }
            Err(e) => return Err(wrap(e)),
        };

        st.store.register_handle(ino);
        let data = st.store.data_snapshot(ino);
        Ok(File::new(
            Rc::clone(&self.state),
            name.to_string(),
            flags,
            ino,
            data,
        ))
    }

    /// Creates the directory `name` with permission `perm & umask`.
    pub fn mkdir(&self, name: &str, perm: u32) -> Result<(), PathError> {
        debug!("mkdir: name={name:?}, perm={perm:#o}");
        let wrap = |e: FsError| PathError::new("mkdir", name, e);
        let mut st = self.state.borrow_mut();
        if st.resolve(name).is_ok() {
            return Err(wrap(FsError::Exists));
        }
        let full = st.full(name);
        let (dir, base) = path::split_parent(&full);
        if base.is_empty() || base == "." || base == ".." {
            return Err(wrap(FsError::InvalidArgument));
        }
        let parent = st.resolve(&dir).map_err(|_| wrap(FsError::NotFound))?;
        let mode = perm & st.umask;
        let child = st.store.new_dir(mode);
        st.store.link(parent, base, child).map_err(wrap)?;
        st.store.link(child, "..", parent).map_err(wrap)?;
        Ok(())
    }

    /// Creates `name` and every missing ancestor. Ancestors that already
    /// exist as directories are tolerated; an existing non-directory
    /// component fails with a not-a-directory error.
    pub fn mkdir_all(&self, name: &str, perm: u32) -> Result<(), PathError> {
        debug!("mkdir_all: name={name:?}, perm={perm:#o}");
        let full = self.state.borrow().full(name);
        if full == "/" {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in full.trim_start_matches('/').split('/') {
            prefix.push('/');
            prefix.push_str(segment);
            match self.mkdir(&prefix, perm) {
                Ok(()) => {}
                Err(e) if e.kind() == FsError::Exists => {
                    let existing = self
                        .stat(&prefix)
                        .map_err(|e| PathError::new("mkdir", prefix.clone(), e.kind()))?;
                    if !existing.is_dir() {
                        return Err(PathError::new(
                            "mkdir",
                            prefix.clone(),
                            FsError::NotDirectory,
                        ));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Unlinks `name` from its parent. Directories must be empty; the root
    /// cannot be removed. Symlinks are removed themselves, not their
    /// targets.
    pub fn remove(&self, name: &str) -> Result<(), PathError> {
        debug!("remove: name={name:?}");
        let wrap = |e: FsError| PathError::new("remove", name, e);
        let mut st = self.state.borrow_mut();
        let full = st.full(name);
        if full == "/" {
            return Err(wrap(FsError::InvalidArgument));
        }
        let (dir, base) = path::split_parent(&full);
        let parent = st.resolve(&dir).map_err(wrap)?;
        let target = st
            .store
            .get(parent)
            .map_err(wrap)?
            .lookup(base)
            .ok_or_else(|| wrap(FsError::NotFound))?;
        let node = st.store.get(target).map_err(wrap)?;
        if node.is_directory()
            && node.entries.iter().any(|e| e.name != "." && e.name != "..")
        {
            return Err(wrap(FsError::NotEmpty));
        }
        st.store.unlink(parent, base).map_err(wrap)?;
        Ok(())
    }

    /// Recursively unlinks the subtree rooted at `name`. A missing target
    /// is a successful no-op. Applied to the root, it removes the root's
    /// children but leaves the root itself.
    pub fn remove_all(&self, name: &str) -> Result<(), PathError> {
        debug!("remove_all: name={name:?}");
        let wrap = |e: FsError| PathError::new("remove_all", name, e);
        let mut st = self.state.borrow_mut();
        let full = st.full(name);
        if full == "/" {
            st.store.unlink_all(ROOT_INO).map_err(wrap)?;
            return Ok(());
        }
        let target = match st.resolve_nofollow(&full) {
            Ok(target) => target,
            Err(FsError::NotFound) => return Ok(()),
            Err(e) => return Err(wrap(e)),
        };
        if st.store.get(target).map_err(wrap)?.is_directory() {
            st.store.unlink_all(target).map_err(wrap)?;
        }
        let (dir, base) = path::split_parent(&full);
        let parent = st.resolve(&dir).map_err(wrap)?;
        st.store.unlink(parent, base).map_err(wrap)?;
        Ok(())
    }

    /// Relocates `oldname` to `newname`. An existing destination is
    /// replaced, with the displaced inode's link count adjusted. Renaming
    /// the root, a dot entry, or a directory to somewhere inside itself is
    /// invalid; renaming a path onto itself is a no-op.
    pub fn rename(&self, oldname: &str, newname: &str) -> Result<(), PathError> {
        debug!("rename: old={oldname:?}, new={newname:?}");
        let wrap = |e: FsError| PathError::new("rename", oldname, e).with_dest(newname);
        let mut st = self.state.borrow_mut();
        let old_full = st.full(oldname);
        let new_full = st.full(newname);
        if old_full == "/" {
            return Err(wrap(FsError::InvalidArgument));
        }
        if old_full == new_full {
            return Ok(());
        }
        let (old_dir, old_base) = path::split_parent(&old_full);
        let (new_dir, new_base) = path::split_parent(&new_full);
        if new_base.is_empty() || new_base == "." || new_base == ".." {
            return Err(wrap(FsError::InvalidArgument));
        }
        let old_parent = st.resolve(&old_dir).map_err(wrap)?;
        let node = st
            .store
            .get(old_parent)
            .map_err(wrap)?
            .lookup(old_base)
            .ok_or_else(|| wrap(FsError::NotFound))?;
        let new_parent = st.resolve(&new_dir).map_err(wrap)?;
        let moving_dir = st.store.get(node).map_err(wrap)?.is_directory();
        if moving_dir {
            // refuse to move a directory underneath itself
            let mut cur = new_parent;
            loop {
                if cur == node {
                    return Err(wrap(FsError::InvalidArgument));
                }
                let up = st.store.get(cur).map_err(wrap)?.lookup("..").unwrap_or(cur);
                if up == cur {
                    break;
                }
                cur = up;
            }
        }
        st.store.link(new_parent, new_base, node).map_err(wrap)?;
        st.store.unlink(old_parent, old_base).map_err(wrap)?;
        if moving_dir && new_parent != old_parent {
            st.store.link(node, "..", new_parent).map_err(wrap)?;
        }
        Ok(())
    }

    /// Resizes the regular file at `name` to exactly `size` bytes,
    /// zero-filling growth.
    pub fn truncate(&self, name: &str, size: u64) -> Result<(), PathError> {
        debug!("truncate: name={name:?}, size={size}");
        let wrap = |e: FsError| PathError::new("truncate", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve(name).map_err(wrap)?;
        if st.store.get(ino).map_err(wrap)?.is_directory() {
            return Err(wrap(FsError::IsDirectory));
        }
        st.store.truncate_data(ino, size);
        st.store.get_mut(ino).map_err(wrap)?.modified();
        Ok(())
    }

    /// Metadata for `name`, following symlinks.
    pub fn stat(&self, name: &str) -> Result<Metadata, PathError> {
        let wrap = |e: FsError| PathError::new("stat", name, e);
        let st = self.state.borrow();
        let full = st.full(name);
        let ino = st.resolve(&full).map_err(wrap)?;
        st.store.metadata(ino, path::basename(&full)).map_err(wrap)
    }

    /// Metadata for `name` itself: a terminal symlink is described, not
    /// followed.
    pub fn lstat(&self, name: &str) -> Result<Metadata, PathError> {
        let wrap = |e: FsError| PathError::new("lstat", name, e);
        let st = self.state.borrow();
        let full = st.full(name);
        let ino = st.resolve_nofollow(&full).map_err(wrap)?;
        st.store.metadata(ino, path::basename(&full)).map_err(wrap)
    }

    /// Replaces the permission bits of `name`'s mode. The umask is not
    /// applied; the type bits are preserved.
    pub fn chmod(&self, name: &str, mode: u32) -> Result<(), PathError> {
        debug!("chmod: name={name:?}, mode={mode:#o}");
        let wrap = |e: FsError| PathError::new("chmod", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve(name).map_err(wrap)?;
        let node = st.store.get_mut(ino).map_err(wrap)?;
        node.mode = (node.mode & S_IFMT) | (mode & MODE_PERM);
        Ok(())
    }

    /// Sets the owner of the object `name` resolves to (symlinks followed).
    pub fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<(), PathError> {
        debug!("chown: name={name:?}, uid={uid}, gid={gid}");
        let wrap = |e: FsError| PathError::new("chown", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve(name).map_err(wrap)?;
        let node = st.store.get_mut(ino).map_err(wrap)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    /// Sets the owner of `name` itself: a terminal symlink's own uid/gid
    /// change, not its target's.
    pub fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<(), PathError> {
        debug!("lchown: name={name:?}, uid={uid}, gid={gid}");
        let wrap = |e: FsError| PathError::new("lchown", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve_nofollow(name).map_err(wrap)?;
        let node = st.store.get_mut(ino).map_err(wrap)?;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    /// Sets the access and modification times of `name`.
    pub fn chtimes(&self, name: &str, atime: Timestamp, mtime: Timestamp) -> Result<(), PathError> {
        let wrap = |e: FsError| PathError::new("chtimes", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve(name).map_err(wrap)?;
        let node = st.store.get_mut(ino).map_err(wrap)?;
        node.atime = atime;
        node.mtime = mtime;
        Ok(())
    }

    /// Creates a symlink at `linkpath` whose verbatim target is `target`.
    /// An existing symlink at `linkpath` is retargeted; any other existing
    /// object is an error.
    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<(), PathError> {
        debug!("symlink: target={target:?}, linkpath={linkpath:?}");
        let wrap = |e: FsError| PathError::new("symlink", linkpath, e).with_dest(target);
        let mut st = self.state.borrow_mut();
        let full = st.full(linkpath);
        let (dir, base) = path::split_parent(&full);
        if base.is_empty() || base == "." || base == ".." {
            return Err(wrap(FsError::InvalidArgument));
        }
        let parent = st.resolve(&dir).map_err(wrap)?;
        if let Some(existing) = st.store.get(parent).map_err(wrap)?.lookup(base) {
            if st.store.get(existing).map_err(wrap)?.is_symlink() {
                st.store.set_symlink_target(existing, target);
                return Ok(());
            }
            return Err(wrap(FsError::Exists));
        }
        let ino = st.store.new_symlink(target);
        st.store.link(parent, base, ino).map_err(wrap)?;
        Ok(())
    }

    /// The stored target string of the symlink at `name`.
    pub fn readlink(&self, name: &str) -> Result<String, PathError> {
        let wrap = |e: FsError| PathError::new("readlink", name, e);
        let st = self.state.borrow();
        let ino = st.resolve_nofollow(name).map_err(wrap)?;
        if !st.store.get(ino).map_err(wrap)?.is_symlink() {
            return Err(wrap(FsError::InvalidArgument));
        }
        st.store
            .symlink_target(ino)
            .map(str::to_string)
            .map_err(wrap)
    }

    /// Changes the working directory. The stored cwd path and inode move
    /// together.
    pub fn chdir(&self, name: &str) -> Result<(), PathError> {
        debug!("chdir: name={name:?}");
        let wrap = |e: FsError| PathError::new("chdir", name, e);
        let mut st = self.state.borrow_mut();
        let ino = st.resolve(name).map_err(wrap)?;
        if !st.store.get(ino).map_err(wrap)?.is_directory() {
            return Err(wrap(FsError::NotDirectory));
        }
        st.cwd = st.full(name);
        st.cwd_ino = ino;
        Ok(())
    }

    /// Pre-order traversal rooted at `name`, in ascending lexicographic
    /// order. `.` and `..` are never reported. Stat failures are delivered
    /// to the visitor with no metadata; a visitor error terminates the walk
    /// and is returned.
    pub fn walk<F>(&self, name: &str, visitor: &mut F) -> io::Result<()>
    where
        F: FnMut(&str, Option<&Metadata>, Option<&PathError>) -> io::Result<()>,
    {
        let full = self.state.borrow().full(name);
        match self.stat(&full) {
            Err(e) => visitor(&full, None, Some(&e)),
            Ok(info) => self.walk_node(&full, &info, visitor),
        }
    }

    fn walk_node<F>(&self, node_path: &str, info: &Metadata, visitor: &mut F) -> io::Result<()>
    where
        F: FnMut(&str, Option<&Metadata>, Option<&PathError>) -> io::Result<()>,
    {
        visitor(node_path, Some(info), None)?;
        if !info.is_dir() {
            return Ok(());
        }
        let children: Vec<(String, InodeId)> = {
            let st = self.state.borrow();
            match st.store.get(info.ino) {
                Ok(node) => node
                    .entries
                    .iter()
                    .filter(|e| e.name != "." && e.name != "..")
                    .map(|e| (e.name.clone(), e.ino))
                    .collect(),
                Err(_) => Vec::new(),
            }
        };
        for (child_name, child_ino) in children {
            let child_path = if node_path == "/" {
                format!("/{child_name}")
            } else {
                format!("{node_path}/{child_name}")
            };
            let meta = {
                let st = self.state.borrow();
                st.store.metadata(child_ino, &child_name)
            };
            match meta {
                Ok(m) => self.walk_node(&child_path, &m, visitor)?,
                Err(e) => {
                    let err = PathError::new("stat", child_path.clone(), e);
                    visitor(&child_path, None, Some(&err))?;
                }
            }
        }
        Ok(())
    }
}
