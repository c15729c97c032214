//! The open-file handle.
//!
//! A [`File`] holds the inode *ordinal* it was opened against, never a
//! reference into the store, and looks the inode up on every operation; a
//! file unlinked while open therefore keeps working until the last handle is
//! closed. Regular-file bytes are a private working copy taken at open and
//! published back on [`File::sync`] / [`File::close`].

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use bytes::BytesMut;

use crate::path;

use super::FsState;
use super::errors::{FsError, PathError};
use super::types::{Access, InodeId, Metadata, OpenFlags, SeekWhence};

#[derive(Debug)]
pub struct File {
    state: Rc<RefCell<FsState>>,
    name: String,
    flags: OpenFlags,
    ino: InodeId,
    offset: usize,
    dir_offset: usize,
    data: BytesMut,
    closed: bool,
}

impl File {
    pub(crate) fn new(
        state: Rc<RefCell<FsState>>,
        name: String,
        flags: OpenFlags,
        ino: InodeId,
        data: BytesMut,
    ) -> Self {
        Self {
            state,
            name,
            flags,
            ino,
            offset: 0,
            dir_offset: 0,
            data,
            closed: false,
        }
    }

    fn err(&self, op: &'static str, kind: FsError) -> PathError {
        PathError::new(op, self.name.clone(), kind)
    }

    fn ensure_open(&self, op: &'static str) -> Result<(), PathError> {
        if self.closed {
            Err(self.err(op, FsError::BadHandle))
        } else {
            Ok(())
        }
    }

    /// The name this handle was opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copies up to `buf.len()` bytes from the current offset and advances
    /// it. Returns `Ok(0)` at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PathError> {
        self.ensure_open("read")?;
        {
            let st = self.state.borrow();
            let node = st
                .store
                .get(self.ino)
                .map_err(|_| self.err("read", FsError::BadHandle))?;
            if node.is_directory() {
                return Err(self.err("read", FsError::IsDirectory));
            }
        }
        if self.flags.access() == Access::WriteOnly {
            return Err(self.err("read", FsError::BadHandle));
        }
        if self.offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.offset);
        buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }

    /// Positions the offset at `off` and reads from there.
    pub fn read_at(&mut self, buf: &mut [u8], off: u64) -> Result<usize, PathError> {
        self.ensure_open("read")?;
        if self.flags.access() == Access::WriteOnly {
            return Err(self.err("read", FsError::BadHandle));
        }
        self.offset = usize::try_from(off).unwrap_or(usize::MAX);
        self.read(buf)
    }

    /// Copies `buf` into the working buffer at the current offset, growing
    /// it (zero-filling any gap) as needed, and advances the offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, PathError> {
        self.ensure_open("write")?;
        if self.flags.access() == Access::ReadOnly {
            return Err(self.err("write", FsError::BadHandle));
        }
        {
            let st = self.state.borrow();
            let node = st
                .store
                .get(self.ino)
                .map_err(|_| self.err("write", FsError::BadHandle))?;
            if node.is_directory() {
                return Err(self.err("write", FsError::IsDirectory));
            }
        }
        if self.flags.contains(OpenFlags::APPEND) {
            self.offset = self.data.len();
        }
        let end = self.offset + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.offset..end].copy_from_slice(buf);
        self.offset = end;
        Ok(buf.len())
    }

    /// Positions the offset at `off` and writes there.
    pub fn write_at(&mut self, buf: &[u8], off: u64) -> Result<usize, PathError> {
        self.ensure_open("write")?;
        if self.flags.access() == Access::ReadOnly {
            return Err(self.err("write", FsError::BadHandle));
        }
        self.offset = usize::try_from(off).unwrap_or(usize::MAX);
        self.write(buf)
    }

    /// Convenience wrapper writing a string slice.
    pub fn write_str(&mut self, s: &str) -> Result<usize, PathError> {
        self.write(s.as_bytes())
    }

    /// Repositions the offset. A resulting negative offset clamps to 0;
    /// seeking past the end is legal and a later write grows the file.
    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, PathError> {
        self.ensure_open("seek")?;
        let base = match whence {
            SeekWhence::Start => 0,
            SeekWhence::Current => self.offset as i64,
            SeekWhence::End => self.data.len() as i64,
        };
        let target = base.saturating_add(offset).max(0);
        self.offset = usize::try_from(target).unwrap_or(usize::MAX);
        Ok(self.offset as u64)
    }

    /// Resizes the working buffer to exactly `size` bytes, zero-filling on
    /// growth.
    pub fn truncate(&mut self, size: u64) -> Result<(), PathError> {
        self.ensure_open("truncate")?;
        if self.flags.access() == Access::ReadOnly {
            return Err(self.err("truncate", FsError::PermissionDenied));
        }
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size <= self.data.len() {
            self.data.truncate(size);
        } else {
            self.data.resize(size, 0);
        }
        let mut st = self.state.borrow_mut();
        if let Ok(node) = st.store.get_mut(self.ino) {
            node.modified();
        }
        Ok(())
    }

    /// Returns up to `n` directory entries past the enumeration cursor and
    /// advances the cursor by the number actually returned. `n < 1` returns
    /// all remaining entries; an empty result means the stream is exhausted.
    /// `.` and `..` are never reported.
    pub fn readdir(&mut self, n: isize) -> Result<Vec<Metadata>, PathError> {
        self.dir_chunk("readdir", n, |st, ino, name| st.store.metadata(ino, name))
    }

    /// Like [`File::readdir`] but yields names only.
    pub fn readdirnames(&mut self, n: isize) -> Result<Vec<String>, PathError> {
        self.dir_chunk("readdirnames", n, |_, _, name| Ok(name.to_string()))
    }

    fn dir_chunk<T>(
        &mut self,
        op: &'static str,
        n: isize,
        project: impl Fn(&FsState, InodeId, &str) -> Result<T, FsError>,
    ) -> Result<Vec<T>, PathError> {
        self.ensure_open(op)?;
        if self.flags.access() == Access::WriteOnly {
            return Err(self.err(op, FsError::PermissionDenied));
        }
        let st = self.state.borrow();
        let node = st
            .store
            .get(self.ino)
            .map_err(|_| self.err(op, FsError::BadHandle))?;
        if !node.is_directory() {
            return Err(self.err(op, FsError::NotDirectory));
        }
        let children: Vec<(InodeId, &str)> = node
            .entries
            .iter()
            .filter(|e| e.name != "." && e.name != "..")
            .map(|e| (e.ino, e.name.as_str()))
            .collect();
        let remaining = children.len().saturating_sub(self.dir_offset);
        if remaining == 0 {
            return Ok(Vec::new());
        }
        let count = if n < 1 {
            remaining
        } else {
            remaining.min(n as usize)
        };
        let out = children[self.dir_offset..self.dir_offset + count]
            .iter()
            .map(|&(ino, name)| project(&st, ino, name))
            .collect::<Result<Vec<T>, FsError>>()
            .map_err(|e| self.err(op, e))?;
        drop(st);
        self.dir_offset += count;
        Ok(out)
    }

    /// Metadata for the object behind this handle.
    pub fn stat(&self) -> Result<Metadata, PathError> {
        self.ensure_open("stat")?;
        let st = self.state.borrow();
        st.store
            .metadata(self.ino, path::basename(&self.name))
            .map_err(|e| self.err("stat", e))
    }

    /// Publishes the working buffer back to the store. A no-op for
    /// read-only handles.
    pub fn sync(&mut self) -> Result<(), PathError> {
        self.ensure_open("sync")?;
        if !self.flags.access().writable() {
            return Ok(());
        }
        let mut st = self.state.borrow_mut();
        let is_file = match st.store.get_mut(self.ino) {
            Ok(node) if node.is_file() => {
                node.modified();
                true
            }
            _ => false,
        };
        if is_file {
            st.store.set_data(self.ino, self.data.clone());
        }
        Ok(())
    }

    /// Syncs and invalidates the handle. Every later operation, a second
    /// `close` included, fails with a bad-handle error.
    pub fn close(&mut self) -> Result<(), PathError> {
        self.ensure_open("close")?;
        self.sync()?;
        self.closed = true;
        self.state.borrow_mut().store.release_handle(self.ino);
        Ok(())
    }
}

impl Drop for File {
    fn drop(&mut self) {
        // an unclosed handle releases its registration but does not sync
        if !self.closed
            && let Ok(mut st) = self.state.try_borrow_mut()
        {
            st.store.release_handle(self.ino);
        }
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        File::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        File::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(Into::into)
    }
}

impl io::Seek for File {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(o) => (i64::try_from(o).unwrap_or(i64::MAX), SeekWhence::Start),
            io::SeekFrom::Current(o) => (o, SeekWhence::Current),
            io::SeekFrom::End(o) => (o, SeekWhence::End),
        };
        File::seek(self, offset, whence).map_err(Into::into)
    }
}
