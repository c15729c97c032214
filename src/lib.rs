//! `heapfs` is an in-memory, hierarchical, POSIX-flavored filesystem that is
//! addressed entirely through path strings. It is meant as a drop-in
//! substitute for the host filesystem in tests and in tools that compose
//! filesystem implementations: paths always use `/` as the separator
//! (regardless of host OS), open files behave like OS file handles, and
//! failures carry the same error kinds an OS filesystem would produce.
//!
//! ```
//! use heapfs::HeapFs;
//!
//! let fs = HeapFs::new();
//! fs.mkdir_all("/var/log", 0o755).unwrap();
//! let mut f = fs.create("/var/log/app.log").unwrap();
//! f.write(b"started\n").unwrap();
//! f.close().unwrap();
//!
//! assert_eq!(fs.stat("/var/log/app.log").unwrap().size, 8);
//! ```
//!
//! # Threading
//!
//! A [`HeapFs`] and the [`File`] handles it hands out share state through
//! `Rc<RefCell<..>>` and are **not** safe for concurrent use from multiple
//! threads; they are deliberately `!Send`. This is a contract, not an
//! accident: the filesystem is single-threaded cooperative, and callers that
//! want to share an instance across threads must supply their own external
//! serialization around a single owning thread. No operation blocks; all data
//! lives in memory and every call either succeeds or fails promptly.
//!
//! # Write visibility
//!
//! A writable [`File`] works on a private copy of the file's bytes and only
//! publishes it to the filesystem on [`File::sync`] or [`File::close`]. Two
//! writable handles on the same file will clobber each other's unsynced
//! writes; this is a documented limitation, not a consistency guarantee.

pub mod fs;
pub mod path;


pub use fs::HeapFs;
pub use fs::errors::{FsError, PathError};
pub use fs::file::File;
pub use fs::types::{Access, FileType, InodeId, Metadata, OpenFlags, SeekWhence, Timestamp};
