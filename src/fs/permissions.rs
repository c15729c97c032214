//! Mode bit constants and open-time access checks.

use super::errors::FsError;
use super::types::Access;

pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

pub const S_IRUSR: u32 = 0o400;
pub const S_IWUSR: u32 = 0o200;
pub const S_IRGRP: u32 = 0o040;
pub const S_IWGRP: u32 = 0o020;
pub const S_IROTH: u32 = 0o004;
pub const S_IWOTH: u32 = 0o002;

/// Permission plus sticky/setid bits; everything `chmod` may change.
pub const MODE_PERM: u32 = 0o7777;

const ANY_READ: u32 = S_IRUSR | S_IRGRP | S_IROTH;
const ANY_WRITE: u32 = S_IWUSR | S_IWGRP | S_IWOTH;

/// Strips the `S_IFMT` type bits from a caller-supplied mode.
#[must_use]
pub fn strip_type(mode: u32) -> u32 {
    mode & MODE_PERM
}

/// Open-time permission check against an existing inode's mode.
///
/// Read-only access requires any read bit, write-only any write bit, and
/// read-write at least one of each. The check is deliberately owner-blind:
/// this filesystem models a single principal, so possession of any matching
/// bit grants the access.
pub fn check_open_access(mode: u32, access: Access) -> Result<(), FsError> {
    let ok = match access {
        Access::ReadOnly => mode & ANY_READ != 0,
        Access::WriteOnly => mode & ANY_WRITE != 0,
        Access::ReadWrite => mode & ANY_READ != 0 && mode & ANY_WRITE != 0,
    };
    if ok { Ok(()) } else { Err(FsError::PermissionDenied) }
}
