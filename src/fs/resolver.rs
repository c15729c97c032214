//! Name resolution: walking path segments from a starting directory.
//!
//! Resolution is a head/tail recursion over [`path::split_head`]: a `/` head
//! restarts at the root, every other head is looked up in the current
//! directory's entries (`.` and `..` are ordinary entries, so they resolve
//! through the same lookup). Symlinks are dereferenced against the directory
//! that contains them, under a depth budget that is shared across the whole
//! resolution so that both long chains and cycles terminate.

use crate::path;

use super::errors::FsError;
use super::store::{InodeStore, ROOT_INO};
use super::types::InodeId;

/// Symlink dereferences allowed within a single resolution.
pub(crate) const SYMLINK_DEPTH_BUDGET: u32 = 40;

/// Resolves `name` starting from the directory `start`, dereferencing
/// symlinks everywhere, including the terminal component (stat-style).
pub fn resolve(store: &InodeStore, start: InodeId, name: &str) -> Result<InodeId, FsError> {
    let mut budget = SYMLINK_DEPTH_BUDGET;
    walk(store, start, name, true, &mut budget)
}

/// Like [`resolve`], but the terminal component is not dereferenced
/// (lstat-style). Interior symlinks are still followed.
pub fn resolve_nofollow(store: &InodeStore, start: InodeId, name: &str) -> Result<InodeId, FsError> {
    let mut budget = SYMLINK_DEPTH_BUDGET;
    walk(store, start, name, false, &mut budget)
}

fn walk(
    store: &InodeStore,
    dir: InodeId,
    name: &str,
    follow_terminal: bool,
    budget: &mut u32,
) -> Result<InodeId, FsError> {
    let (head, rest) = path::split_head(name);
    match head {
        "" => Err(FsError::NotFound),
        "/" => {
            if rest.is_empty() {
                Ok(ROOT_INO)
            } else {
                walk(store, ROOT_INO, rest, follow_terminal, budget)
            }
        }
        segment => {
            let mut found = store
                .get(dir)?
                .lookup(segment)
                .ok_or(FsError::NotFound)?;
            if store.get(found)?.is_symlink() && (!rest.is_empty() || follow_terminal) {
                found = follow_link(store, dir, found, budget)?;
            }
            if rest.is_empty() {
                Ok(found)
            } else {
                walk(store, found, rest, follow_terminal, budget)
            }
        }
    }
}

/// Dereferences one symlink, charging the budget. The target is interpreted
/// relative to `dir`, the directory containing the link, never the cwd; the
/// terminal of the target is itself followed so chains collapse fully.
fn follow_link(
    store: &InodeStore,
    dir: InodeId,
    link: InodeId,
    budget: &mut u32,
) -> Result<InodeId, FsError> {
    if *budget == 0 {
        return Err(FsError::TooManyLinks);
    }
    *budget -= 1;
    let target = store.symlink_target(link)?;
    walk(store, dir, target, true, budget)
}
