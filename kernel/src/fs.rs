//! File-layer boundary.
//!
//! The open-file table and on-disk structures belong to the file layer. The
//! process core only duplicates references on fork, closes them on exit and
//! brackets directory release in a log transaction.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

/// An open-file object owned by the file layer.
#[derive(Debug)]
pub struct File {
    /// Identifier assigned by the file layer.
    pub id: usize,
}

/// Shared, ref-counted handle to an open file.
pub type FileRef = Arc<File>;

/// An in-core directory reference (a process's working directory).
#[derive(Debug)]
pub struct Dir {
    /// Identifier assigned by the file layer.
    pub id: usize,
}

/// Shared, ref-counted directory handle.
pub type DirRef = Arc<Dir>;

/// Duplicate an open-file reference (fork path).
pub fn file_dup(f: &FileRef) -> FileRef {
    Arc::clone(f)
}

/// Drop an open-file reference (exit path).
pub fn file_close(f: FileRef) {
    drop(f);
}

/// Duplicate a directory reference (fork path).
pub fn dir_dup(d: &DirRef) -> DirRef {
    Arc::clone(d)
}

/// Release a directory reference. Must run inside a `begin_op`/`end_op`
/// bracket.
pub fn dir_put(d: DirRef) {
    drop(d);
}

/// The root directory.
pub fn root_dir() -> DirRef {
    Arc::new(Dir { id: 0 })
}

/// Outstanding log-transaction nesting.
static FS_TRANSACTIONS: AtomicUsize = AtomicUsize::new(0);

/// Open a file-system log transaction.
pub fn begin_op() {
    FS_TRANSACTIONS.fetch_add(1, Ordering::SeqCst);
}

/// Close the innermost file-system log transaction.
pub fn end_op() {
    let prev = FS_TRANSACTIONS.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "end_op without begin_op");
}

/// Current log-transaction nesting depth.
pub fn transaction_depth() -> usize {
    FS_TRANSACTIONS.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_dup_shares_the_object() {
        let f: FileRef = Arc::new(File { id: 7 });
        let d = file_dup(&f);
        assert_eq!(Arc::strong_count(&f), 2);
        assert_eq!(d.id, 7);
        file_close(d);
        assert_eq!(Arc::strong_count(&f), 1);
    }

    #[test]
    fn test_transaction_bracket() {
        begin_op();
        let inner = transaction_depth();
        assert!(inner >= 1);
        end_op();
    }
}
