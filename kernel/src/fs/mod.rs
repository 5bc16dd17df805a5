//! Filesystem collaborator contracts
//!
//! The buffer cache, inode cache and on-disk filesystem are external
//! collaborators. The core only needs the reference-counted handle types a
//! task descriptor carries: `fork` bumps the counts of inherited open files
//! and of the working-directory and root inodes, and `exit` drops them.

use core::ptr::NonNull;

/// Open files per task. The close-on-exec flags live in one 32-bit word,
/// which bounds this at 32; the original table stops at 20.
pub const NR_OPEN: usize = 20;

/// An open-file description shared between tasks that inherited the same fd.
#[derive(Debug)]
pub struct File {
    /// Number of fd-table slots referencing this description.
    pub count: u32,
    /// File mode bits, owned by the filesystem collaborator.
    pub mode: u16,
    /// Current position, owned by the filesystem collaborator.
    pub pos: u64,
}

/// An in-core inode handle.
#[derive(Debug)]
pub struct Inode {
    /// Number of live references (fd tables, pwd/root pointers).
    pub count: u32,
    /// Device/inode identity, owned by the filesystem collaborator.
    pub num: u32,
}

/// Raw handle to a shared open-file description.
pub type FileRef = NonNull<File>;

/// Raw handle to a shared in-core inode.
pub type InodeRef = NonNull<Inode>;

/// Bump the share count of an open file.
///
/// # Safety
/// `f` must point to a live `File` owned by the filesystem collaborator,
/// and the caller must hold the single-CPU interrupt discipline.
pub unsafe fn file_get(mut f: FileRef) {
    unsafe { f.as_mut().count += 1 };
}

/// Drop one share of an open file.
///
/// # Safety
/// Same requirements as [`file_get`]; the count must be non-zero.
pub unsafe fn file_put(mut f: FileRef) {
    unsafe { f.as_mut().count -= 1 };
}

/// Bump the reference count of an inode handle.
///
/// # Safety
/// `i` must point to a live `Inode` owned by the filesystem collaborator.
pub unsafe fn inode_get(mut i: InodeRef) {
    unsafe { i.as_mut().count += 1 };
}

/// Drop one reference to an inode handle.
///
/// # Safety
/// Same requirements as [`inode_get`]; the count must be non-zero.
pub unsafe fn inode_put(mut i: InodeRef) {
    unsafe { i.as_mut().count -= 1 };
}

/// Initialize the buffer cache. Called once at boot. Contract-only stub.
pub fn buffer_init() {
    log::info!("fs: buffer cache init deferred to filesystem collaborator");
}
