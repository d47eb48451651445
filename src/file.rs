//! File handles and the events a file can fire to its watchers.
//!
//! Grounded on `original_source/include/libupd.h`'s `upd_file_id_t`,
//! `UPD_FILE_INVALID`/`UPD_FILE_ROOT`, and `UPD_FILE_DELETE`/`UPD_FILE_UPDATE`.
//! `FileEvent::Async` has no counterpart in the header; it exists for
//! `drivers::glfw`'s worker-thread pattern, where a background thread needs
//! to wake the loop for a reason that is neither a delete nor an update.

use std::fmt;

/// Identifies a [`crate::iso::Iso`]-scoped file. `0` is the reserved root;
/// `u64::MAX` is the reserved invalid sentinel. Ids are handed out by a
/// monotonic counter and are never recycled within an `Iso`'s lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub(crate) u64);

impl FileId {
    /// The root file of an `Iso`, always `0`.
    pub const ROOT: FileId = FileId(0);
    /// The sentinel id meaning "no file".
    pub const INVALID: FileId = FileId(u64::MAX);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == FileId::INVALID {
            write!(f, "FileId(INVALID)")
        } else {
            write!(f, "FileId({})", self.0)
        }
    }
}

/// An event delivered to a file's watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// Delivered exactly once, during teardown, after `driver.deinit` returns
    /// and before the file's storage is released.
    Delete,
    /// Advisory: delivered synchronously from whatever driver code mutated
    /// the file.
    Update,
    /// May originate off the `Iso` thread via [`crate::iso::Iso::trigger_async`]
    /// and is coalesced onto the loop.
    Async,
}

/// Identifies one registered watch on a single file. Unique per file, not
/// globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchId(pub(crate) u64);

/// Identifies one queued or granted lock on a single file. Unique per file,
/// not globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockId(pub(crate) u64);
