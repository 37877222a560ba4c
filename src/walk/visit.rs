use core::cell::Cell;
use std::os::unix::io::RawFd;

use crate::fs::{self, FileKind};
use crate::util::bytes;

/// Whether a directory is being entered or left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPhase {
    Pre,
    Post,
}

/// What the callback wants the walker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkVerdict {
    /// Proceed to the next sibling.
    Continue,
    /// Skip the remaining children of the current directory.
    SkipSiblings,
    /// Do not descend into this entry, keep visiting siblings.
    SkipSubtree,
    /// Terminate the walk cleanly.
    Stop,
}

type StatOutcome = core::result::Result<libc::stat, i32>;

/// The metadata record handed to the callback, one per visited path.
///
/// Everything expensive is lazy: the stat buffer is only filled when a
/// test or directive first asks for it, through the anchor descriptor and
/// relative suffix so the kernel never re-walks the whole path. The cached
/// result (success or errno) sticks for the lifetime of the visit.
#[derive(Debug)]
pub struct Visit<'w> {
    pub(crate) path: &'w [u8],
    pub(crate) root: &'w [u8],
    pub(crate) name_offset: usize,
    pub(crate) depth: usize,
    pub(crate) kind: Cell<FileKind>,
    pub(crate) stat: Cell<Option<StatOutcome>>,
    pub(crate) stat_reported: Cell<bool>,
    pub(crate) target: Cell<Option<core::result::Result<FileKind, i32>>>,
    pub(crate) anchor: RawFd,
    pub(crate) rel_offset: usize,
    pub(crate) follow: bool,
    pub(crate) phase: VisitPhase,
    pub(crate) errno: i32,
}

impl<'w> Visit<'w> {
    /// Full path, usable from the process working directory.
    #[must_use]
    #[inline]
    pub fn path(&self) -> &'w [u8] {
        self.path
    }

    /// The start path this entry was discovered under.
    #[must_use]
    #[inline]
    pub fn root(&self) -> &'w [u8] {
        self.root
    }

    /// Final path component, without trailing slashes.
    #[must_use]
    pub fn name(&self) -> &'w [u8] {
        bytes::basename(self.path)
    }

    #[must_use]
    #[inline]
    pub fn name_offset(&self) -> usize {
        self.name_offset
    }

    #[must_use]
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Current best knowledge of the file kind. Refined in place when a
    /// lazy stat lands.
    #[must_use]
    #[inline]
    pub fn kind(&self) -> FileKind {
        self.kind.get()
    }

    #[must_use]
    #[inline]
    pub fn phase(&self) -> VisitPhase {
        self.phase
    }

    /// Errno for records with `kind() == FileKind::Error`, else 0.
    #[must_use]
    #[inline]
    pub fn errno(&self) -> i32 {
        self.errno
    }

    /// Anchor for positional syscalls; `AT_FDCWD` when no ancestor
    /// descriptor is open.
    #[must_use]
    #[inline]
    pub fn anchor_fd(&self) -> RawFd {
        self.anchor
    }

    /// Path suffix resolving against [`anchor_fd`](Self::anchor_fd).
    #[must_use]
    #[inline]
    pub fn rel_path(&self) -> &'w [u8] {
        &self.path[self.rel_offset..]
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        let name = self.name();
        name.first() == Some(&b'.') && name != b"." && name != b".."
    }

    /// Stat this entry, honouring the walk's follow semantics.
    ///
    /// The first call performs the syscall and caches the outcome either
    /// way; the file kind is refined from the mode on success.
    pub fn stat(&self) -> core::result::Result<libc::stat, i32> {
        if let Some(cached) = self.stat.get() {
            return cached;
        }
        let outcome = if self.kind() == FileKind::Error {
            Err(self.errno)
        } else {
            match fs::stat_entry(self.anchor, self.rel_path(), self.follow) {
                Ok((st, _followed)) => {
                    self.kind.set(FileKind::from_mode(st.st_mode));
                    Ok(st)
                }
                Err(err) => Err(err.raw_os_error().unwrap_or(libc::EIO)),
            }
        };
        self.stat.set(Some(outcome));
        outcome
    }

    /// Kind refined through stat when the readdir result was unknown.
    #[must_use]
    pub fn kind_refined(&self) -> FileKind {
        if self.kind() == FileKind::Unknown {
            let _ = self.stat();
        }
        self.kind()
    }

    /// Kind seen with the opposite follow semantics, for `-xtype`/`%Y`.
    pub fn target_kind(&self) -> core::result::Result<FileKind, i32> {
        if let Some(cached) = self.target.get() {
            return cached;
        }
        let kind = self.kind_refined();
        let outcome = if !self.follow && kind != FileKind::Link && kind != FileKind::Error {
            // only links look different through the other lens
            Ok(kind)
        } else {
            match fs::stat_at(self.anchor, self.rel_path(), !self.follow) {
                Ok(st) => Ok(FileKind::from_mode(st.st_mode)),
                Err(err) => Err(err.raw_os_error().unwrap_or(libc::EIO)),
            }
        };
        self.target.set(Some(outcome));
        outcome
    }

    /// Symlink target, for `-lname` and `%l`.
    pub fn link_target(&self) -> std::io::Result<Vec<u8>> {
        fs::read_link_at(self.anchor, self.rel_path())
    }
}
