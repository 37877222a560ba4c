use core::cell::Cell;

use crate::error::{Result, WalkError};
use crate::fs::{self, AT_CWD, DirStream, FileKind};
use crate::util::bytes;
use crate::walk::cache::{DirCache, EntryId, capacity_from_rlimit};
use crate::walk::frontier::Frontier;
use crate::walk::visit::{Visit, VisitPhase, WalkVerdict};

/// Symlink resolution policy for a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    /// Never resolve (`-P`, the default).
    Never,
    /// Resolve for the start paths only (`-H`).
    Roots,
    /// Resolve everywhere (`-L`).
    Always,
}

/// Descriptors the walker assumes are spoken for besides its own cache:
/// the three standard streams, the readdir dup, the emptiness test's
/// spare, and one for luck.
const RESERVED_FDS: usize = 6;

/// Configuration for a [`Walker`].
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub(crate) follow: Follow,
    pub(crate) same_device: bool,
    pub(crate) detect_cycles: bool,
    pub(crate) post_order: bool,
    pub(crate) ignore_races: bool,
    pub(crate) always_stat: bool,
    pub(crate) recover: bool,
    pub(crate) capacity: Option<usize>,
}

impl WalkOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            follow: Follow::Never,
            same_device: false,
            detect_cycles: false,
            post_order: false,
            ignore_races: false,
            always_stat: false,
            recover: true,
            capacity: None,
        }
    }

    /// Symlink policy; `Follow::Always` also turns on cycle detection,
    /// since a followed link can reach its own ancestors.
    #[must_use]
    pub fn follow(mut self, follow: Follow) -> Self {
        self.follow = follow;
        if follow == Follow::Always {
            self.detect_cycles = true;
        }
        self
    }

    /// Do not descend across device boundaries.
    #[must_use]
    pub const fn same_device(mut self, yes: bool) -> Self {
        self.same_device = yes;
        self
    }

    #[must_use]
    pub const fn detect_cycles(mut self, yes: bool) -> Self {
        self.detect_cycles = yes;
        self
    }

    /// Deliver post-order visits for directories.
    #[must_use]
    pub const fn post_order(mut self, yes: bool) -> Self {
        self.post_order = yes;
        self
    }

    /// Tolerate entries disappearing mid-walk below the roots.
    #[must_use]
    pub const fn ignore_races(mut self, yes: bool) -> Self {
        self.ignore_races = yes;
        self
    }

    /// Stat every entry up front instead of on demand.
    #[must_use]
    pub const fn always_stat(mut self, yes: bool) -> Self {
        self.always_stat = yes;
        self
    }

    /// Report per-directory errors through the callback and carry on;
    /// turning this off makes the first error abort the walk.
    #[must_use]
    pub const fn recover(mut self, yes: bool) -> Self {
        self.recover = yes;
        self
    }

    /// Cap on cached directory descriptors. Derived from `RLIMIT_NOFILE`
    /// when unset.
    #[must_use]
    pub const fn capacity(mut self, slots: usize) -> Self {
        self.capacity = Some(slots);
        self
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor budget for a walk whose caller holds `extra_reserved`
/// descriptors of its own (output sinks, mostly).
#[must_use]
pub fn suggested_capacity(extra_reserved: usize) -> usize {
    capacity_from_rlimit(RESERVED_FDS + extra_reserved)
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every reachable entry was visited.
    Done,
    /// The callback asked to stop.
    Stopped,
}

enum Flow {
    Next(Option<EntryId>),
    Stop,
}

/// The breadth-first traversal engine.
///
/// Directories are expanded strictly level by level: every entry at depth
/// d is delivered before any entry at depth d+1, children arrive in
/// readdir order, and (when enabled) a directory's post-order visit fires
/// only after all of its descendants. One instance can walk several roots
/// in sequence; state resets per root.
#[derive(Debug)]
pub struct Walker {
    opts: WalkOptions,
    cache: DirCache,
    frontier: Frontier,
    path: Vec<u8>,
    root: Vec<u8>,
    root_dev: Option<u64>,
    chain: Vec<EntryId>,
}

impl Walker {
    #[must_use]
    pub fn new(opts: WalkOptions) -> Self {
        let capacity = opts
            .capacity
            .unwrap_or_else(|| capacity_from_rlimit(RESERVED_FDS));
        Self {
            opts,
            cache: DirCache::new(capacity),
            frontier: Frontier::new(),
            path: Vec::with_capacity(256),
            root: Vec::new(),
            root_dev: None,
            chain: Vec::new(),
        }
    }

    /// Walk one root, invoking `cb` per visit.
    ///
    /// In recovery mode all per-entry errors are routed through the
    /// callback as error records and the result is `Ok`; otherwise the
    /// first error aborts with its path and errno preserved.
    pub fn walk(
        &mut self,
        root: &[u8],
        cb: &mut dyn FnMut(&Visit<'_>) -> WalkVerdict,
    ) -> Result<WalkOutcome> {
        self.reset(root);

        let follow_root = self.opts.follow != Follow::Never;
        let (kind, stat_outcome, errno, fingerprint) =
            match fs::stat_entry(AT_CWD, root, follow_root) {
                Ok((st, _)) => (
                    FileKind::from_mode(st.st_mode),
                    Ok(st),
                    0,
                    Some((st.st_dev, st.st_ino)),
                ),
                Err(err) => {
                    let code = err.raw_os_error().unwrap_or(libc::EIO);
                    if !self.opts.recover {
                        return Err(WalkError::new(root, code));
                    }
                    (FileKind::Error, Err(code), code, None)
                }
            };
        self.root_dev = fingerprint.map(|(dev, _)| dev);

        let visit = Visit {
            path: &self.path,
            root: &self.root,
            name_offset: bytes::basename_offset(root),
            depth: 0,
            kind: Cell::new(kind),
            stat: Cell::new(Some(stat_outcome)),
            stat_reported: Cell::new(false),
            target: Cell::new(None),
            anchor: AT_CWD,
            rel_offset: 0,
            follow: follow_root,
            phase: VisitPhase::Pre,
            errno,
        };
        let verdict = cb(&visit);
        drop(visit);

        match verdict {
            WalkVerdict::Stop => return Ok(WalkOutcome::Stopped),
            WalkVerdict::Continue => {}
            WalkVerdict::SkipSiblings | WalkVerdict::SkipSubtree => return Ok(WalkOutcome::Done),
        }
        if kind != FileKind::Dir {
            return Ok(WalkOutcome::Done);
        }

        let root_id = self.cache.add(None, root, 0, 0, fingerprint);
        let mut current = Some(root_id);
        while let Some(cur) = current {
            match self.expand(cur, cb) {
                Ok(Flow::Next(next)) => current = next,
                Ok(Flow::Stop) => {
                    self.abandon();
                    return Ok(WalkOutcome::Stopped);
                }
                Err(err) => {
                    self.abandon();
                    return Err(err);
                }
            }
        }
        Ok(WalkOutcome::Done)
    }

    /// Expand one directory: visit its children, enqueue subdirectories,
    /// then pop the next frontier entry while collecting the old chain.
    fn expand(
        &mut self,
        cur: EntryId,
        cb: &mut dyn FnMut(&Visit<'_>) -> WalkVerdict,
    ) -> Result<Flow> {
        self.rebuild_path(cur);
        let dir_len = self.path.len();
        let cur_depth = self.cache.depth(cur);
        let follow_children = self.opts.follow == Follow::Always;

        let (anchor, stream_fd) = match self.cache.open_stream(cur, &self.path) {
            Ok(pair) => pair,
            Err(err) => {
                let code = err.raw_os_error().unwrap_or(libc::EIO);
                match self.dir_error(cur, code, cb)? {
                    WalkVerdict::Stop => return Ok(Flow::Stop),
                    _ => return self.advance(cur, cb),
                }
            }
        };
        let mut stream = DirStream::new(stream_fd);

        loop {
            let entry = match stream.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    let code = err.raw_os_error().unwrap_or(libc::EIO);
                    self.path.truncate(dir_len);
                    if self.dir_error(cur, code, cb)? == WalkVerdict::Stop {
                        return Ok(Flow::Stop);
                    }
                    break;
                }
            };
            let mut kind = entry.kind;
            let name_len = entry.name.len();
            self.path.truncate(dir_len);
            self.path.extend_from_slice(entry.name);
            let child_depth = cur_depth + 1;

            let mut stat_outcome = None;
            let mut errno = 0;
            let mut fingerprint = None;
            let wants_stat = self.opts.always_stat
                || kind == FileKind::Unknown
                || (kind == FileKind::Link && follow_children)
                || (kind == FileKind::Dir
                    && (self.opts.same_device || self.opts.detect_cycles));
            if wants_stat {
                match fs::stat_entry(anchor, &self.path[dir_len..], follow_children) {
                    Ok((st, _)) => {
                        kind = FileKind::from_mode(st.st_mode);
                        fingerprint = Some((st.st_dev, st.st_ino));
                        stat_outcome = Some(Ok(st));
                    }
                    Err(err) => {
                        let code = err.raw_os_error().unwrap_or(libc::EIO);
                        if code == libc::ENOENT && self.opts.ignore_races {
                            // the entry raced away between readdir and stat
                            continue;
                        }
                        kind = FileKind::Error;
                        errno = code;
                        stat_outcome = Some(Err(code));
                    }
                }
            }
            if kind == FileKind::Dir
                && self.opts.detect_cycles
                && let Some((dev, ino)) = fingerprint
                && self.cache.on_chain(cur, dev, ino)
            {
                kind = FileKind::Error;
                errno = libc::ELOOP;
            }

            let visit = Visit {
                path: &self.path,
                root: &self.root,
                name_offset: dir_len,
                depth: child_depth,
                kind: Cell::new(kind),
                stat: Cell::new(stat_outcome),
                stat_reported: Cell::new(false),
                target: Cell::new(None),
                anchor,
                rel_offset: dir_len,
                follow: follow_children,
                phase: VisitPhase::Pre,
                errno,
            };
            let verdict = cb(&visit);
            let kind = visit.kind.get();
            let refined = visit.stat.get();
            drop(visit);

            match verdict {
                WalkVerdict::Stop => return Ok(Flow::Stop),
                WalkVerdict::SkipSiblings => break,
                WalkVerdict::SkipSubtree => continue,
                WalkVerdict::Continue => {}
            }
            if kind != FileKind::Dir {
                continue;
            }
            let fingerprint = fingerprint.or_else(|| {
                refined
                    .and_then(core::result::Result::ok)
                    .map(|st| (st.st_dev, st.st_ino))
            });
            if self.opts.same_device
                && let Some((dev, _)) = fingerprint
                && Some(dev) != self.root_dev
            {
                continue;
            }
            let name_start = self.path.len() - name_len;
            let name = self.path[name_start..].to_vec();
            let id = self
                .cache
                .add(Some(cur), &name, child_depth, dir_len, fingerprint);
            self.frontier.push(id);
        }
        drop(stream);
        self.path.truncate(dir_len);
        self.advance(cur, cb)
    }

    /// Pop the next frontier entry and garbage-collect the finished
    /// chain, firing post-order visits as refcounts hit zero. This is
    /// the only place post-order callbacks happen.
    fn advance(
        &mut self,
        prev: EntryId,
        cb: &mut dyn FnMut(&Visit<'_>) -> WalkVerdict,
    ) -> Result<Flow> {
        let next = self.frontier.pop();
        let mut cursor = Some(prev);
        while let Some(id) = cursor {
            self.cache.decref(id);
            if self.cache.refs(id) > 0 {
                break;
            }
            if self.opts.post_order {
                self.rebuild_path(id);
                let display = self.display_len(id);
                let (anchor, rel_offset) = self.cache.resolve(id);
                let visit = Visit {
                    path: &self.path[..display],
                    root: &self.root,
                    name_offset: self.cache.name_offset(id),
                    depth: self.cache.depth(id),
                    kind: Cell::new(FileKind::Dir),
                    stat: Cell::new(None),
                    stat_reported: Cell::new(false),
                    target: Cell::new(None),
                    anchor,
                    rel_offset,
                    follow: self.opts.follow == Follow::Always,
                    phase: VisitPhase::Post,
                    errno: 0,
                };
                let verdict = cb(&visit);
                drop(visit);
                if verdict == WalkVerdict::Stop {
                    return Ok(Flow::Stop);
                }
            }
            let parent = self.cache.parent(id);
            self.cache.release(id);
            cursor = parent;
        }
        Ok(Flow::Next(next))
    }

    /// Report a directory that could not be opened or read. Suppressed
    /// entirely for races below the roots when asked; fatal when
    /// recovery is off.
    fn dir_error(
        &mut self,
        cur: EntryId,
        errno: i32,
        cb: &mut dyn FnMut(&Visit<'_>) -> WalkVerdict,
    ) -> Result<WalkVerdict> {
        let display = self.display_len(cur);
        if errno == libc::ENOENT && self.opts.ignore_races && self.cache.depth(cur) > 0 {
            return Ok(WalkVerdict::Continue);
        }
        if !self.opts.recover {
            return Err(WalkError::new(&self.path[..display], errno));
        }
        let (anchor, rel_offset) = self.cache.resolve(cur);
        let visit = Visit {
            path: &self.path[..display],
            root: &self.root,
            name_offset: self.cache.name_offset(cur),
            depth: self.cache.depth(cur),
            kind: Cell::new(FileKind::Error),
            stat: Cell::new(Some(Err(errno))),
            stat_reported: Cell::new(false),
            target: Cell::new(None),
            anchor,
            rel_offset,
            follow: self.opts.follow == Follow::Always,
            phase: VisitPhase::Pre,
            errno,
        };
        Ok(cb(&visit))
    }

    fn reset(&mut self, root: &[u8]) {
        self.root.clear();
        self.root.extend_from_slice(root);
        self.path.clear();
        self.path.extend_from_slice(root);
        self.root_dev = None;
        self.frontier.clear();
        let capacity = self
            .opts
            .capacity
            .unwrap_or_else(|| capacity_from_rlimit(RESERVED_FDS));
        self.cache = DirCache::new(capacity);
    }

    fn abandon(&mut self) {
        self.cache.clear();
        self.frontier.clear();
    }

    /// Recreate the path buffer for `id` by concatenating the ancestor
    /// chain's stored names; each carries its own trailing slash.
    fn rebuild_path(&mut self, id: EntryId) {
        self.chain.clear();
        let mut cursor = Some(id);
        while let Some(entry) = cursor {
            self.chain.push(entry);
            cursor = self.cache.parent(entry);
        }
        self.path.clear();
        for index in (0..self.chain.len()).rev() {
            let entry = self.chain[index];
            debug_assert_eq!(self.path.len(), self.cache.name_offset(entry));
            self.path.extend_from_slice(self.cache.name(entry));
        }
    }

    /// Length of the display path for a directory entry: its stored name
    /// ends with a slash the original spelling may not have had.
    fn display_len(&self, id: EntryId) -> usize {
        if self.cache.depth(id) == 0 {
            self.root.len()
        } else {
            self.cache.name_offset(id) + self.cache.name(id).len() - 1
        }
    }
}
