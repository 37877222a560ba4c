use std::io;
use std::os::unix::io::RawFd;

use crate::fs::{AT_CWD, DirFd};

pub(crate) type EntryId = u32;

const NOT_IN_HEAP: usize = usize::MAX;

/// One tracked directory, alive from its discovery until the refcount
/// drops to zero during garbage collection.
///
/// Stored names carry a trailing slash so path concatenation never needs
/// separator logic. The parent link is a non-owning id; children own
/// nothing of their parents beyond the refcount they hold.
#[derive(Debug)]
struct CacheEntry {
    parent: Option<EntryId>,
    depth: usize,
    name: Vec<u8>,
    name_offset: usize,
    refs: u32,
    heap_index: usize,
    fd: Option<DirFd>,
    fingerprint: Option<(u64, u64)>,
}

/// Bounded pool of open directory descriptors.
///
/// Entries form an arena; the heap is array-backed and ordered by
/// `(depth desc, refs asc)`, so under descriptor pressure the deepest
/// directory with the fewest live descendants is closed first. Every open
/// entry records its heap slot for O(log n) reorder on refcount changes.
#[derive(Debug)]
pub(crate) struct DirCache {
    entries: Vec<CacheEntry>,
    free: Vec<EntryId>,
    heap: Vec<EntryId>,
    capacity: usize,
}

impl DirCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            heap: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Track a newly discovered directory under `parent`.
    pub(crate) fn add(
        &mut self,
        parent: Option<EntryId>,
        name: &[u8],
        depth: usize,
        name_offset: usize,
        fingerprint: Option<(u64, u64)>,
    ) -> EntryId {
        let mut stored = Vec::with_capacity(name.len() + 1);
        stored.extend_from_slice(name);
        if stored.last() != Some(&b'/') {
            stored.push(b'/');
        }
        let entry = CacheEntry {
            parent,
            depth,
            name: stored,
            name_offset,
            refs: 1,
            heap_index: NOT_IN_HEAP,
            fd: None,
            fingerprint,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = entry;
                id
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as EntryId
            }
        };
        if let Some(p) = parent {
            self.incref(p);
        }
        id
    }

    pub(crate) fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.entries[id as usize].parent
    }

    pub(crate) fn depth(&self, id: EntryId) -> usize {
        self.entries[id as usize].depth
    }

    pub(crate) fn name(&self, id: EntryId) -> &[u8] {
        &self.entries[id as usize].name
    }

    pub(crate) fn name_offset(&self, id: EntryId) -> usize {
        self.entries[id as usize].name_offset
    }

    pub(crate) fn refs(&self, id: EntryId) -> u32 {
        self.entries[id as usize].refs
    }

    pub(crate) fn fd_raw(&self, id: EntryId) -> Option<RawFd> {
        self.entries[id as usize].fd.as_ref().map(DirFd::raw)
    }

    pub(crate) fn open_count(&self) -> usize {
        self.heap.len()
    }

    /// True when `(dev, ino)` already occurs on the ancestor chain of
    /// `id`, inclusive. The loop detector.
    pub(crate) fn on_chain(&self, mut id: EntryId, dev: u64, ino: u64) -> bool {
        loop {
            if self.entries[id as usize].fingerprint == Some((dev, ino)) {
                return true;
            }
            match self.entries[id as usize].parent {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    pub(crate) fn incref(&mut self, id: EntryId) {
        self.entries[id as usize].refs += 1;
        let slot = self.entries[id as usize].heap_index;
        if slot != NOT_IN_HEAP {
            self.sift_down(slot);
        }
    }

    pub(crate) fn decref(&mut self, id: EntryId) {
        self.entries[id as usize].refs = self.entries[id as usize].refs.saturating_sub(1);
        let slot = self.entries[id as usize].heap_index;
        if slot != NOT_IN_HEAP {
            self.sift_up(slot);
        }
    }

    /// Nearest ancestor with an open descriptor, as `(anchor, offset)`
    /// where `offset` is where the relative suffix of the full path
    /// begins. Falls back to the working directory and the whole path.
    pub(crate) fn resolve(&self, id: EntryId) -> (RawFd, usize) {
        let mut cursor = self.entries[id as usize].parent;
        while let Some(ancestor) = cursor {
            let entry = &self.entries[ancestor as usize];
            if let Some(ref fd) = entry.fd {
                return (fd.raw(), entry.name_offset + entry.name.len());
            }
            cursor = entry.parent;
        }
        (AT_CWD, 0)
    }

    /// Open the directory for `id`, reusing a cached descriptor when one
    /// exists. `full_path` must be the entry's path (a trailing slash is
    /// fine); the open is relative to [`resolve`](Self::resolve).
    ///
    /// Descriptor exhaustion evicts one cached entry, shrinks the budget
    /// and retries once; other errors surface unchanged.
    pub(crate) fn open(&mut self, id: EntryId, full_path: &[u8]) -> io::Result<RawFd> {
        if let Some(fd) = self.fd_raw(id) {
            return Ok(fd);
        }
        if self.heap.len() >= self.capacity {
            self.evict(None);
        }
        let (anchor, offset) = self.resolve(id);
        let fd = match DirFd::open_at(anchor, &full_path[offset..]) {
            Ok(fd) => fd,
            Err(ref err)
                if err.raw_os_error() == Some(libc::EMFILE) && self.heap.len() >= 2 =>
            {
                self.evict(None);
                self.capacity = (self.capacity - 1).max(1);
                // the evicted entry may have been our anchor
                let (anchor, offset) = self.resolve(id);
                DirFd::open_at(anchor, &full_path[offset..])?
            }
            Err(err) => return Err(err),
        };
        let raw = fd.raw();
        self.entries[id as usize].fd = Some(fd);
        self.heap.push(id);
        let slot = self.heap.len() - 1;
        self.entries[id as usize].heap_index = slot;
        self.sift_up(slot);
        Ok(raw)
    }

    /// Open `id` and duplicate its descriptor for a readdir stream,
    /// evicting another entry and retrying once if the dup itself
    /// exhausts descriptors. Returns the cached anchor and the dup.
    pub(crate) fn open_stream(
        &mut self,
        id: EntryId,
        full_path: &[u8],
    ) -> io::Result<(RawFd, DirFd)> {
        let anchor = self.open(id, full_path)?;
        let dup = {
            let entry = &self.entries[id as usize];
            match entry.fd.as_ref() {
                Some(fd) => fd.duplicate(),
                None => return Err(io::Error::from_raw_os_error(libc::EBADF)),
            }
        };
        match dup {
            Ok(fd) => Ok((anchor, fd)),
            Err(ref err)
                if err.raw_os_error() == Some(libc::EMFILE) && self.heap.len() >= 2 =>
            {
                self.evict(Some(id));
                self.capacity = (self.capacity - 1).max(1);
                match self.entries[id as usize].fd.as_ref() {
                    Some(fd) => Ok((anchor, fd.duplicate()?)),
                    None => Err(io::Error::from_raw_os_error(libc::EBADF)),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Release a dead entry: close its descriptor, drop it from the heap
    /// and recycle the slot. The caller is responsible for the parent's
    /// refcount.
    pub(crate) fn release(&mut self, id: EntryId) {
        let slot = self.entries[id as usize].heap_index;
        if slot != NOT_IN_HEAP {
            self.heap_remove(slot);
        }
        let entry = &mut self.entries[id as usize];
        entry.fd = None;
        entry.parent = None;
        entry.fingerprint = None;
        entry.name.clear();
        entry.refs = 0;
        self.free.push(id);
    }

    /// Drop every entry and descriptor, for abort paths.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
        self.heap.clear();
    }

    /// Close the smallest entry under the heap order, skipping `keep`.
    fn evict(&mut self, keep: Option<EntryId>) {
        if self.heap.is_empty() {
            return;
        }
        let victim_slot = if keep == Some(self.heap[0]) {
            if self.heap.len() < 2 {
                return;
            }
            // smaller of the root's children
            if self.heap.len() > 2 && self.less(self.heap[2], self.heap[1]) {
                2
            } else {
                1
            }
        } else {
            0
        };
        let victim = self.heap[victim_slot];
        self.heap_remove(victim_slot);
        self.entries[victim as usize].fd = None;
    }

    fn heap_remove(&mut self, slot: usize) {
        let last = self.heap.len() - 1;
        self.heap_swap(slot, last);
        let removed = self.heap.pop().unwrap_or_default();
        self.entries[removed as usize].heap_index = NOT_IN_HEAP;
        if slot < self.heap.len() {
            self.sift_down(slot);
            self.sift_up(slot);
        }
    }

    fn less(&self, a: EntryId, b: EntryId) -> bool {
        let ea = &self.entries[a as usize];
        let eb = &self.entries[b as usize];
        ea.depth > eb.depth || (ea.depth == eb.depth && ea.refs < eb.refs)
    }

    fn heap_swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.entries[self.heap[a] as usize].heap_index = a;
        self.entries[self.heap[b] as usize].heap_index = b;
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.less(self.heap[slot], self.heap[parent]) {
                self.heap_swap(slot, parent);
                slot = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = slot * 2 + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let child = if right < self.heap.len() && self.less(self.heap[right], self.heap[left])
            {
                right
            } else {
                left
            };
            if self.less(self.heap[child], self.heap[slot]) {
                self.heap_swap(child, slot);
                slot = child;
            } else {
                break;
            }
        }
    }
}

/// Derive the descriptor budget from the process NOFILE limit.
///
/// `reserved` counts descriptors spoken for elsewhere: the standard
/// streams, output sinks, the readdir dup and the emptiness test's
/// headroom.
pub(crate) fn capacity_from_rlimit(reserved: usize) -> usize {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rl is a valid out pointer
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
    let limit = if rc == 0 { rl.rlim_cur as usize } else { 256 };
    limit.saturating_sub(reserved).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(name: &str, subs: &[&str]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        for sub in subs {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        dir
    }

    #[test]
    fn resolve_walks_to_nearest_open_ancestor() {
        let dir = tree("bfind_cache_resolve", &["b/c"]);
        let root_path = dir.as_os_str().as_encoded_bytes().to_vec();
        let mut cache = DirCache::new(8);
        let root = cache.add(None, &root_path, 0, 0, None);

        // nothing open yet: anchor is the cwd and the suffix is everything
        assert_eq!(cache.resolve(root), (AT_CWD, 0));

        let mut path = root_path.clone();
        path.push(b'/');
        let root_fd = cache.open(root, &path).unwrap();

        let b = cache.add(Some(root), b"b", 1, path.len(), None);
        let (anchor, offset) = cache.resolve(b);
        assert_eq!(anchor, root_fd);
        assert_eq!(offset, path.len());
        assert_eq!(cache.refs(root), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn capacity_bound_holds_under_pressure() {
        let dir = tree("bfind_cache_pressure", &["s0", "s1", "s2", "s3"]);
        let root_path = dir.as_os_str().as_encoded_bytes().to_vec();
        let mut cache = DirCache::new(2);
        let root = cache.add(None, &root_path, 0, 0, None);
        let mut root_slash = root_path.clone();
        root_slash.push(b'/');
        cache.open(root, &root_slash).unwrap();

        for i in 0..4 {
            let name = format!("s{i}");
            let id = cache.add(Some(root), name.as_bytes(), 1, root_slash.len(), None);
            let mut path = root_slash.clone();
            path.extend_from_slice(name.as_bytes());
            path.push(b'/');
            cache.open(id, &path).unwrap();
            assert!(cache.open_count() <= 2);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn deepest_least_referenced_evicted_first() {
        let dir = tree("bfind_cache_order", &["a/deep"]);
        let root_path = dir.as_os_str().as_encoded_bytes().to_vec();
        let mut cache = DirCache::new(2);
        let root = cache.add(None, &root_path, 0, 0, None);
        let mut root_slash = root_path.clone();
        root_slash.push(b'/');
        cache.open(root, &root_slash).unwrap();

        let a = cache.add(Some(root), b"a", 1, root_slash.len(), None);
        let mut a_path = root_slash.clone();
        a_path.extend_from_slice(b"a/");
        cache.open(a, &a_path).unwrap();

        // the deeper entry (a) sits at the heap root
        let deep = cache.add(Some(a), b"deep", 2, a_path.len(), None);
        let mut deep_path = a_path.clone();
        deep_path.extend_from_slice(b"deep/");
        cache.open(deep, &deep_path).unwrap();

        assert_eq!(cache.open_count(), 2);
        // "a" was evicted, so deep resolves relative to the root now
        assert!(cache.fd_raw(a).is_none());
        assert!(cache.fd_raw(root).is_some());
        assert!(cache.fd_raw(deep).is_some());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn release_recycles_slots() {
        let mut cache = DirCache::new(4);
        let root = cache.add(None, b"r", 0, 0, None);
        let child = cache.add(Some(root), b"c", 1, 2, None);
        assert_eq!(cache.refs(root), 2);
        cache.decref(child);
        cache.release(child);
        cache.decref(root);
        let reused = cache.add(None, b"again", 0, 0, None);
        assert_eq!(reused, child);
    }
}
