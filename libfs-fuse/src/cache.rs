//! Identity Cache — the in-memory map between kernel inode numbers and
//! virtual paths, open file descriptors, and FUSE lookup refcounts.
//!
//! Grounded on `Libfs/cache.py`'s `Memcache`. Everything lives behind one
//! mutex: every upcall that touches the cache does so briefly and
//! synchronously, matching the single-worker assumption the original makes
//! by running `llfuse.main(workers=1)`.

use std::collections::HashMap;
use std::fs::File;
use std::sync::Mutex;

use libfs_storage::view::filename_has_duplicate_counter;

pub const ROOT_INODE: u64 = 1;

#[derive(Default)]
struct State {
    inode2vpath: HashMap<u64, String>,
    lookup_cnt: HashMap<u64, u64>,
    inode2fd: HashMap<u64, u64>,
    fd2inode: HashMap<u64, u64>,
    fd_open_count: HashMap<u64, u64>,
    open_files: HashMap<u64, File>,
    next_fh: u64,
    leaf_hints: HashMap<(u64, String), String>,
}

impl State {
    fn new() -> Self {
        let mut inode2vpath = HashMap::new();
        inode2vpath.insert(ROOT_INODE, "/".to_string());
        Self {
            inode2vpath,
            lookup_cnt: HashMap::new(),
            inode2fd: HashMap::new(),
            fd2inode: HashMap::new(),
            fd_open_count: HashMap::new(),
            open_files: HashMap::new(),
            next_fh: 1,
            leaf_hints: HashMap::new(),
        }
    }
}

/// Matches `path` against `prefix` at a path-segment boundary: `path` must
/// equal `prefix` exactly or continue with `/`. Returns the remainder
/// (possibly empty) past `prefix`.
fn segment_prefix_rest<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

pub struct Cache {
    state: Mutex<State>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    pub fn path_by_inode(&self, inode: u64) -> Option<String> {
        self.state.lock().unwrap().inode2vpath.get(&inode).cloned()
    }

    pub fn fd_by_inode(&self, inode: u64) -> Option<u64> {
        self.state.lock().unwrap().inode2fd.get(&inode).copied()
    }

    /// `add_inode_path_pair` — records a freshly looked-up `(inode, path)`
    /// pair, bumping the lookup refcount. If `path` is already cached under
    /// a different inode the call is a no-op (an artifact of readdir
    /// re-listing an already-known entry); if `inode` is already cached
    /// under a *different* path, the existing mapping is only overwritten
    /// when that existing path carries a duplicate-disambiguation suffix —
    /// the corner case where two files shared metadata, the second got
    /// " (libfs:N)" appended, and the first's metadata then changed so the
    /// counter moved to what is now `path`.
    pub fn add_inode_path_pair(&self, inode: u64, path: &str) {
        let mut state = self.state.lock().unwrap();
        *state.lookup_cnt.entry(inode).or_insert(0) += 1;

        if state.inode2vpath.values().any(|p| p == path) {
            return;
        }

        match state.inode2vpath.get(&inode).cloned() {
            None => {
                state.inode2vpath.insert(inode, path.to_string());
            }
            Some(existing) if existing != path => {
                if filename_has_duplicate_counter(&existing) {
                    state.inode2vpath.insert(inode, path.to_string());
                }
            }
            Some(_) => {}
        }
    }

    /// `update_inode_path_pair` — unconditionally retargets an already
    /// cached inode, used by rename once a file's new path is known.
    pub fn update_inode_path_pair(&self, inode: u64, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.inode2vpath.insert(inode, path.to_string());
    }

    /// `forget` — FUSE's lookup-count reconciliation. Returns `true` if the
    /// inode was actually evicted (nlookup reached zero).
    pub fn forget(&self, inode: u64, nlookup: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let current = state.lookup_cnt.get(&inode).copied().unwrap_or(0);
        if current > nlookup {
            state.lookup_cnt.insert(inode, current - nlookup);
            return false;
        }
        state.lookup_cnt.remove(&inode);
        state.inode2vpath.remove(&inode);
        true
    }

    /// `forget_path` — used by rmdir to drop a directory's cache entry
    /// immediately rather than waiting on the kernel's `forget`.
    pub fn forget_path(&self, inode: u64) {
        let mut state = self.state.lock().unwrap();
        state.lookup_cnt.remove(&inode);
        state.inode2vpath.remove(&inode);
    }

    /// `(parent_inode, leaf_name) → src_path` — populated as a side effect
    /// of `readdir`, consulted by `lookup` so a repeated lookup of an
    /// already-listed leaf doesn't force a fresh directory enumeration.
    pub fn leaf_hint(&self, parent: u64, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .leaf_hints
            .get(&(parent, name.to_string()))
            .cloned()
    }

    pub fn set_leaf_hint(&self, parent: u64, name: &str, src_path: &str) {
        self.state
            .lock()
            .unwrap()
            .leaf_hints
            .insert((parent, name.to_string()), src_path.to_string());
    }

    /// Drops every hint for `parent` — used when a directory is renamed or
    /// removed and its prior listing is no longer trustworthy.
    pub fn clear_leaf_hints(&self, parent: u64) {
        self.state
            .lock()
            .unwrap()
            .leaf_hints
            .retain(|(p, _), _| *p != parent);
    }

    /// Drops a single stale hint, used once a leaf rename rebinds it under
    /// its new (parent, name) pair.
    pub fn remove_leaf_hint(&self, parent: u64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .leaf_hints
            .remove(&(parent, name.to_string()));
    }

    /// `update_maps` — after a directory rename, every cached vpath that
    /// begins with `old_path` (as a whole path segment, not merely a string
    /// prefix — `/Rock/Artist A` must not also rewrite a sibling
    /// `/Rock/Artist AB`) is rewritten with `new_path` as its prefix.
    pub fn update_maps(&self, old_path: &str, new_path: &str) {
        let mut state = self.state.lock().unwrap();
        for path in state.inode2vpath.values_mut() {
            if let Some(rest) = segment_prefix_rest(path, old_path) {
                *path = format!("{new_path}{rest}");
            }
        }
    }

    /// Looks up an already-open fd for `inode`, bumping its open count, or
    /// registers a newly opened file and returns its freshly allocated fd.
    pub fn open_existing(&self, inode: u64) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        let fd = *state.inode2fd.get(&inode)?;
        *state.fd_open_count.entry(fd).or_insert(0) += 1;
        Some(fd)
    }

    pub fn register_open(&self, inode: u64, file: File) -> u64 {
        let mut state = self.state.lock().unwrap();
        let fd = state.next_fh;
        state.next_fh += 1;
        state.inode2fd.insert(inode, fd);
        state.fd2inode.insert(fd, inode);
        state.fd_open_count.insert(fd, 1);
        state.open_files.insert(fd, file);
        fd
    }

    pub fn with_open_file<R>(&self, fd: u64, f: impl FnOnce(&mut File) -> R) -> Option<R> {
        let mut state = self.state.lock().unwrap();
        state.open_files.get_mut(&fd).map(f)
    }

    /// `release` — decrements the fd's open count, tearing everything down
    /// and closing the file once it reaches zero. Returns `true` once the
    /// underlying fd is actually closed.
    pub fn release(&self, fd: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        let count = state.fd_open_count.get(&fd).copied().unwrap_or(0);
        if count > 1 {
            state.fd_open_count.insert(fd, count - 1);
            return false;
        }
        state.fd_open_count.remove(&fd);
        if let Some(inode) = state.fd2inode.remove(&fd) {
            state.inode2fd.remove(&inode);
        }
        state.open_files.remove(&fd);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_inode_starts_seeded() {
        let cache = Cache::new();
        assert_eq!(cache.path_by_inode(ROOT_INODE).as_deref(), Some("/"));
    }

    #[test]
    fn add_inode_path_pair_is_idempotent_for_same_path() {
        let cache = Cache::new();
        cache.add_inode_path_pair(5, "/Rock");
        cache.add_inode_path_pair(5, "/Rock");
        assert_eq!(cache.path_by_inode(5).as_deref(), Some("/Rock"));
    }

    #[test]
    fn add_inode_path_pair_retargets_duplicate_suffixed_entry() {
        let cache = Cache::new();
        cache.add_inode_path_pair(7, "/Rock/Track.mp3 (libfs:1)");
        cache.add_inode_path_pair(7, "/Rock/Track.mp3 (libfs:2)");
        assert_eq!(
            cache.path_by_inode(7).as_deref(),
            Some("/Rock/Track.mp3 (libfs:2)")
        );
    }

    #[test]
    fn add_inode_path_pair_keeps_plain_entry_when_path_changes() {
        let cache = Cache::new();
        cache.add_inode_path_pair(7, "/Rock/Track.mp3");
        cache.add_inode_path_pair(7, "/Jazz/Track.mp3");
        assert_eq!(cache.path_by_inode(7).as_deref(), Some("/Rock/Track.mp3"));
    }

    #[test]
    fn forget_evicts_only_at_zero_refcount() {
        let cache = Cache::new();
        cache.add_inode_path_pair(9, "/Rock");
        cache.add_inode_path_pair(9, "/Rock");
        assert!(!cache.forget(9, 1));
        assert_eq!(cache.path_by_inode(9).as_deref(), Some("/Rock"));
        assert!(cache.forget(9, 1));
        assert_eq!(cache.path_by_inode(9), None);
    }

    #[test]
    fn update_maps_rewrites_prefixed_paths() {
        let cache = Cache::new();
        cache.add_inode_path_pair(3, "/Rock/Artist A");
        cache.add_inode_path_pair(4, "/Rock/Artist A/Track.mp3");
        cache.update_maps("/Rock/Artist A", "/Rock/Artist B");
        assert_eq!(cache.path_by_inode(3).as_deref(), Some("/Rock/Artist B"));
        assert_eq!(
            cache.path_by_inode(4).as_deref(),
            Some("/Rock/Artist B/Track.mp3")
        );
    }

    #[test]
    fn update_maps_does_not_rewrite_sibling_with_shared_prefix() {
        let cache = Cache::new();
        cache.add_inode_path_pair(3, "/Rock/Artist A");
        cache.add_inode_path_pair(5, "/Rock/Artist AB/Track.mp3");
        cache.update_maps("/Rock/Artist A", "/Rock/Artist Z");
        assert_eq!(cache.path_by_inode(3).as_deref(), Some("/Rock/Artist Z"));
        assert_eq!(
            cache.path_by_inode(5).as_deref(),
            Some("/Rock/Artist AB/Track.mp3")
        );
    }

    #[test]
    fn leaf_hint_round_trips_and_clears_per_parent() {
        let cache = Cache::new();
        cache.set_leaf_hint(3, "Track.mp3", "/music/track.mp3");
        assert_eq!(
            cache.leaf_hint(3, "Track.mp3").as_deref(),
            Some("/music/track.mp3")
        );
        cache.clear_leaf_hints(3);
        assert_eq!(cache.leaf_hint(3, "Track.mp3"), None);
    }

    #[test]
    fn release_closes_only_at_zero_open_count() {
        let cache = Cache::new();
        let file = File::open("/dev/null").unwrap();
        let fd = cache.register_open(11, file);
        cache.open_existing(11);
        assert!(!cache.release(fd));
        assert!(cache.release(fd));
    }
}
