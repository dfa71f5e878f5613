//! Page replacement policies for the buffer pool.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use opal_common::page::FrameId;

/// Trait for page replacement algorithms.
///
/// The pool notifies the replacer when a frame goes into use (`pin`) and
/// when its last holder returns it (`unpin`); `victim` picks the frame to
/// reclaim when the pool is full.
pub trait Replacer: Send + Sync {
    /// Marks a frame as in use: it must not be chosen as a victim.
    fn pin(&self, frame_id: FrameId);

    /// Marks a frame as returned: it becomes evictable and its access
    /// history advances.
    fn unpin(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction, or None if no frame is
    /// evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer entirely.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of frames tracked in the replacement lists.
    fn size(&self) -> usize;
}

/// LRU-K replacement policy.
///
/// Frames with fewer than `k` returns sit in a history queue; on the
/// k-th return a frame is promoted into the main cache list, which is
/// kept most-recently-used-first. Victims are taken from the history
/// queue first (infrequently used pages go first), then from the cold
/// end of the cache list.
pub struct LruKReplacer {
    k: usize,
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    /// Number of returns seen per frame; reset on eviction.
    access_count: HashMap<FrameId, usize>,
    /// Frames with fewer than k returns, newest at the front.
    history: VecDeque<FrameId>,
    /// Frames with at least k returns, most recently used at the front.
    cache: VecDeque<FrameId>,
    /// Frames currently allowed to be evicted.
    evictable: HashSet<FrameId>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer. `k` must be at least 1.
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            inner: Mutex::new(LruKInner {
                access_count: HashMap::new(),
                history: VecDeque::new(),
                cache: VecDeque::new(),
                evictable: HashSet::new(),
            }),
        }
    }

    /// Returns the configured k.
    pub fn k(&self) -> usize {
        self.k
    }
}

fn remove_from(list: &mut VecDeque<FrameId>, frame_id: FrameId) -> bool {
    if let Some(pos) = list.iter().position(|&f| f == frame_id) {
        list.remove(pos);
        true
    } else {
        false
    }
}

impl Replacer for LruKReplacer {
    fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        // A frame that has never been returned is not in any list yet.
        if inner.access_count.get(&frame_id).copied().unwrap_or(0) == 0 {
            return;
        }
        inner.evictable.remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let count = {
            let entry = inner.access_count.entry(frame_id).or_insert(0);
            *entry += 1;
            *entry
        };
        inner.evictable.insert(frame_id);

        if count == self.k {
            remove_from(&mut inner.history, frame_id);
            inner.cache.push_front(frame_id);
        } else if count > self.k {
            remove_from(&mut inner.cache, frame_id);
            inner.cache.push_front(frame_id);
        } else if !inner.history.contains(&frame_id) {
            inner.history.push_front(frame_id);
        }
    }

    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let from_history = inner
            .history
            .iter()
            .copied()
            .find(|f| inner.evictable.contains(f));
        if let Some(frame_id) = from_history {
            remove_from(&mut inner.history, frame_id);
            inner.access_count.insert(frame_id, 0);
            inner.evictable.remove(&frame_id);
            return Some(frame_id);
        }

        let from_cache = inner
            .cache
            .iter()
            .copied()
            .find(|f| inner.evictable.contains(f));
        if let Some(frame_id) = from_cache {
            remove_from(&mut inner.cache, frame_id);
            inner.access_count.insert(frame_id, 0);
            inner.evictable.remove(&frame_id);
            return Some(frame_id);
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        remove_from(&mut inner.history, frame_id);
        remove_from(&mut inner.cache, frame_id);
        inner.evictable.remove(&frame_id);
        inner.access_count.insert(frame_id, 0);
    }

    fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.history.len() + inner.cache.len()
    }
}
