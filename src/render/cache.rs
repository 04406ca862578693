// Render cache - One transform invocation per distinct render key
// Concurrent requests for the same key coalesce on a per-entry condition variable

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use super::transform::{AudioTransform, TransformRequest};
use super::{RenderError, RenderKey, RenderResult};

#[derive(Debug)]
enum SlotState {
    Pending,
    Done(RenderResult<PathBuf>),
}

#[derive(Debug)]
struct RenderSlot {
    key: RenderKey,
    state: Mutex<SlotState>,
    ready: Condvar,
    /// Source changed after this render started
    stale: AtomicBool,
}

impl RenderSlot {
    fn pending(key: RenderKey) -> Self {
        Self {
            key,
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
            stale: AtomicBool::new(false),
        }
    }

    fn is_pending(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(*state, SlotState::Pending)
    }

    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    fn wait(&self) -> RenderResult<PathBuf> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .ready
            .wait_while(state, |s| matches!(s, SlotState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        match &*state {
            SlotState::Done(result) => result.clone(),
            SlotState::Pending => Err(RenderError::Abandoned {
                key: self.key.clone(),
            }),
        }
    }

    fn completed_path(&self) -> Option<PathBuf> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            SlotState::Done(Ok(path)) => Some(path.clone()),
            _ => None,
        }
    }

    fn complete(&self, result: RenderResult<PathBuf>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = SlotState::Done(result);
        self.ready.notify_all();
    }
}

enum Claim {
    Lead(Arc<RenderSlot>),
    Follow(Arc<RenderSlot>),
    Retire(Arc<RenderSlot>),
}

/// Completes the slot if the leading caller unwinds out of the transform
struct LeaderGuard<'a> {
    cache: &'a RenderCache,
    key: &'a RenderKey,
    slot: &'a Arc<RenderSlot>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, result: RenderResult<PathBuf>) {
        if result.is_err() || self.slot.is_stale() {
            self.cache.forget(self.key, self.slot);
        }
        self.slot.complete(result);
        self.finished = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.forget(self.key, self.slot);
            self.slot.complete(Err(RenderError::Abandoned {
                key: self.slot.key.clone(),
            }));
        }
    }
}

/// Memo of rendered variants, keyed by source and render parameter
///
/// Entries never expire except through [`RenderCache::invalidate_source`].
/// Failed renders are not memoized, the next request retries. At most one
/// transform runs per key at any time.
pub struct RenderCache {
    transform: Arc<dyn AudioTransform>,
    render_dir: PathBuf,
    entries: Mutex<HashMap<RenderKey, Arc<RenderSlot>>>,
    invocations: AtomicUsize,
}

impl RenderCache {
    pub fn new(transform: Arc<dyn AudioTransform>, render_dir: impl Into<PathBuf>) -> Self {
        Self {
            transform,
            render_dir: render_dir.into(),
            entries: Mutex::new(HashMap::new()),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn render_dir(&self) -> &Path {
        &self.render_dir
    }

    /// Path of the rendered variant, rendering it first if needed
    ///
    /// Blocks while another caller renders the same key and returns that
    /// caller's result. A render invalidated while in flight is waited out,
    /// then the key is rendered again.
    pub fn resolve(&self, key: &RenderKey) -> RenderResult<PathBuf> {
        loop {
            let claim = {
                let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                match entries.get(key) {
                    Some(slot) if slot.is_stale() => Claim::Retire(Arc::clone(slot)),
                    Some(slot) => Claim::Follow(Arc::clone(slot)),
                    None => {
                        let slot = Arc::new(RenderSlot::pending(key.clone()));
                        entries.insert(key.clone(), Arc::clone(&slot));
                        Claim::Lead(slot)
                    }
                }
            };

            match claim {
                Claim::Follow(slot) => return slot.wait(),
                Claim::Retire(slot) => {
                    let _ = slot.wait();
                    self.forget(key, &slot);
                }
                Claim::Lead(slot) => return self.lead(key, &slot),
            }
        }
    }

    fn lead(&self, key: &RenderKey, slot: &Arc<RenderSlot>) -> RenderResult<PathBuf> {
        let guard = LeaderGuard {
            cache: self,
            key,
            slot,
            finished: false,
        };

        self.invocations.fetch_add(1, Ordering::Relaxed);
        log::info!("Rendering {}", key);
        let request = TransformRequest::for_key(key, &self.render_dir);
        let result = self
            .transform
            .render(&request)
            .map_err(|err| RenderError::Transform {
                key: key.clone(),
                source: Arc::new(err),
            });

        guard.finish(result.clone());
        result
    }

    /// Completed path for `key`, without waiting or rendering
    pub fn lookup(&self, key: &RenderKey) -> Option<PathBuf> {
        let slot = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.get(key).cloned()
        };
        slot.filter(|slot| !slot.is_stale())
            .and_then(|slot| slot.completed_path())
    }

    /// Drop every entry rendered from `source`
    ///
    /// Renders still running stay registered as stale so a new request for
    /// the same key waits for them instead of starting a second transform.
    pub fn invalidate_source(&self, source: &Path) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut invalidated = 0;
        entries.retain(|key, slot| {
            if key.source != source || slot.is_stale() {
                return true;
            }
            invalidated += 1;
            if slot.is_pending() {
                slot.mark_stale();
                true
            } else {
                false
            }
        });
        invalidated
    }

    /// Number of transform invocations so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, key: &RenderKey, slot: &Arc<RenderSlot>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            entries.remove(key);
        }
    }
}
