//! Chain Cache
//!
//! Lazily loaded values keyed by knowledge-base name. Each name gets one
//! `OnceCell`; concurrent first lookups all await the same cell, so the
//! loader runs once and every caller receives the same `Arc`. A failed load
//! leaves the cell empty and the next lookup tries again.
//!
//! Unbounded unless a capacity is given, in which case the least recently
//! used loaded entry is dropped when the cache grows past it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::chain::RagChain;

struct Slot<T> {
    cell: Arc<OnceCell<Arc<T>>>,
    last_used: u64,
}

struct Inner<T> {
    slots: HashMap<String, Slot<T>>,
    tick: u64,
}

pub struct ChainCache<T = RagChain> {
    inner: Mutex<Inner<T>>,
    capacity: Option<usize>,
}

impl<T> Default for ChainCache<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> ChainCache<T> {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner { slots: HashMap::new(), tick: 0 }),
            capacity,
        }
    }

    /// Return the cached value for `name`, running `load` if there is none.
    pub async fn get_or_try_load<F, Fut, E>(&self, name: &str, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.slot(name);
        let value = cell
            .get_or_try_init(|| async move {
                debug!(kb = %name, "Loading chain");
                load().await.map(Arc::new)
            })
            .await?;
        Ok(value.clone())
    }

    /// Cached value for `name`, if loaded.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        inner.slots.get(name).and_then(|slot| slot.cell.get().cloned())
    }

    /// Drop the entry for `name`.
    pub fn invalidate(&self, name: &str) {
        if self.inner.lock().slots.remove(name).is_some() {
            debug!(kb = %name, "Invalidated cached chain");
        }
    }

    /// Drop the entry for `name` only if it still holds `stale`. Callers that
    /// race to replace the same outdated value evict it once.
    pub fn evict_stale(&self, name: &str, stale: &Arc<T>) -> bool {
        let mut inner = self.inner.lock();
        let is_stale = inner
            .slots
            .get(name)
            .and_then(|slot| slot.cell.get())
            .is_some_and(|current| Arc::ptr_eq(current, stale));
        if is_stale {
            inner.slots.remove(name);
            debug!(kb = %name, "Evicted outdated chain");
        }
        is_stale
    }

    /// Number of entries, loaded or loading.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, name: &str) -> Arc<OnceCell<Arc<T>>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let cell = {
            let slot = inner.slots.entry(name.to_string()).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                last_used: tick,
            });
            slot.last_used = tick;
            slot.cell.clone()
        };

        if let Some(capacity) = self.capacity {
            while inner.slots.len() > capacity {
                // Only loaded entries are evicted; in-flight loads keep their slot.
                let victim = inner
                    .slots
                    .iter()
                    .filter(|(key, slot)| key.as_str() != name && slot.cell.initialized())
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(key, _)| key.clone());
                match victim {
                    Some(key) => {
                        inner.slots.remove(&key);
                        debug!(kb = %key, "Evicted least recently used chain");
                    }
                    None => break,
                }
            }
        }
        cell
    }
}
