//! Once-per-key compilation cache shared by the shader, pipeline and sampler caches.
//!
//! Several threads may ask for the same key at once (asset loading runs next to
//! the render thread). The first caller compiles; the others block on a
//! condition variable until the result lands instead of compiling again.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;

struct CacheState<K, V> {
    entries: HashMap<K, V>,
    compiling: HashSet<K>,
}

/// Mutex-guarded map that compiles each key at most once concurrently.
pub struct CompileCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    ready: Condvar,
}

impl<K, V> Default for CompileCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CompileCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                compiling: HashSet::new(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Return the cached value for `key`, compiling it if absent.
    ///
    /// A failed compilation is not cached; the next caller retries.
    pub fn get_or_compile<F>(&self, key: &K, compile: F) -> Result<V, GraphicsError>
    where
        F: FnOnce() -> Result<V, GraphicsError>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if let Some(value) = state.entries.get(key) {
                    return Ok(value.clone());
                }
                if !state.compiling.contains(key) {
                    state.compiling.insert(key.clone());
                    break;
                }
                self.ready.wait(&mut state);
            }
        }

        let guard = CompilingGuard { cache: self, key };
        let result = compile();

        let mut state = self.state.lock();
        if let Ok(value) = &result {
            state.entries.insert(key.clone(), value.clone());
        }
        state.compiling.remove(key);
        drop(state);
        std::mem::forget(guard);
        self.ready.notify_all();
        result
    }

    /// Look up a value without compiling.
    pub fn get(&self, key: &K) -> Option<V> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: K, value: V) {
        self.state.lock().entries.insert(key, value);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every cached value.
    pub fn drain(&self) -> Vec<V> {
        self.state.lock().entries.drain().map(|(_, v)| v).collect()
    }
}

/// Clears the "compiling" mark if the compile closure panics.
struct CompilingGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    cache: &'a CompileCache<K, V>,
    key: &'a K,
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for CompilingGuard<'_, K, V> {
    fn drop(&mut self) {
        self.cache.state.lock().compiling.remove(self.key);
        self.cache.ready.notify_all();
    }
}
