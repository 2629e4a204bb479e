//! Storage for memoized loads.
//!
//! A loader remembers every load it has started, keyed by the derived cache
//! key, so that later loads of the same key share the first load's result
//! instead of fetching again. Entries are inserted as soon as a load begins,
//! so a pending load is just as much of a cache hit as a finished one.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::{BuildHasher, Hash};

use futures::future::{BoxFuture, Shared};

use crate::error::LoadError;

/// A memoized load. Every clone of an entry resolves to the same result.
pub type CacheEntry<V, E> = Shared<BoxFuture<'static, Result<V, LoadError<E>>>>;

/// The storage behind a loader's cache. The loader only ever asks for the
/// four operations here, so any map-like structure with its own retention
/// policy (for instance, an LRU) can be plugged in with
/// [`LoaderBuilder::cache_map`][crate::LoaderBuilder::cache_map].
///
/// `get` takes `&mut self` so that stores that track access order can
/// update it.
pub trait CacheMap<C, T>: Send + 'static {
    fn get(&mut self, key: &C) -> Option<&T>;
    fn insert(&mut self, key: C, value: T);
    fn remove(&mut self, key: &C);
    fn clear(&mut self);
}

impl<C, T, S> CacheMap<C, T> for HashMap<C, T, S>
where
    C: Eq + Hash + Send + 'static,
    T: Send + 'static,
    S: BuildHasher + Send + 'static,
{
    #[inline]
    fn get(&mut self, key: &C) -> Option<&T> {
        HashMap::get(self, key)
    }

    #[inline]
    fn insert(&mut self, key: C, value: T) {
        HashMap::insert(self, key, value);
    }

    #[inline]
    fn remove(&mut self, key: &C) {
        HashMap::remove(self, key);
    }

    #[inline]
    fn clear(&mut self) {
        HashMap::clear(self)
    }
}

/// A bounded cache. Note that an evicted entry is simply forgotten; a load
/// that was still pending when it was evicted will still settle for the
/// callers already waiting on it.
impl<C, T> CacheMap<C, T> for lru::LruCache<C, T>
where
    C: Eq + Hash + Send + 'static,
    T: Send + 'static,
{
    #[inline]
    fn get(&mut self, key: &C) -> Option<&T> {
        lru::LruCache::get(self, key)
    }

    #[inline]
    fn insert(&mut self, key: C, value: T) {
        self.put(key, value);
    }

    #[inline]
    fn remove(&mut self, key: &C) {
        self.pop(key);
    }

    #[inline]
    fn clear(&mut self) {
        lru::LruCache::clear(self)
    }
}

/// The loader's view of its cache. A disabled store (caching turned off)
/// accepts every operation and remembers nothing.
pub(crate) struct CacheStore<C, T> {
    map: Option<Box<dyn CacheMap<C, T>>>,
}

impl<C: 'static, T: 'static> CacheStore<C, T> {
    pub(crate) fn disabled() -> Self {
        Self { map: None }
    }

    pub(crate) fn new(map: Box<dyn CacheMap<C, T>>) -> Self {
        Self { map: Some(map) }
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.map.is_some()
    }

    pub(crate) fn remove(&mut self, key: &C) {
        if let Some(map) = self.map.as_mut() {
            map.remove(key)
        }
    }

    pub(crate) fn clear(&mut self) {
        if let Some(map) = self.map.as_mut() {
            map.clear()
        }
    }
}

impl<C: 'static, T: Clone + 'static> CacheStore<C, T> {
    pub(crate) fn get(&mut self, key: &C) -> Option<T> {
        self.map.as_mut()?.get(key).cloned()
    }

    /// Insert an entry, unless one is already present. Existing entries are
    /// never overwritten. Returns true if the entry was inserted.
    pub(crate) fn insert_if_absent(&mut self, key: C, value: impl FnOnce() -> T) -> bool {
        let map = match self.map.as_mut() {
            None => return false,
            Some(map) => map,
        };

        if map.get(&key).is_some() {
            return false;
        }

        map.insert(key, value());
        true
    }

    /// Unconditionally insert an entry. No-op when caching is disabled.
    pub(crate) fn insert(&mut self, key: C, value: T) {
        if let Some(map) = self.map.as_mut() {
            map.insert(key, value)
        }
    }
}

impl<C: 'static, T: 'static> Debug for CacheStore<C, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
