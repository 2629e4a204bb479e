//! The batch accumulator: the keys collected for a single call to the batch
//! function, along with the channels used to hand each caller its result.

use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::num::NonZeroUsize;

use futures::channel::oneshot;

use crate::error::LoadError;

pub(crate) type Resolver<V, E> = oneshot::Sender<Result<V, LoadError<E>>>;
pub(crate) type Pending<V, E> = oneshot::Receiver<Result<V, LoadError<E>>>;

/// A batch collects keys until it is dispatched. Once dispatched it accepts
/// nothing more; the loader starts a fresh batch for later loads.
///
/// `keys[i]` is always settled through `resolvers[i]`. Cache hits don't add
/// a key; they only wait for this batch to finish dispatching, so that a hit
/// never resolves before the batch that was collecting when it was
/// requested.
pub(crate) struct Batch<Key, Value, Error> {
    keys: Vec<Key>,
    resolvers: Vec<Resolver<Value, Error>>,
    cache_hits: Vec<oneshot::Sender<()>>,
    dispatched: bool,
}

/// Everything a dispatch needs, taken out of a batch in one step.
pub(crate) struct DispatchedBatch<Key, Value, Error> {
    pub(crate) keys: Vec<Key>,
    pub(crate) resolvers: Vec<Resolver<Value, Error>>,
    pub(crate) cache_hits: CacheHits,
}

impl<Key, Value, Error> Batch<Key, Value, Error> {
    pub(crate) fn new() -> Self {
        Self {
            keys: Vec::new(),
            resolvers: Vec::new(),
            cache_hits: Vec::new(),
            dispatched: false,
        }
    }

    /// Check if this batch can take another key. A batch is open until it is
    /// dispatched or has reached `max_keys`.
    pub(crate) fn admits(&self, max_keys: Option<NonZeroUsize>) -> bool {
        !self.dispatched
            && match max_keys {
                Some(max_keys) => self.keys.len() < max_keys.get(),
                None => true,
            }
    }

    /// Add a key to the batch. The returned receiver settles when the batch
    /// is dispatched.
    pub(crate) fn push_key(&mut self, key: Key) -> Pending<Value, Error> {
        debug_assert!(!self.dispatched, "Attempted to add a key to a dispatched batch");

        let (sender, receiver) = oneshot::channel();
        self.keys.push(key);
        self.resolvers.push(sender);
        receiver
    }

    /// Register a cache hit against this batch. The returned receiver fires
    /// once the batch has finished dispatching (or is dropped).
    pub(crate) fn push_cache_hit(&mut self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.cache_hits.push(sender);
        receiver
    }

    /// Mark the batch dispatched and take its contents. After this, `admits`
    /// is always false.
    pub(crate) fn dispatch(&mut self) -> DispatchedBatch<Key, Value, Error> {
        self.dispatched = true;

        DispatchedBatch {
            keys: mem::take(&mut self.keys),
            resolvers: mem::take(&mut self.resolvers),
            cache_hits: CacheHits(mem::take(&mut self.cache_hits)),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[cfg(test)]
    pub(crate) fn is_dispatched(&self) -> bool {
        self.dispatched
    }
}

impl<Key: Debug, Value, Error> Debug for Batch<Key, Value, Error> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("keys", &self.keys)
            .field("cache_hits", &self.cache_hits.len())
            .field("dispatched", &self.dispatched)
            .finish()
    }
}

/// The cache hits waiting on a dispatched batch.
pub(crate) struct CacheHits(Vec<oneshot::Sender<()>>);

impl CacheHits {
    /// Release every waiting cache hit.
    pub(crate) fn replay(self) {
        self.0.into_iter().for_each(|hit| {
            // The receiver is gone if the caller dropped its future; that's fine.
            let _ = hit.send(());
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}
