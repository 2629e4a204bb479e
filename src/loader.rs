use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::hash::Hash;
use std::mem;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use arc_swap::ArcSwapOption;
use futures::future::{self, BoxFuture, FutureExt, JoinAll};
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::{
    batch::{Batch, DispatchedBatch, Resolver},
    batch_fn::BatchFn,
    cache::{CacheEntry, CacheStore},
    error::{ConfigError, LoadError},
    lock,
    rules::LoaderBuilder,
    schedule::Schedule,
};

type SharedBatch<K, V, E> = Arc<Mutex<Batch<K, V, E>>>;

/// A loader batches and memoizes individual key lookups. Every [`load`]
/// made while a batch is collecting (before its scheduler dispatches it)
/// is folded into a single call to the batch function, and every key the
/// loader has seen is remembered, so that loading it again shares the first
/// result rather than fetching it again.
///
/// A `Loader` is a handle; clones share the same batches and cache. It can
/// be shared freely among tasks, including tasks on different threads.
///
/// [`load`]: Loader::load
pub struct Loader<K, V, E, C = K> {
    pub(crate) inner: Arc<Inner<K, V, E, C>>,
}

pub(crate) struct Inner<K, V, E, C> {
    name: Option<String>,
    batch_fn: Box<dyn BatchFn<K, V, E>>,
    scheduler: Box<dyn Schedule>,
    cache_key_fn: Box<dyn Fn(&K) -> C + Send + Sync>,
    max_batch_size: Option<NonZeroUsize>,
    pub(crate) cache: Mutex<CacheStore<C, CacheEntry<V, E>>>,

    // The batch currently collecting keys, if any. It is only ever swapped
    // for a fresh batch once it is no longer open (dispatched or full); the
    // batch's own mutex is what guarantees that a key is never added to a
    // batch after it has been dispatched.
    pub(crate) current: ArcSwapOption<Mutex<Batch<K, V, E>>>,
}

impl<K, V, E> Loader<K, V, E, K>
where
    K: Clone + Debug + Eq + Hash + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
{
    /// Start building a loader around a batch function.
    pub fn builder(batch_fn: impl BatchFn<K, V, E>) -> LoaderBuilder<K, V, E, K> {
        LoaderBuilder::new(batch_fn)
    }

    /// Create a loader with the default configuration: unbounded batches,
    /// caching by key, dispatched on the current tokio runtime.
    pub fn new(batch_fn: impl BatchFn<K, V, E>) -> Result<Self, ConfigError> {
        Self::builder(batch_fn).build()
    }
}

impl<K, V, E, C> Loader<K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    pub(crate) fn from_config(
        name: Option<String>,
        batch_fn: Box<dyn BatchFn<K, V, E>>,
        scheduler: Box<dyn Schedule>,
        cache_key_fn: Box<dyn Fn(&K) -> C + Send + Sync>,
        max_batch_size: Option<NonZeroUsize>,
        cache: CacheStore<C, CacheEntry<V, E>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                batch_fn,
                scheduler,
                cache_key_fn,
                max_batch_size,
                cache: Mutex::new(cache),
                current: ArcSwapOption::empty(),
            }),
        }
    }

    /// Load a single key. The key joins the batch currently being collected
    /// (starting a new one if needed), and the returned future resolves with
    /// the value the batch function produced for it.
    ///
    /// If the key is already cached, the existing load is shared instead, and
    /// the key is not sent to the batch function again. Even so, the returned
    /// future will not resolve until the batch that was collecting at the time
    /// of the call has been dispatched.
    ///
    /// The load happens whether or not the returned future is polled or kept.
    pub fn load(&self, key: K) -> LoadFuture<V, E> {
        let cache_key = (self.inner.cache_key_fn)(&key);
        let empty: Option<SharedBatch<K, V, E>> = None;

        loop {
            if let Some(batch) = self.inner.current.load_full() {
                let mut guard = lock(&batch);

                if guard.admits(self.inner.max_batch_size) {
                    return self.inner.enqueue(&mut guard, key, cache_key);
                }

                // The batch filled up or was dispatched since we looked at it.
                drop(guard);
                self.inner.retire(&batch);
                continue;
            }

            // Start a new batch. It's locked before it's installed, so that our
            // key is the first one in it, and it's only handed to the scheduler
            // once that key is in.
            let fresh = Arc::new(Mutex::new(Batch::new()));
            let mut guard = lock(&fresh);
            let previous = self.inner.current.compare_and_swap(&empty, Some(fresh.clone()));

            if previous.is_none() {
                let load = self.inner.enqueue(&mut guard, key, cache_key);
                drop(guard);
                self.inner.schedule_dispatch(fresh);
                return load;
            }

            // Someone else installed a batch first; go around and use theirs.
        }
    }

    /// Load several keys at once. Each key is loaded as if by [`load`], in
    /// order, so they all join the current batch (overflowing into new ones
    /// if there is a maximum batch size).
    ///
    /// The returned future never fails as a whole: its output holds, at the
    /// same index as each key, the result of loading that key.
    ///
    /// [`load`]: Loader::load
    pub fn load_many(&self, keys: impl IntoIterator<Item = K>) -> JoinAll<LoadFuture<V, E>> {
        let loads: Vec<LoadFuture<V, E>> = keys.into_iter().map(|key| self.load(key)).collect();
        future::join_all(loads)
    }

    /// Forget the cached result for a key, so that the next load of it calls
    /// the batch function again. Loads already waiting on the old result are
    /// unaffected.
    pub fn clear(&self, key: &K) -> &Self {
        let cache_key = (self.inner.cache_key_fn)(key);
        lock(&self.inner.cache).remove(&cache_key);
        trace!(loader = self.inner.display_name(), key = ?key, "cleared key");
        self
    }

    /// Forget every cached result.
    pub fn clear_all(&self) -> &Self {
        lock(&self.inner.cache).clear();
        trace!(loader = self.inner.display_name(), "cleared cache");
        self
    }

    /// Seed the cache with a result for a key, without calling the batch
    /// function. If the key is already cached (even if its load is still in
    /// progress), this does nothing; use [`clear`] first to replace it.
    ///
    /// [`clear`]: Loader::clear
    pub fn prime(&self, key: K, value: Result<V, E>) -> &Self {
        self.prime_with(key, future::ready(value))
    }

    /// Like [`prime`], but with a result that isn't available yet. Loads of
    /// the key resolve when `value` does. `value` is only polled by those
    /// loads.
    ///
    /// [`prime`]: Loader::prime
    pub fn prime_with<F>(&self, key: K, value: F) -> &Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let cache_key = (self.inner.cache_key_fn)(&key);
        let primed = lock(&self.inner.cache).insert_if_absent(cache_key, move || {
            value.map(|result| result.map_err(LoadError::Upstream)).boxed().shared()
        });

        trace!(loader = self.inner.display_name(), key = ?key, primed, "primed key");
        self
    }

    /// The name this loader was configured with, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }
}

impl<K, V, E, C> Inner<K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Detach a closed batch from the loader, so that the next load starts a
    /// new one. No-op if it's no longer the current batch.
    fn retire(&self, batch: &SharedBatch<K, V, E>) {
        let current = Some(batch.clone());
        let _ = self.current.compare_and_swap(&current, None);
    }

    /// Add a load for `key` to an open batch.
    fn enqueue(&self, batch: &mut Batch<K, V, E>, key: K, cache_key: C) -> LoadFuture<V, E> {
        let mut cache = lock(&self.cache);

        if let Some(entry) = cache.get(&cache_key) {
            trace!(loader = self.display_name(), key = ?key, "cache hit");

            let replay = batch.push_cache_hit();
            return LoadFuture::new(
                async move {
                    // Err just means the batch was dropped; the entry still
                    // has our answer.
                    let _ = replay.await;
                    entry.await
                }
                .boxed(),
            );
        }

        let entry: CacheEntry<V, E> = batch
            .push_key(key)
            .map(|received| received.unwrap_or(Err(LoadError::Canceled)))
            .boxed()
            .shared();

        cache.insert(cache_key, entry.clone());
        LoadFuture::new(entry.boxed())
    }

    fn schedule_dispatch(self: &Arc<Self>, batch: SharedBatch<K, V, E>) {
        let span = debug_span!("dataloader.dispatch", loader = self.display_name());
        let mut pending = PendingDispatch {
            inner: self.clone(),
            batch: Some(batch),
        };

        self.scheduler.schedule(
            async move {
                if let Some(batch) = pending.batch.take() {
                    pending.inner.dispatch(batch).await
                }
            }
            .instrument(span)
            .boxed(),
        );
    }

    /// Remove the cache entries for every key of a failed batch, so that
    /// they can be loaded again.
    fn evict(&self, keys: &[K]) {
        let mut cache = lock(&self.cache);
        if cache.is_enabled() {
            keys.iter()
                .for_each(|key| cache.remove(&(self.cache_key_fn)(key)));
        }
    }

    /// Run the batch function for a batch and settle everything waiting on
    /// it. Called exactly once per batch, by the scheduler.
    async fn dispatch(&self, batch: SharedBatch<K, V, E>) {
        let DispatchedBatch {
            keys,
            resolvers,
            cache_hits,
        } = lock(&batch).dispatch();

        self.retire(&batch);
        drop(batch);

        if keys.is_empty() {
            trace!(hits = cache_hits.len(), "batch holds only cache hits");
            cache_hits.replay();
            return;
        }

        let key_count = keys.len();
        debug!(keys = key_count, hits = cache_hits.len(), "dispatching batch");

        let mut in_flight = InFlight {
            inner: self,
            keys,
            resolvers,
        };

        let outcome = match self.batch_fn.load(in_flight.keys.clone()).await {
            Ok(values) if values.len() == key_count => Ok(values),
            Ok(values) => Err(LoadError::InvalidResult {
                reason: format!(
                    "length mismatch: {} keys but {} values",
                    key_count,
                    values.len()
                ),
                keys: format!("{:?}", in_flight.keys),
                values: format!("{:?}", values),
            }),
            Err(err) => Err(LoadError::Upstream(err)),
        };

        cache_hits.replay();
        let resolvers = mem::take(&mut in_flight.resolvers);

        match outcome {
            Ok(values) => {
                resolvers
                    .into_iter()
                    .zip(values)
                    .for_each(|(resolver, value)| {
                        // Nobody is listening if the caller dropped its
                        // future and the key isn't cached.
                        let _ = resolver.send(value.map_err(LoadError::Upstream));
                    });

                debug!(keys = key_count, "batch complete");
            }
            Err(err) => {
                warn!(keys = key_count, error = ?err, "batch failed");

                self.evict(&in_flight.keys);

                resolvers.into_iter().for_each(|resolver| {
                    let _ = resolver.send(Err(err.clone()));
                });
            }
        }
    }
}

/// The keys of a batch whose fetch is underway. If the fetch never
/// finishes, because the batch function panicked or the dispatch task was
/// dropped mid-fetch, the keys are evicted before their loads fail with
/// [`LoadError::Canceled`]. Taking the resolvers out disarms it.
struct InFlight<'a, K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    inner: &'a Inner<K, V, E, C>,
    keys: Vec<K>,
    resolvers: Vec<Resolver<V, E>>,
}

impl<K, V, E, C> Drop for InFlight<'_, K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    fn drop(&mut self) {
        if self.resolvers.is_empty() {
            return;
        }

        warn!(
            loader = self.inner.display_name(),
            keys = self.keys.len(),
            "batch abandoned before the batch function finished"
        );

        self.inner.evict(&self.keys);
        self.resolvers.clear();
    }
}

/// A batch waiting for its scheduled dispatch. If the scheduler drops the
/// task without running it, the batch is closed on the spot: its loads fail
/// with [`LoadError::Canceled`] and its keys are evicted.
struct PendingDispatch<K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    inner: Arc<Inner<K, V, E, C>>,
    batch: Option<SharedBatch<K, V, E>>,
}

impl<K, V, E, C> Drop for PendingDispatch<K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Send + 'static,
{
    fn drop(&mut self) {
        let batch = match self.batch.take() {
            Some(batch) => batch,
            None => return,
        };

        let DispatchedBatch {
            keys,
            resolvers,
            cache_hits,
        } = lock(&batch).dispatch();

        self.inner.retire(&batch);
        warn!(
            loader = self.inner.display_name(),
            keys = keys.len(),
            "batch dropped by its scheduler"
        );

        self.inner.evict(&keys);
        cache_hits.replay();
        drop(resolvers);
    }
}

impl<K, V, E, C> Clone for Loader<K, V, E, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, E, C> Debug for Loader<K, V, E, C>
where
    K: Debug,
    V: 'static,
    E: 'static,
    C: 'static,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.inner.name)
            .field("batch_fn", &"<closure>")
            .field("max_batch_size", &self.inner.max_batch_size)
            .field("cache", &*lock(&self.inner.cache))
            .field("current", &self.inner.current.load_full())
            .finish()
    }
}

/// The future returned by [`Loader::load`]. Resolves with the value for a
/// single key, or the error that prevented loading it.
///
/// Dropping a `LoadFuture` does not cancel the load; the key stays in its
/// batch and its result is still cached.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct LoadFuture<V, E> {
    inner: BoxFuture<'static, Result<V, LoadError<E>>>,
}

impl<V, E> LoadFuture<V, E> {
    fn new(inner: BoxFuture<'static, Result<V, LoadError<E>>>) -> Self {
        Self { inner }
    }
}

impl<V, E> Future for LoadFuture<V, E> {
    type Output = Result<V, LoadError<E>>;

    #[inline]
    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(ctx)
    }
}

impl<V, E> Debug for LoadFuture<V, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFuture").finish_non_exhaustive()
    }
}
