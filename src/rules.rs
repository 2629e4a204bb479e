//! Loader configuration.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::num::NonZeroUsize;

use crate::{
    batch_fn::BatchFn,
    cache::{CacheEntry, CacheMap, CacheStore},
    error::ConfigError,
    loader::Loader,
    schedule::{Schedule, TokioScheduler},
};

/// The plain-data part of a loader's configuration. With the `serde`
/// feature, this can be read straight out of an application's config file;
/// every field is optional there and falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BatchRules {
    /// A label for the loader, used in logs.
    pub name: Option<String>,

    /// If false, every key is dispatched in a batch of its own.
    pub batch: bool,

    /// If false, nothing is memoized: every load sends its key to the batch
    /// function, even if the same key was just loaded.
    pub cache: bool,

    /// The most keys that will be sent in a single batch. Once a batch is
    /// full, later loads go into a new batch, scheduled separately. `None`
    /// means unbounded.
    pub max_batch_size: Option<usize>,
}

impl Default for BatchRules {
    fn default() -> Self {
        Self {
            name: None,
            batch: true,
            cache: true,
            max_batch_size: None,
        }
    }
}

impl BatchRules {
    /// Check the rules and compute the batch size limit they describe.
    pub(crate) fn batch_limit(&self) -> Result<Option<NonZeroUsize>, ConfigError> {
        let max_batch_size = match self.max_batch_size {
            None => None,
            Some(size) => Some(NonZeroUsize::new(size).ok_or_else(|| {
                ConfigError::InvalidArgument {
                    option: "max_batch_size",
                    reason: "must be a positive integer, got 0".to_owned(),
                }
            })?),
        };

        Ok(match self.batch {
            true => max_batch_size,
            false => NonZeroUsize::new(1),
        })
    }
}

/// Builder for a [`Loader`]; create one with [`Loader::builder`].
///
/// ```
/// use cacheloader::{Loader, ManualScheduler};
///
/// async fn double(keys: Vec<u32>) -> Result<Vec<Result<u32, String>>, String> {
///     Ok(keys.into_iter().map(|key| Ok(key * 2)).collect())
/// }
///
/// let scheduler = ManualScheduler::new();
/// let loader = Loader::builder(double)
///     .name("doubler")
///     .max_batch_size(100)
///     .scheduler(scheduler.clone())
///     .build()
///     .unwrap();
///
/// let value = loader.load(21);
/// scheduler.run_until_idle();
/// assert_eq!(futures::executor::block_on(value), Ok(42));
/// ```
pub struct LoaderBuilder<K, V, E, C = K> {
    batch_fn: Box<dyn BatchFn<K, V, E>>,
    rules: BatchRules,
    scheduler: Option<Box<dyn Schedule>>,
    cache_key_fn: Box<dyn Fn(&K) -> C + Send + Sync>,
    cache_map: Option<Box<dyn CacheMap<C, CacheEntry<V, E>>>>,
}

impl<K, V, E> LoaderBuilder<K, V, E, K>
where
    K: Clone + 'static,
{
    pub(crate) fn new(batch_fn: impl BatchFn<K, V, E>) -> Self {
        Self {
            batch_fn: Box::new(batch_fn),
            rules: BatchRules::default(),
            scheduler: None,
            cache_key_fn: Box::new(K::clone),
            cache_map: None,
        }
    }
}

impl<K, V, E, C> LoaderBuilder<K, V, E, C> {
    /// Replace all of the plain-data options at once.
    pub fn rules(mut self, rules: BatchRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.rules.name = Some(name.into());
        self
    }

    pub fn batch(mut self, batch: bool) -> Self {
        self.rules.batch = batch;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.rules.cache = cache;
        self
    }

    /// Must be at least 1; this is checked by [`build`](Self::build).
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.rules.max_batch_size = Some(max_batch_size);
        self
    }

    /// Set the scheduler that decides when batches are dispatched. Defaults
    /// to [`TokioScheduler`] on the runtime that is current when `build` is
    /// called.
    pub fn scheduler(mut self, scheduler: impl Schedule) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Use a custom store for the cache, instead of a `HashMap`. Has no
    /// effect if caching is disabled.
    pub fn cache_map(mut self, cache_map: impl CacheMap<C, CacheEntry<V, E>>) -> Self {
        self.cache_map = Some(Box::new(cache_map));
        self
    }

    /// Derive the cache key for each loaded key with `cache_key_fn`. Keys
    /// that derive equal cache keys share a single load. By default the key
    /// itself is the cache key.
    ///
    /// Because this changes the type of the cache key, it discards any
    /// [`cache_map`](Self::cache_map) set so far; set the map afterwards.
    pub fn cache_key_fn<C2>(
        self,
        cache_key_fn: impl Fn(&K) -> C2 + Send + Sync + 'static,
    ) -> LoaderBuilder<K, V, E, C2> {
        LoaderBuilder {
            batch_fn: self.batch_fn,
            rules: self.rules,
            scheduler: self.scheduler,
            cache_key_fn: Box::new(cache_key_fn),
            cache_map: None,
        }
    }
}

impl<K, V, E, C> LoaderBuilder<K, V, E, C>
where
    K: Clone + Debug + Send + 'static,
    V: Clone + Debug + Send + Sync + 'static,
    E: Clone + Debug + Send + Sync + 'static,
    C: Eq + Hash + Send + 'static,
{
    /// Validate the configuration and create the loader.
    pub fn build(self) -> Result<Loader<K, V, E, C>, ConfigError> {
        let max_batch_size = self.rules.batch_limit()?;

        let scheduler: Box<dyn Schedule> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Box::new(TokioScheduler::current().ok_or(ConfigError::NoRuntime)?),
        };

        let cache = match (self.rules.cache, self.cache_map) {
            (false, _) => CacheStore::disabled(),
            (true, Some(cache_map)) => CacheStore::new(cache_map),
            (true, None) => CacheStore::new(Box::new(HashMap::new())),
        };

        Ok(Loader::from_config(
            self.rules.name,
            self.batch_fn,
            scheduler,
            self.cache_key_fn,
            max_batch_size,
            cache,
        ))
    }
}

impl<K, V, E, C> Debug for LoaderBuilder<K, V, E, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderBuilder")
            .field("batch_fn", &"<closure>")
            .field("rules", &self.rules)
            .field("scheduler", &self.scheduler.as_ref().map(|_| "<scheduler>"))
            .field("cache_key_fn", &"<closure>")
            .field("cache_map", &self.cache_map.as_ref().map(|_| "<cache map>"))
            .finish()
    }
}
