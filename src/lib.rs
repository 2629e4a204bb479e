//! Cacheloader is a Rust implementation of the
//! [dataloader pattern](https://github.com/graphql/dataloader) originally
//! created by Facebook. It lets callers request individual items by key,
//! while transparently grouping all the requests made at about the same time
//! into a single batch operation, deduplicating requests for the same key,
//! and memoizing results so that a key is only ever fetched once. The common
//! use case for this is batching requests to an API or database, but it can
//! be used for any situation where one request for many keys is cheaper than
//! many requests for one key each.
//!
//! ## Overview
//!
//! As a simple example, suppose you had an API to fetch user data by username.
//! The API supports batching; that is, you can supply multiple usernames in
//! the same request and it will return results for all of them. However, your
//! application code naturally asks for one user at a time, from many
//! different places.
//!
//! First, write a batch function. A batch function takes a `Vec` of keys and
//! returns one result per key, in the same order as the keys. Individual keys
//! can fail (for instance, an unknown user) without failing the whole batch,
//! and the batch as a whole can fail (for instance, the API is down):
//!
//! ```
//! #[derive(Debug, Clone, PartialEq)]
//! struct UserData {
//!     username: String,
//!     age: u16,
//! }
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum ApiError {
//!     NotFound(String),
//!     Unavailable,
//! }
//!
//! async fn get_users(usernames: Vec<String>) ->
//!     Result<Vec<Result<UserData, ApiError>>, ApiError>
//! {
//!     // perform the API request, then match each result to its username
//!     Ok(usernames
//!         .into_iter()
//!         .map(|username| match username.as_str() {
//!             "nobody" => Err(ApiError::NotFound(username)),
//!             _ => Ok(UserData { username, age: 30 }),
//!         })
//!         .collect())
//! }
//! ```
//!
//! Then create a [`Loader`] around it. A `Loader` is configured with a
//! [`LoaderBuilder`]; the most important options are:
//!
//! - The scheduler, which decides when a batch that is collecting keys is
//!   dispatched. By default, it's spawned onto the current tokio runtime, so
//!   every load made before the current task yields lands in the same batch.
//!   See the [`schedule`] module for others.
//! - `max_batch_size`, an optional maximum number of keys per batch. Loads
//!   beyond the maximum go into a new batch.
//! - `cache`, which can turn off memoization.
//!
//! Once you have a loader, call [`load`] with a single key to get a
//! [`LoadFuture`] for that key's value.
//!
//! ```
//! # #[derive(Debug, Clone, PartialEq)] struct UserData { username: String, age: u16 }
//! # #[derive(Debug, Clone, PartialEq)] enum ApiError { NotFound(String), Unavailable }
//! # async fn get_users(usernames: Vec<String>) ->
//! #     Result<Vec<Result<UserData, ApiError>>, ApiError> {
//! #     Ok(usernames.into_iter().map(|username| match username.as_str() {
//! #         "nobody" => Err(ApiError::NotFound(username)),
//! #         _ => Ok(UserData { username, age: 30 }),
//! #     }).collect())
//! # }
//! use cacheloader::{Loader, LoadError};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let loader = Loader::builder(get_users)
//!     .name("users")
//!     .max_batch_size(100)
//!     .build()
//!     .unwrap();
//!
//! // Both of these are fetched in a single call to get_users
//! let (alice, nobody) = futures::join!(
//!     loader.load("alice".to_owned()),
//!     loader.load("nobody".to_owned()),
//! );
//!
//! assert_eq!(alice.unwrap().username, "alice");
//! assert_eq!(
//!     nobody,
//!     Err(LoadError::Upstream(ApiError::NotFound("nobody".to_owned())))
//! );
//!
//! // This one is served from the cache; get_users isn't called again
//! let alice = loader.load("alice".to_owned()).await;
//! assert_eq!(alice.unwrap().age, 30);
//! # });
//! ```
//!
//! ## Design notes
//!
//! ### The cache holds loads, not values
//!
//! A key is entered into the cache the moment it's first loaded, as a
//! shared future for its eventual result. A second load of the same key,
//! whether or not the first has finished, shares that future. This is what
//! deduplicates concurrent requests: a key can only be in one batch at a
//! time, and is only ever sent to the batch function once, until it is
//! [cleared] from the cache.
//!
//! The exception is failure. If a batch fails as a whole (the batch function
//! returns an error, or returns the wrong number of values), every key in it
//! is evicted from the cache, so that loading it again will retry. Errors for
//! individual keys are cached like any other result.
//!
//! ### Ordering
//!
//! Within a batch, each value is matched to its key purely by position. A
//! cache hit never resolves before the batch that was collecting at the time
//! of the hit has been dispatched, even if the cached value is already
//! available; this keeps the order in which loads settle consistent whether
//! or not they were cached.
//!
//! ### Scheduler-driven design
//!
//! Each batch is handed to the scheduler exactly once, as soon as its first
//! load has joined it, and is dispatched exactly once. The batch function is
//! driven by the scheduled task, not by the [`LoadFuture`]s; a load proceeds
//! (and its result is cached) whether or not anyone is still waiting for it.
//! If the batch function panics, or the task is dropped before it finishes,
//! the batch's loads fail with [`LoadError::Canceled`] and their keys are
//! evicted, so that they can be loaded again.
//!
//! [`load`]: Loader::load
//! [cleared]: Loader::clear

mod batch;
mod batch_fn;
mod cache;
mod error;
mod loader;
mod rules;
pub mod schedule;


use std::sync::{Mutex, MutexGuard, PoisonError};

pub use batch_fn::{BatchFn, BatchResult};
pub use cache::{CacheEntry, CacheMap};
pub use error::{ConfigError, LoadError};
pub use loader::{LoadFuture, Loader};
pub use rules::{BatchRules, LoaderBuilder};
pub use schedule::{ManualScheduler, Schedule, TokioScheduler, WindowScheduler};

/// Lock a mutex, ignoring poisoning. None of our critical sections can leave
/// their data half-updated if a batch function or scheduler panics.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
