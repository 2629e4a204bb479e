use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

/// The result of a single batch call: either an error for the batch as a
/// whole, or one result per requested key, in the same order as the keys.
pub type BatchResult<V, E> = Result<Vec<Result<V, E>>, E>;

/// The batch function behind a [`Loader`][crate::Loader]. It is given every
/// key collected for a batch, in request order, and must return exactly one
/// result per key, at the same index as that key.
///
/// This is implemented for any `Fn(Vec<K>) -> impl Future<Output =
/// BatchResult<V, E>>`, so most of the time an `async fn` or closure is all
/// you need. Implement it directly when the batch function carries state,
/// such as a client handle.
pub trait BatchFn<K, V, E>: Send + Sync + 'static {
    fn load(&self, keys: Vec<K>) -> BoxFuture<'static, BatchResult<V, E>>;
}

impl<K, V, E, F, Fut> BatchFn<K, V, E> for F
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<V, E>> + Send + 'static,
{
    #[inline]
    fn load(&self, keys: Vec<K>) -> BoxFuture<'static, BatchResult<V, E>> {
        (self)(keys).boxed()
    }
}
