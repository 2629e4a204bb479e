//! Scheduling of batch dispatch.
//!
//! When a loader starts a new batch, it hands a dispatch task for that batch
//! to its [`Schedule`]r as soon as the first load has joined it. Every load
//! made until the task runs joins the same batch, so the choice of *when* to
//! run the task is what defines the batching window.
//!
//! A scheduler may run the task inside `schedule` itself. Nothing breaks, but
//! nothing is batched either: each batch then holds only the load that
//! started it. A task that is dropped without being run fails every load in
//! its batch with [`LoadError::Canceled`][crate::LoadError::Canceled].

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::executor;
use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::Handle;

use crate::lock;

/// Decides when a batch is dispatched. See the [module docs][self].
///
/// Any `Fn(BoxFuture<'static, ()>)` closure is a scheduler, which makes it
/// easy to hand dispatch off to an arbitrary executor:
///
/// ```
/// use std::thread;
/// use futures::{executor, future::BoxFuture};
/// # use cacheloader::Schedule;
///
/// let scheduler = |task: BoxFuture<'static, ()>| {
///     thread::spawn(move || executor::block_on(task));
/// };
/// # fn check(_: impl Schedule) {}
/// # check(scheduler);
/// ```
pub trait Schedule: Send + Sync + 'static {
    fn schedule(&self, task: BoxFuture<'static, ()>);
}

impl<F> Schedule for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
{
    #[inline]
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        (self)(task)
    }
}

/// The default scheduler: spawns dispatch onto a tokio runtime. The task
/// runs once the runtime gets to it, which is no sooner than the next time
/// the loading task yields (on a current-thread runtime) or the next time a
/// worker is free (on a multi-threaded one).
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Use the runtime we're currently running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Schedule for TokioScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        // Detached; the task settles every future in the batch on its own.
        drop(self.handle.spawn(task));
    }
}

/// A scheduler that holds each batch open for a window before dispatching
/// it. `window` is called once per batch, when the batch is created, and the
/// returned future is awaited before the batch is handed to the `inner`
/// scheduler's task. For a typical service this is a short sleep:
///
/// ```
/// use std::time::Duration;
/// use futures_timer::Delay;
/// use cacheloader::{WindowScheduler, TokioScheduler};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # let _guard = rt.enter();
/// let scheduler = WindowScheduler::new(
///     TokioScheduler::current().unwrap(),
///     || Delay::new(Duration::from_millis(2)),
/// );
/// ```
pub struct WindowScheduler<S, Delayer> {
    inner: S,
    window: Delayer,
}

impl<S, Delayer> WindowScheduler<S, Delayer> {
    pub fn new(inner: S, window: Delayer) -> Self {
        Self { inner, window }
    }
}

impl<S, Delayer, Delay> Schedule for WindowScheduler<S, Delayer>
where
    S: Schedule,
    Delayer: Fn() -> Delay + Send + Sync + 'static,
    Delay: Future<Output = ()> + Send + 'static,
{
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        let delay = (self.window)();

        self.inner.schedule(
            async move {
                delay.await;
                task.await
            }
            .boxed(),
        )
    }
}

impl<S: Debug, Delayer> Debug for WindowScheduler<S, Delayer> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowScheduler")
            .field("inner", &self.inner)
            .field("window", &"<closure>")
            .finish()
    }
}

/// A scheduler that queues dispatch tasks until they are explicitly run.
/// This makes batch boundaries completely deterministic: every load made
/// before `run_next` (or `run_until_idle`) is called lands in the same
/// batch, subject to the maximum batch size.
///
/// Clones share the same queue, so keep one around after handing a clone to
/// the loader.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<VecDeque<BoxFuture<'static, ()>>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of dispatch tasks waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Remove the oldest queued task without running it, so that it can be
    /// polled by hand.
    pub fn take_next(&self) -> Option<BoxFuture<'static, ()>> {
        lock(&self.queue).pop_front()
    }

    /// Run the oldest queued task to completion on the current thread.
    /// Returns false if there was nothing to run.
    pub fn run_next(&self) -> bool {
        // The queue must not be locked while the task runs; running a batch
        // may well schedule another one.
        match self.take_next() {
            None => false,
            Some(task) => {
                executor::block_on(task);
                true
            }
        }
    }

    /// Run queued tasks, including any scheduled while running, until the
    /// queue is empty. Returns the number of tasks that were run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }
}

impl Schedule for ManualScheduler {
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        lock(&self.queue).push_back(task)
    }
}

impl Debug for ManualScheduler {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
