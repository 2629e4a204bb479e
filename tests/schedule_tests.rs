//! These tests run loaders on real executors, with the default tokio
//! scheduler and with a time-based batch window.

use cacheloader::{
    ConfigError, LoadError, Loader, TokioScheduler, WindowScheduler,
};
use futures_timer::Delay;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

type Calls = Arc<Mutex<Vec<Vec<u32>>>>;

fn recording_doubler(
    calls: &Calls,
) -> impl Fn(Vec<u32>) -> futures::future::Ready<Result<Vec<Result<u32, String>>, String>>
       + Send
       + Sync
       + 'static {
    let calls = calls.clone();
    move |keys: Vec<u32>| {
        calls.lock().unwrap().push(keys.clone());
        futures::future::ready(Ok(keys.into_iter().map(|key| Ok(key * 2)).collect()))
    }
}

#[tokio::test]
async fn test_tokio_scheduler_batches_a_turn() {
    let calls = Calls::default();
    let loader = Loader::new(recording_doubler(&calls)).unwrap();

    let (a, b, c) = futures::join!(loader.load(1), loader.load(2), loader.load(3));
    assert_eq!((a, b, c), (Ok(2), Ok(4), Ok(6)));

    // Everything requested before the task yielded went into one batch
    assert_eq!(*calls.lock().unwrap(), [vec![1, 2, 3]]);

    // Loads made after awaiting are a separate batch, and hit the cache
    let results = loader.load_many(vec![3, 4]).await;
    assert_eq!(results, [Ok(6), Ok(8)]);
    assert_eq!(*calls.lock().unwrap(), [vec![1, 2, 3], vec![4]]);
}

#[tokio::test]
async fn test_tokio_scheduler_max_batch_size() {
    let calls = Calls::default();
    let loader = Loader::builder(recording_doubler(&calls))
        .name("sized")
        .max_batch_size(2)
        .build()
        .unwrap();

    assert_eq!(loader.name(), Some("sized"));

    let results = loader.load_many(vec![1, 2, 3, 4, 5]).await;
    assert_eq!(results, [Ok(2), Ok(4), Ok(6), Ok(8), Ok(10)]);

    let mut batches = calls.lock().unwrap().clone();
    batches.sort();
    assert_eq!(batches, [vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_window_scheduler_collects_across_tasks() {
    let calls = Calls::default();
    let loader = Loader::builder(recording_doubler(&calls))
        .scheduler(WindowScheduler::new(
            TokioScheduler::current().unwrap(),
            || Delay::new(Duration::from_millis(50)),
        ))
        .build()
        .unwrap();

    // Loads from separate tasks, made well within the window, share a batch
    let tasks: Vec<_> = (0..4)
        .map(|key| {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load(key).await })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(results, [Ok(0), Ok(2), Ok(4), Ok(6)]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);

    let mut keys = calls[0].clone();
    keys.sort_unstable();
    assert_eq!(keys, [0, 1, 2, 3]);
}

#[tokio::test]
async fn test_load_error_display() {
    let loader = Loader::new(|_keys: Vec<u32>| async {
        Err::<Vec<Result<u32, String>>, _>("database is down".to_owned())
    })
    .unwrap();

    let err = loader.load(1).await.unwrap_err();
    assert_eq!(err, LoadError::Upstream("database is down".to_owned()));
    assert_eq!(err.to_string(), "database is down");
}

#[tokio::test]
async fn test_panicking_batch_on_tokio() {
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let loader = Loader::new(move |keys: Vec<u32>| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                panic!("batch function blew up");
            }
            Ok::<_, String>(keys.into_iter().map(Ok).collect())
        }
    })
    .unwrap();

    // The runtime swallows the panic; the load sees a canceled batch
    assert_eq!(loader.load(1).await, Err(LoadError::Canceled));

    assert_eq!(loader.load(1).await, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_default_scheduler_needs_runtime() {
    let result = Loader::new(|keys: Vec<u32>| async move {
        Ok::<_, ()>(keys.into_iter().map(Ok).collect())
    });

    assert_eq!(result.unwrap_err(), ConfigError::NoRuntime);
}

#[test]
fn test_zero_max_batch_size() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let err = Loader::builder(|keys: Vec<u32>| async move {
        Ok::<_, ()>(keys.into_iter().map(Ok).collect())
    })
    .max_batch_size(0)
    .build()
    .unwrap_err();

    assert!(matches!(
        err,
        ConfigError::InvalidArgument {
            option: "max_batch_size",
            ..
        }
    ));
    assert!(err.to_string().starts_with("invalid argument `max_batch_size`"));
}
