//! These tests are intended to ensure that a batch function is called the
//! correct number of times, with the correct keys, for different
//! configurations

use cacheloader::{BatchFn, BatchResult, Loader, ManualScheduler};
use futures::{executor, future::BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};

/// A batch function that doubles its keys and records every call it gets.
#[derive(Debug, Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Vec<u32>> {
        self.calls.lock().unwrap().clone()
    }
}

impl BatchFn<u32, u32, String> for Recorder {
    fn load(&self, keys: Vec<u32>) -> BoxFuture<'static, BatchResult<u32, String>> {
        self.calls.lock().unwrap().push(keys.clone());
        async move { Ok(keys.into_iter().map(|key| Ok(key * 2)).collect()) }.boxed()
    }
}

fn doubler(recorder: &Recorder) -> (Loader<u32, u32, String>, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let loader = Loader::builder(recorder.clone())
        .scheduler(scheduler.clone())
        .build()
        .unwrap();

    (loader, scheduler)
}

#[test]
fn simple_test() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);

    let futs = vec![loader.load(1), loader.load(2), loader.load(3)];

    // Nothing is fetched until the scheduler runs the batch
    assert!(recorder.calls().is_empty());
    scheduler.run_until_idle();

    let results: Vec<u32> = executor::block_on(futures::future::try_join_all(futs)).unwrap();

    assert_eq!(results, [2, 4, 6]);
    assert_eq!(recorder.calls(), [vec![1, 2, 3]]);
}

#[test]
fn low_key_test() {
    let recorder = Recorder::default();
    let scheduler = ManualScheduler::new();
    let loader = Loader::builder(recorder.clone())
        .max_batch_size(2)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();

    let futs = vec![
        loader.load(1),
        loader.load(2),
        loader.load(3),
        loader.load(4),
    ];

    assert_eq!(scheduler.run_until_idle(), 2);

    let results: Vec<u32> = executor::block_on(futures::future::try_join_all(futs)).unwrap();

    assert_eq!(results, [2, 4, 6, 8]);
    assert_eq!(recorder.calls(), [vec![1, 2], vec![3, 4]]);
}

#[test]
fn test_duplicate_keys() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);

    let fut1 = loader.load(10);
    let fut2 = loader.load(10);
    let fut3 = loader.load(10);
    let fut4 = loader.load(20);

    scheduler.run_until_idle();

    assert_eq!(executor::block_on(fut1), Ok(20));
    assert_eq!(executor::block_on(fut2), Ok(20));
    assert_eq!(executor::block_on(fut3), Ok(20));
    assert_eq!(executor::block_on(fut4), Ok(40));

    // Each key is only sent once
    assert_eq!(recorder.calls(), [vec![10, 20]]);
}

#[test]
fn test_batches_keep_request_order() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);

    let futs: Vec<_> = [5, 3, 9, 1].iter().map(|&key| loader.load(key)).collect();
    scheduler.run_until_idle();

    let results: Vec<u32> = executor::block_on(futures::future::try_join_all(futs)).unwrap();

    assert_eq!(results, [10, 6, 18, 2]);
    assert_eq!(recorder.calls(), [vec![5, 3, 9, 1]]);
}

#[test]
fn test_separate_turns_make_separate_batches() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);

    let fut1 = loader.load(1);
    scheduler.run_until_idle();

    let fut2 = loader.load(2);
    scheduler.run_until_idle();

    assert_eq!(executor::block_on(fut1), Ok(2));
    assert_eq!(executor::block_on(fut2), Ok(4));
    assert_eq!(recorder.calls(), [vec![1], vec![2]]);
}

#[test]
fn test_batching_disabled() {
    let recorder = Recorder::default();
    let scheduler = ManualScheduler::new();
    let loader = Loader::builder(recorder.clone())
        .batch(false)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();

    let results = loader.load_many(vec![1, 2, 3]);
    assert_eq!(scheduler.run_until_idle(), 3);

    assert_eq!(executor::block_on(results), [Ok(2), Ok(4), Ok(6)]);
    assert_eq!(recorder.calls(), [vec![1], vec![2], vec![3]]);
}

#[test]
fn test_load_many() {
    let recorder = Recorder::default();
    let scheduler = ManualScheduler::new();
    let loader = Loader::builder(recorder.clone())
        .max_batch_size(3)
        .scheduler(scheduler.clone())
        .build()
        .unwrap();

    let single = loader.load(7);
    let many = loader.load_many(vec![4, 7, 5, 6]);

    scheduler.run_until_idle();

    assert_eq!(executor::block_on(single), Ok(14));
    assert_eq!(
        executor::block_on(many),
        [Ok(8), Ok(14), Ok(10), Ok(12)]
    );

    // 7 is shared with the single load; the rest overflow at 3 keys
    assert_eq!(recorder.calls(), [vec![7, 4, 5], vec![6]]);
}

/// Load keys from several different threads, and confirm that a single
/// batch call was made fulfilling all of them
#[test]
fn test_threaded() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);
    let loader_ref = &loader;

    let futs = crossbeam::scope(move |s| {
        let threads: Vec<_> = (0..4)
            .map(move |i| s.spawn(move |_s| loader_ref.load(i)))
            .collect();

        threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect::<Vec<_>>()
    })
    .unwrap();

    assert_eq!(scheduler.run_until_idle(), 1);

    let result: Vec<u32> = futs
        .into_iter()
        .map(|fut| executor::block_on(fut).unwrap())
        .collect();

    assert_eq!(result, &[0, 2, 4, 6]);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);

    let mut keys = calls[0].clone();
    keys.sort_unstable();
    assert_eq!(keys, [0, 1, 2, 3]);
}

#[test]
fn test_clones_share_batches() {
    let recorder = Recorder::default();
    let (loader, scheduler) = doubler(&recorder);
    let other = loader.clone();

    let fut1 = loader.load(1);
    let fut2 = other.load(2);
    let fut3 = other.load(1);

    scheduler.run_until_idle();

    assert_eq!(executor::block_on(fut1), Ok(2));
    assert_eq!(executor::block_on(fut2), Ok(4));
    assert_eq!(executor::block_on(fut3), Ok(2));
    assert_eq!(recorder.calls(), [vec![1, 2]]);
}
