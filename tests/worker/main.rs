use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use msgstore::{
    BatchReport, DrainWorker, Filter, Item, ItemStream, MessageStore, MessageStoreConfig,
    StoredItem,
};

fn loaded_stream(count: u32) -> (MessageStore, ItemStream) {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &auto).unwrap();
    for n in 0..count {
        stream.add_item(Item::encode(&n).unwrap(), &auto).unwrap();
    }
    (store, stream)
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

// --- Run Once ---

#[test]
fn run_once_removes_accepted_items_in_order() {
    let (_store, stream) = loaded_stream(10);
    let worker = DrainWorker::new(stream.clone()).with_batch_size(4);
    let mut seen = Vec::new();

    let report = worker
        .run_once(&mut |item: &StoredItem| {
            seen.push(item.decode::<u32>().unwrap());
            Ok::<(), String>(())
        })
        .unwrap();

    assert_eq!(report, BatchReport { processed: 4, failed: 0 });
    assert_eq!(seen, vec![0, 1, 2, 3]);
    let stats = stream.statistics().unwrap();
    assert_eq!(stats.total_item_count(), 6);
    assert_eq!(stats.locked_item_count(), 0);
}

#[test]
fn rejected_items_are_redelivered() {
    let (_store, stream) = loaded_stream(3);
    let worker = DrainWorker::new(stream.clone());

    let report = worker
        .run_once(&mut |item: &StoredItem| match item.decode::<u32>().unwrap() {
            1 => Err("downstream unavailable"),
            _ => Ok(()),
        })
        .unwrap();
    assert_eq!(report, BatchReport { processed: 2, failed: 1 });

    let left = stream.find_first_matching_item(&Filter::All).unwrap().unwrap();
    assert_eq!(left.decode::<u32>().unwrap(), 1);
    assert_eq!(left.unlock_count(), 1);

    let report = worker
        .run_once(&mut |_: &StoredItem| Ok::<(), &str>(()))
        .unwrap();
    assert_eq!(report, BatchReport { processed: 1, failed: 0 });
    assert!(worker
        .run_once(&mut |_: &StoredItem| Ok::<(), &str>(()))
        .unwrap()
        .is_empty());
}

#[test]
fn filtered_worker_leaves_other_items_alone() {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &auto).unwrap();
    for priority in [1u8, 9, 1, 9] {
        stream
            .add_item(Item::new(vec![priority]).with_priority(priority), &auto)
            .unwrap();
    }

    let worker = DrainWorker::new(stream.clone()).with_filter(Filter::Priority(9));
    let report = worker
        .run_once(&mut |_: &StoredItem| Ok::<(), &str>(()))
        .unwrap();
    assert_eq!(report.processed, 2);

    let stats = stream.statistics().unwrap();
    assert_eq!(stats.available_item_count(), 2);
    assert!(stream
        .find_first_matching_item(&Filter::Priority(9))
        .unwrap()
        .is_none());
}

#[test]
fn run_once_on_a_stopped_store_fails() {
    let (store, stream) = loaded_stream(1);
    store.stop().unwrap();
    let worker = DrainWorker::new(stream);
    assert!(worker
        .run_once(&mut |_: &StoredItem| Ok::<(), &str>(()))
        .is_err());
}

// --- Background Thread ---

#[test]
fn spawned_worker_drains_until_stopped() {
    let (_store, stream) = loaded_stream(50);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let worker = DrainWorker::new(stream.clone())
        .with_name("test-drain")
        .with_batch_size(7)
        .with_poll_interval(Duration::from_millis(5))
        .spawn(move |item: &StoredItem| {
            sink.lock().unwrap().push(item.decode::<u32>().unwrap());
            Ok::<(), String>(())
        });

    assert!(wait_until(Duration::from_secs(5), || {
        stream.statistics().unwrap().total_item_count() == 0
    }));
    let stats = worker.stop();

    assert_eq!(stats.items_processed, 50);
    assert_eq!(stats.items_failed, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.polls >= 8);
    assert_eq!(*received.lock().unwrap(), (0..50).collect::<Vec<u32>>());
}

#[test]
fn competing_workers_split_the_stream() {
    let (_store, stream) = loaded_stream(120);
    let handled = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..3)
        .map(|n| {
            let handled = Arc::clone(&handled);
            DrainWorker::new(stream.clone())
                .with_name(format!("drain-{}", n))
                .with_batch_size(5)
                .with_poll_interval(Duration::from_millis(5))
                .spawn(move |_: &StoredItem| {
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                })
        })
        .collect();

    assert!(wait_until(Duration::from_secs(5), || {
        stream.statistics().unwrap().total_item_count() == 0
    }));
    let processed: usize = workers.into_iter().map(|w| w.stop().items_processed).sum();

    assert_eq!(processed, 120);
    assert_eq!(handled.load(Ordering::SeqCst), 120);
}
