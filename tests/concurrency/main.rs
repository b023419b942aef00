use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use msgstore::{Filter, Item, ItemStream, MessageStore, MessageStoreConfig};

fn stream_of(store: &MessageStore, count: u32) -> ItemStream {
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &auto).unwrap();
    for n in 0..count {
        stream.add_item(Item::encode(&n).unwrap(), &auto).unwrap();
    }
    stream
}

/// Remove everything a locking cursor with `filter` can claim, one local
/// transaction per item.
fn drain(store: &MessageStore, stream: &ItemStream, filter: Filter) -> Vec<u32> {
    let factory = store.transaction_factory();
    let mut cursor = stream.new_locking_cursor(filter).unwrap();
    let mut removed = Vec::new();
    while let Some(item) = cursor.next().unwrap() {
        let tx = factory.create_local_transaction();
        item.remove(&tx, cursor.lock_id()).unwrap();
        tx.commit().unwrap();
        removed.push(item.decode::<u32>().unwrap());
    }
    removed
}

// --- Skip Partitions ---

#[test]
fn concurrent_skip_cursors_partition_the_stream() {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let stream = stream_of(&store, 100);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = [3u64, 2u64]
        .into_iter()
        .map(|factor| {
            let store = store.clone();
            let stream = stream.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                drain(&store, &stream, Filter::Skip(factor))
            })
        })
        .collect();
    let by_three = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    for removed in &by_three {
        for n in removed {
            assert!(seen.insert(*n), "item {} removed twice", n);
        }
    }

    let mut untouched = Vec::new();
    let mut cursor = stream.new_non_locking_cursor(Filter::All).unwrap();
    while let Some(item) = cursor.next().unwrap() {
        let n = item.decode::<u32>().unwrap();
        assert!(seen.insert(n), "item {} both removed and present", n);
        untouched.push(n);
    }

    assert_eq!(seen.len(), 100);
    let expected_untouched: Vec<u32> = (0..100).filter(|n| n % 2 != 0 && n % 3 != 0).collect();
    assert_eq!(untouched, expected_untouched);

    let stats = stream.statistics().unwrap();
    assert_eq!(stats.total_item_count(), expected_untouched.len() as u64);
    assert_eq!(stats.locked_item_count(), 0);
}

#[test]
fn sequential_skip_three_takes_every_third_item() {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let stream = stream_of(&store, 100);

    let removed = drain(&store, &stream, Filter::Skip(3));
    assert_eq!(removed.len(), 34);
    assert!(removed.iter().all(|n| n % 3 == 0));

    let removed = drain(&store, &stream, Filter::Skip(2));
    assert_eq!(removed, (0..100).filter(|n| n % 2 == 0 && n % 3 != 0).collect::<Vec<u32>>());
}

// --- Competing Consumers ---

#[test]
fn competing_locking_cursors_never_share_items() {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let stream = stream_of(&store, 200);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let stream = stream.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                drain(&store, &stream, Filter::All)
            })
        })
        .collect();

    let mut all: Vec<u32> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..200).collect::<Vec<u32>>());
    assert_eq!(stream.statistics().unwrap().total_item_count(), 0);
}

#[test]
fn producers_and_consumer_agree_on_counts() {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    let stream = stream_of(&store, 0);

    let producers: Vec<_> = (0..3u32)
        .map(|p| {
            let store = store.clone();
            let stream = stream.clone();
            thread::spawn(move || {
                let factory = store.transaction_factory();
                for batch in 0..5u32 {
                    let tx = factory.create_local_transaction();
                    for n in 0..10u32 {
                        let value = p * 1000 + batch * 10 + n;
                        stream.add_item(Item::encode(&value).unwrap(), &tx).unwrap();
                    }
                    tx.commit().unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(stream.statistics().unwrap().available_item_count(), 150);
    assert_eq!(stream.empty().unwrap(), 150);
    assert_eq!(stream.statistics().unwrap().total_item_count(), 0);
}
