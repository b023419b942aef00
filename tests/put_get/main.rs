use msgstore::{
    Filter, Filterable, Item, ItemStream, MessageStore, MessageStoreConfig, Statistics, StoreError,
};

fn started(config: MessageStoreConfig) -> MessageStore {
    let store = MessageStore::new(config);
    store.start().unwrap();
    store
}

fn registered_stream(store: &MessageStore) -> ItemStream {
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &auto).unwrap();
    stream
}

fn conserved(stats: &Statistics) -> bool {
    stats.total_item_count()
        == stats.available_item_count() + stats.adding_item_count() + stats.removing_item_count()
        && stats.locked_item_count() <= stats.available_item_count()
}

// --- End to End ---

#[test]
fn hundred_items_come_back_in_order() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();

    for n in 0..100u32 {
        let item = Item::encode(&n).unwrap().with_priority((n % 10) as u8);
        stream.add_item(item, &auto).unwrap();
    }
    assert_eq!(stream.statistics().unwrap().total_item_count(), 100);

    let mut last = None;
    for n in 0..100u32 {
        let removed = stream
            .remove_first_matching_item(&Filter::All, &auto)
            .unwrap()
            .expect("item should be present");
        assert_eq!(removed.decode::<u32>().unwrap(), n);
        assert_eq!(removed.priority(), (n % 10) as u8);
        if let Some(previous) = last {
            assert!(removed.sequence() > previous);
        }
        last = Some(removed.sequence());
    }

    assert!(stream
        .remove_first_matching_item(&Filter::All, &auto)
        .unwrap()
        .is_none());
    assert_eq!(stream.statistics().unwrap().total_item_count(), 0);
}

// --- Ordering ---

#[test]
fn cursor_yields_increasing_sequences() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let tx = store.transaction_factory().create_local_transaction();
    for n in 0..25u8 {
        stream.add_item(Item::new(vec![n]), &tx).unwrap();
    }
    tx.commit().unwrap();

    let mut cursor = stream.new_non_locking_cursor(Filter::All).unwrap();
    let mut payloads = Vec::new();
    let mut sequences = Vec::new();
    while let Some(item) = cursor.next().unwrap() {
        payloads.push(item.payload()[0]);
        sequences.push(item.sequence());
    }
    assert_eq!(payloads, (0..25).collect::<Vec<u8>>());
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn priority_filter_selects_oldest_match() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    for (n, priority) in [(0u8, 1u8), (1, 5), (2, 5), (3, 1)] {
        stream
            .add_item(Item::new(vec![n]).with_priority(priority), &auto)
            .unwrap();
    }

    let found = stream
        .find_first_matching_item(&Filter::Priority(5))
        .unwrap()
        .unwrap();
    assert_eq!(found.payload(), &[1]);

    let payload_filter = Filter::custom(|entry| Ok(entry.filter_payload() == Some(&[3][..])));
    let found = stream.find_first_matching_item(&payload_filter).unwrap().unwrap();
    assert_eq!(found.payload(), &[3]);
}

#[test]
fn filter_errors_abort_the_operation() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    stream.add_item(Item::new(b"x".to_vec()), &auto).unwrap();

    let failing = Filter::custom(|_| Err(StoreError::Filter("broken predicate".into())));
    let err = stream.remove_first_matching_item(&failing, &auto).unwrap_err();
    assert!(matches!(err, StoreError::Filter(_)));
    assert_eq!(stream.statistics().unwrap().available_item_count(), 1);
}

// --- Statistics ---

#[test]
fn statistics_stay_conserved_through_a_mixed_workload() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let factory = store.transaction_factory();
    let auto = factory.create_auto_commit_transaction();
    for n in 0..10u8 {
        stream.add_item(Item::new(vec![n]), &auto).unwrap();
    }

    let tx = factory.create_local_transaction();
    stream.add_item(Item::new(vec![10]), &tx).unwrap();
    stream.remove_first_matching_item(&Filter::All, &tx).unwrap();
    let mut cursor = stream.new_locking_cursor(Filter::All).unwrap();
    cursor.next().unwrap().unwrap();

    let stats = stream.statistics().unwrap();
    assert!(conserved(&stats));
    assert_eq!(stats.adding_item_count(), 1);
    assert_eq!(stats.removing_item_count(), 1);
    assert_eq!(stats.locked_item_count(), 1);
    assert_eq!(stats.total_item_count(), 11);

    tx.commit().unwrap();
    cursor.unlock_all().unwrap();
    let stats = stream.statistics().unwrap();
    assert!(conserved(&stats));
    assert_eq!(stats.total_item_count(), 10);
    assert_eq!(stats.locked_item_count(), 0);
}

// --- Empty ---

#[test]
fn empty_removes_everything_in_batches() {
    let store = started(MessageStoreConfig::default().with_empty_batch_size(7));
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    for n in 0..30u8 {
        stream.add_item(Item::new(vec![n]), &auto).unwrap();
    }

    assert_eq!(stream.empty().unwrap(), 30);
    let stats = stream.statistics().unwrap();
    assert_eq!(stats.total_item_count(), 0);
    assert!(conserved(&stats));
}

#[test]
fn empty_falls_back_when_batches_exceed_transaction_size() {
    let config = MessageStoreConfig::default()
        .with_max_transaction_size(10)
        .with_empty_batch_size(50);
    let store = started(config);
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    for n in 0..25u8 {
        stream.add_item(Item::new(vec![n]), &auto).unwrap();
    }

    assert_eq!(stream.empty().unwrap(), 25);
    let stats = stream.statistics().unwrap();
    assert_eq!(stats.total_item_count(), 0);
    assert_eq!(stats.locked_item_count(), 0);
}

#[test]
fn empty_skips_items_locked_elsewhere() {
    let store = started(MessageStoreConfig::default());
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    for n in 0..5u8 {
        stream.add_item(Item::new(vec![n]), &auto).unwrap();
    }

    let mut holder = stream.new_locking_cursor(Filter::All).unwrap();
    holder.next().unwrap().unwrap();

    assert_eq!(stream.empty().unwrap(), 4);
    assert_eq!(stream.statistics().unwrap().total_item_count(), 1);

    holder.unlock_all().unwrap();
    assert_eq!(stream.empty().unwrap(), 1);
}

#[test]
fn local_transaction_size_is_bounded() {
    let store = started(MessageStoreConfig::default().with_max_transaction_size(3));
    let stream = registered_stream(&store);
    let tx = store.transaction_factory().create_local_transaction();
    for n in 0..3u8 {
        stream.add_item(Item::new(vec![n]), &tx).unwrap();
    }

    let err = stream.add_item(Item::new(vec![3]), &tx).unwrap_err();
    assert!(matches!(err, StoreError::OutOfCacheSpace { limit: 3, .. }));
    assert_eq!(stream.statistics().unwrap().adding_item_count(), 3);

    tx.commit().unwrap();
    assert_eq!(stream.statistics().unwrap().available_item_count(), 3);
}
