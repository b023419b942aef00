use msgstore::{
    Filter, Item, ItemState, ItemStream, LockId, MessageStore, MessageStoreConfig, StoreError,
    TransactionError, TransactionState,
};

fn started() -> MessageStore {
    let store = MessageStore::new(MessageStoreConfig::default());
    store.start().unwrap();
    store
}

fn registered_stream(store: &MessageStore) -> ItemStream {
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &auto).unwrap();
    stream
}

// --- Rollback ---

#[test]
fn rolled_back_adds_leave_nothing_behind() {
    let store = started();
    let stream = registered_stream(&store);
    let tx = store.transaction_factory().create_local_transaction();
    for n in 0..12u8 {
        stream.add_item(Item::new(vec![n]), &tx).unwrap();
    }
    assert_eq!(tx.pending_operations().unwrap(), 12);

    tx.rollback().unwrap();
    assert_eq!(tx.state().unwrap(), TransactionState::RolledBack);

    let stats = stream.statistics().unwrap();
    assert_eq!(stats.total_item_count(), 0);
    assert_eq!(stats.locked_item_count(), 0);
    assert!(stream.find_first_matching_item(&Filter::All).unwrap().is_none());
}

#[test]
fn rolled_back_locked_remove_counts_a_redelivery() {
    let store = started();
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    stream.add_item(Item::new(b"once".to_vec()), &auto).unwrap();

    let tx = store.transaction_factory().create_local_transaction();
    let mut cursor = stream.new_locking_cursor(Filter::All).unwrap();
    let item = cursor.next().unwrap().unwrap();
    item.remove(&tx, cursor.lock_id()).unwrap();
    tx.rollback().unwrap();

    let again = stream.find_first_matching_item(&Filter::All).unwrap().unwrap();
    assert_eq!(again.id(), item.id());
    assert_eq!(again.state(), ItemState::Available);
    assert_eq!(again.unlock_count(), 1);
}

#[test]
fn dropping_an_active_transaction_rolls_it_back() {
    let store = started();
    let stream = registered_stream(&store);
    {
        let tx = store.transaction_factory().create_local_transaction();
        stream.add_item(Item::new(b"abandoned".to_vec()), &tx).unwrap();
    }
    assert_eq!(stream.statistics().unwrap().total_item_count(), 0);
}

#[test]
fn clones_share_one_unit_of_work() {
    let store = started();
    let stream = registered_stream(&store);
    let tx = store.transaction_factory().create_local_transaction();
    let clone = tx.clone();
    stream.add_item(Item::new(b"a".to_vec()), &clone).unwrap();

    tx.commit().unwrap();
    assert_eq!(clone.state().unwrap(), TransactionState::Committed);
    assert!(stream.find_first_matching_item(&Filter::All).unwrap().is_some());
}

// --- Boundaries ---

#[test]
fn committed_transaction_rejects_new_work() {
    let store = started();
    let stream = registered_stream(&store);
    let tx = store.transaction_factory().create_local_transaction();
    tx.commit().unwrap();

    let err = stream.add_item(Item::new(b"late".to_vec()), &tx).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Transaction(TransactionError::NotActive {
            state: TransactionState::Committed,
            ..
        })
    ));
}

#[test]
fn auto_commit_transactions_have_no_boundary() {
    let store = started();
    let auto = store.transaction_factory().create_auto_commit_transaction();
    assert!(matches!(
        auto.commit(),
        Err(StoreError::Transaction(TransactionError::AutoCommitBoundary))
    ));
}

#[test]
fn store_must_be_started() {
    let store = MessageStore::new(MessageStoreConfig::default());
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let err = store.add(&ItemStream::new(), &auto).unwrap_err();
    assert!(matches!(err, StoreError::StoreNotStarted));
}

#[test]
fn items_need_a_registered_stream() {
    let store = started();
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let loose = ItemStream::new();
    let err = loose.add_item(Item::new(b"x".to_vec()), &auto).unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
}

#[test]
fn stream_cannot_be_added_twice() {
    let store = started();
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let err = store.add(&stream, &auto).unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
}

#[test]
fn items_can_be_added_while_stream_registration_is_pending() {
    let store = started();
    let tx = store.transaction_factory().create_local_transaction();
    let stream = ItemStream::new();
    store.add(&stream, &tx).unwrap();
    stream.add_item(Item::new(b"early".to_vec()), &tx).unwrap();
    tx.commit().unwrap();

    let found = store.find_first_matching(&Filter::All).unwrap().unwrap();
    let item = found.find_first_matching_item(&Filter::All).unwrap().unwrap();
    assert_eq!(item.payload(), b"early");
}

// --- Locks ---

#[test]
fn remove_requires_the_holding_lock() {
    let store = started();
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    stream.add_item(Item::new(b"x".to_vec()), &auto).unwrap();

    let mut cursor = stream.new_locking_cursor(Filter::All).unwrap();
    let item = cursor.next().unwrap().unwrap();
    let other = store.unique_lock_id().unwrap();

    match item.remove(&auto, other) {
        Err(StoreError::LockMismatch {
            presented, held, ..
        }) => {
            assert_eq!(presented, other);
            assert_eq!(held, cursor.lock_id());
        }
        result => panic!("expected lock mismatch, got {:?}", result),
    }

    let unlocked = stream.find_first_matching_item(&Filter::All).unwrap();
    assert!(unlocked.is_none());
    item.remove(&auto, cursor.lock_id()).unwrap();
}

#[test]
fn unlocked_item_rejects_a_lock() {
    let store = started();
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let stored = stream.add_item(Item::new(b"x".to_vec()), &auto).unwrap();

    let err = stored.remove(&auto, LockId(99)).unwrap_err();
    assert!(matches!(err, StoreError::LockMismatch { held: LockId::NONE, .. }));
    stored.remove(&auto, LockId::NONE).unwrap();
}

// --- Stream Removal ---

#[test]
fn non_empty_stream_removal_is_rolled_back() {
    let store = started();
    let stream = registered_stream(&store);
    let auto = store.transaction_factory().create_auto_commit_transaction();
    let item = stream.add_item(Item::new(b"stay".to_vec()), &auto).unwrap();

    let tx = store.transaction_factory().create_local_transaction();
    let removed = store.remove_first_matching(&Filter::All, &tx).unwrap();
    assert_eq!(removed, Some(stream.clone()));

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        StoreError::Transaction(TransactionError::StreamNotEmpty { remaining: 1, .. })
    ));
    assert_eq!(tx.state().unwrap(), TransactionState::RolledBack);

    assert_eq!(store.find_first_matching(&Filter::All).unwrap(), Some(stream.clone()));
    let still = store.find_by_id(item.id()).unwrap().unwrap();
    assert_eq!(still.payload(), b"stay");
}

#[test]
fn pending_child_add_blocks_parent_removal() {
    let store = started();
    let factory = store.transaction_factory();
    let parent = registered_stream(&store);
    let child = ItemStream::new();
    let auto = factory.create_auto_commit_transaction();
    parent.add_item_stream(&child, &auto).unwrap();

    // B adds to the child while A2 removes it; A2 cannot win.
    let b = factory.create_local_transaction();
    let a2 = factory.create_local_transaction();
    parent
        .remove_first_matching_item_stream(&Filter::All, &a2)
        .unwrap()
        .unwrap();
    child.add_item(Item::new(b"racing".to_vec()), &b).unwrap();

    assert!(a2.commit().is_err());
    b.commit().unwrap();

    assert!(child.is_registered().unwrap());
    assert_eq!(child.statistics().unwrap().available_item_count(), 1);
}

#[test]
fn removed_child_rejects_later_adds() {
    let store = started();
    let factory = store.transaction_factory();
    let parent = registered_stream(&store);
    let child = ItemStream::new();
    let auto = factory.create_auto_commit_transaction();
    parent.add_item_stream(&child, &auto).unwrap();

    let a2 = factory.create_local_transaction();
    parent
        .remove_first_matching_item_stream(&Filter::All, &a2)
        .unwrap()
        .unwrap();
    a2.commit().unwrap();

    let b = factory.create_local_transaction();
    let err = child.add_item(Item::new(b"late".to_vec()), &b).unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
    b.commit().unwrap();
}

#[test]
fn adds_wait_for_the_stream_registration_to_commit() {
    let store = started();
    let factory = store.transaction_factory();
    let stream = ItemStream::new();
    let registering = factory.create_local_transaction();
    store.add(&stream, &registering).unwrap();

    let early = factory.create_local_transaction();
    stream.add_item(Item::new(b"early".to_vec()), &early).unwrap();
    let err = early.commit().unwrap_err();
    assert!(matches!(
        err,
        StoreError::Transaction(TransactionError::StreamNotCommitted { .. })
    ));
    assert_eq!(early.state().unwrap(), TransactionState::RolledBack);

    let auto = factory.create_auto_commit_transaction();
    let err = stream.add_item(Item::new(b"auto".to_vec()), &auto).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Transaction(TransactionError::StreamNotCommitted { .. })
    ));

    registering.rollback().unwrap();
    assert!(!stream.is_registered().unwrap_or(false));
    assert!(store.find_first_matching(&Filter::All).unwrap().is_none());
}

#[test]
fn adds_succeed_once_the_stream_registration_commits() {
    let store = started();
    let factory = store.transaction_factory();
    let parent = registered_stream(&store);
    let child = ItemStream::new();
    let registering = factory.create_local_transaction();
    parent.add_item_stream(&child, &registering).unwrap();

    let nested = ItemStream::new();
    let early = factory.create_local_transaction();
    child.add_item_stream(&nested, &early).unwrap();
    assert!(early.commit().is_err());

    registering.commit().unwrap();
    let auto = factory.create_auto_commit_transaction();
    child.add_item_stream(&nested, &auto).unwrap();
    child.add_item(Item::new(b"late".to_vec()), &auto).unwrap();
    assert_eq!(child.statistics().unwrap().available_item_count(), 1);
    assert!(nested.is_registered().unwrap());
}

#[test]
fn rolled_back_stream_add_can_be_retried() {
    let store = started();
    let factory = store.transaction_factory();
    let stream = ItemStream::new();

    let tx = factory.create_local_transaction();
    store.add(&stream, &tx).unwrap();
    tx.rollback().unwrap();
    assert!(store.find_first_matching(&Filter::All).unwrap().is_none());

    let auto = factory.create_auto_commit_transaction();
    store.add(&stream, &auto).unwrap();
    assert_eq!(store.find_first_matching(&Filter::All).unwrap(), Some(stream));
}
