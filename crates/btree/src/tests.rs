use super::*;
use buffer::BufferPool;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use storage::DiskManager;
use tempfile::tempdir;
use types::Value;

fn setup(unique: bool) -> (BufferPool, BTreeIndex, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path()).unwrap();
    let mut pool = BufferPool::new(disk, 64);
    let index = BTreeIndex::create(&mut pool, FileId(1), unique).unwrap();
    (pool, index, dir)
}

fn key(v: i64) -> Vec<Value> {
    vec![Value::BigInt(v)]
}

fn rid(page: u64, slot: u16) -> RecordId {
    RecordId { page_id: PageId(page), slot }
}

#[test]
fn empty_tree_is_a_single_leaf_with_nothing_to_find() {
    let (mut pool, index, _dir) = setup(false);
    assert_eq!(index.height(&mut pool).unwrap(), 1);
    assert_eq!(index.search(&mut pool, &key(1)).unwrap(), vec![]);
    assert_eq!(index.scan_all(&mut pool).unwrap(), vec![]);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn point_lookup_after_inserts() {
    let (mut pool, index, _dir) = setup(false);
    for i in 0..10 {
        index.insert(&mut pool, key(i), rid(1, i as u16), Lsn(1)).unwrap();
    }
    assert_eq!(index.search(&mut pool, &key(7)).unwrap(), vec![rid(1, 7)]);
    assert_eq!(index.search(&mut pool, &key(99)).unwrap(), vec![]);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn thousand_sequential_keys_split_to_height_three() {
    let (mut pool, index, _dir) = setup(true);
    for i in 0..1000 {
        index.insert(&mut pool, key(i), rid(1, (i % 500) as u16), Lsn(1)).unwrap();
    }

    assert_eq!(index.height(&mut pool).unwrap(), 3);

    let all = index.scan_all(&mut pool).unwrap();
    assert_eq!(all.len(), 1000);
    let keys: Vec<i64> = all
        .iter()
        .map(|(k, _)| match &k[0] {
            Value::BigInt(v) => *v,
            other => panic!("unexpected key {other:?}"),
        })
        .collect();
    assert_eq!(keys, (0..1000).collect::<Vec<_>>());
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn node_at_max_fill_splits_on_the_next_insert() {
    let (mut pool, index, _dir) = setup(true);
    for i in 0..MAX_KEYS as i64 {
        index.insert(&mut pool, key(i), rid(1, i as u16), Lsn(1)).unwrap();
    }
    assert_eq!(index.height(&mut pool).unwrap(), 1);

    index.insert(&mut pool, key(MAX_KEYS as i64), rid(1, MAX_KEYS as u16), Lsn(1)).unwrap();
    assert_eq!(index.height(&mut pool).unwrap(), 2);
    assert_eq!(index.scan_all(&mut pool).unwrap().len(), MAX_KEYS + 1);
}

#[test]
fn range_scans_respect_bounds_and_inclusivity() {
    let (mut pool, index, _dir) = setup(true);
    for i in 0..100 {
        index.insert(&mut pool, key(i), rid(1, i as u16), Lsn(1)).unwrap();
    }

    let collect = |pool: &mut BufferPool, range: KeyRange| -> Vec<i64> {
        let mut scan = index.range(pool, range).unwrap();
        let mut out = Vec::new();
        while let Some((k, _)) = index.range_next(pool, &mut scan).unwrap() {
            match &k[0] {
                Value::BigInt(v) => out.push(*v),
                other => panic!("unexpected key {other:?}"),
            }
        }
        out
    };

    let between = collect(
        &mut pool,
        KeyRange {
            low: Some(key(10)),
            low_inclusive: true,
            high: Some(key(20)),
            high_inclusive: true,
        },
    );
    assert_eq!(between, (10..=20).collect::<Vec<_>>());

    let exclusive = collect(
        &mut pool,
        KeyRange {
            low: Some(key(10)),
            low_inclusive: false,
            high: Some(key(20)),
            high_inclusive: false,
        },
    );
    assert_eq!(exclusive, (11..20).collect::<Vec<_>>());

    let open_low = collect(
        &mut pool,
        KeyRange { low: None, low_inclusive: false, high: Some(key(3)), high_inclusive: true },
    );
    assert_eq!(open_low, vec![0, 1, 2, 3]);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn prefix_bounds_cover_composite_keys() {
    let (mut pool, index, _dir) = setup(false);
    for dept in 1..=3i64 {
        for n in 0..5i64 {
            let composite = vec![Value::BigInt(dept), Value::BigInt(n)];
            index
                .insert(&mut pool, composite, rid(dept as u64, n as u16), Lsn(1))
                .unwrap();
        }
    }

    let rids = index.search(&mut pool, &key(2)).unwrap();
    assert_eq!(rids.len(), 5);
    assert!(rids.iter().all(|r| r.page_id == PageId(2)));
}

#[test]
fn duplicate_keys_break_ties_by_rid_and_delete_exactly_one_pair() {
    let (mut pool, index, _dir) = setup(false);
    index.insert(&mut pool, key(5), rid(2, 1), Lsn(1)).unwrap();
    index.insert(&mut pool, key(5), rid(1, 9), Lsn(1)).unwrap();
    index.insert(&mut pool, key(5), rid(1, 2), Lsn(1)).unwrap();

    // rid order within equal keys
    assert_eq!(
        index.search(&mut pool, &key(5)).unwrap(),
        vec![rid(1, 2), rid(1, 9), rid(2, 1)]
    );

    assert!(index.delete(&mut pool, &key(5), rid(1, 9), Lsn(2)).unwrap());
    assert_eq!(
        index.search(&mut pool, &key(5)).unwrap(),
        vec![rid(1, 2), rid(2, 1)]
    );
    // deleting the same pair again finds nothing
    assert!(!index.delete(&mut pool, &key(5), rid(1, 9), Lsn(3)).unwrap());
}

#[test]
fn reinserting_an_existing_pair_is_a_no_op() {
    let (mut pool, index, _dir) = setup(false);
    index.insert(&mut pool, key(1), rid(1, 0), Lsn(1)).unwrap();
    index.insert(&mut pool, key(1), rid(1, 0), Lsn(2)).unwrap();
    assert_eq!(index.scan_all(&mut pool).unwrap().len(), 1);
}

#[test]
fn unique_index_rejects_second_rid_for_a_key() {
    let (mut pool, index, _dir) = setup(true);
    index.insert(&mut pool, key(1), rid(1, 0), Lsn(1)).unwrap();

    let err = index.insert(&mut pool, key(1), rid(1, 1), Lsn(2)).unwrap_err();
    assert!(matches!(err, DbError::Constraint(_)));
    // the failed insert changed nothing
    assert_eq!(index.search(&mut pool, &key(1)).unwrap(), vec![rid(1, 0)]);
}

#[test]
fn insert_then_delete_restores_the_key_set() {
    let (mut pool, index, _dir) = setup(true);
    for i in 0..200 {
        index.insert(&mut pool, key(i), rid(1, i as u16), Lsn(1)).unwrap();
    }
    let before = index.scan_all(&mut pool).unwrap();

    index.insert(&mut pool, key(1000), rid(9, 9), Lsn(2)).unwrap();
    assert!(index.delete(&mut pool, &key(1000), rid(9, 9), Lsn(3)).unwrap());

    assert_eq!(index.scan_all(&mut pool).unwrap(), before);
}

#[test]
fn deleting_most_keys_exercises_borrow_merge_and_root_contraction() {
    let (mut pool, index, _dir) = setup(true);
    for i in 0..500 {
        index.insert(&mut pool, key(i), rid(1, (i % 500) as u16), Lsn(1)).unwrap();
    }
    assert!(index.height(&mut pool).unwrap() >= 3);

    // delete from both ends towards the middle to hit left and right
    // borrows as well as merges
    for i in 0..248 {
        assert!(index.delete(&mut pool, &key(i), rid(1, (i % 500) as u16), Lsn(2)).unwrap());
        let j = 499 - i;
        assert!(index.delete(&mut pool, &key(j), rid(1, (j % 500) as u16), Lsn(2)).unwrap());
    }

    let remaining = index.scan_all(&mut pool).unwrap();
    assert_eq!(remaining.len(), 4);
    assert_eq!(index.height(&mut pool).unwrap(), 1);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn index_survives_reopen_by_file_id() {
    let dir = tempdir().unwrap();
    {
        let disk = DiskManager::open(dir.path()).unwrap();
        let mut pool = BufferPool::new(disk, 64);
        let index = BTreeIndex::create(&mut pool, FileId(1), true).unwrap();
        for i in 0..100 {
            index.insert(&mut pool, key(i), rid(1, i as u16), Lsn(1)).unwrap();
        }
        pool.flush_all().unwrap();
    }

    let disk = DiskManager::open(dir.path()).unwrap();
    let mut pool = BufferPool::new(disk, 64);
    let index = BTreeIndex::open(&mut pool, FileId(1), true).unwrap();
    assert_eq!(index.scan_all(&mut pool).unwrap().len(), 100);
    assert_eq!(index.search(&mut pool, &key(42)).unwrap(), vec![rid(1, 42)]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // A scan yields exactly the inserted key set, in order (invariant 2).
    #[test]
    fn scans_are_sorted_and_complete(keys in proptest::collection::hash_set(0i64..10_000, 1..150)) {
        let (mut pool, index, _dir) = setup(true);
        for k in &keys {
            index.insert(&mut pool, key(*k), rid(1, (*k % 100) as u16), Lsn(1)).unwrap();
        }

        let mut expected: Vec<i64> = keys.iter().copied().collect();
        expected.sort_unstable();

        let scanned: Vec<i64> = index
            .scan_all(&mut pool)
            .unwrap()
            .into_iter()
            .map(|(k, _)| match &k[0] {
                Value::BigInt(v) => *v,
                other => panic!("unexpected key {other:?}"),
            })
            .collect();
        prop_assert_eq!(scanned, expected);
        prop_assert_eq!(pool.pinned_frames(), 0);
    }

    // Deleting a subset leaves exactly the complement.
    #[test]
    fn deletes_remove_only_their_keys(
        keys in proptest::collection::hash_set(0i64..1_000, 10..100),
        seed in any::<u64>(),
    ) {
        let (mut pool, index, _dir) = setup(true);
        let mut all: Vec<i64> = keys.iter().copied().collect();
        all.sort_unstable();
        for k in &all {
            index.insert(&mut pool, key(*k), rid(1, (*k % 100) as u16), Lsn(1)).unwrap();
        }

        let doomed: Vec<i64> = all.iter().copied().filter(|k| (*k as u64 ^ seed) % 2 == 0).collect();
        for k in &doomed {
            prop_assert!(index.delete(&mut pool, &key(*k), rid(1, (*k % 100) as u16), Lsn(2)).unwrap());
        }

        let expected: Vec<i64> = all.iter().copied().filter(|k| !doomed.contains(k)).collect();
        let scanned: Vec<i64> = index
            .scan_all(&mut pool)
            .unwrap()
            .into_iter()
            .map(|(k, _)| match &k[0] {
                Value::BigInt(v) => *v,
                other => panic!("unexpected key {other:?}"),
            })
            .collect();
        prop_assert_eq!(scanned, expected);
    }
}
