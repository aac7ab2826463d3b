use super::*;
use storage::DiskManager;
use tempfile::tempdir;
use types::Value;

fn setup() -> (BufferPool, TableHeap, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path()).unwrap();
    (BufferPool::new(disk, 16), TableHeap::new(FileId(1)), dir)
}

fn row(id: i64, name: &str) -> Row {
    Row::new(vec![Value::BigInt(id), Value::Text(name.into())])
}

fn scan_all(heap: &TableHeap, pool: &mut BufferPool) -> Vec<(RecordId, Row)> {
    let mut cursor = ScanCursor::default();
    let mut out = Vec::new();
    while let Some(item) = heap.scan_next(pool, &mut cursor).unwrap() {
        out.push(item);
    }
    out
}

#[test]
fn insert_then_get_round_trips() {
    let (mut pool, mut heap, _dir) = setup();

    let rid = heap.insert(&mut pool, &row(1, "Ada"), Lsn(1)).unwrap();
    let fetched = heap.get(&mut pool, rid).unwrap().unwrap();
    assert_eq!(fetched.values, vec![Value::BigInt(1), Value::Text("Ada".into())]);
    assert_eq!(fetched.rid(), Some(rid));
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn inserts_spill_onto_new_pages() {
    let (mut pool, mut heap, _dir) = setup();

    let wide = "x".repeat(900);
    let mut rids = Vec::new();
    for i in 0..20 {
        rids.push(heap.insert(&mut pool, &row(i, &wide), Lsn(1)).unwrap());
    }

    let pages: std::collections::HashSet<u64> =
        rids.iter().map(|r| r.page_id.0).collect();
    assert!(pages.len() > 1, "20 wide rows cannot share one page");
    assert_eq!(scan_all(&heap, &mut pool).len(), 20);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn delete_hides_the_tuple_from_get_and_scan() {
    let (mut pool, mut heap, _dir) = setup();

    let keep = heap.insert(&mut pool, &row(1, "keep"), Lsn(1)).unwrap();
    let gone = heap.insert(&mut pool, &row(2, "gone"), Lsn(1)).unwrap();
    heap.delete(&mut pool, gone, Lsn(2)).unwrap();

    assert!(heap.get(&mut pool, gone).unwrap().is_none());
    assert!(heap.delete(&mut pool, gone, Lsn(3)).is_err());

    let visible = scan_all(&heap, &mut pool);
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].0, keep);
}

#[test]
fn small_update_stays_in_place() {
    let (mut pool, mut heap, _dir) = setup();

    let rid = heap.insert(&mut pool, &row(1, "before"), Lsn(1)).unwrap();
    heap.update(&mut pool, rid, &row(1, "after"), Lsn(2)).unwrap();

    let fetched = heap.get(&mut pool, rid).unwrap().unwrap();
    assert_eq!(fetched.values[1], Value::Text("after".into()));
}

#[test]
fn growing_update_forwards_but_keeps_the_rid() {
    let (mut pool, mut heap, _dir) = setup();

    // fill the first page almost completely so the grown tuple cannot stay
    let filler = "f".repeat(1200);
    for i in 0..3 {
        heap.insert(&mut pool, &row(i, &filler), Lsn(1)).unwrap();
    }
    let rid = heap.insert(&mut pool, &row(99, "small"), Lsn(1)).unwrap();

    let huge = "h".repeat(1500);
    heap.update(&mut pool, rid, &row(99, &huge), Lsn(2)).unwrap();

    let fetched = heap.get(&mut pool, rid).unwrap().unwrap();
    assert_eq!(fetched.values[1], Value::Text(huge.clone()));
    assert_eq!(fetched.rid(), Some(rid));

    // the scan reports the tuple once, at its original RID
    let visible = scan_all(&heap, &mut pool);
    assert_eq!(visible.len(), 4);
    let moved: Vec<_> = visible.iter().filter(|(r, _)| *r == rid).collect();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].1.values[1], Value::Text(huge));

    // and the forwarded tuple can still be updated and deleted via its RID
    heap.update(&mut pool, rid, &row(99, "shrunk"), Lsn(3)).unwrap();
    heap.delete(&mut pool, rid, Lsn(4)).unwrap();
    assert!(heap.get(&mut pool, rid).unwrap().is_none());
    assert_eq!(scan_all(&heap, &mut pool).len(), 3);
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn restore_reverses_a_delete_at_the_same_rid() {
    let (mut pool, mut heap, _dir) = setup();

    let rid = heap.insert(&mut pool, &row(7, "phoenix"), Lsn(1)).unwrap();
    heap.delete(&mut pool, rid, Lsn(2)).unwrap();
    heap.restore(&mut pool, rid, &row(7, "phoenix"), Lsn(3)).unwrap();

    let fetched = heap.get(&mut pool, rid).unwrap().unwrap();
    assert_eq!(fetched.values[1], Value::Text("phoenix".into()));
}

#[test]
fn restore_builds_out_missing_pages_and_slots() {
    let (mut pool, mut heap, _dir) = setup();

    // simulate recovery replaying an insert into a page that was never
    // flushed: slot 2 of a page with no layout yet
    let pid = pool
        .with_new_page(FileId(1), storage::PageType::Heap, |pid, _| Ok((pid, false)))
        .unwrap();
    let rid = RecordId { page_id: pid, slot: 2 };
    heap.restore(&mut pool, rid, &row(5, "replayed"), Lsn(9)).unwrap();

    let fetched = heap.get(&mut pool, rid).unwrap().unwrap();
    assert_eq!(fetched.values[0], Value::BigInt(5));
    // the padding slots read as absent
    assert!(heap
        .get(&mut pool, RecordId { page_id: pid, slot: 0 })
        .unwrap()
        .is_none());
}

#[test]
fn fsm_reuses_space_freed_by_deletes() {
    let (mut pool, mut heap, _dir) = setup();

    let wide = "w".repeat(1000);
    let mut rids = Vec::new();
    for i in 0..8 {
        rids.push(heap.insert(&mut pool, &row(i, &wide), Lsn(1)).unwrap());
    }
    let last_page = rids.last().unwrap().page_id.0;

    for rid in &rids {
        heap.delete(&mut pool, *rid, Lsn(2)).unwrap();
    }

    // new inserts land on recycled space instead of extending the file
    let rid = heap.insert(&mut pool, &row(100, &wide), Lsn(3)).unwrap();
    assert!(rid.page_id.0 <= last_page);
}
