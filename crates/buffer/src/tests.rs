use super::*;
use storage::DiskManager;
use tempfile::tempdir;

fn pool(capacity: usize) -> (BufferPool, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path()).unwrap();
    (BufferPool::new(disk, capacity), dir)
}

#[test]
fn fetch_pins_and_unpin_releases() {
    let (mut pool, _dir) = pool(4);
    let file = FileId(1);

    let (pid, _) = pool.new_page(file, PageType::Heap).unwrap();
    assert_eq!(pool.pinned_frames(), 1);
    pool.unpin(file, pid, true).unwrap();
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn double_unpin_is_an_error() {
    let (mut pool, _dir) = pool(4);
    let file = FileId(1);

    let (pid, _) = pool.new_page(file, PageType::Heap).unwrap();
    pool.unpin(file, pid, false).unwrap();
    assert!(pool.unpin(file, pid, false).is_err());
}

#[test]
fn exhausted_pool_reports_instead_of_evicting_pinned_pages() {
    let (mut pool, _dir) = pool(2);
    let file = FileId(1);

    let (p1, _) = pool.new_page(file, PageType::Heap).unwrap();
    let (p2, _) = pool.new_page(file, PageType::Heap).unwrap();
    let err = pool.new_page(file, PageType::Heap).unwrap_err();
    assert!(matches!(err, DbError::BufferExhausted));

    // releasing one pin makes room again
    pool.unpin(file, p1, false).unwrap();
    assert!(pool.new_page(file, PageType::Heap).is_ok());
    pool.unpin(file, p2, false).unwrap();
}

#[test]
fn dirty_pages_survive_eviction() {
    let (mut pool, _dir) = pool(2);
    let file = FileId(1);

    let (pid, page) = pool.new_page(file, PageType::Heap).unwrap();
    page.data[64] = 9;
    pool.unpin(file, pid, true).unwrap();

    // crowd the victim out of the pool
    for _ in 0..4 {
        let (other, _) = pool.new_page(file, PageType::Heap).unwrap();
        pool.unpin(file, other, false).unwrap();
    }

    let reread = pool.fetch(file, pid).unwrap();
    assert_eq!(reread.data[64], 9);
    pool.unpin(file, pid, false).unwrap();
}

#[test]
fn many_pages_churn_through_a_small_pool_without_losing_data() {
    let (mut pool, _dir) = pool(2);
    let file = FileId(1);

    // ten distinct dirty pages forced through two frames
    let mut pids = Vec::new();
    for i in 0..10u8 {
        let (pid, page) = pool.new_page(file, PageType::Heap).unwrap();
        page.data[256] = i;
        pool.unpin(file, pid, true).unwrap();
        pids.push(pid);
    }

    for (i, pid) in pids.iter().enumerate() {
        let page = pool.fetch(file, *pid).unwrap();
        assert_eq!(page.data[256], i as u8);
        pool.unpin(file, *pid, false).unwrap();
    }
    assert_eq!(pool.pinned_frames(), 0);
}

#[test]
fn flush_all_writes_dirty_frames_through() {
    let dir = tempdir().unwrap();
    let file = FileId(5);
    let pid;
    {
        let disk = DiskManager::open(dir.path()).unwrap();
        let mut pool = BufferPool::new(disk, 4);
        let (id, page) = pool.new_page(file, PageType::Heap).unwrap();
        pid = id;
        page.data[128] = 77;
        pool.unpin(file, pid, true).unwrap();
        pool.flush_all().unwrap();
    }

    let mut disk = DiskManager::open(dir.path()).unwrap();
    let (page, fresh) = disk.read_page(file, pid).unwrap();
    assert!(!fresh);
    assert_eq!(page.data[128], 77);
}

#[test]
fn freed_pages_are_recycled_through_the_pool() {
    let (mut pool, _dir) = pool(4);
    let file = FileId(1);

    let (p1, _) = pool.new_page(file, PageType::Heap).unwrap();
    pool.unpin(file, p1, false).unwrap();
    pool.free_page(file, p1).unwrap();

    let (p2, page) = pool.new_page(file, PageType::Heap).unwrap();
    assert_eq!(p2, p1);
    // recycled page comes back zeroed apart from its header
    assert!(page.data[storage::HEADER_BYTES..].iter().all(|b| *b == 0));
    pool.unpin(file, p2, false).unwrap();
}

#[test]
fn free_pinned_page_is_rejected() {
    let (mut pool, _dir) = pool(4);
    let file = FileId(1);
    let (pid, _) = pool.new_page(file, PageType::Heap).unwrap();
    assert!(pool.free_page(file, pid).is_err());
    pool.unpin(file, pid, false).unwrap();
}
