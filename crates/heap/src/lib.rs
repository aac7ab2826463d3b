//! Heap access: tuple CRUD and table scans over the buffer pool.
//!
//! Tuples are bincode-encoded rows in slotted heap pages. An update that no
//! longer fits in place relocates the tuple and leaves a forwarding stub,
//! so the RID handed out at insert time stays valid for the tuple's whole
//! life. A per-table free-space map picks the insertion page; when nothing
//! fits, a page is appended to the table's file.

#[cfg(test)]
mod tests;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use buffer::BufferPool;
use common::{DbError, DbResult, FileId, Lsn, PageId, RecordId, Row};
use hashbrown::HashMap;
use storage::{PageType, SlotContent, SlottedPage};

fn bincode_config() -> impl Config {
    config::legacy()
}

fn encode_row(row: &Row) -> DbResult<Vec<u8>> {
    encode_to_vec(row, bincode_config())
        .map_err(|e| DbError::Storage(format!("serialize row failed: {e}")))
}

fn decode_row(bytes: &[u8]) -> DbResult<Row> {
    let (row, _) = decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Storage(format!("deserialize row failed: {e}")))?;
    Ok(row)
}

/// Lazily built map of page id to free bytes, refreshed as inserts land.
#[derive(Debug, Default)]
struct FreeSpaceMap {
    built: bool,
    free: HashMap<u64, usize>,
}

/// One table's heap file.
#[derive(Debug)]
pub struct TableHeap {
    file: FileId,
    fsm: FreeSpaceMap,
}

/// Position of an in-progress sequential scan.
#[derive(Clone, Copy, Debug)]
pub struct ScanCursor {
    next_page: u64,
    next_slot: u16,
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self { next_page: 1, next_slot: 0 }
    }
}

enum ScanStep {
    Yield(RecordId, Row),
    Follow(RecordId, RecordId),
    NextPage,
}

impl TableHeap {
    pub fn new(file: FileId) -> Self {
        Self { file, fsm: FreeSpaceMap::default() }
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Insert a row, stamping the page with `lsn`, and return its RID.
    pub fn insert(&mut self, pool: &mut BufferPool, row: &Row, lsn: Lsn) -> DbResult<RecordId> {
        let bytes = encode_row(row)?;
        self.place(pool, &bytes, false, lsn)
    }

    /// Fetch the row at `rid`, following a forwarding stub if the tuple
    /// has moved. Dead or never-written slots read as `None`.
    pub fn get(&self, pool: &mut BufferPool, rid: RecordId) -> DbResult<Option<Row>> {
        let content = self.read_slot(pool, rid)?;
        match content {
            Some(SlotContent::Live(bytes)) | Some(SlotContent::Moved(bytes)) => {
                let mut row = decode_row(&bytes)?;
                row.set_rid(Some(rid));
                Ok(Some(row))
            }
            Some(SlotContent::Forward(target)) => {
                match self.read_slot(pool, target)? {
                    Some(SlotContent::Moved(bytes)) | Some(SlotContent::Live(bytes)) => {
                        let mut row = decode_row(&bytes)?;
                        row.set_rid(Some(rid));
                        Ok(Some(row))
                    }
                    _ => Ok(None),
                }
            }
            Some(SlotContent::Dead) | None => Ok(None),
        }
    }

    /// Replace the row at `rid`. Relocates behind a forwarding stub when
    /// the new image no longer fits in place; the RID stays stable.
    pub fn update(
        &mut self,
        pool: &mut BufferPool,
        rid: RecordId,
        row: &Row,
        lsn: Lsn,
    ) -> DbResult<()> {
        let bytes = encode_row(row)?;
        let content = self
            .read_slot(pool, rid)?
            .ok_or_else(|| DbError::Storage(format!("update of missing tuple {rid:?}")))?;

        match content {
            SlotContent::Live(_) => {
                let updated = self.try_update_slot(pool, rid, &bytes, lsn)?;
                if updated {
                    return Ok(());
                }
                // relocate and leave a stub at the original RID
                let new_home = self.place(pool, &bytes, true, lsn)?;
                pool.with_page(self.file, rid.page_id, |page| {
                    page.set_lsn(lsn)?;
                    SlottedPage::new(page)?.set_forward(rid.slot, new_home)?;
                    Ok(((), true))
                })
            }
            SlotContent::Forward(target) => {
                let updated = self.try_update_slot(pool, target, &bytes, lsn)?;
                if updated {
                    return Ok(());
                }
                // the relocated copy outgrew its page too; move it again
                pool.with_page(self.file, target.page_id, |page| {
                    page.set_lsn(lsn)?;
                    SlottedPage::new(page)?.delete(target.slot)?;
                    Ok(((), true))
                })?;
                let new_home = self.place(pool, &bytes, true, lsn)?;
                pool.with_page(self.file, rid.page_id, |page| {
                    page.set_lsn(lsn)?;
                    SlottedPage::new(page)?.set_forward(rid.slot, new_home)?;
                    Ok(((), true))
                })
            }
            SlotContent::Moved(_) => {
                let updated = self.try_update_slot(pool, rid, &bytes, lsn)?;
                if updated {
                    Ok(())
                } else {
                    Err(DbError::Storage("moved tuple update does not fit".into()))
                }
            }
            SlotContent::Dead => {
                Err(DbError::Storage(format!("update of dead tuple {rid:?}")))
            }
        }
    }

    /// Delete the tuple at `rid`, clearing the stub chain if it moved.
    pub fn delete(&mut self, pool: &mut BufferPool, rid: RecordId, lsn: Lsn) -> DbResult<()> {
        let content = self
            .read_slot(pool, rid)?
            .ok_or_else(|| DbError::Storage(format!("delete of missing tuple {rid:?}")))?;

        match content {
            SlotContent::Live(_) | SlotContent::Moved(_) => {
                self.delete_slot(pool, rid, lsn)
            }
            SlotContent::Forward(target) => {
                self.delete_slot(pool, target, lsn)?;
                self.delete_slot(pool, rid, lsn)
            }
            SlotContent::Dead => {
                Err(DbError::Storage(format!("delete of dead tuple {rid:?}")))
            }
        }
    }

    /// Put a row back at an exact RID. Rollback and recovery use this to
    /// reverse a delete (or replay an insert) without changing identity.
    pub fn restore(
        &mut self,
        pool: &mut BufferPool,
        rid: RecordId,
        row: &Row,
        lsn: Lsn,
    ) -> DbResult<()> {
        let bytes = encode_row(row)?;
        pool.disk().ensure_allocated(self.file, rid.page_id)?;
        pool.with_page(self.file, rid.page_id, |page| {
            if SlottedPage::needs_init(page) {
                SlottedPage::init(page)?;
            }
            page.set_lsn(lsn)?;
            let mut slotted = SlottedPage::new(page)?;
            // pad out missing slots so the target index exists
            while slotted.slot_count() < rid.slot {
                let filler = slotted
                    .insert(&[])?
                    .ok_or_else(|| DbError::Storage("no room to restore tuple".into()))?;
                slotted.delete(filler)?;
            }
            slotted.restore(rid.slot, &bytes)?;
            Ok(((), true))
        })
    }

    /// Raise a page's LSN after the fact. Inserts learn their RID (and so
    /// their log record) only once placed, so the record's LSN is stamped
    /// onto the page right after logging, before the statement ends.
    pub fn stamp_lsn(&self, pool: &mut BufferPool, page_id: PageId, lsn: Lsn) -> DbResult<()> {
        pool.with_page(self.file, page_id, |page| {
            page.set_lsn(lsn)?;
            Ok(((), true))
        })
    }

    /// Advance a sequential scan, yielding the next live tuple and its
    /// logical RID. Relocated tuples surface once, at their stub's RID.
    pub fn scan_next(
        &self,
        pool: &mut BufferPool,
        cursor: &mut ScanCursor,
    ) -> DbResult<Option<(RecordId, Row)>> {
        let page_count = pool.disk().page_count(self.file)?;

        loop {
            if cursor.next_page >= page_count {
                return Ok(None);
            }
            let pid = PageId(cursor.next_page);
            let start_slot = cursor.next_slot;

            let step = pool.with_page(self.file, pid, |page| {
                if SlottedPage::needs_init(page) {
                    return Ok((ScanStep::NextPage, false));
                }
                let slotted = SlottedPage::new(page)?;
                let count = slotted.slot_count();
                for slot in start_slot..count {
                    let rid = RecordId { page_id: pid, slot };
                    match slotted.read(slot)? {
                        SlotContent::Live(bytes) => {
                            let mut row = decode_row(&bytes)?;
                            row.set_rid(Some(rid));
                            return Ok((ScanStep::Yield(rid, row), false));
                        }
                        SlotContent::Forward(target) => {
                            return Ok((ScanStep::Follow(rid, target), false));
                        }
                        SlotContent::Moved(_) | SlotContent::Dead => continue,
                    }
                }
                Ok((ScanStep::NextPage, false))
            })?;

            match step {
                ScanStep::Yield(rid, row) => {
                    cursor.next_slot = rid.slot + 1;
                    return Ok(Some((rid, row)));
                }
                ScanStep::Follow(rid, target) => {
                    cursor.next_slot = rid.slot + 1;
                    if let Some(SlotContent::Moved(bytes)) | Some(SlotContent::Live(bytes)) =
                        self.read_slot(pool, target)?
                    {
                        let mut row = decode_row(&bytes)?;
                        row.set_rid(Some(rid));
                        return Ok(Some((rid, row)));
                    }
                    // dangling stub: skip it
                }
                ScanStep::NextPage => {
                    cursor.next_page += 1;
                    cursor.next_slot = 0;
                }
            }
        }
    }

    // ---- internal helpers ----

    fn read_slot(&self, pool: &mut BufferPool, rid: RecordId) -> DbResult<Option<SlotContent>> {
        let page_count = pool.disk().page_count(self.file)?;
        if rid.page_id.0 == 0 || rid.page_id.0 >= page_count {
            return Ok(None);
        }
        pool.with_page(self.file, rid.page_id, |page| {
            if SlottedPage::needs_init(page) {
                return Ok((None, false));
            }
            let slotted = SlottedPage::new(page)?;
            if rid.slot >= slotted.slot_count() {
                return Ok((None, false));
            }
            Ok((Some(slotted.read(rid.slot)?), false))
        })
    }

    fn try_update_slot(
        &mut self,
        pool: &mut BufferPool,
        rid: RecordId,
        bytes: &[u8],
        lsn: Lsn,
    ) -> DbResult<bool> {
        pool.with_page(self.file, rid.page_id, |page| {
            page.set_lsn(lsn)?;
            let updated = SlottedPage::new(page)?.update(rid.slot, bytes)?;
            Ok((updated, updated))
        })
    }

    fn delete_slot(&mut self, pool: &mut BufferPool, rid: RecordId, lsn: Lsn) -> DbResult<()> {
        pool.with_page(self.file, rid.page_id, |page| {
            page.set_lsn(lsn)?;
            SlottedPage::new(page)?.delete(rid.slot)?;
            Ok(((), true))
        })
    }

    /// Find a page with room via the free-space map, falling back to a
    /// fresh page at the end of the file.
    fn place(
        &mut self,
        pool: &mut BufferPool,
        bytes: &[u8],
        moved: bool,
        lsn: Lsn,
    ) -> DbResult<RecordId> {
        self.build_fsm(pool)?;

        let need = bytes.len() + 8; // payload plus slot entry
        let candidates: Vec<u64> = self
            .fsm
            .free
            .iter()
            .filter(|(_, free)| **free >= need)
            .map(|(pid, _)| *pid)
            .collect();

        for pid in candidates {
            let placed = self.try_place_on(pool, PageId(pid), bytes, moved, lsn)?;
            if let Some(slot) = placed {
                return Ok(RecordId { page_id: PageId(pid), slot });
            }
        }

        // nothing fits: append a page to the table
        let (rid, free) = pool.with_new_page(self.file, PageType::Heap, |pid, page| {
            SlottedPage::init(page)?;
            page.set_lsn(lsn)?;
            let mut slotted = SlottedPage::new(page)?;
            let slot = if moved {
                slotted.insert_moved(bytes)?
            } else {
                slotted.insert(bytes)?
            };
            let slot = slot.ok_or_else(|| {
                DbError::Storage("tuple does not fit in an empty page".into())
            })?;
            let free = slotted.free_space();
            Ok(((RecordId { page_id: pid, slot }, free), true))
        })?;
        self.fsm.free.insert(rid.page_id.0, free);
        Ok(rid)
    }

    fn try_place_on(
        &mut self,
        pool: &mut BufferPool,
        pid: PageId,
        bytes: &[u8],
        moved: bool,
        lsn: Lsn,
    ) -> DbResult<Option<u16>> {
        let (slot, free) = pool.with_page(self.file, pid, |page| {
            if SlottedPage::needs_init(page) {
                SlottedPage::init(page)?;
            }
            let mut slotted = SlottedPage::new(page)?;
            let slot = if moved {
                slotted.insert_moved(bytes)?
            } else {
                slotted.insert(bytes)?
            };
            if slot.is_some() {
                page.set_lsn(lsn)?;
            }
            let free = {
                let slotted = SlottedPage::new(page)?;
                slotted.free_space()
            };
            Ok(((slot, free), slot.is_some()))
        })?;
        self.fsm.free.insert(pid.0, free);
        Ok(slot)
    }

    fn build_fsm(&mut self, pool: &mut BufferPool) -> DbResult<()> {
        if self.fsm.built {
            return Ok(());
        }
        let page_count = pool.disk().page_count(self.file)?;
        for pid in 1..page_count {
            let free = pool.with_page(self.file, PageId(pid), |page| {
                if SlottedPage::needs_init(page) {
                    return Ok((common::PAGE_SIZE, false));
                }
                Ok((SlottedPage::new(page)?.free_space(), false))
            })?;
            self.fsm.free.insert(pid, free);
        }
        self.fsm.built = true;
        Ok(())
    }
}
