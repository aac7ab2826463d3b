//! Buffer pool: a fixed-capacity cache of page frames between the disk
//! manager and everything above it.
//!
//! Frames carry a pin count and a dirty bit. Victims are chosen by a clock
//! (second-chance) sweep restricted to unpinned frames; a dirty victim is
//! written back before its frame is reused. Every `fetch`/`new_page` must
//! be paired with exactly one `unpin` on every exit path.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult, FileId, PageId};
use hashbrown::HashMap;
use log::debug;
use storage::{DiskManager, Page, PageType};

struct Frame {
    page: Page,
    pin_count: u32,
    dirty: bool,
    /// Second-chance bit, set on every access.
    referenced: bool,
}

/// Fixed-capacity page cache with pin-based eviction control.
pub struct BufferPool {
    disk: DiskManager,
    frames: Vec<Option<Frame>>,
    page_table: HashMap<(FileId, PageId), usize>,
    clock_hand: usize,
}

impl BufferPool {
    pub fn new(disk: DiskManager, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        Self {
            disk,
            frames: (0..capacity).map(|_| None).collect(),
            page_table: HashMap::new(),
            clock_hand: 0,
        }
    }

    /// Direct access to the disk manager for allocation metadata (page
    /// counts, index roots). Page content must go through the pool.
    pub fn disk(&mut self) -> &mut DiskManager {
        &mut self.disk
    }

    /// Fetch and pin a page, reading it from disk on a miss.
    pub fn fetch(&mut self, file: FileId, pid: PageId) -> DbResult<&mut Page> {
        if let Some(&slot) = self.page_table.get(&(file, pid)) {
            let frame = self.frames[slot].as_mut().expect("mapped frame");
            frame.pin_count += 1;
            frame.referenced = true;
            return Ok(&mut frame.page);
        }

        let (page, _fresh) = self.disk.read_page(file, pid)?;
        let slot = self.take_victim_frame()?;
        self.install(slot, page)
    }

    /// Allocate a page through the disk manager, pin it, and return it
    /// zero-initialized with the requested type tag.
    pub fn new_page(&mut self, file: FileId, page_type: PageType) -> DbResult<(PageId, &mut Page)> {
        let pid = self.disk.allocate_page(file, page_type)?;
        // the allocator may hand back a recycled id still sitting in a frame
        if let Some(&slot) = self.page_table.get(&(file, pid)) {
            let frame = self.frames[slot].as_mut().expect("mapped frame");
            frame.page = Page::new(file, pid, page_type);
            frame.pin_count += 1;
            frame.referenced = true;
            frame.dirty = true;
            return Ok((pid, &mut frame.page));
        }

        let slot = self.take_victim_frame()?;
        let page = self.install(slot, Page::new(file, pid, page_type))?;
        Ok((pid, page))
    }

    /// Run a closure against a pinned page and always release the pin,
    /// error paths included. The closure's second return value is the
    /// dirty flag passed to `unpin`.
    pub fn with_page<R>(
        &mut self,
        file: FileId,
        pid: PageId,
        f: impl FnOnce(&mut Page) -> DbResult<(R, bool)>,
    ) -> DbResult<R> {
        let page = self.fetch(file, pid)?;
        let out = f(page);
        let dirty = matches!(&out, Ok((_, true)));
        self.unpin(file, pid, dirty)?;
        out.map(|(value, _)| value)
    }

    /// Allocate a page, run a closure against it, and always release the
    /// pin. The closure's second return value is the dirty flag.
    pub fn with_new_page<R>(
        &mut self,
        file: FileId,
        page_type: PageType,
        f: impl FnOnce(PageId, &mut Page) -> DbResult<(R, bool)>,
    ) -> DbResult<R> {
        let (pid, page) = self.new_page(file, page_type)?;
        let out = f(pid, page);
        let dirty = matches!(&out, Ok((_, true)));
        self.unpin(file, pid, dirty)?;
        out.map(|(value, _)| value)
    }

    /// Drop one pin. `dirty` marks the frame as modified so eviction and
    /// flushes write it back.
    pub fn unpin(&mut self, file: FileId, pid: PageId, dirty: bool) -> DbResult<()> {
        let slot = self
            .page_table
            .get(&(file, pid))
            .copied()
            .ok_or_else(|| DbError::Storage(format!("unpin of unmapped page {}", pid.0)))?;
        let frame = self.frames[slot].as_mut().expect("mapped frame");
        if frame.pin_count == 0 {
            return Err(DbError::Storage(format!("unpin of unpinned page {}", pid.0)));
        }
        frame.pin_count -= 1;
        frame.dirty |= dirty;
        Ok(())
    }

    /// Write one page through to disk if it is resident and dirty.
    ///
    /// Callers must have made the log durable up to the page's LSN first;
    /// commit and checkpoint sync the WAL before flushing.
    pub fn flush(&mut self, file: FileId, pid: PageId) -> DbResult<()> {
        if let Some(&slot) = self.page_table.get(&(file, pid)) {
            let frame = self.frames[slot].as_mut().expect("mapped frame");
            if frame.dirty {
                self.disk.write_page(&mut frame.page)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Write every dirty frame through to disk.
    pub fn flush_all(&mut self) -> DbResult<()> {
        for frame in self.frames.iter_mut().flatten() {
            if frame.dirty {
                self.disk.write_page(&mut frame.page)?;
                frame.dirty = false;
            }
        }
        self.disk.sync_all()?;
        Ok(())
    }

    /// Drop a page from the pool (it must be unpinned) and return its id
    /// to the file's free list.
    pub fn free_page(&mut self, file: FileId, pid: PageId) -> DbResult<()> {
        if let Some(slot) = self.page_table.remove(&(file, pid)) {
            let frame = self.frames[slot].take().expect("mapped frame");
            if frame.pin_count > 0 {
                self.frames[slot] = Some(frame);
                self.page_table.insert((file, pid), slot);
                return Err(DbError::Storage(format!(
                    "cannot free pinned page {}",
                    pid.0
                )));
            }
        }
        self.disk.free_page(file, pid)
    }

    /// Drop every cached frame of a file without writing it back, then
    /// delete the file. Used by DROP TABLE/INDEX; fails if any of the
    /// file's pages is still pinned.
    pub fn drop_file(&mut self, file: FileId) -> DbResult<()> {
        let slots: Vec<usize> = self
            .page_table
            .iter()
            .filter(|((f, _), _)| *f == file)
            .map(|(_, slot)| *slot)
            .collect();
        if slots
            .iter()
            .any(|slot| self.frames[*slot].as_ref().is_some_and(|fr| fr.pin_count > 0))
        {
            return Err(DbError::Storage(format!(
                "cannot drop file {} with pinned pages",
                file.0
            )));
        }
        for slot in slots {
            if let Some(frame) = self.frames[slot].take() {
                self.page_table.remove(&(frame.page.file_id, frame.page.id));
            }
        }
        self.disk.remove_file(file)
    }

    /// Number of frames with a nonzero pin count. Statement execution must
    /// leave this at zero.
    pub fn pinned_frames(&self) -> usize {
        self.frames
            .iter()
            .flatten()
            .filter(|f| f.pin_count > 0)
            .count()
    }

    fn install(&mut self, slot: usize, page: Page) -> DbResult<&mut Page> {
        self.page_table.insert((page.file_id, page.id), slot);
        self.frames[slot] = Some(Frame {
            page,
            pin_count: 1,
            dirty: false,
            referenced: true,
        });
        Ok(&mut self.frames[slot].as_mut().expect("just installed").page)
    }

    /// Clock sweep: skip pinned frames, clear the reference bit on the
    /// first pass, evict on the second encounter. Two full revolutions
    /// with no candidate means every frame is pinned.
    fn take_victim_frame(&mut self) -> DbResult<usize> {
        if let Some(slot) = self.frames.iter().position(Option::is_none) {
            return Ok(slot);
        }

        let capacity = self.frames.len();
        for _ in 0..2 * capacity {
            let slot = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % capacity;

            let frame = self.frames[slot].as_mut().expect("full pool");
            if frame.pin_count > 0 {
                continue;
            }
            if frame.referenced {
                frame.referenced = false;
                continue;
            }

            let frame = self.frames[slot].take().expect("full pool");
            self.page_table.remove(&(frame.page.file_id, frame.page.id));
            if frame.dirty {
                debug!(
                    "evicting dirty page {} of file {}",
                    frame.page.id.0, frame.page.file_id.0
                );
                let mut page = frame.page;
                self.disk.write_page(&mut page)?;
            }
            return Ok(slot);
        }

        Err(DbError::BufferExhausted)
    }
}
