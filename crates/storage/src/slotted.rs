//! Slotted heap page layout.
//!
//! After the common header: `slot_count`, `free_offset`, and `dead_bytes`
//! bookkeeping, then the slot directory growing upward. Tuple payloads grow
//! downward from the end of the page. Deletion clears the slot without
//! moving payloads; compaction runs once dead payload bytes exceed half the
//! payload area.

use crate::{bincode_config, Page, PageType, HEADER_BYTES};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, PageId, RecordId, PAGE_SIZE};

const SLOT_COUNT_OFF: usize = HEADER_BYTES;
const FREE_OFFSET_OFF: usize = HEADER_BYTES + 2;
const DEAD_BYTES_OFF: usize = HEADER_BYTES + 4;
const SLOTS_START: usize = HEADER_BYTES + 6;
const SLOT_BYTES: usize = 6;

const FLAG_LIVE: u16 = 0;
const FLAG_DEAD: u16 = 1;
const FLAG_FORWARD: u16 = 2;
const FLAG_MOVED: u16 = 3;

/// What a slot holds.
#[derive(Clone, Debug, PartialEq)]
pub enum SlotContent {
    Live(Vec<u8>),
    /// The tuple moved; its current home is this RID.
    Forward(RecordId),
    /// A relocated tuple. Its logical RID is the forwarding slot pointing
    /// here, so scans skip it.
    Moved(Vec<u8>),
    Dead,
}

/// Mutable view over a heap page. Constructing one checks the type tag.
pub struct SlottedPage<'a> {
    page: &'a mut Page,
}

impl<'a> SlottedPage<'a> {
    pub fn new(page: &'a mut Page) -> DbResult<Self> {
        match page.page_type()? {
            PageType::Heap => Ok(Self { page }),
            other => Err(DbError::Storage(format!(
                "expected heap page, found {other:?}"
            ))),
        }
    }

    /// A page straight from the allocator (or replayed from a log record
    /// before its first flush) has no slotted layout yet.
    pub fn needs_init(page: &Page) -> bool {
        read_u16(&page.data, FREE_OFFSET_OFF) == 0
    }

    /// Format a fresh page as an empty heap page.
    pub fn init(page: &mut Page) -> DbResult<()> {
        let mut header = page.header()?;
        header.page_type = PageType::Heap as u8;
        page.write_header(&header)?;
        write_u16(&mut page.data, SLOT_COUNT_OFF, 0);
        write_u16(&mut page.data, FREE_OFFSET_OFF, PAGE_SIZE as u16);
        write_u16(&mut page.data, DEAD_BYTES_OFF, 0);
        Ok(())
    }

    pub fn slot_count(&self) -> u16 {
        read_u16(&self.page.data, SLOT_COUNT_OFF)
    }

    fn free_offset(&self) -> u16 {
        read_u16(&self.page.data, FREE_OFFSET_OFF)
    }

    fn dead_bytes(&self) -> u16 {
        read_u16(&self.page.data, DEAD_BYTES_OFF)
    }

    /// Bytes available for one more tuple plus its slot entry.
    pub fn free_space(&self) -> usize {
        let slots_end = SLOTS_START + self.slot_count() as usize * SLOT_BYTES;
        (self.free_offset() as usize).saturating_sub(slots_end)
    }

    pub fn fits(&self, payload_len: usize) -> bool {
        self.free_space() >= payload_len + SLOT_BYTES
    }

    fn slot(&self, idx: u16) -> DbResult<(u16, u16, u16)> {
        if idx >= self.slot_count() {
            return Err(DbError::Storage(format!(
                "slot {idx} out of range on page {}",
                self.page.id.0
            )));
        }
        let base = SLOTS_START + idx as usize * SLOT_BYTES;
        Ok((
            read_u16(&self.page.data, base),
            read_u16(&self.page.data, base + 2),
            read_u16(&self.page.data, base + 4),
        ))
    }

    fn write_slot(&mut self, idx: u16, offset: u16, len: u16, flags: u16) {
        let base = SLOTS_START + idx as usize * SLOT_BYTES;
        write_u16(&mut self.page.data, base, offset);
        write_u16(&mut self.page.data, base + 2, len);
        write_u16(&mut self.page.data, base + 4, flags);
    }

    /// Append a tuple, returning its slot. `None` means the page is full
    /// even after compaction.
    pub fn insert(&mut self, bytes: &[u8]) -> DbResult<Option<u16>> {
        self.insert_flagged(bytes, FLAG_LIVE)
    }

    /// Append a relocated tuple whose logical RID lives elsewhere.
    pub fn insert_moved(&mut self, bytes: &[u8]) -> DbResult<Option<u16>> {
        self.insert_flagged(bytes, FLAG_MOVED)
    }

    fn insert_flagged(&mut self, bytes: &[u8], flags: u16) -> DbResult<Option<u16>> {
        if bytes.len() + SLOT_BYTES > PAGE_SIZE - SLOTS_START {
            return Err(DbError::Storage("tuple exceeds page capacity".into()));
        }
        if !self.fits(bytes.len()) {
            if self.dead_bytes() == 0 {
                return Ok(None);
            }
            self.compact()?;
            if !self.fits(bytes.len()) {
                return Ok(None);
            }
        }

        let slot_idx = self.slot_count();
        let new_free = self.free_offset() - bytes.len() as u16;
        self.page.data[new_free as usize..new_free as usize + bytes.len()].copy_from_slice(bytes);
        self.write_slot(slot_idx, new_free, bytes.len() as u16, flags);
        write_u16(&mut self.page.data, SLOT_COUNT_OFF, slot_idx + 1);
        write_u16(&mut self.page.data, FREE_OFFSET_OFF, new_free);
        Ok(Some(slot_idx))
    }

    pub fn read(&self, idx: u16) -> DbResult<SlotContent> {
        let (offset, len, flags) = self.slot(idx)?;
        match flags {
            FLAG_LIVE => {
                Ok(SlotContent::Live(
                    self.page.data[offset as usize..(offset + len) as usize].to_vec(),
                ))
            }
            FLAG_MOVED => {
                Ok(SlotContent::Moved(
                    self.page.data[offset as usize..(offset + len) as usize].to_vec(),
                ))
            }
            FLAG_FORWARD => {
                let (rid, _) = decode_from_slice(
                    &self.page.data[offset as usize..(offset + len) as usize],
                    bincode_config(),
                )
                .map_err(|e| DbError::Storage(format!("bad forwarding stub: {e}")))?;
                Ok(SlotContent::Forward(rid))
            }
            _ => Ok(SlotContent::Dead),
        }
    }

    /// Mark the slot dead. Compacts once dead bytes pass half the payload
    /// area.
    pub fn delete(&mut self, idx: u16) -> DbResult<()> {
        let (offset, len, flags) = self.slot(idx)?;
        if flags == FLAG_DEAD {
            return Err(DbError::Storage(format!("slot {idx} already dead")));
        }
        self.write_slot(idx, offset, 0, FLAG_DEAD);
        let dead = self.dead_bytes() + len;
        write_u16(&mut self.page.data, DEAD_BYTES_OFF, dead);

        if dead as usize > (PAGE_SIZE - SLOTS_START) / 2 {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrite a live slot's payload. Returns `false` when the tuple no
    /// longer fits and the caller must relocate it behind a forwarding stub.
    pub fn update(&mut self, idx: u16, bytes: &[u8]) -> DbResult<bool> {
        let (offset, len, flags) = self.slot(idx)?;
        if flags == FLAG_DEAD {
            return Err(DbError::Storage(format!("cannot update dead slot {idx}")));
        }

        if bytes.len() as u16 <= len {
            let start = offset as usize;
            self.page.data[start..start + bytes.len()].copy_from_slice(bytes);
            self.write_slot(idx, offset, bytes.len() as u16, flags);
            let dead = self.dead_bytes() + (len - bytes.len() as u16);
            write_u16(&mut self.page.data, DEAD_BYTES_OFF, dead);
            return Ok(true);
        }

        if self.free_space() >= bytes.len() {
            // retire the old payload, append the new one
            let new_free = self.free_offset() - bytes.len() as u16;
            self.page.data[new_free as usize..new_free as usize + bytes.len()]
                .copy_from_slice(bytes);
            self.write_slot(idx, new_free, bytes.len() as u16, flags);
            write_u16(&mut self.page.data, FREE_OFFSET_OFF, new_free);
            let dead = self.dead_bytes() + len;
            write_u16(&mut self.page.data, DEAD_BYTES_OFF, dead);
            return Ok(true);
        }

        Ok(false)
    }

    /// Replace a slot with a forwarding stub pointing at the tuple's new
    /// home. The stub always fits because it is smaller than any tuple.
    pub fn set_forward(&mut self, idx: u16, target: RecordId) -> DbResult<()> {
        let stub = encode_to_vec(target, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode forwarding stub: {e}")))?;
        let (offset, len, _) = self.slot(idx)?;
        if stub.len() as u16 > len {
            return Err(DbError::Storage("forwarding stub larger than tuple".into()));
        }
        let start = offset as usize;
        self.page.data[start..start + stub.len()].copy_from_slice(&stub);
        self.write_slot(idx, offset, stub.len() as u16, FLAG_FORWARD);
        let dead = self.dead_bytes() + len - stub.len() as u16;
        write_u16(&mut self.page.data, DEAD_BYTES_OFF, dead);
        Ok(())
    }

    /// Put a tuple back into an exact slot. Used by rollback and recovery
    /// to reverse a delete without changing the tuple's RID.
    pub fn restore(&mut self, idx: u16, bytes: &[u8]) -> DbResult<()> {
        if idx == self.slot_count() {
            return match self.insert(bytes)? {
                Some(slot) if slot == idx => Ok(()),
                _ => Err(DbError::Storage("restore could not reclaim slot".into())),
            };
        }
        let (_, _, flags) = self.slot(idx)?;
        if flags != FLAG_DEAD {
            return Err(DbError::Storage(format!("slot {idx} is not dead")));
        }
        if self.free_space() < bytes.len() {
            self.compact()?;
            if self.free_space() < bytes.len() {
                return Err(DbError::Storage("no room to restore tuple".into()));
            }
        }
        let new_free = self.free_offset() - bytes.len() as u16;
        self.page.data[new_free as usize..new_free as usize + bytes.len()].copy_from_slice(bytes);
        self.write_slot(idx, new_free, bytes.len() as u16, FLAG_LIVE);
        write_u16(&mut self.page.data, FREE_OFFSET_OFF, new_free);
        Ok(())
    }

    /// Repack live payloads against the end of the page, keeping slot
    /// numbers (and therefore RIDs) stable.
    fn compact(&mut self) -> DbResult<()> {
        let count = self.slot_count();
        let mut live: Vec<(u16, Vec<u8>, u16)> = Vec::with_capacity(count as usize);
        for idx in 0..count {
            let (offset, len, flags) = self.slot(idx)?;
            if flags != FLAG_DEAD {
                live.push((
                    idx,
                    self.page.data[offset as usize..(offset + len) as usize].to_vec(),
                    flags,
                ));
            }
        }

        let mut free = PAGE_SIZE as u16;
        for (idx, payload, flags) in live {
            free -= payload.len() as u16;
            self.page.data[free as usize..free as usize + payload.len()]
                .copy_from_slice(&payload);
            self.write_slot(idx, free, payload.len() as u16, flags);
        }
        write_u16(&mut self.page.data, FREE_OFFSET_OFF, free);
        write_u16(&mut self.page.data, DEAD_BYTES_OFF, 0);
        Ok(())
    }

    pub fn page_id(&self) -> PageId {
        self.page.id
    }
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn write_u16(data: &mut [u8], off: usize, value: u16) {
    data[off..off + 2].copy_from_slice(&value.to_le_bytes());
}
