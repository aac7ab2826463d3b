//! Paged storage: fixed-size pages, the slotted heap page codec, and the
//! disk manager that owns the backing files.

mod disk;
mod slotted;

pub use disk::DiskManager;
pub use slotted::{SlotContent, SlottedPage};

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use common::{DbError, DbResult, FileId, Lsn, PageId, PAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Fixed byte size of the common page header. The header is encoded with
/// fixed-width little-endian integers, so this is exact, not padded.
pub const HEADER_BYTES: usize = 21;

pub(crate) fn bincode_config() -> impl Config {
    config::legacy()
}

/// Role of a page within its file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    Heap = 0,
    BtreeInternal = 1,
    BtreeLeaf = 2,
    Meta = 3,
}

impl TryFrom<u8> for PageType {
    type Error = DbError;

    fn try_from(tag: u8) -> DbResult<Self> {
        match tag {
            0 => Ok(PageType::Heap),
            1 => Ok(PageType::BtreeInternal),
            2 => Ok(PageType::BtreeLeaf),
            3 => Ok(PageType::Meta),
            other => Err(DbError::Storage(format!("unknown page type tag {other}"))),
        }
    }
}

/// Common header carried by every page.
///
/// `checksum` covers the whole page with this field zeroed; the disk
/// manager fills it on write and verifies it on read.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageHeader {
    pub page_no: u64,
    pub page_type: u8,
    pub lsn: u64,
    pub checksum: u32,
}

/// A fixed-size page. The first [`HEADER_BYTES`] of `data` hold the
/// [`PageHeader`]; the rest belongs to the layout named by the type tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub file_id: FileId,
    pub id: PageId,
    pub data: Vec<u8>,
}

impl Page {
    /// Create a zeroed page with an initialized header.
    pub fn new(file_id: FileId, id: PageId, page_type: PageType) -> Self {
        let mut page = Self {
            file_id,
            id,
            data: vec![0u8; PAGE_SIZE],
        };
        page.write_header(&PageHeader {
            page_no: id.0,
            page_type: page_type as u8,
            lsn: 0,
            checksum: 0,
        })
        .expect("fresh page header fits");
        page
    }

    pub fn header(&self) -> DbResult<PageHeader> {
        let (header, read) = decode_from_slice(&self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("read page header failed: {e}")))?;
        debug_assert_eq!(read, HEADER_BYTES);
        Ok(header)
    }

    pub fn write_header(&mut self, header: &PageHeader) -> DbResult<()> {
        let written = encode_into_slice(header, &mut self.data[..HEADER_BYTES], bincode_config())
            .map_err(|e| DbError::Storage(format!("write page header failed: {e}")))?;
        debug_assert_eq!(written, HEADER_BYTES);
        Ok(())
    }

    pub fn page_type(&self) -> DbResult<PageType> {
        PageType::try_from(self.header()?.page_type)
    }

    pub fn lsn(&self) -> Lsn {
        // Header decode of a well-formed page cannot fail; a torn header
        // would already have tripped the checksum at read time.
        Lsn(self.header().map(|h| h.lsn).unwrap_or(0))
    }

    pub fn set_lsn(&mut self, lsn: Lsn) -> DbResult<()> {
        let mut header = self.header()?;
        header.lsn = lsn.0;
        self.write_header(&header)
    }

    /// Checksum of the page content with the checksum field zeroed.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        // checksum field occupies the final 4 header bytes
        hasher.update(&self.data[..HEADER_BYTES - 4]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[HEADER_BYTES..]);
        hasher.finalize()
    }
}
