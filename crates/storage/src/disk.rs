//! Disk manager: owns the page files of one database directory.
//!
//! Every file's page 0 is a META page holding the allocation state (dense
//! page counter plus a free list that recycles ids) and, for index files,
//! the root page id. Data pages start at 1.

use crate::{bincode_config, Page, PageHeader, PageType, HEADER_BYTES};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, FileId, PageId, PAGE_SIZE};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Allocation state persisted in page 0 of every file.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileMeta {
    /// Dense page counter, meta page included.
    page_count: u64,
    /// Freed page ids available for reuse.
    free_list: Vec<u64>,
    /// Root page id for index files; 0 when unset.
    root_page: u64,
}

impl Default for FileMeta {
    fn default() -> Self {
        Self { page_count: 1, free_list: Vec::new(), root_page: 0 }
    }
}

/// Page-aligned I/O over a directory of backing files.
#[derive(Debug)]
pub struct DiskManager {
    dir: PathBuf,
    handles: HashMap<FileId, File>,
}

impl DiskManager {
    /// Open a database directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> DbResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, handles: HashMap::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, file: FileId) -> PathBuf {
        self.dir.join(format!("file_{}.dbf", file.0))
    }

    fn handle(&mut self, file: FileId) -> DbResult<&mut File> {
        if !self.handles.contains_key(&file) {
            let path = self.file_path(file);
            let handle = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            self.handles.insert(file, handle);
        }
        Ok(self.handles.get_mut(&file).expect("just inserted"))
    }

    /// Delete a file and forget its handle. Used by DROP TABLE/INDEX.
    pub fn remove_file(&mut self, file: FileId) -> DbResult<()> {
        self.handles.remove(&file);
        let path = self.file_path(file);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Read one page. The `bool` is true for a fresh page: nothing (or a
    /// short tail) was on disk, and the buffer was zero-padded. Non-fresh
    /// pages are checksum-verified.
    pub fn read_page(&mut self, file: FileId, pid: PageId) -> DbResult<(Page, bool)> {
        let handle = self.handle(file)?;
        handle.seek(SeekFrom::Start(pid.0 * PAGE_SIZE as u64))?;

        let mut data = vec![0u8; PAGE_SIZE];
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = handle.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let page = Page { file_id: file, id: pid, data };
        let fresh = filled < PAGE_SIZE;
        if !fresh {
            let stored = page.header()?.checksum;
            let actual = page.compute_checksum();
            if stored != actual {
                return Err(DbError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "checksum mismatch on page {} of file {}: stored {stored:#010x}, computed {actual:#010x}",
                        pid.0, file.0
                    ),
                )));
            }
        }
        Ok((page, fresh))
    }

    /// Write one page, stamping its checksum first.
    pub fn write_page(&mut self, page: &mut Page) -> DbResult<()> {
        let mut header = page.header()?;
        header.checksum = 0;
        page.write_header(&header)?;
        header.checksum = page.compute_checksum();
        page.write_header(&header)?;

        let handle = self.handle(page.file_id)?;
        handle.seek(SeekFrom::Start(page.id.0 * PAGE_SIZE as u64))?;
        handle.write_all(&page.data)?;
        Ok(())
    }

    /// Allocate a page id, recycling the free list before extending the
    /// file. The page arrives zeroed with an initialized header.
    pub fn allocate_page(&mut self, file: FileId, page_type: PageType) -> DbResult<PageId> {
        let mut meta = self.read_meta(file)?;
        let pid = match meta.free_list.pop() {
            Some(id) => PageId(id),
            None => {
                let id = meta.page_count;
                meta.page_count += 1;
                PageId(id)
            }
        };
        self.write_meta(file, &meta)?;

        let mut page = Page::new(file, pid, page_type);
        self.write_page(&mut page)?;
        Ok(pid)
    }

    /// Return a page to the file's free list.
    pub fn free_page(&mut self, file: FileId, pid: PageId) -> DbResult<()> {
        if pid.0 == 0 {
            return Err(DbError::Storage("cannot free the meta page".into()));
        }
        let mut meta = self.read_meta(file)?;
        if meta.free_list.contains(&pid.0) {
            return Err(DbError::Storage(format!("page {} already free", pid.0)));
        }
        meta.free_list.push(pid.0);
        self.write_meta(file, &meta)
    }

    /// Pages allocated so far, meta page included.
    pub fn page_count(&mut self, file: FileId) -> DbResult<u64> {
        Ok(self.read_meta(file)?.page_count)
    }

    /// Raise the allocation watermark to cover `pid`. Recovery restores
    /// tuples into pages whose allocation may never have reached the
    /// meta page; without this, scans would not visit them.
    pub fn ensure_allocated(&mut self, file: FileId, pid: PageId) -> DbResult<()> {
        let mut meta = self.read_meta(file)?;
        if pid.0 >= meta.page_count {
            meta.page_count = pid.0 + 1;
            self.write_meta(file, &meta)?;
        }
        Ok(())
    }

    pub fn root_page(&mut self, file: FileId) -> DbResult<Option<PageId>> {
        let meta = self.read_meta(file)?;
        Ok((meta.root_page != 0).then_some(PageId(meta.root_page)))
    }

    pub fn set_root_page(&mut self, file: FileId, root: PageId) -> DbResult<()> {
        let mut meta = self.read_meta(file)?;
        meta.root_page = root.0;
        self.write_meta(file, &meta)
    }

    pub fn sync(&mut self, file: FileId) -> DbResult<()> {
        self.handle(file)?.sync_all()?;
        Ok(())
    }

    pub fn sync_all(&mut self) -> DbResult<()> {
        for handle in self.handles.values_mut() {
            handle.sync_all()?;
        }
        Ok(())
    }

    fn read_meta(&mut self, file: FileId) -> DbResult<FileMeta> {
        let (page, fresh) = self.read_page(file, PageId(0))?;
        if fresh {
            return Ok(FileMeta::default());
        }
        let len = u32::from_le_bytes(
            page.data[HEADER_BYTES..HEADER_BYTES + 4]
                .try_into()
                .expect("4 bytes"),
        ) as usize;
        let start = HEADER_BYTES + 4;
        let (meta, _) = decode_from_slice(&page.data[start..start + len], bincode_config())
            .map_err(|e| DbError::Storage(format!("bad file meta: {e}")))?;
        Ok(meta)
    }

    fn write_meta(&mut self, file: FileId, meta: &FileMeta) -> DbResult<()> {
        let bytes = encode_to_vec(meta, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode file meta: {e}")))?;
        if HEADER_BYTES + 4 + bytes.len() > PAGE_SIZE {
            return Err(DbError::Storage("file meta overflows the meta page".into()));
        }

        let mut page = Page::new(file, PageId(0), PageType::Meta);
        page.write_header(&PageHeader {
            page_no: 0,
            page_type: PageType::Meta as u8,
            lsn: 0,
            checksum: 0,
        })?;
        page.data[HEADER_BYTES..HEADER_BYTES + 4]
            .copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        page.data[HEADER_BYTES + 4..HEADER_BYTES + 4 + bytes.len()].copy_from_slice(&bytes);
        self.write_page(&mut page)
    }
}
