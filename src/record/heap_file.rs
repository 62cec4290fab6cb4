use log::warn;

use super::error::{RecordError, RecordResult};
use super::page::Page;
use super::record::RecordId;
use crate::file::{BufferManager, FileHandle, PageId};

/// Maximum stored length of a heap file's name
pub const MAX_NAME_LEN: usize = 64;

/// Contents of the header page anchoring a heap file.
///
/// The header page is the file's first page; data pages form a singly
/// linked list from `first_page` to `last_page`.
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub file_name: String,
    pub first_page: PageId,
    pub last_page: PageId,
    pub page_cnt: u32,
    pub rec_cnt: u32,
}

impl FileHeader {
    const SIZE: usize = MAX_NAME_LEN + 16;

    pub fn write(&self, buffer: &mut [u8]) -> RecordResult<()> {
        let name = self.file_name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(RecordError::NameTooLong(self.file_name.clone()));
        }

        buffer[..Self::SIZE].fill(0);
        buffer[..name.len()].copy_from_slice(name);
        let base = MAX_NAME_LEN;
        buffer[base..base + 4].copy_from_slice(&(self.first_page as u32).to_le_bytes());
        buffer[base + 4..base + 8].copy_from_slice(&(self.last_page as u32).to_le_bytes());
        buffer[base + 8..base + 12].copy_from_slice(&self.page_cnt.to_le_bytes());
        buffer[base + 12..base + 16].copy_from_slice(&self.rec_cnt.to_le_bytes());
        Ok(())
    }

    pub fn read(buffer: &[u8]) -> RecordResult<Self> {
        if buffer.len() < Self::SIZE {
            return Err(RecordError::Corrupt(format!(
                "not enough data for file header: {} bytes",
                buffer.len()
            )));
        }

        let name_end = buffer[..MAX_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME_LEN);
        let file_name = std::str::from_utf8(&buffer[..name_end])
            .map_err(|_| RecordError::Corrupt("file name is not valid UTF-8".to_string()))?
            .to_string();

        let base = MAX_NAME_LEN;
        let word = |at: usize| {
            u32::from_le_bytes([
                buffer[base + at],
                buffer[base + at + 1],
                buffer[base + at + 2],
                buffer[base + at + 3],
            ])
        };

        Ok(Self {
            file_name,
            first_page: word(0) as PageId,
            last_page: word(4) as PageId,
            page_cnt: word(8),
            rec_cnt: word(12),
        })
    }
}

/// An open heap file: an unordered collection of variable-length records
/// in a linked list of slotted pages.
///
/// The header page stays pinned for the lifetime of the handle; at most
/// one data page (the cursor) is pinned besides it. Handles must be
/// released with [`HeapFile::close`] so both pins return to the pool.
pub struct HeapFile {
    pub(crate) file: FileHandle,
    file_name: String,
    pub(crate) header_page_no: PageId,
    pub(crate) hdr_dirty: bool,
    /// Currently pinned data page, if any
    pub(crate) cur_page_no: Option<PageId>,
    pub(crate) cur_dirty: bool,
    /// Last record returned or inserted
    pub(crate) cur_rec: Option<RecordId>,
    closed: bool,
}

impl HeapFile {
    /// Create an empty heap file: a header page plus one empty data page.
    /// Fails if `path` already exists.
    pub fn create(bm: &mut BufferManager, path: &str) -> RecordResult<()> {
        let fm = bm.file_manager_mut();
        fm.create_file(path)?;
        let file = fm.open_file(path)?;

        let (header_page_no, _) = bm.alloc_page(file)?;
        let (data_page_no, data_buf) = bm.alloc_page(file)?;
        Page::init(data_buf, data_page_no)?;

        let header = FileHeader {
            file_name: path.to_string(),
            first_page: data_page_no,
            last_page: data_page_no,
            page_cnt: 1,
            rec_cnt: 0,
        };
        header.write(bm.pinned_page(file, header_page_no)?)?;

        bm.unpin_page(file, header_page_no, true)?;
        bm.unpin_page(file, data_page_no, true)?;
        bm.flush_file(file)?;
        bm.file_manager_mut().close_file(file)?;
        Ok(())
    }

    /// Remove a heap file, evicting any of its pages still cached
    pub fn destroy(bm: &mut BufferManager, path: &str) -> RecordResult<()> {
        if let Some(file) = bm.file_manager().handle_for(path) {
            bm.flush_file(file)?;
        }
        bm.file_manager_mut().remove_file(path)?;
        Ok(())
    }

    /// Open an existing heap file, pinning its header page and its first
    /// data page
    pub fn open(bm: &mut BufferManager, path: &str) -> RecordResult<HeapFile> {
        let file = bm.file_manager_mut().open_file(path)?;
        let header_page_no = bm.file_manager_mut().first_page(file)?;

        let header = match FileHeader::read(bm.read_page(file, header_page_no)?) {
            Ok(header) => header,
            Err(err) => {
                let _ = bm.unpin_page(file, header_page_no, false);
                return Err(err);
            }
        };

        let first_data = header.first_page;
        if let Err(err) = bm.read_page(file, first_data) {
            let _ = bm.unpin_page(file, header_page_no, false);
            return Err(err.into());
        }

        Ok(HeapFile {
            file,
            file_name: header.file_name,
            header_page_no,
            hdr_dirty: false,
            cur_page_no: Some(first_data),
            cur_dirty: false,
            cur_rec: None,
            closed: false,
        })
    }

    /// Name recorded in the file header
    pub fn name(&self) -> &str {
        &self.file_name
    }

    /// Number of records in the file
    pub fn rec_count(&self, bm: &mut BufferManager) -> RecordResult<u32> {
        Ok(self.read_header(bm)?.rec_cnt)
    }

    /// Number of data pages in the file
    pub fn page_count(&self, bm: &mut BufferManager) -> RecordResult<u32> {
        Ok(self.read_header(bm)?.page_cnt)
    }

    pub(crate) fn read_header(&self, bm: &mut BufferManager) -> RecordResult<FileHeader> {
        FileHeader::read(bm.pinned_page(self.file, self.header_page_no)?)
    }

    pub(crate) fn write_header(
        &mut self,
        bm: &mut BufferManager,
        header: &FileHeader,
    ) -> RecordResult<()> {
        header.write(bm.pinned_page(self.file, self.header_page_no)?)?;
        self.hdr_dirty = true;
        Ok(())
    }

    /// Move the cursor pin from the current data page (if any) to
    /// `page_id`
    pub(crate) fn switch_to_page(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
    ) -> RecordResult<()> {
        if let Some(cur) = self.cur_page_no.take() {
            bm.unpin_page(self.file, cur, self.cur_dirty)?;
            self.cur_dirty = false;
        }
        bm.read_page(self.file, page_id)?;
        self.cur_page_no = Some(page_id);
        Ok(())
    }

    /// Retrieve the record identified by `rid`. If the record is not on
    /// the cursor page, the cursor moves there first. The returned bytes
    /// live in the buffer pool and stay valid until the next operation
    /// on the buffer manager.
    pub fn record<'p>(
        &mut self,
        bm: &'p mut BufferManager,
        rid: RecordId,
    ) -> RecordResult<&'p [u8]> {
        if self.cur_page_no != Some(rid.page_id) {
            self.switch_to_page(bm, rid.page_id)?;
        }
        self.cur_rec = Some(rid);

        let buf = bm.pinned_page(self.file, rid.page_id)?;
        Page::from_buffer(buf)?.into_record(rid.slot_id)
    }

    /// Release the cursor and header pins, flush the file's pages, and
    /// close it. Both unpins are attempted even if the first fails; the
    /// file is only flushed and closed once this handle's pins are
    /// released cleanly, so a second handle on the same file survives a
    /// failed close.
    pub fn close(mut self, bm: &mut BufferManager) -> RecordResult<()> {
        let mut first_err: Option<RecordError> = None;

        if let Some(cur) = self.cur_page_no.take() {
            if let Err(err) = bm.unpin_page(self.file, cur, self.cur_dirty) {
                first_err.get_or_insert(err.into());
            }
        }
        if let Err(err) = bm.unpin_page(self.file, self.header_page_no, self.hdr_dirty) {
            first_err.get_or_insert(err.into());
        }
        if first_err.is_none() {
            if let Err(err) = bm.flush_file(self.file) {
                first_err.get_or_insert(err.into());
            }
        }
        if first_err.is_none() {
            if let Err(err) = bm.file_manager_mut().close_file(self.file) {
                first_err.get_or_insert(err.into());
            }
        }

        self.closed = true;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "heap file {} dropped without close; its buffer pins leak",
                self.file_name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{FileError, PAGE_SIZE, PagedFileManager};
    use tempfile::TempDir;

    fn setup_test_env(pool_size: usize) -> (TempDir, BufferManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_manager = PagedFileManager::new();
        let bm = BufferManager::with_capacity(file_manager, pool_size);
        (temp_dir, bm)
    }

    fn file_path(temp_dir: &TempDir) -> String {
        temp_dir.path().join("test.heap").display().to_string()
    }

    #[test]
    fn test_file_header_round_trip() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let header = FileHeader {
            file_name: "orders.heap".to_string(),
            first_page: 1,
            last_page: 7,
            page_cnt: 7,
            rec_cnt: 1234,
        };
        header.write(&mut buffer).unwrap();

        let restored = FileHeader::read(&buffer).unwrap();
        assert_eq!(restored.file_name, "orders.heap");
        assert_eq!(restored.first_page, 1);
        assert_eq!(restored.last_page, 7);
        assert_eq!(restored.page_cnt, 7);
        assert_eq!(restored.rec_cnt, 1234);
    }

    #[test]
    fn test_file_header_name_too_long() {
        let mut buffer = vec![0u8; PAGE_SIZE];
        let header = FileHeader {
            file_name: "x".repeat(MAX_NAME_LEN + 1),
            first_page: 1,
            last_page: 1,
            page_cnt: 1,
            rec_cnt: 0,
        };
        assert!(matches!(
            header.write(&mut buffer),
            Err(RecordError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_create_lays_out_header_and_data_page() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = temp_dir.path().join("t.heap").display().to_string();

        HeapFile::create(&mut bm, &path).unwrap();
        // Creation leaves nothing pinned or resident
        assert_eq!(bm.resident_page_count(), 0);

        let heap = HeapFile::open(&mut bm, &path).unwrap();
        assert_eq!(heap.rec_count(&mut bm).unwrap(), 0);
        assert_eq!(heap.page_count(&mut bm).unwrap(), 1);

        let header = heap.read_header(&mut bm).unwrap();
        assert_eq!(header.first_page, header.last_page);

        let buf = bm.pinned_page(heap.file, header.first_page).unwrap();
        let page = Page::from_buffer(buf).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.next_page(), None);

        heap.close(&mut bm).unwrap();
    }

    #[test]
    fn test_create_existing_file_fails() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();
        let result = HeapFile::create(&mut bm, &path);
        assert!(matches!(
            result,
            Err(RecordError::File(FileError::FileAlreadyExists(_)))
        ));
    }

    #[test]
    fn test_open_pins_header_and_cursor() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();
        let heap = HeapFile::open(&mut bm, &path).unwrap();

        assert_eq!(bm.pin_count_of(heap.file, heap.header_page_no), Some(1));
        let cursor = heap.cur_page_no.unwrap();
        assert_eq!(bm.pin_count_of(heap.file, cursor), Some(1));
        assert_eq!(heap.cur_rec, None);

        heap.close(&mut bm).unwrap();
        assert_eq!(bm.resident_page_count(), 0);
    }

    #[test]
    fn test_close_releases_pins_even_twice_opened() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();
        let heap1 = HeapFile::open(&mut bm, &path).unwrap();
        let heap2 = HeapFile::open(&mut bm, &path).unwrap();

        // Same underlying handle; pins stack per open
        assert_eq!(bm.pin_count_of(heap1.file, heap1.header_page_no), Some(2));

        // The first close still sees heap2's pins and cannot flush
        assert!(heap1.close(&mut bm).is_err());
        heap2.close(&mut bm).unwrap();
    }

    #[test]
    fn test_destroy_removes_file() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();
        HeapFile::destroy(&mut bm, &path).unwrap();
        assert!(matches!(
            HeapFile::open(&mut bm, &path),
            Err(RecordError::File(FileError::FileNotFound(_)))
        ));
    }

    #[test]
    fn test_record_lookup_on_cursor_page() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();

        // Place records through the raw page layer on the single data page
        let mut heap = HeapFile::open(&mut bm, &path).unwrap();
        let data_page = heap.cur_page_no.unwrap();
        {
            let buf = bm.pinned_page(heap.file, data_page).unwrap();
            let mut page = Page::from_buffer(buf).unwrap();
            page.insert_record(b"alpha").unwrap();
            page.insert_record(b"beta").unwrap();
        }

        let rid = RecordId::new(data_page, 1);
        assert_eq!(heap.record(&mut bm, rid).unwrap(), b"beta");
        assert_eq!(heap.cur_rec, Some(rid));
        // Same-page lookups stay on the pinned cursor
        assert_eq!(heap.cur_page_no, Some(data_page));

        heap.close(&mut bm).unwrap();
    }

    #[test]
    fn test_record_unknown_slot() {
        let (temp_dir, mut bm) = setup_test_env(8);
        let path = file_path(&temp_dir);

        HeapFile::create(&mut bm, &path).unwrap();
        let mut heap = HeapFile::open(&mut bm, &path).unwrap();
        let data_page = heap.cur_page_no.unwrap();

        let result = heap.record(&mut bm, RecordId::new(data_page, 3));
        assert!(matches!(result, Err(RecordError::InvalidSlot(_, 3))));

        heap.close(&mut bm).unwrap();
    }
}
