use super::error::{RecordError, RecordResult};
use super::record::SlotId;
use crate::file::{PAGE_SIZE, PageId};

/// End-of-list marker in the page link
const NO_PAGE: u32 = u32::MAX;

/// Offset value marking a dead slot
const DEAD_OFFSET: u16 = u16::MAX;

/// Bytes per slot directory entry: offset (u16) + length (u16)
const SLOT_SIZE: usize = 4;

/// Page header stored at the beginning of each data page
#[derive(Debug, Clone, Copy)]
struct PageHeader {
    page_no: u32,    // 4 bytes - This page's own number
    next_page: u32,  // 4 bytes - Link to next page (NO_PAGE = end of list)
    slot_count: u16, // 2 bytes - Slot directory entries, dead ones included
    free_ptr: u16,   // 2 bytes - Offset of the first unused data byte
    _padding: [u8; 4],
}

impl PageHeader {
    const SIZE: usize = 16;

    fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[0..4].copy_from_slice(&self.page_no.to_le_bytes());
        result[4..8].copy_from_slice(&self.next_page.to_le_bytes());
        result[8..10].copy_from_slice(&self.slot_count.to_le_bytes());
        result[10..12].copy_from_slice(&self.free_ptr.to_le_bytes());
        result
    }

    fn deserialize(data: &[u8]) -> RecordResult<Self> {
        if data.len() < Self::SIZE {
            return Err(RecordError::Corrupt(format!(
                "not enough data for page header: {} bytes",
                data.len()
            )));
        }

        let page_no = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let next_page = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let slot_count = u16::from_le_bytes([data[8], data[9]]);
        let free_ptr = u16::from_le_bytes([data[10], data[11]]);

        Ok(Self {
            page_no,
            next_page,
            slot_count,
            free_ptr,
            _padding: [0; 4],
        })
    }
}

/// Slotted data page operating directly on buffer pool memory.
///
/// Record bytes grow up from the header; the slot directory grows down
/// from the end of the page. Deleting a record compacts the data area, so
/// free space is always one contiguous region between the two. Slot
/// numbers of surviving records never change.
pub struct Page<'a> {
    buffer: &'a mut [u8],
    header: PageHeader,
}

impl<'a> Page<'a> {
    /// Largest record a freshly initialised page can hold
    pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - PageHeader::SIZE - SLOT_SIZE;

    /// Format `buffer` as an empty page with no successor
    pub fn init(buffer: &'a mut [u8], page_no: PageId) -> RecordResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(RecordError::Corrupt(format!(
                "buffer must be PAGE_SIZE ({}) bytes, got {}",
                PAGE_SIZE,
                buffer.len()
            )));
        }

        buffer.fill(0);
        let header = PageHeader {
            page_no: page_no as u32,
            next_page: NO_PAGE,
            slot_count: 0,
            free_ptr: PageHeader::SIZE as u16,
            _padding: [0; 4],
        };
        buffer[..PageHeader::SIZE].copy_from_slice(&header.serialize());

        Ok(Self { buffer, header })
    }

    /// Wrap an existing page buffer (zero-copy)
    pub fn from_buffer(buffer: &'a mut [u8]) -> RecordResult<Self> {
        if buffer.len() != PAGE_SIZE {
            return Err(RecordError::Corrupt(format!(
                "invalid page size: {} bytes",
                buffer.len()
            )));
        }

        let header = PageHeader::deserialize(&buffer[..PageHeader::SIZE])?;

        let free_ptr = header.free_ptr as usize;
        let slots_size = header.slot_count as usize * SLOT_SIZE;
        if free_ptr < PageHeader::SIZE
            || slots_size > PAGE_SIZE - PageHeader::SIZE
            || free_ptr > PAGE_SIZE - slots_size
        {
            return Err(RecordError::Corrupt(
                "page layout exceeds page size".to_string(),
            ));
        }

        Ok(Self { buffer, header })
    }

    fn store_header(&mut self) {
        self.buffer[..PageHeader::SIZE].copy_from_slice(&self.header.serialize());
    }

    fn slot_pos(slot_id: SlotId) -> usize {
        PAGE_SIZE - (slot_id + 1) * SLOT_SIZE
    }

    fn slot(&self, slot_id: SlotId) -> (u16, u16) {
        let pos = Self::slot_pos(slot_id);
        let offset = u16::from_le_bytes([self.buffer[pos], self.buffer[pos + 1]]);
        let len = u16::from_le_bytes([self.buffer[pos + 2], self.buffer[pos + 3]]);
        (offset, len)
    }

    fn set_slot(&mut self, slot_id: SlotId, offset: u16, len: u16) {
        let pos = Self::slot_pos(slot_id);
        self.buffer[pos..pos + 2].copy_from_slice(&offset.to_le_bytes());
        self.buffer[pos + 2..pos + 4].copy_from_slice(&len.to_le_bytes());
    }

    fn slot_alive(&self, slot_id: SlotId) -> bool {
        self.slot(slot_id).0 != DEAD_OFFSET
    }

    /// Bytes available for a new record and, if needed, its slot entry
    pub fn free_space(&self) -> usize {
        let slots_start = PAGE_SIZE - self.header.slot_count as usize * SLOT_SIZE;
        slots_start - self.header.free_ptr as usize
    }

    /// Number of live records on the page
    pub fn record_count(&self) -> usize {
        (0..self.header.slot_count as usize)
            .filter(|&s| self.slot_alive(s))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn page_no(&self) -> PageId {
        self.header.page_no as PageId
    }

    /// The successor page in the file's page list
    pub fn next_page(&self) -> Option<PageId> {
        if self.header.next_page == NO_PAGE {
            None
        } else {
            Some(self.header.next_page as PageId)
        }
    }

    pub fn set_next_page(&mut self, page_id: Option<PageId>) {
        self.header.next_page = match page_id {
            Some(id) => id as u32,
            None => NO_PAGE,
        };
        self.store_header();
    }

    /// Insert a record, reusing a dead slot when one exists.
    /// Fails with `NoSpace` when the record (plus a new slot entry if no
    /// dead slot is free) does not fit.
    pub fn insert_record(&mut self, data: &[u8]) -> RecordResult<SlotId> {
        let reuse = (0..self.header.slot_count as usize).find(|&s| !self.slot_alive(s));

        let needed = data.len() + if reuse.is_none() { SLOT_SIZE } else { 0 };
        if needed > self.free_space() {
            return Err(RecordError::NoSpace);
        }

        let offset = self.header.free_ptr as usize;
        self.buffer[offset..offset + data.len()].copy_from_slice(data);

        let slot_id = match reuse {
            Some(slot_id) => slot_id,
            None => {
                self.header.slot_count += 1;
                self.header.slot_count as usize - 1
            }
        };
        self.set_slot(slot_id, offset as u16, data.len() as u16);
        self.header.free_ptr += data.len() as u16;
        self.store_header();

        Ok(slot_id)
    }

    /// Delete a record and compact the data area. Other records keep
    /// their slot numbers.
    pub fn delete_record(&mut self, slot_id: SlotId) -> RecordResult<()> {
        if slot_id >= self.header.slot_count as usize || !self.slot_alive(slot_id) {
            return Err(RecordError::InvalidSlot(self.page_no(), slot_id));
        }

        let (offset, len) = self.slot(slot_id);
        let offset = offset as usize;
        let len = len as usize;
        let free_ptr = self.header.free_ptr as usize;

        self.buffer.copy_within(offset + len..free_ptr, offset);

        // Records that sat above the hole moved down by `len`
        for s in 0..self.header.slot_count as usize {
            if s == slot_id || !self.slot_alive(s) {
                continue;
            }
            let (o, l) = self.slot(s);
            if o as usize > offset {
                self.set_slot(s, o - len as u16, l);
            }
        }

        self.header.free_ptr -= len as u16;
        self.set_slot(slot_id, DEAD_OFFSET, 0);

        // Trailing dead slots give their directory space back
        while self.header.slot_count > 0
            && !self.slot_alive(self.header.slot_count as usize - 1)
        {
            self.header.slot_count -= 1;
        }
        self.store_header();

        Ok(())
    }

    /// Get the record stored in a slot
    pub fn record(&self, slot_id: SlotId) -> RecordResult<&[u8]> {
        if slot_id >= self.header.slot_count as usize || !self.slot_alive(slot_id) {
            return Err(RecordError::InvalidSlot(self.page_no(), slot_id));
        }
        let (offset, len) = self.slot(slot_id);
        Ok(&self.buffer[offset as usize..offset as usize + len as usize])
    }

    /// Like `record`, but the returned slice borrows the underlying
    /// frame rather than this wrapper
    pub fn into_record(self, slot_id: SlotId) -> RecordResult<&'a [u8]> {
        if slot_id >= self.header.slot_count as usize || !self.slot_alive(slot_id) {
            return Err(RecordError::InvalidSlot(self.page_no(), slot_id));
        }
        let (offset, len) = self.slot(slot_id);
        let buffer: &'a [u8] = self.buffer;
        Ok(&buffer[offset as usize..offset as usize + len as usize])
    }

    /// First live slot on the page
    pub fn first_record(&self) -> Option<SlotId> {
        self.next_record(None)
    }

    /// Next live slot after `after`, in slot order. `None` starts from
    /// the beginning of the page.
    pub fn next_record(&self, after: Option<SlotId>) -> Option<SlotId> {
        let start = after.map_or(0, |s| s + 1);
        (start..self.header.slot_count as usize).find(|&s| self.slot_alive(s))
    }
}
