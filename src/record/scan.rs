use std::cmp::Ordering;

use super::error::{RecordError, RecordResult};
use super::heap_file::HeapFile;
use super::page::Page;
use super::record::RecordId;
use crate::file::{BufferManager, PageId};

/// Type of the attribute a scan filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Float,
    Str,
}

/// Comparison operator applied between the record attribute and the
/// filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
    Ne,
}

impl CompOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompOp::Lt => ord.is_lt(),
            CompOp::Lte => ord.is_le(),
            CompOp::Eq => ord.is_eq(),
            CompOp::Gte => ord.is_ge(),
            CompOp::Gt => ord.is_gt(),
            CompOp::Ne => ord.is_ne(),
        }
    }
}

/// Predicate over a fixed attribute window of each record
#[derive(Debug, Clone)]
pub struct Filter {
    /// Byte offset of the attribute within the record
    pub offset: usize,
    /// Attribute width in bytes
    pub length: usize,
    pub attr_type: AttrType,
    pub op: CompOp,
    /// Comparison value, exactly `length` bytes
    pub value: Vec<u8>,
}

/// Forward scan over a heap file, optionally filtered.
///
/// The scan owns its own `HeapFile` handle and keeps at most one data
/// page pinned as it advances. Records deleted mid-scan through
/// [`HeapFileScan::delete_record`] are never returned again.
pub struct HeapFileScan {
    heap: HeapFile,
    filter: Option<Filter>,
    mark: Option<ScanMark>,
}

#[derive(Debug, Clone, Copy)]
struct ScanMark {
    page_no: Option<PageId>,
    rec: Option<RecordId>,
}

impl HeapFileScan {
    /// Open a scan over the heap file at `path`
    pub fn open(bm: &mut BufferManager, path: &str) -> RecordResult<HeapFileScan> {
        Ok(HeapFileScan {
            heap: HeapFile::open(bm, path)?,
            filter: None,
            mark: None,
        })
    }

    /// Install the scan predicate. `None` accepts every record.
    ///
    /// `length` must be at least 1; `Int` and `Float` attributes must be
    /// exactly 4 bytes wide; the filter value must be exactly `length`
    /// bytes.
    pub fn start_scan(&mut self, filter: Option<Filter>) -> RecordResult<()> {
        if let Some(filter) = &filter {
            if filter.length < 1 {
                return Err(RecordError::BadScanParam(
                    "length must be at least 1".to_string(),
                ));
            }
            let fixed_width = match filter.attr_type {
                AttrType::Int => Some(size_of::<i32>()),
                AttrType::Float => Some(size_of::<f32>()),
                AttrType::Str => None,
            };
            if let Some(width) = fixed_width {
                if filter.length != width {
                    return Err(RecordError::BadScanParam(format!(
                        "{:?} attributes are {} bytes, got length {}",
                        filter.attr_type, width, filter.length
                    )));
                }
            }
            if filter.value.len() != filter.length {
                return Err(RecordError::BadScanParam(format!(
                    "filter value is {} bytes, expected {}",
                    filter.value.len(),
                    filter.length
                )));
            }
        }

        self.filter = filter;
        Ok(())
    }

    /// Advance to the next matching record and return its RID, or
    /// `None` once the page list is exhausted. Pages with no records are
    /// skipped silently.
    pub fn scan_next(&mut self, bm: &mut BufferManager) -> RecordResult<Option<RecordId>> {
        let mut page_no = match self.heap.cur_page_no {
            Some(page_no) => page_no,
            None => {
                // Not positioned (fresh scan or after end_scan): start at
                // the first data page
                let first = self.heap.read_header(bm)?.first_page;
                bm.read_page(self.heap.file, first)?;
                self.heap.cur_page_no = Some(first);
                self.heap.cur_dirty = false;
                self.heap.cur_rec = None;
                first
            }
        };

        loop {
            // A cur_rec from another page means the cursor was repositioned;
            // scanning then restarts at that page's first record
            let after = self
                .heap
                .cur_rec
                .filter(|rec| rec.page_id == page_no)
                .map(|rec| rec.slot_id);

            let buf = bm.pinned_page(self.heap.file, page_no)?;
            let page = Page::from_buffer(buf)?;

            match page.next_record(after) {
                Some(slot_id) => {
                    let rid = RecordId::new(page_no, slot_id);
                    self.heap.cur_rec = Some(rid);
                    let rec = page.record(slot_id)?;
                    if self.matches(rec) {
                        return Ok(Some(rid));
                    }
                }
                None => match page.next_page() {
                    Some(next) => {
                        self.heap.switch_to_page(bm, next)?;
                        self.heap.cur_rec = None;
                        page_no = next;
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    /// Test the filter against a record's bytes
    fn matches(&self, rec: &[u8]) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let Some(end) = filter.offset.checked_add(filter.length) else {
            return false;
        };
        if end > rec.len() {
            return false;
        }
        let field = &rec[filter.offset..end];

        let ord = match filter.attr_type {
            AttrType::Int => {
                let mut attr = [0u8; 4];
                let mut want = [0u8; 4];
                attr.copy_from_slice(field);
                want.copy_from_slice(&filter.value);
                Some(i32::from_le_bytes(attr).cmp(&i32::from_le_bytes(want)))
            }
            AttrType::Float => {
                let mut attr = [0u8; 4];
                let mut want = [0u8; 4];
                attr.copy_from_slice(field);
                want.copy_from_slice(&filter.value);
                f32::from_le_bytes(attr).partial_cmp(&f32::from_le_bytes(want))
            }
            AttrType::Str => Some(field.cmp(filter.value.as_slice())),
        };

        match ord {
            Some(ord) => filter.op.matches(ord),
            // NaN on either side satisfies only "not equal"
            None => filter.op == CompOp::Ne,
        }
    }

    /// Snapshot the scan position for a later `reset_scan`
    pub fn mark_scan(&mut self) {
        self.mark = Some(ScanMark {
            page_no: self.heap.cur_page_no,
            rec: self.heap.cur_rec,
        });
    }

    /// Rewind to the last `mark_scan` position. If the mark is on another
    /// page, the current page is unpinned and the marked page re-read
    /// clean.
    pub fn reset_scan(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        let mark = self.mark.ok_or(RecordError::NoMark)?;

        if mark.page_no != self.heap.cur_page_no {
            if let Some(cur) = self.heap.cur_page_no.take() {
                bm.unpin_page(self.heap.file, cur, self.heap.cur_dirty)?;
                self.heap.cur_dirty = false;
            }
            if let Some(page_no) = mark.page_no {
                bm.read_page(self.heap.file, page_no)?;
            }
            self.heap.cur_page_no = mark.page_no;
        }
        self.heap.cur_rec = mark.rec;
        Ok(())
    }

    /// Unpin the cursor page and forget the scan position
    pub fn end_scan(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        if let Some(cur) = self.heap.cur_page_no.take() {
            bm.unpin_page(self.heap.file, cur, self.heap.cur_dirty)?;
            self.heap.cur_dirty = false;
            self.heap.cur_rec = None;
        }
        Ok(())
    }

    /// The record the scan currently stands on. The cursor page stays
    /// pinned; the bytes are valid until the next buffer operation.
    pub fn record<'p>(&self, bm: &'p mut BufferManager) -> RecordResult<&'p [u8]> {
        let rid = self.heap.cur_rec.ok_or(RecordError::NoCurrentRecord)?;
        if self.heap.cur_page_no != Some(rid.page_id) {
            return Err(RecordError::NoCurrentRecord);
        }

        let buf = bm.pinned_page(self.heap.file, rid.page_id)?;
        Page::from_buffer(buf)?.into_record(rid.slot_id)
    }

    /// Delete the record the scan currently stands on and update the
    /// file's record count
    pub fn delete_record(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        let rid = self.heap.cur_rec.ok_or(RecordError::NoCurrentRecord)?;
        if self.heap.cur_page_no != Some(rid.page_id) {
            return Err(RecordError::NoCurrentRecord);
        }

        let buf = bm.pinned_page(self.heap.file, rid.page_id)?;
        Page::from_buffer(buf)?.delete_record(rid.slot_id)?;
        self.heap.cur_dirty = true;

        let mut header = self.heap.read_header(bm)?;
        header.rec_cnt -= 1;
        self.heap.write_header(bm, &header)?;
        Ok(())
    }

    /// Mark the cursor page dirty
    pub fn mark_dirty(&mut self) {
        self.heap.cur_dirty = true;
    }

    /// Number of records in the file
    pub fn rec_count(&self, bm: &mut BufferManager) -> RecordResult<u32> {
        self.heap.rec_count(bm)
    }

    /// End the scan and close the underlying heap file
    pub fn close(mut self, bm: &mut BufferManager) -> RecordResult<()> {
        self.end_scan(bm)?;
        self.heap.close(bm)
    }
}

/// Appending writer over a heap file. Inserts go to the file's last
/// page, chaining a fresh page onto the list when the last one fills up.
pub struct InsertFileScan {
    heap: HeapFile,
}

impl InsertFileScan {
    /// Open an insert scan over the heap file at `path`
    pub fn open(bm: &mut BufferManager, path: &str) -> RecordResult<InsertFileScan> {
        Ok(InsertFileScan {
            heap: HeapFile::open(bm, path)?,
        })
    }

    /// Insert a record and return its RID
    pub fn insert_record(&mut self, bm: &mut BufferManager, rec: &[u8]) -> RecordResult<RecordId> {
        if rec.len() > Page::MAX_RECORD_SIZE {
            // Will never fit on any page, so don't even try
            return Err(RecordError::RecordTooLarge {
                len: rec.len(),
                max: Page::MAX_RECORD_SIZE,
            });
        }

        let page_no = match self.heap.cur_page_no {
            Some(page_no) => page_no,
            None => {
                let last = self.heap.read_header(bm)?.last_page;
                bm.read_page(self.heap.file, last)?;
                self.heap.cur_page_no = Some(last);
                self.heap.cur_dirty = false;
                last
            }
        };

        let buf = bm.pinned_page(self.heap.file, page_no)?;
        let mut page = Page::from_buffer(buf)?;

        match page.insert_record(rec) {
            Ok(slot_id) => {
                let rid = RecordId::new(page_no, slot_id);
                self.heap.cur_dirty = true;
                self.heap.cur_rec = Some(rid);
                self.bump_rec_count(bm)?;
                Ok(rid)
            }
            Err(RecordError::NoSpace) => {
                let (new_page_no, new_buf) = bm.alloc_page(self.heap.file)?;
                Page::init(new_buf, new_page_no)?;

                // Chain the full page to the new tail, then retire it
                let old_buf = bm.pinned_page(self.heap.file, page_no)?;
                Page::from_buffer(old_buf)?.set_next_page(Some(new_page_no));
                bm.unpin_page(self.heap.file, page_no, true)?;
                self.heap.cur_page_no = Some(new_page_no);
                self.heap.cur_dirty = false;

                let mut header = self.heap.read_header(bm)?;
                header.last_page = new_page_no;
                header.page_cnt += 1;
                self.heap.write_header(bm, &header)?;

                // Must fit now: the new page is empty and the size check
                // passed
                let new_buf = bm.pinned_page(self.heap.file, new_page_no)?;
                let slot_id = Page::from_buffer(new_buf)?.insert_record(rec)?;
                let rid = RecordId::new(new_page_no, slot_id);
                self.heap.cur_dirty = true;
                self.heap.cur_rec = Some(rid);
                self.bump_rec_count(bm)?;
                Ok(rid)
            }
            Err(err) => Err(err),
        }
    }

    fn bump_rec_count(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        let mut header = self.heap.read_header(bm)?;
        header.rec_cnt += 1;
        self.heap.write_header(bm, &header)
    }

    /// Number of records in the file
    pub fn rec_count(&self, bm: &mut BufferManager) -> RecordResult<u32> {
        self.heap.rec_count(bm)
    }

    /// Close the underlying heap file
    pub fn close(self, bm: &mut BufferManager) -> RecordResult<()> {
        self.heap.close(bm)
    }
}
