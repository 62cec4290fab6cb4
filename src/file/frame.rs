use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::PageId;
use super::error::{BufResult, BufferError};
use super::file_manager::FileHandle;

/// Identity of a page held in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BufferKey {
    pub file: FileHandle,
    pub page_id: PageId,
}

/// Bookkeeping for one frame of the buffer pool.
///
/// `frame_no` is the frame's identity and survives every state change;
/// the remaining fields describe the page currently bound to the frame,
/// if any.
#[derive(Debug)]
pub(crate) struct FrameDesc {
    pub frame_no: usize,
    pub file: Option<FileHandle>,
    pub page_id: PageId,
    pub pin_count: u32,
    pub dirty: bool,
    pub ref_bit: bool,
    pub valid: bool,
}

impl FrameDesc {
    pub fn new(frame_no: usize) -> Self {
        Self {
            frame_no,
            file: None,
            page_id: 0,
            pin_count: 0,
            dirty: false,
            ref_bit: false,
            valid: false,
        }
    }

    /// Bind the frame to a page, pinned once on behalf of the caller
    pub fn set(&mut self, file: FileHandle, page_id: PageId) {
        self.file = Some(file);
        self.page_id = page_id;
        self.pin_count = 1;
        self.dirty = false;
        self.ref_bit = true;
        self.valid = true;
    }

    /// Return the frame to its unbound state
    pub fn clear(&mut self) {
        self.file = None;
        self.page_id = 0;
        self.pin_count = 0;
        self.dirty = false;
        self.ref_bit = false;
        self.valid = false;
    }
}

/// Residency index: which frame, if any, holds a given page
#[derive(Debug)]
pub(crate) struct FrameTable {
    map: HashMap<BufferKey, usize>,
}

impl FrameTable {
    /// Sized at 1.2x the pool so the table never grows under a full pool
    pub fn new(pool_size: usize) -> Self {
        Self {
            map: HashMap::with_capacity(pool_size + pool_size / 5),
        }
    }

    pub fn lookup(&self, key: BufferKey) -> Option<usize> {
        self.map.get(&key).copied()
    }

    /// Record that `key` lives in frame `frame_no`. The key must not
    /// already be mapped.
    pub fn insert(&mut self, key: BufferKey, frame_no: usize) -> BufResult<()> {
        match self.map.entry(key) {
            Entry::Occupied(_) => Err(BufferError::DuplicateMapping(key.page_id)),
            Entry::Vacant(slot) => {
                slot.insert(frame_no);
                Ok(())
            }
        }
    }

    /// Drop the mapping for `key`. The key must be mapped.
    pub fn remove(&mut self, key: BufferKey) -> BufResult<usize> {
        self.map
            .remove(&key)
            .ok_or(BufferError::PageNotResident(key.page_id))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}
